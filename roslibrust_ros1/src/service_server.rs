//! The service server engine (§4.6): accepts client connections, validates the service
//! handshake, and dispatches each request frame to a user-provided handler.

use crate::error::Ros1Error;
use crate::node::actor::NodeServerHandle;
use crate::tcpros::{self, ConnectionHeader};
use abort_on_drop::ChildTask;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};

/// Type-erased request handler: takes already-serialized request bytes, returns either
/// serialized response bytes or an error string to report back to the client.
pub(crate) type RawServiceHandler =
    Arc<dyn Fn(Vec<u8>) -> Result<Vec<u8>, String> + Send + Sync>;

/// A live service advertisement. Dropping the last clone's owning handle stops accepting new
/// connections and unregisters the service from the Master.
pub struct ServiceServer {
    service_name: String,
    _accept_task: ChildTask<()>,
    node_handle: NodeServerHandle,
}

impl ServiceServer {
    pub(crate) async fn new(
        node_name: &str,
        service_name: &str,
        host_addr: std::net::Ipv4Addr,
        service_type: &str,
        md5sum: &str,
        handler: RawServiceHandler,
        node_handle: NodeServerHandle,
    ) -> std::io::Result<(Self, u16)> {
        let bind_addr = SocketAddr::from((host_addr, 0));
        let tcp_listener = TcpListener::bind(bind_addr).await?;
        let port = tcp_listener.local_addr()?.port();

        let response_header = ConnectionHeader {
            caller_id: node_name.to_owned(),
            topic: None,
            service: Some(service_name.to_owned()),
            topic_type: service_type.to_owned(),
            md5sum: Some(md5sum.to_owned()),
            message_definition: String::new(),
            latching: false,
            persistent: false,
            tcp_nodelay: false,
            error: None,
        };

        let accept_name = service_name.to_owned();
        let accept_header = response_header.clone();
        let task = tokio::spawn(async move {
            accept_loop(tcp_listener, accept_name, accept_header, handler).await
        });

        Ok((
            Self {
                service_name: service_name.to_owned(),
                _accept_task: task.into(),
                node_handle,
            },
            port,
        ))
    }
}

impl Drop for ServiceServer {
    fn drop(&mut self) {
        log::debug!("Unadvertising service {}", self.service_name);
        let node_handle = self.node_handle.clone();
        let service_name = self.service_name.clone();
        tokio::spawn(async move {
            let _ = node_handle.unregister_service(&service_name).await;
        });
    }
}

async fn accept_loop(
    listener: TcpListener,
    service_name: String,
    response_header: ConnectionHeader,
    handler: RawServiceHandler,
) {
    log::debug!("Service accept loop started for {service_name}");
    loop {
        let (stream, peer_addr) = match listener.accept().await {
            Ok(pair) => pair,
            Err(e) => {
                log::error!("Service accept loop error for {service_name}: {e}");
                continue;
            }
        };
        log::info!("Received connection from service client at {peer_addr} for {service_name}");
        let service_name = service_name.clone();
        let response_header = response_header.clone();
        let handler = handler.clone();
        tokio::spawn(async move {
            if let Err(e) = serve_connection(stream, &service_name, &response_header, handler).await {
                log::debug!("Service connection for {service_name} from {peer_addr} ended: {e}");
            }
        });
    }
}

async fn serve_connection(
    mut stream: TcpStream,
    service_name: &str,
    response_header: &ConnectionHeader,
    handler: RawServiceHandler,
) -> Result<(), Ros1Error> {
    let request_header = tcpros::receive_header(&mut stream).await?;
    if request_header.service.as_deref() != Some(service_name) {
        let error_header = ConnectionHeader {
            error: Some(format!("requested service [{:?}] not served here", request_header.service)),
            ..Default::default()
        };
        let _ = error_header.write(&mut stream).await;
        let _ = stream.shutdown().await;
        return Ok(());
    }
    let expected_md5 = response_header.md5sum.as_deref().unwrap_or("*");
    if !request_header.md5_compatible(expected_md5) {
        let error_header = ConnectionHeader {
            error: Some(format!("request md5sum mismatch for service [{service_name}]")),
            ..Default::default()
        };
        let _ = error_header.write(&mut stream).await;
        let _ = stream.shutdown().await;
        return Ok(());
    }

    response_header.write(&mut stream).await.map_err(Ros1Error::Io)?;

    let persistent = request_header.persistent;
    loop {
        let request_bytes = match tcpros::read_frame(&mut stream).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(Ros1Error::Io(e)),
        };

        let response = handler(request_bytes);
        tcpros::write_service_response_frame(&mut stream, &response)
            .await
            .map_err(Ros1Error::Io)?;

        if !persistent {
            break;
        }
    }

    let _ = stream.shutdown().await;
    Ok(())
}
