//! The service client engine (§4.7): resolves a service's URI via the Master, connects, and
//! performs request/response round trips. Concurrent calls on the same client are rejected
//! rather than queued (§4.7, "mutual exclusion") — a caller that wants to retry waits for the
//! previous call to resolve first.

use crate::error::Ros1Error;
use crate::node::actor::NodeServerHandle;
use crate::tcpros::{self, ConnectionHeader};
use roslibrust_common::{RosServiceType, Service};
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::Mutex;

/// Polling interval used while a service has not yet been registered with the Master.
const WAIT_FOR_SERVICE_POLL: Duration = Duration::from_millis(500);

struct Connection {
    stream: TcpStream,
}

/// A client bound to one service. By default the underlying TCP connection is kept open
/// across calls (`persistent=1` in the handshake) and only reconnected if the peer drops it;
/// a fresh one-shot connection can be requested with [`ServiceClient::call_oneshot`].
pub struct ServiceClient<T> {
    node_name: String,
    service_name: String,
    node_handle: NodeServerHandle,
    /// `None` means "not currently connected"; reconnected lazily on next call.
    connection: Mutex<Option<Connection>>,
    /// Held for the duration of a single `call`; a second concurrent caller observes this
    /// already locked and fails fast with [`Ros1Error::ServiceClientBusy`] instead of queuing.
    calling: Mutex<()>,
    phantom: PhantomData<T>,
}

impl<T: RosServiceType> ServiceClient<T> {
    pub(crate) fn new(node_name: String, service_name: String, node_handle: NodeServerHandle) -> Self {
        Self {
            node_name,
            service_name,
            node_handle,
            connection: Mutex::new(None),
            calling: Mutex::new(()),
            phantom: PhantomData,
        }
    }

    /// Polls until the service has been registered with the Master at least once, or `timeout`
    /// elapses. `None` blocks forever (matching the no-timeout form of `waitForService`);
    /// `Some(d)` returns `Ok(false)` once `d` has elapsed without the service appearing.
    pub async fn wait_for_service(&self, timeout: Option<Duration>) -> Result<bool, Ros1Error> {
        let deadline = timeout.map(|d| tokio::time::Instant::now() + d);
        loop {
            if self
                .node_handle
                .lookup_service(&self.service_name)
                .await
                .is_ok()
            {
                return Ok(true);
            }
            if let Some(deadline) = deadline {
                if tokio::time::Instant::now() >= deadline {
                    return Ok(false);
                }
                let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
                tokio::time::sleep(WAIT_FOR_SERVICE_POLL.min(remaining)).await;
            } else {
                tokio::time::sleep(WAIT_FOR_SERVICE_POLL).await;
            }
        }
    }

    /// Calls the service, reusing (or lazily establishing) the persistent connection.
    pub async fn call(&self, request: &T::Request) -> Result<T::Response, Ros1Error> {
        let _guard = self
            .calling
            .try_lock()
            .map_err(|_| Ros1Error::ServiceClientBusy)?;

        let body = serde_rosmsg::to_vec(request)
            .map_err(|e| Ros1Error::Tcpros(crate::error::TcprosError::Serialization(e)))?;

        {
            let mut conn = self.connection.lock().await;
            if conn.is_none() {
                *conn = Some(self.connect(true).await?);
            }
        }

        let response_bytes = {
            let mut conn_guard = self.connection.lock().await;
            let result = self.round_trip(conn_guard.as_mut().unwrap(), &body).await;
            match result {
                Ok(bytes) => bytes,
                Err(_) => {
                    // Persistent peer likely dropped the connection; reconnect once and retry.
                    *conn_guard = Some(self.connect(true).await?);
                    self.round_trip(conn_guard.as_mut().unwrap(), &body).await?
                }
            }
        };

        serde_rosmsg::from_slice(&response_bytes)
            .map_err(|e| Ros1Error::Tcpros(crate::error::TcprosError::Serialization(e)))
    }

    /// Calls the service over a fresh, non-persistent connection that is closed immediately
    /// afterward. Used for the "oneshot" [`roslibrust_common::ServiceProvider::call_service`]
    /// path, where no client handle survives past the single call.
    pub async fn call_oneshot(&self, request: &T::Request) -> Result<T::Response, Ros1Error> {
        let _guard = self
            .calling
            .try_lock()
            .map_err(|_| Ros1Error::ServiceClientBusy)?;

        let body = serde_rosmsg::to_vec(request)
            .map_err(|e| Ros1Error::Tcpros(crate::error::TcprosError::Serialization(e)))?;
        let mut conn = self.connect(false).await?;
        let response_bytes = self.round_trip(&mut conn, &body).await?;
        let _ = conn.stream.shutdown().await;

        serde_rosmsg::from_slice(&response_bytes)
            .map_err(|e| Ros1Error::Tcpros(crate::error::TcprosError::Serialization(e)))
    }

    async fn connect(&self, persistent: bool) -> Result<Connection, Ros1Error> {
        let uri = self.node_handle.lookup_service(&self.service_name).await?;
        let (host, port) = crate::names::split_xmlrpc_uri(&uri)
            .map_err(|e| Ros1Error::Other(anyhow::anyhow!(e)))?;

        let mut stream = TcpStream::connect((host.as_str(), port))
            .await
            .map_err(Ros1Error::Io)?;
        stream.set_nodelay(true).ok();

        let header = ConnectionHeader {
            caller_id: self.node_name.clone(),
            topic: None,
            service: Some(self.service_name.clone()),
            topic_type: T::ROS_SERVICE_NAME.to_owned(),
            md5sum: Some(T::MD5SUM.to_owned()),
            message_definition: String::new(),
            latching: false,
            persistent,
            tcp_nodelay: true,
            error: None,
        };
        header.write(&mut stream).await.map_err(Ros1Error::Io)?;
        tcpros::receive_header(&mut stream).await?;

        Ok(Connection { stream })
    }

    async fn round_trip(&self, conn: &mut Connection, body: &[u8]) -> Result<Vec<u8>, Ros1Error> {
        tcpros::write_frame(&mut conn.stream, body)
            .await
            .map_err(Ros1Error::Io)?;
        let response = tcpros::read_service_response_frame(&mut conn.stream)
            .await
            .map_err(Ros1Error::Io)?;
        response.map_err(|msg| Ros1Error::Other(anyhow::anyhow!("service call failed: {msg}")))
    }
}

impl<T: RosServiceType + Send + Sync + 'static> Service<T> for ServiceClient<T> {
    async fn call(&self, request: &T::Request) -> roslibrust_common::Result<T::Response> {
        ServiceClient::call(self, request)
            .await
            .map_err(Into::into)
    }
}

impl<T> Drop for ServiceClient<T> {
    fn drop(&mut self) {
        log::debug!("Dropping service client for {}", self.service_name);
    }
}

#[allow(dead_code)]
fn _assert_service_client_is_service<T: RosServiceType + Send + Sync + 'static>(
    client: Arc<ServiceClient<T>>,
) -> Arc<dyn Service<T> + Send + Sync> {
    client
}
