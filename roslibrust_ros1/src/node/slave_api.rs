//! The Slave-API XML-RPC server (§4.3): every node runs one of these so the Master and peer
//! nodes can push `publisherUpdate`/`requestTopic`/`paramUpdate` calls to it.

use crate::error::Ros1Error;
use crate::node::actor::NodeServerHandle;
use abort_on_drop::ChildTask;
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Request, Response, Server};
use serde_xmlrpc::Value;
use std::convert::Infallible;
use std::net::{Ipv4Addr, SocketAddr};

/// Binds the Slave-API server on an OS-assigned port and spawns it; returns the bound port
/// and a handle that aborts the server when dropped.
pub(crate) async fn serve(
    host: String,
    master_uri: String,
    actor: NodeServerHandle,
) -> Result<(u16, ChildTask<()>), Ros1Error> {
    let bind_addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0));
    let make_svc = make_service_fn(move |_conn| {
        let actor = actor.clone();
        let master_uri = master_uri.clone();
        async move {
            Ok::<_, Infallible>(service_fn(move |req| {
                handle(req, actor.clone(), master_uri.clone())
            }))
        }
    });

    let server = Server::try_bind(&bind_addr)
        .map_err(|e| Ros1Error::Other(anyhow::anyhow!(e)))?
        .serve(make_svc);
    let port = server.local_addr().port();
    let _ = host;

    let task = tokio::spawn(async move {
        if let Err(e) = server.await {
            log::error!("Slave API server exited with error: {e}");
        }
    });

    Ok((port, task.into()))
}

async fn handle(
    req: Request<Body>,
    actor: NodeServerHandle,
    master_uri: String,
) -> Result<Response<Body>, Infallible> {
    let body_bytes = match hyper::body::to_bytes(req.into_body()).await {
        Ok(bytes) => bytes,
        Err(_) => return Ok(Response::builder().status(400).body(Body::empty()).unwrap()),
    };
    let body_str = String::from_utf8_lossy(&body_bytes);

    let (method, params) = match serde_xmlrpc::request_from_str(&body_str) {
        Ok(parsed) => parsed,
        Err(e) => {
            log::warn!("Slave API received unparseable xmlrpc request: {e}");
            return Ok(Response::builder().status(400).body(Body::empty()).unwrap());
        }
    };

    let response_value = dispatch(&method, params, &actor, &master_uri).await;
    let body = match serde_xmlrpc::response_to_string(response_value) {
        Ok(s) => s,
        Err(e) => {
            log::error!("Failed to encode xmlrpc response for {method}: {e}");
            return Ok(Response::builder().status(500).body(Body::empty()).unwrap());
        }
    };

    Ok(Response::new(Body::from(body)))
}

fn success(value: Value) -> Value {
    Value::Array(vec![Value::Int(1), Value::String("".to_string()), value])
}

fn failure(message: &str) -> Value {
    Value::Array(vec![
        Value::Int(-1),
        Value::String(message.to_string()),
        Value::Array(vec![]),
    ])
}

async fn dispatch(
    method: &str,
    params: Vec<Value>,
    actor: &NodeServerHandle,
    master_uri: &str,
) -> Value {
    match method {
        "getPid" => success(Value::Int(std::process::id() as i32)),
        "getMasterUri" => success(Value::String(master_uri.to_string())),
        "shutdown" => {
            actor.shutdown();
            success(Value::Int(1))
        }
        "getPublications" => {
            let pubs = actor.get_publications().await;
            let array = pubs
                .into_iter()
                .map(|(topic, ty)| Value::Array(vec![Value::String(topic), Value::String(ty)]))
                .collect();
            success(Value::Array(array))
        }
        "getSubscriptions" => {
            let subs = actor.get_subscriptions().await;
            let array = subs
                .into_iter()
                .map(|(topic, ty)| Value::Array(vec![Value::String(topic), Value::String(ty)]))
                .collect();
            success(Value::Array(array))
        }
        "requestTopic" => {
            let Some(topic) = params.get(1).and_then(value_as_str) else {
                return failure("requestTopic missing topic parameter");
            };
            match actor.serve_request_topic(&topic).await {
                Some((host, port)) => success(Value::Array(vec![
                    Value::String("TCPROS".to_string()),
                    Value::String(host),
                    Value::Int(port as i32),
                ])),
                None => failure(&format!("not publishing topic [{topic}]")),
            }
        }
        "publisherUpdate" => {
            let Some(topic) = params.get(1).and_then(value_as_str) else {
                return failure("publisherUpdate missing topic parameter");
            };
            let publishers = match params.get(2) {
                Some(Value::Array(items)) => items.iter().filter_map(value_as_str).collect(),
                _ => Vec::new(),
            };
            actor.publisher_update(&topic, publishers).await;
            success(Value::Int(1))
        }
        "paramUpdate" => {
            // Parameter change notifications aren't consumed by this node: parameters are
            // read on demand via the Master client rather than cached locally.
            success(Value::Int(1))
        }
        "getBusInfo" => {
            let connections = actor.get_bus_info().await;
            let array = connections
                .into_iter()
                .enumerate()
                .map(|(id, (topic, direction, port))| {
                    Value::Array(vec![
                        Value::Int(id as i32),
                        Value::String(format!("port {port}")),
                        Value::String(direction.to_string()),
                        Value::String("TCPROS".to_string()),
                        Value::String(topic),
                        Value::Bool(true),
                    ])
                })
                .collect();
            success(Value::Array(array))
        }
        "getBusStats" => {
            let connections = actor.get_bus_info().await;
            let (publish, subscribe): (Vec<_>, Vec<_>) =
                connections.into_iter().partition(|(_, dir, _)| *dir == "o");
            let to_stats = |rows: Vec<(String, &'static str, u16)>| {
                Value::Array(
                    rows.into_iter()
                        .map(|(topic, _, _)| {
                            Value::Array(vec![
                                Value::String(topic),
                                Value::Int(0),
                                Value::Int(0),
                            ])
                        })
                        .collect(),
                )
            };
            success(Value::Array(vec![
                to_stats(publish),
                to_stats(subscribe),
                Value::Array(vec![]),
            ]))
        }
        other => failure(&format!("unsupported Slave API method: {other}")),
    }
}

fn value_as_str(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        _ => None,
    }
}
