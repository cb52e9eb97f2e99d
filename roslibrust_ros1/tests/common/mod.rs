//! A minimal in-process stand-in for `rosmaster`: just enough of the registration/lookup API
//! to drive the node facade end-to-end without a real ROS installation. Mirrors the dispatch
//! style of `node::slave_api` (same hyper + serde_xmlrpc plumbing, same `[code, msg, value]`
//! response envelope).

#![allow(dead_code)]

use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Request, Response, Server};
use serde_xmlrpc::Value;
use std::collections::HashMap;
use std::convert::Infallible;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Default)]
struct Topic {
    topic_type: String,
    publishers: Vec<String>,
    subscribers: Vec<String>,
}

#[derive(Default)]
struct MasterState {
    topics: HashMap<String, Topic>,
    services: HashMap<String, String>,
}

/// A running fake master. Keep this alive for as long as nodes under test need to reach it;
/// dropping it aborts the listener.
pub struct FakeMaster {
    pub uri: String,
    server: tokio::task::JoinHandle<()>,
}

impl Drop for FakeMaster {
    fn drop(&mut self) {
        self.server.abort();
    }
}

impl FakeMaster {
    pub async fn spawn() -> Self {
        let state = Arc::new(Mutex::new(MasterState::default()));
        let bind_addr = SocketAddr::from((Ipv4Addr::LOCALHOST, 0));
        let make_svc = make_service_fn(move |_conn| {
            let state = state.clone();
            async move { Ok::<_, Infallible>(service_fn(move |req| handle(req, state.clone()))) }
        });
        let server = Server::try_bind(&bind_addr)
            .expect("bind fake master")
            .serve(make_svc);
        let port = server.local_addr().port();
        let task = tokio::spawn(async move {
            let _ = server.await;
        });
        Self {
            uri: format!("http://127.0.0.1:{port}/"),
            server: task,
        }
    }
}

async fn handle(
    req: Request<Body>,
    state: Arc<Mutex<MasterState>>,
) -> Result<Response<Body>, Infallible> {
    let bytes = hyper::body::to_bytes(req.into_body())
        .await
        .unwrap_or_default();
    let body = String::from_utf8_lossy(&bytes);
    let (method, params) = match serde_xmlrpc::request_from_str(&body) {
        Ok(parsed) => parsed,
        Err(_) => return Ok(Response::builder().status(400).body(Body::empty()).unwrap()),
    };
    let response = dispatch(&method, params, &state).await;
    let body = serde_xmlrpc::response_to_string(response).unwrap_or_default();
    Ok(Response::new(Body::from(body)))
}

fn as_str(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        _ => String::new(),
    }
}

fn success(value: Value) -> Value {
    Value::Array(vec![Value::Int(1), Value::String(String::new()), value])
}

fn failure(message: &str) -> Value {
    Value::Array(vec![
        Value::Int(-1),
        Value::String(message.to_string()),
        Value::Array(vec![]),
    ])
}

/// Pushes `publisherUpdate` to every subscriber's Slave API, fire-and-forget, mirroring the
/// real master's behavior of notifying subscribers as soon as the publisher set changes.
fn notify_subscribers(topic: String, subscribers: Vec<String>, publishers: Vec<String>) {
    for sub_uri in subscribers {
        let topic = topic.clone();
        let publishers = publishers.clone();
        tokio::spawn(async move {
            let client = reqwest::Client::new();
            let Ok(body) = serde_xmlrpc::request_to_string(
                "publisherUpdate",
                vec![
                    Value::String("/fakemaster".to_string()),
                    Value::String(topic),
                    Value::Array(publishers.into_iter().map(Value::String).collect()),
                ],
            ) else {
                return;
            };
            let _ = client.post(&sub_uri).body(body).send().await;
        });
    }
}

async fn dispatch(method: &str, params: Vec<Value>, state: &Arc<Mutex<MasterState>>) -> Value {
    match method {
        "registerPublisher" => {
            let topic = as_str(&params[1]);
            let topic_type = as_str(&params[2]);
            let caller_api = as_str(&params[3]);
            let (subscribers, publishers) = {
                let mut st = state.lock().await;
                let entry = st.topics.entry(topic.clone()).or_default();
                entry.topic_type = topic_type;
                if !entry.publishers.contains(&caller_api) {
                    entry.publishers.push(caller_api);
                }
                (entry.subscribers.clone(), entry.publishers.clone())
            };
            notify_subscribers(topic, subscribers, publishers.clone());
            success(Value::Array(publishers.into_iter().map(Value::String).collect()))
        }
        "unregisterPublisher" => {
            let topic = as_str(&params[1]);
            let caller_api = as_str(&params[2]);
            let mut st = state.lock().await;
            if let Some(entry) = st.topics.get_mut(&topic) {
                entry.publishers.retain(|p| p != &caller_api);
            }
            success(Value::Int(1))
        }
        "registerSubscriber" => {
            let topic = as_str(&params[1]);
            let topic_type = as_str(&params[2]);
            let caller_api = as_str(&params[3]);
            let mut st = state.lock().await;
            let entry = st.topics.entry(topic).or_default();
            if entry.topic_type.is_empty() {
                entry.topic_type = topic_type;
            }
            if !entry.subscribers.contains(&caller_api) {
                entry.subscribers.push(caller_api);
            }
            success(Value::Array(
                entry.publishers.clone().into_iter().map(Value::String).collect(),
            ))
        }
        "unregisterSubscriber" => {
            let topic = as_str(&params[1]);
            let caller_api = as_str(&params[2]);
            let mut st = state.lock().await;
            if let Some(entry) = st.topics.get_mut(&topic) {
                entry.subscribers.retain(|s| s != &caller_api);
            }
            success(Value::Int(1))
        }
        "registerService" => {
            let service = as_str(&params[1]);
            let service_uri = as_str(&params[2]);
            state.lock().await.services.insert(service, service_uri);
            success(Value::Int(1))
        }
        "unregisterService" => {
            let service = as_str(&params[1]);
            state.lock().await.services.remove(&service);
            success(Value::Int(1))
        }
        "lookupService" => {
            let service = as_str(&params[1]);
            match state.lock().await.services.get(&service).cloned() {
                Some(uri) => success(Value::String(uri)),
                None => failure(&format!("no provider for service [{service}]")),
            }
        }
        "lookupNode" => failure("fake master does not track node Slave-API URIs by name"),
        "getUri" => success(Value::String("http://fakemaster/".to_string())),
        "setParam" | "deleteParam" => success(Value::Int(1)),
        "getParam" => failure("fake master carries no parameters"),
        "hasParam" => success(Value::Bool(false)),
        other => failure(&format!("fake master does not implement {other}")),
    }
}
