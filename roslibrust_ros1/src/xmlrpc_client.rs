//! The XML-RPC call queue used both for calls to the Master and peer-to-peer Slave-API calls.
//!
//! Each [`XmlRpcClient`] owns a single FIFO of outstanding calls to one remote endpoint.
//! Calls execute strictly one at a time: the next call is only dequeued once the current one
//! resolves or fails terminally. `ECONNREFUSED` does not dequeue the call — it is retried
//! after a delay drawn from [`RETRY_SCHEDULE_MS`] (saturating at the last entry) until
//! `max_attempts` is reached. Any other transport error fails the call immediately and the
//! queue advances.

use crate::error::XmlRpcError;
use serde_xmlrpc::Value;
use std::collections::VecDeque;
use tokio::sync::{mpsc, oneshot, Mutex};

/// Fixed backoff schedule (ms) for `ECONNREFUSED` retries, saturating at the last entry.
/// Treated as an internal constant rather than user-configurable (see SPEC_FULL.md Open
/// Question decisions) — matches the source's hard-coded table.
pub const RETRY_SCHEDULE_MS: &[u64] = &[
    1, 2, 2, 4, 4, 4, 4, 8, 8, 8, 8, 16, 16, 32, 64, 128, 256, 512, 1024, 2048,
];

/// Standard ROS XML-RPC success/failure convention: `[statusCode, statusMessage, value]`.
/// `statusCode == 1` is success; anything else is converted into [`XmlRpcError::RemoteFailure`].
pub fn decode_ros_response(value: Value) -> Result<Value, XmlRpcError> {
    let Value::Array(mut tuple) = value else {
        return Err(XmlRpcError::Codec(
            "expected a 3-element [code, message, value] array".to_string(),
        ));
    };
    if tuple.len() != 3 {
        return Err(XmlRpcError::Codec(format!(
            "expected a 3-element response tuple, got {} elements",
            tuple.len()
        )));
    }
    let payload = tuple.pop().unwrap();
    let message = tuple.pop().unwrap();
    let code = tuple.pop().unwrap();
    let code = match code {
        Value::Int(i) => i,
        other => {
            return Err(XmlRpcError::Codec(format!(
                "status code was not an integer: {other:?}"
            )))
        }
    };
    let message = match message {
        Value::String(s) => s,
        other => format!("{other:?}"),
    };
    if code == 1 {
        Ok(payload)
    } else {
        Err(XmlRpcError::RemoteFailure {
            status_code: code,
            status_message: message,
        })
    }
}

struct QueuedCall {
    method: String,
    params: Vec<Value>,
    max_attempts: usize,
    resolve: oneshot::Sender<Result<Value, XmlRpcError>>,
}

enum Command {
    Call(QueuedCall),
    Clear,
}

/// A FIFO XML-RPC client for one remote endpoint.
#[derive(Clone)]
pub struct XmlRpcClient {
    sender: mpsc::UnboundedSender<Command>,
}

impl XmlRpcClient {
    /// Spawns the background task that owns the call queue for `endpoint`.
    pub fn new(endpoint: String) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        tokio::spawn(run_queue(endpoint, receiver));
        Self { sender }
    }

    /// Enqueues an XML-RPC call. Resolves with the raw decoded ROS `[code, msg, value]`
    /// payload's `value` element on success.
    pub async fn call(
        &self,
        method: &str,
        params: Vec<Value>,
    ) -> Result<Value, XmlRpcError> {
        self.call_with_retries(method, params, 4).await
    }

    /// As [`Self::call`] but with an explicit retry budget for `ECONNREFUSED`.
    pub async fn call_with_retries(
        &self,
        method: &str,
        params: Vec<Value>,
        max_attempts: usize,
    ) -> Result<Value, XmlRpcError> {
        let (resolve, receiver) = oneshot::channel();
        let queued = QueuedCall {
            method: method.to_string(),
            params,
            max_attempts,
            resolve,
        };
        self.sender
            .send(Command::Call(queued))
            .map_err(|_| XmlRpcError::QueueCleared)?;
        receiver.await.map_err(|_| XmlRpcError::QueueCleared)?
    }

    /// Rejects the in-flight call (if any) and drops every queued call. Used at shutdown.
    pub fn clear(&self) {
        let _ = self.sender.send(Command::Clear);
    }
}

async fn run_queue(endpoint: String, mut receiver: mpsc::UnboundedReceiver<Command>) {
    let http = reqwest::Client::new();
    let queue = Mutex::new(VecDeque::<QueuedCall>::new());
    let mut cleared = false;

    loop {
        // Drain any newly submitted calls without blocking if the queue already has work.
        let next = {
            let mut q = queue.lock().await;
            q.pop_front()
        };

        let call = match next {
            Some(call) => call,
            None => match receiver.recv().await {
                Some(Command::Call(call)) => call,
                Some(Command::Clear) => continue,
                None => break,
            },
        };

        if cleared {
            let _ = call.resolve.send(Err(XmlRpcError::QueueCleared));
            continue;
        }

        let mut attempt = 1usize;
        let outcome = loop {
            // Before each attempt, opportunistically process any queued Clear/Call commands
            // that arrived while we were working, without blocking.
            while let Ok(cmd) = receiver.try_recv() {
                match cmd {
                    Command::Call(c) => queue.lock().await.push_back(c),
                    Command::Clear => {
                        cleared = true;
                        queue.lock().await.clear();
                    }
                }
            }
            if cleared {
                break Err(XmlRpcError::QueueCleared);
            }

            match execute_call(&http, &endpoint, &call.method, call.params.clone()).await {
                Ok(value) => break Ok(value),
                Err(err) if is_connection_refused(&err) && attempt < call.max_attempts => {
                    let idx = (attempt - 1).min(RETRY_SCHEDULE_MS.len() - 1);
                    let delay = RETRY_SCHEDULE_MS[idx];
                    log::warn!(
                        "xmlrpc call {} to {} refused, retrying in {}ms (attempt {}/{})",
                        call.method,
                        endpoint,
                        delay,
                        attempt,
                        call.max_attempts
                    );
                    tokio::time::sleep(tokio::time::Duration::from_millis(delay)).await;
                    attempt += 1;
                }
                Err(err) if is_connection_refused(&err) => {
                    break Err(XmlRpcError::RetriesExhausted(attempt));
                }
                Err(err) => break Err(err),
            }
        };

        let _ = call.resolve.send(outcome);
    }
}

fn is_connection_refused(err: &XmlRpcError) -> bool {
    matches!(err, XmlRpcError::Transport { source, .. } if source.is_connect())
}

async fn execute_call(
    http: &reqwest::Client,
    endpoint: &str,
    method: &str,
    params: Vec<Value>,
) -> Result<Value, XmlRpcError> {
    let body = serde_xmlrpc::request_to_string(method, params)
        .map_err(|e| XmlRpcError::Codec(e.to_string()))?;
    let response = http
        .post(endpoint)
        .body(body)
        .send()
        .await
        .map_err(|source| XmlRpcError::Transport {
            method: method.to_string(),
            source,
        })?;
    let text = response
        .text()
        .await
        .map_err(|source| XmlRpcError::Transport {
            method: method.to_string(),
            source,
        })?;
    let value: Value =
        serde_xmlrpc::response_from_str(&text).map_err(|e| XmlRpcError::Codec(e.to_string()))?;
    decode_ros_response(value)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn decode_success_returns_payload() {
        let response = Value::Array(vec![
            Value::Int(1),
            Value::String("ok".to_string()),
            Value::String("payload".to_string()),
        ]);
        let value = decode_ros_response(response).unwrap();
        assert_eq!(value, Value::String("payload".to_string()));
    }

    #[test]
    fn decode_failure_is_remote_failure_error() {
        let response = Value::Array(vec![
            Value::Int(0),
            Value::String("nope".to_string()),
            Value::Array(vec![]),
        ]);
        let err = decode_ros_response(response).unwrap_err();
        assert!(matches!(
            err,
            XmlRpcError::RemoteFailure {
                status_code: 0,
                ..
            }
        ));
    }

    #[test]
    fn retry_schedule_saturates() {
        assert_eq!(RETRY_SCHEDULE_MS.first(), Some(&1));
        assert_eq!(RETRY_SCHEDULE_MS.last(), Some(&2048));
        assert_eq!(RETRY_SCHEDULE_MS.len(), 20);
    }
}
