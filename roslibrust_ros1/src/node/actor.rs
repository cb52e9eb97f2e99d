//! The node's single-writer actor.
//!
//! Every piece of node-wide mutable state (the publication/subscription/service registries,
//! the cache of peer Slave-API clients, the Master client) is owned by one task and reached
//! only through [`NodeServerHandle`]'s typed messages. This is the translation of the
//! original single-threaded cooperative node loop into tokio: rather than a shared lock taken
//! on every access, callers send a command and await a reply, so registry mutations are
//! strictly ordered by arrival at the actor's channel.

use crate::error::{Ros1Error, XmlRpcError};
use crate::master_client::MasterClient;
use crate::subscriber::SubscriptionCommand;
use crate::xmlrpc_client::XmlRpcClient;
use dashmap::DashMap;
use std::collections::HashMap;
use tokio::sync::{mpsc, oneshot};

pub(crate) struct PublicationInfo {
    pub port: u16,
    pub topic_type: String,
}

pub(crate) struct ServiceInfo {
    pub port: u16,
}

struct SubscriptionInfo {
    topic_type: String,
    commands: mpsc::Sender<SubscriptionCommand>,
}

enum Command {
    RegisterPublisher {
        topic: String,
        port: u16,
        topic_type: String,
        reply: oneshot::Sender<Result<(), Ros1Error>>,
    },
    UnregisterPublisher {
        topic: String,
        reply: oneshot::Sender<Result<(), Ros1Error>>,
    },
    RegisterSubscriber {
        topic: String,
        topic_type: String,
        commands: mpsc::Sender<SubscriptionCommand>,
        reply: oneshot::Sender<Result<Vec<String>, Ros1Error>>,
    },
    UnregisterSubscriber {
        topic: String,
        reply: oneshot::Sender<Result<(), Ros1Error>>,
    },
    RegisterService {
        service: String,
        port: u16,
        reply: oneshot::Sender<Result<(), Ros1Error>>,
    },
    UnregisterService {
        service: String,
        reply: oneshot::Sender<Result<(), Ros1Error>>,
    },
    LookupService {
        service: String,
        reply: oneshot::Sender<Result<String, Ros1Error>>,
    },
    RequestTopic {
        publisher_uri: String,
        topic: String,
        reply: oneshot::Sender<Result<(String, u16), Ros1Error>>,
    },
    /// Invoked by our own Slave-API server when a peer calls `requestTopic` on us.
    ServeRequestTopic {
        topic: String,
        reply: oneshot::Sender<Option<(String, u16)>>,
    },
    /// Invoked by our own Slave-API server when the Master (or a peer) calls
    /// `publisherUpdate` for one of our subscriptions.
    PublisherUpdate {
        topic: String,
        publishers: Vec<String>,
    },
    GetPublications {
        reply: oneshot::Sender<Vec<(String, String)>>,
    },
    GetSubscriptions {
        reply: oneshot::Sender<Vec<(String, String)>>,
    },
    /// Backing data for the Slave API's `getBusInfo`/`getBusStats`: one row per live
    /// publication/subscription this node holds, in `(topic, direction, port)` form.
    GetBusInfo {
        reply: oneshot::Sender<Vec<(String, &'static str, u16)>>,
    },
    Shutdown,
}

struct NodeState {
    node_name: String,
    host: String,
    master: MasterClient,
    publications: HashMap<String, PublicationInfo>,
    subscriptions: HashMap<String, SubscriptionInfo>,
    services: HashMap<String, ServiceInfo>,
    /// Slave-API clients for peers we've talked to, keyed by their XML-RPC URI.
    peer_clients: DashMap<String, XmlRpcClient>,
    shutting_down: bool,
}

impl NodeState {
    fn peer_client(&self, uri: &str) -> XmlRpcClient {
        if let Some(existing) = self.peer_clients.get(uri) {
            return existing.clone();
        }
        let client = XmlRpcClient::new(uri.to_string());
        self.peer_clients.insert(uri.to_string(), client.clone());
        client
    }
}

/// A cloneable handle to the node's background actor. Cloning is cheap (an `mpsc` sender
/// clone); the actor itself, and all node state, is torn down once every handle is dropped
/// and the channel closes, draining any in-flight commands as no-ops.
#[derive(Clone)]
pub struct NodeServerHandle {
    sender: mpsc::UnboundedSender<Command>,
}

impl NodeServerHandle {
    pub(crate) fn spawn(node_name: String, host: String, master: MasterClient) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let state = NodeState {
            node_name,
            host,
            master,
            publications: HashMap::new(),
            subscriptions: HashMap::new(),
            services: HashMap::new(),
            peer_clients: DashMap::new(),
            shutting_down: false,
        };
        tokio::spawn(run(state, receiver));
        Self { sender }
    }

    async fn send<R>(
        &self,
        make: impl FnOnce(oneshot::Sender<R>) -> Command,
    ) -> Result<R, Ros1Error> {
        let (reply, rx) = oneshot::channel();
        self.sender
            .send(make(reply))
            .map_err(|_| Ros1Error::ShuttingDown)?;
        rx.await.map_err(|_| Ros1Error::ShuttingDown)
    }

    pub(crate) async fn register_publisher(
        &self,
        topic: &str,
        port: u16,
        topic_type: &str,
    ) -> Result<(), Ros1Error> {
        self.send(|reply| Command::RegisterPublisher {
            topic: topic.to_owned(),
            port,
            topic_type: topic_type.to_owned(),
            reply,
        })
        .await?
    }

    pub(crate) async fn unregister_publisher(&self, topic: &str) -> Result<(), Ros1Error> {
        self.send(|reply| Command::UnregisterPublisher {
            topic: topic.to_owned(),
            reply,
        })
        .await?
    }

    pub(crate) async fn register_subscriber(
        &self,
        topic: &str,
        topic_type: &str,
        commands: mpsc::Sender<SubscriptionCommand>,
    ) -> Result<Vec<String>, Ros1Error> {
        self.send(|reply| Command::RegisterSubscriber {
            topic: topic.to_owned(),
            topic_type: topic_type.to_owned(),
            commands,
            reply,
        })
        .await?
    }

    pub(crate) async fn unregister_subscriber(&self, topic: &str) -> Result<(), Ros1Error> {
        self.send(|reply| Command::UnregisterSubscriber {
            topic: topic.to_owned(),
            reply,
        })
        .await?
    }

    pub(crate) async fn register_service(&self, service: &str, port: u16) -> Result<(), Ros1Error> {
        self.send(|reply| Command::RegisterService {
            service: service.to_owned(),
            port,
            reply,
        })
        .await?
    }

    pub(crate) async fn unregister_service(&self, service: &str) -> Result<(), Ros1Error> {
        self.send(|reply| Command::UnregisterService {
            service: service.to_owned(),
            reply,
        })
        .await?
    }

    pub(crate) async fn lookup_service(&self, service: &str) -> Result<String, Ros1Error> {
        self.send(|reply| Command::LookupService {
            service: service.to_owned(),
            reply,
        })
        .await?
    }

    /// Resolves `topic` on the peer at `publisher_uri` via its Slave-API `requestTopic`,
    /// returning the `(host, port)` to connect to for the TCPROS stream.
    pub(crate) async fn request_topic(
        &self,
        publisher_uri: &str,
        topic: &str,
    ) -> Result<(String, u16), Ros1Error> {
        self.send(|reply| Command::RequestTopic {
            publisher_uri: publisher_uri.to_owned(),
            topic: topic.to_owned(),
            reply,
        })
        .await?
    }

    /// Called by the Slave-API server when a peer requests one of our own publications.
    pub(crate) async fn serve_request_topic(&self, topic: &str) -> Option<(String, u16)> {
        self.send(|reply| Command::ServeRequestTopic {
            topic: topic.to_owned(),
            reply,
        })
        .await
        .unwrap_or(None)
    }

    /// Called by the Slave-API server when the Master pushes a `publisherUpdate`.
    pub async fn publisher_update(&self, topic: &str, publishers: Vec<String>) {
        let _ = self.sender.send(Command::PublisherUpdate {
            topic: topic.to_owned(),
            publishers,
        });
    }

    pub async fn get_publications(&self) -> Vec<(String, String)> {
        let (reply, rx) = oneshot::channel();
        if self
            .sender
            .send(Command::GetPublications { reply })
            .is_err()
        {
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }

    pub async fn get_subscriptions(&self) -> Vec<(String, String)> {
        let (reply, rx) = oneshot::channel();
        if self
            .sender
            .send(Command::GetSubscriptions { reply })
            .is_err()
        {
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }

    pub async fn get_bus_info(&self) -> Vec<(String, &'static str, u16)> {
        let (reply, rx) = oneshot::channel();
        if self.sender.send(Command::GetBusInfo { reply }).is_err() {
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }

    pub fn shutdown(&self) {
        let _ = self.sender.send(Command::Shutdown);
    }
}

async fn run(mut state: NodeState, mut receiver: mpsc::UnboundedReceiver<Command>) {
    log::info!("Node actor started for {}", state.node_name);
    while let Some(cmd) = receiver.recv().await {
        match cmd {
            Command::RegisterPublisher {
                topic,
                port,
                topic_type,
                reply,
            } => {
                let result = handle_register_publisher(&mut state, &topic, port, &topic_type).await;
                let _ = reply.send(result);
            }
            Command::UnregisterPublisher { topic, reply } => {
                state.publications.remove(&topic);
                let result = state
                    .master
                    .unregister_publisher(&topic)
                    .await
                    .map(|_| ())
                    .map_err(Ros1Error::from);
                let _ = reply.send(result);
            }
            Command::RegisterSubscriber {
                topic,
                topic_type,
                commands,
                reply,
            } => {
                let result =
                    handle_register_subscriber(&mut state, &topic, &topic_type, commands).await;
                let _ = reply.send(result);
            }
            Command::UnregisterSubscriber { topic, reply } => {
                state.subscriptions.remove(&topic);
                let result = state
                    .master
                    .unregister_subscriber(&topic)
                    .await
                    .map(|_| ())
                    .map_err(Ros1Error::from);
                let _ = reply.send(result);
            }
            Command::RegisterService {
                service,
                port,
                reply,
            } => {
                let result = handle_register_service(&mut state, &service, port).await;
                let _ = reply.send(result);
            }
            Command::UnregisterService { service, reply } => {
                let port = state.services.remove(&service).map(|info| info.port).unwrap_or(0);
                let service_uri = format!("rosrpc://{}:{}", state.host, port);
                let result = state
                    .master
                    .unregister_service(&service, &service_uri)
                    .await
                    .map(|_| ())
                    .map_err(Ros1Error::from);
                let _ = reply.send(result);
            }
            Command::LookupService { service, reply } => {
                let result = state.master.lookup_service(&service).await.map_err(Ros1Error::from);
                let _ = reply.send(result);
            }
            Command::RequestTopic {
                publisher_uri,
                topic,
                reply,
            } => {
                let result = handle_request_topic(&state, &publisher_uri, &topic).await;
                let _ = reply.send(result);
            }
            Command::ServeRequestTopic { topic, reply } => {
                let result = state
                    .publications
                    .get(&topic)
                    .map(|info| (state.host.clone(), info.port));
                let _ = reply.send(result);
            }
            Command::PublisherUpdate { topic, publishers } => {
                if let Some(sub) = state.subscriptions.get(&topic) {
                    let _ = sub
                        .commands
                        .send(SubscriptionCommand::PublisherUpdate(publishers))
                        .await;
                }
            }
            Command::GetPublications { reply } => {
                let list = state
                    .publications
                    .iter()
                    .map(|(topic, info)| (topic.clone(), info.topic_type.clone()))
                    .collect();
                let _ = reply.send(list);
            }
            Command::GetSubscriptions { reply } => {
                let list = state
                    .subscriptions
                    .iter()
                    .map(|(topic, info)| (topic.clone(), info.topic_type.clone()))
                    .collect();
                let _ = reply.send(list);
            }
            Command::GetBusInfo { reply } => {
                let mut rows: Vec<(String, &'static str, u16)> = state
                    .publications
                    .iter()
                    .map(|(topic, info)| (topic.clone(), "o", info.port))
                    .collect();
                rows.extend(
                    state
                        .subscriptions
                        .keys()
                        .map(|topic| (topic.clone(), "i", 0u16)),
                );
                let _ = reply.send(rows);
            }
            Command::Shutdown => {
                state.shutting_down = true;
                break;
            }
        }
    }

    if state.shutting_down {
        log::info!("Node actor for {} shutting down, unregistering everything", state.node_name);
        for topic in state.publications.keys().cloned().collect::<Vec<_>>() {
            let _ = state.master.unregister_publisher(&topic).await;
        }
        for topic in state.subscriptions.keys().cloned().collect::<Vec<_>>() {
            let _ = state.master.unregister_subscriber(&topic).await;
        }
        for (service, info) in state.services.iter().map(|(s, i)| (s.clone(), i.port)).collect::<Vec<_>>() {
            let uri = format!("rosrpc://{}:{}", state.host, info);
            let _ = state.master.unregister_service(&service, &uri).await;
        }
    }
    log::info!("Node actor for {} exited", state.node_name);
}

async fn handle_register_publisher(
    state: &mut NodeState,
    topic: &str,
    port: u16,
    topic_type: &str,
) -> Result<(), Ros1Error> {
    state.master.register_publisher(topic, topic_type).await?;
    state.publications.insert(
        topic.to_owned(),
        PublicationInfo {
            port,
            topic_type: topic_type.to_owned(),
        },
    );
    Ok(())
}

async fn handle_register_subscriber(
    state: &mut NodeState,
    topic: &str,
    topic_type: &str,
    commands: mpsc::Sender<SubscriptionCommand>,
) -> Result<Vec<String>, Ros1Error> {
    let publishers = state.master.register_subscriber(topic, topic_type).await?;
    state.subscriptions.insert(
        topic.to_owned(),
        SubscriptionInfo {
            topic_type: topic_type.to_owned(),
            commands,
        },
    );
    Ok(publishers)
}

async fn handle_register_service(
    state: &mut NodeState,
    service: &str,
    port: u16,
) -> Result<(), Ros1Error> {
    let service_uri = format!("rosrpc://{}:{}", state.host, port);
    state.master.register_service(service, &service_uri).await?;
    state.services.insert(service.to_owned(), ServiceInfo { port });
    Ok(())
}

async fn handle_request_topic(
    state: &NodeState,
    publisher_uri: &str,
    topic: &str,
) -> Result<(String, u16), Ros1Error> {
    let client = state.peer_client(publisher_uri);
    let params = vec![
        state.node_name.clone().into(),
        topic.into(),
        serde_xmlrpc::Value::Array(vec![serde_xmlrpc::Value::Array(vec!["TCPROS".into()])]),
    ];
    let value = client.call("requestTopic", params).await?;
    decode_protocol_params(value)
}

fn decode_protocol_params(value: serde_xmlrpc::Value) -> Result<(String, u16), Ros1Error> {
    let serde_xmlrpc::Value::Array(mut items) = value else {
        return Err(Ros1Error::XmlRpc(XmlRpcError::Codec(
            "expected [protocol, host, port] from requestTopic".to_string(),
        )));
    };
    if items.len() != 3 {
        return Err(Ros1Error::XmlRpc(XmlRpcError::Codec(format!(
            "expected 3-element protocol params, got {}",
            items.len()
        ))));
    }
    let port = items.pop().unwrap();
    let host = items.pop().unwrap();
    let port = match port {
        serde_xmlrpc::Value::Int(i) => i as u16,
        other => {
            return Err(Ros1Error::XmlRpc(XmlRpcError::Codec(format!(
                "expected integer port, got {other:?}"
            ))))
        }
    };
    let host = match host {
        serde_xmlrpc::Value::String(s) => s,
        other => {
            return Err(Ros1Error::XmlRpc(XmlRpcError::Codec(format!(
                "expected string host, got {other:?}"
            ))))
        }
    };
    Ok((host, port))
}
