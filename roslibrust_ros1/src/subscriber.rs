//! The subscriber engine (§4.5): resolves publisher URIs via `requestTopic`, maintains one
//! TCPROS connection per publisher, and fans deserialized messages out to local subscriber
//! handles (optionally through the [`crate::spinner::Spinner`] for throttled delivery).

use crate::error::{Ros1Error, TcprosError};
use crate::node::actor::NodeServerHandle;
use crate::spinner::{Spinner, SpinnerClient};
use crate::tcpros::{self, ConnectionHeader};
use abort_on_drop::ChildTask;
use dashmap::DashMap;
use roslibrust_common::RosMessageType;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::broadcast;

/// Per-subscription queue size/throttle, mirroring [`crate::publisher::PublisherOptions`].
/// Delivery is dispatched through the node's [`Spinner`] keyed by `Subscriber://<topic>`
/// (§4.5, §4.8).
#[derive(Clone, Copy, Debug)]
pub struct SubscriberOptions {
    pub queue_size: usize,
    /// Zero means "dispatch on every spin tick," i.e. essentially immediately.
    pub throttle: Duration,
}

impl Default for SubscriberOptions {
    fn default() -> Self {
        Self {
            queue_size: 8,
            throttle: Duration::ZERO,
        }
    }
}

/// Forwards a spinner-coalesced batch onto the broadcast channel every `Subscriber<T>` reads
/// from.
struct BroadcastForwarder {
    tx: broadcast::Sender<Arc<Vec<u8>>>,
}

impl SpinnerClient for BroadcastForwarder {
    fn handle_msg_queue(&self, batch: Vec<Vec<u8>>) {
        for msg in batch {
            // No active receivers just means nothing is subscribed right now; not an error.
            let _ = self.tx.send(Arc::new(msg));
        }
    }
}

/// Handle returned by `subscribe::<T>()`. Each clone gets its own position in the broadcast
/// ring; a slow subscriber that falls behind the ring's capacity will observe
/// [`Ros1Error::Lagged`]-equivalent behavior surfaced as a skipped message, matching the
/// "best effort, drop for slow consumers" semantics used across the transport.
pub struct Subscriber<T> {
    topic_name: String,
    receiver: broadcast::Receiver<Arc<Vec<u8>>>,
    phantom: PhantomData<T>,
}

impl<T: RosMessageType> Subscriber<T> {
    pub(crate) fn new(topic_name: &str, receiver: broadcast::Receiver<Arc<Vec<u8>>>) -> Self {
        Self {
            topic_name: topic_name.to_owned(),
            receiver,
            phantom: PhantomData,
        }
    }

    /// Awaits and deserializes the next message on this topic. Messages dropped due to the
    /// subscriber falling behind the internal ring are skipped transparently; only a closed
    /// subscription (the node shutting the topic down) surfaces an error.
    pub async fn next(&mut self) -> Result<T, Ros1Error> {
        loop {
            match self.receiver.recv().await {
                Ok(bytes) => {
                    return serde_rosmsg::from_slice(&bytes)
                        .map_err(|e| Ros1Error::Tcpros(TcprosError::Serialization(e)));
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    log::warn!(
                        "Subscriber for {} lagged behind by {} messages, dropping",
                        self.topic_name,
                        n
                    );
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => {
                    return Err(Ros1Error::ShuttingDown);
                }
            }
        }
    }
}

impl<T: RosMessageType> roslibrust_common::Subscribe<T> for Subscriber<T> {
    async fn next(&mut self) -> roslibrust_common::Result<T> {
        Subscriber::next(self).await.map_err(Into::into)
    }
}

pub(crate) enum SubscriptionCommand {
    PublisherUpdate(Vec<String>),
    Disconnect,
}

pub(crate) struct Subscription {
    _actor_task: ChildTask<()>,
    command_sender: tokio::sync::mpsc::Sender<SubscriptionCommand>,
    broadcast_tx: broadcast::Sender<Arc<Vec<u8>>>,
    topic_type: String,
}

impl Subscription {
    pub(crate) fn new(
        node_name: String,
        topic_name: String,
        topic_type: String,
        md5sum: String,
        message_definition: String,
        queue_size: usize,
        throttle: Duration,
        node_handle: NodeServerHandle,
    ) -> Self {
        let (broadcast_tx, _rx) = broadcast::channel(queue_size.max(1));
        let (command_sender, command_receiver) = tokio::sync::mpsc::channel(16);

        // One spinner per subscription, registered under the documented client-id scheme, so
        // queue-size/throttle actually gate delivery instead of messages going straight from
        // the TCPROS read loop to the broadcast channel.
        let spinner = Spinner::new(Duration::from_millis(1));
        let spinner_key = format!("Subscriber://{topic_name}");
        let forwarder: Arc<dyn SpinnerClient> = Arc::new(BroadcastForwarder {
            tx: broadcast_tx.clone(),
        });

        let actor = SubscriptionActor {
            node_name,
            topic_name,
            topic_type: topic_type.clone(),
            md5sum,
            message_definition,
            connections: Arc::new(DashMap::new()),
            spinner: spinner.clone(),
            spinner_key: spinner_key.clone(),
            node_handle,
        };
        let task = tokio::spawn(async move {
            spinner
                .add_client(spinner_key, queue_size.max(1), throttle, forwarder)
                .await;
            actor.run(command_receiver).await;
        });

        Self {
            _actor_task: task.into(),
            command_sender,
            broadcast_tx,
            topic_type,
        }
    }

    pub(crate) fn subscribe<T: RosMessageType>(&self, topic_name: &str) -> Subscriber<T> {
        Subscriber::new(topic_name, self.broadcast_tx.subscribe())
    }

    /// The real command channel into this subscription's actor, for the node registry to
    /// route `publisherUpdate` callbacks through once this subscription is the one of
    /// record for its topic.
    pub(crate) fn commands(&self) -> tokio::sync::mpsc::Sender<SubscriptionCommand> {
        self.command_sender.clone()
    }

    pub(crate) fn topic_type(&self) -> &str {
        &self.topic_type
    }

    pub(crate) async fn publisher_update(&self, uris: Vec<String>) {
        let _ = self.command_sender.send(SubscriptionCommand::PublisherUpdate(uris)).await;
    }

    pub(crate) async fn disconnect(&self) {
        let _ = self.command_sender.send(SubscriptionCommand::Disconnect).await;
    }
}

struct SubscriptionActor {
    node_name: String,
    topic_name: String,
    topic_type: String,
    md5sum: String,
    message_definition: String,
    /// Publisher XML-RPC URI -> reader task for the TCPROS connection to that publisher.
    connections: Arc<DashMap<String, ChildTask<()>>>,
    spinner: Spinner,
    spinner_key: String,
    node_handle: NodeServerHandle,
}

impl SubscriptionActor {
    async fn run(self, mut commands: tokio::sync::mpsc::Receiver<SubscriptionCommand>) {
        log::debug!("Subscription actor started for topic {}", self.topic_name);
        while let Some(cmd) = commands.recv().await {
            match cmd {
                SubscriptionCommand::PublisherUpdate(uris) => {
                    self.reconcile(uris).await;
                }
                SubscriptionCommand::Disconnect => {
                    self.connections.clear();
                }
            }
        }
        log::debug!("Subscription actor exiting for topic {}", self.topic_name);
    }

    /// Symmetric-difference reconciliation (§4.5): connect to URIs we don't have a live
    /// connection for yet, drop connections to URIs no longer in the list. Already-connected
    /// publishers are left untouched.
    async fn reconcile(&self, new_uris: Vec<String>) {
        use std::collections::HashSet;
        let new_set: HashSet<&String> = new_uris.iter().collect();

        let to_remove: Vec<String> = self
            .connections
            .iter()
            .map(|entry| entry.key().clone())
            .filter(|uri| !new_set.contains(uri))
            .collect();
        for uri in to_remove {
            log::debug!("Dropping connection to departed publisher {uri} for {}", self.topic_name);
            self.connections.remove(&uri);
        }

        for uri in new_uris {
            if self.connections.contains_key(&uri) {
                continue;
            }
            let topic_name = self.topic_name.clone();
            let topic_type = self.topic_type.clone();
            let md5sum = self.md5sum.clone();
            let message_definition = self.message_definition.clone();
            let node_name = self.node_name.clone();
            let node_handle = self.node_handle.clone();
            let spinner = self.spinner.clone();
            let spinner_key = self.spinner_key.clone();
            let uri_copy = uri.clone();
            let task = tokio::spawn(async move {
                if let Err(e) = connect_and_stream(
                    &node_name,
                    &uri_copy,
                    &topic_name,
                    &topic_type,
                    &md5sum,
                    &message_definition,
                    node_handle,
                    spinner,
                    spinner_key,
                )
                .await
                {
                    log::warn!("Subscriber connection to {uri_copy} for {topic_name} ended: {e}");
                }
            });
            self.connections.insert(uri, task.into());
        }
    }
}

/// Resolves `uri` via `requestTopic`, connects, performs the handshake, and streams frames
/// through the subscription's [`Spinner`] until the connection closes or is replaced.
#[allow(clippy::too_many_arguments)]
async fn connect_and_stream(
    node_name: &str,
    publisher_uri: &str,
    topic_name: &str,
    topic_type: &str,
    md5sum: &str,
    message_definition: &str,
    node_handle: NodeServerHandle,
    spinner: Spinner,
    spinner_key: String,
) -> Result<(), Ros1Error> {
    let (host, port) = node_handle
        .request_topic(publisher_uri, topic_name)
        .await?;

    let mut stream = TcpStream::connect((host.as_str(), port))
        .await
        .map_err(Ros1Error::Io)?;
    stream.set_nodelay(true).ok();

    let outgoing_header = ConnectionHeader {
        caller_id: node_name.to_owned(),
        topic: Some(topic_name.to_owned()),
        service: None,
        topic_type: topic_type.to_owned(),
        md5sum: Some(md5sum.to_owned()),
        message_definition: message_definition.to_owned(),
        latching: false,
        persistent: false,
        tcp_nodelay: true,
        error: None,
    };
    outgoing_header.write(&mut stream).await.map_err(Ros1Error::Io)?;

    let response_header = tcpros::receive_header(&mut stream).await?;
    if !response_header.md5_compatible(md5sum) || !response_header.type_compatible(topic_type) {
        let _ = stream.shutdown().await;
        return Err(Ros1Error::Tcpros(TcprosError::TypeMismatch {
            their_type: response_header.topic_type.clone(),
            their_md5: response_header.md5sum.clone().unwrap_or_default(),
            our_type: topic_type.to_owned(),
            our_md5: md5sum.to_owned(),
        }));
    }

    loop {
        let payload = tcpros::read_frame(&mut stream).await.map_err(Ros1Error::Io)?;
        spinner.ping(&spinner_key, payload).await;
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn reconcile_connects_new_and_drops_departed() {
        // Exercise reconcile's bookkeeping in isolation by hand-inserting a connection and
        // asserting it is removed once absent from the new URI list.
        let connections: Arc<DashMap<String, ChildTask<()>>> = Arc::new(DashMap::new());
        let dummy = tokio::spawn(async {
            tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
        });
        connections.insert("http://stale:0".to_string(), dummy.into());
        assert_eq!(connections.len(), 1);

        let new_set: std::collections::HashSet<&str> = ["http://fresh:0"].into_iter().collect();
        let to_remove: Vec<String> = connections
            .iter()
            .map(|e| e.key().clone())
            .filter(|uri| !new_set.contains(uri.as_str()))
            .collect();
        for uri in to_remove {
            connections.remove(&uri);
        }
        assert!(connections.is_empty());
    }

    #[tokio::test]
    async fn spinner_forwarder_delivers_pinged_bytes_to_broadcast_subscribers() {
        let (tx, mut rx) = broadcast::channel::<Arc<Vec<u8>>>(4);
        let forwarder: Arc<dyn SpinnerClient> = Arc::new(BroadcastForwarder { tx });
        let spinner = Spinner::new(Duration::from_millis(1));
        spinner
            .add_client("Subscriber://test", 4, Duration::ZERO, forwarder)
            .await;
        spinner.ping("Subscriber://test", vec![1, 2, 3]).await;
        let got = tokio::time::timeout(Duration::from_millis(50), rx.recv())
            .await
            .expect("spinner should have dispatched within the timeout")
            .unwrap();
        assert_eq!(*got, vec![1, 2, 3]);
    }
}
