//! The publisher engine (§4.4): accepts subscriber connections, latches, throttles, and
//! fans serialized messages out to every connected subscriber socket.

use crate::error::{Ros1Error, TcprosError};
use crate::node::actor::NodeServerHandle;
use crate::tcpros::{self, ConnectionHeader};
use abort_on_drop::ChildTask;
use roslibrust_common::RosMessageType;
use std::collections::VecDeque;
use std::marker::PhantomData;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, RwLock};

/// Handle returned by `advertise::<T>()`. Dropping the last clone of the sender it wraps
/// tears down the underlying [`Publication`] and unregisters the topic from the Master.
pub struct Publisher<T> {
    topic_name: String,
    sender: mpsc::Sender<PublishCommand>,
    phantom: PhantomData<T>,
}

impl<T: RosMessageType> Publisher<T> {
    pub(crate) fn new(topic_name: &str, sender: mpsc::Sender<PublishCommand>) -> Self {
        Self {
            topic_name: topic_name.to_owned(),
            sender,
            phantom: PhantomData,
        }
    }

    /// Serializes and queues `data` to be sent on the related topic.
    ///
    /// Returns once the message has been queued, not once it has actually reached every
    /// subscriber. If `throttle < 0` (the publication's configured default, or none at all)
    /// the flush happens essentially inline; otherwise it is coalesced into the next debounce
    /// window (§4.4, property 3).
    pub async fn publish(&self, data: &T) -> Result<(), Ros1Error> {
        let bytes = serde_rosmsg::to_vec(data).map_err(TcprosError::Serialization)?;
        self.sender
            .send(PublishCommand::Publish(bytes))
            .await
            .map_err(|_| Ros1Error::ShuttingDown)?;
        log::debug!("Publishing data on topic {}", self.topic_name);
        Ok(())
    }

    /// Number of subscribers currently connected to this publication.
    pub async fn num_subscribers(&self) -> usize {
        let (tx, rx) = tokio::sync::oneshot::channel();
        if self.sender.send(PublishCommand::CountSubs(tx)).await.is_err() {
            return 0;
        }
        rx.await.unwrap_or(0)
    }

    /// Closes every connected subscriber socket and cancels any pending debounce timer.
    /// The publication itself remains usable afterward (new connections can still arrive).
    pub async fn disconnect(&self) {
        let _ = self.sender.send(PublishCommand::Disconnect).await;
    }
}

impl<T: RosMessageType> roslibrust_common::Publish<T> for Publisher<T> {
    async fn publish(&self, data: &T) -> roslibrust_common::Result<()> {
        Publisher::publish(self, data).await.map_err(Into::into)
    }
}

/// A publisher for use when message type is not known at compile time (e.g. bag playback).
/// The caller is responsible for providing already-serialized TCPROS message bytes.
pub struct PublisherAny {
    topic_name: String,
    sender: mpsc::Sender<PublishCommand>,
}

impl PublisherAny {
    pub(crate) fn new(topic_name: &str, sender: mpsc::Sender<PublishCommand>) -> Self {
        Self {
            topic_name: topic_name.to_owned(),
            sender,
        }
    }

    pub async fn publish(&self, data: Vec<u8>) -> Result<(), Ros1Error> {
        self.sender
            .send(PublishCommand::Publish(data))
            .await
            .map_err(|_| Ros1Error::ShuttingDown)?;
        log::debug!("Publishing raw data on topic {}", self.topic_name);
        Ok(())
    }
}

pub(crate) enum PublishCommand {
    Publish(Vec<u8>),
    CountSubs(tokio::sync::oneshot::Sender<usize>),
    Disconnect,
}

/// Configuration for a new [`Publication`].
pub struct PublisherOptions {
    pub latching: bool,
    pub tcp_nodelay: bool,
    pub queue_size: usize,
    /// Negative means "flush immediately on every publish."
    pub throttle: Option<Duration>,
}

impl Default for PublisherOptions {
    fn default() -> Self {
        Self {
            latching: false,
            tcp_nodelay: false,
            queue_size: 1,
            throttle: None,
        }
    }
}

pub(crate) struct Publication {
    topic_type: String,
    listener_port: u16,
    _tcp_accept_task: ChildTask<()>,
    _publish_task: ChildTask<()>,
    command_sender: mpsc::WeakSender<PublishCommand>,
}

impl Publication {
    pub(crate) async fn new(
        node_name: &str,
        topic_name: &str,
        host_addr: std::net::Ipv4Addr,
        msg_definition: &str,
        md5sum: &str,
        topic_type: &str,
        options: PublisherOptions,
        node_handle: NodeServerHandle,
    ) -> std::io::Result<(Self, mpsc::Sender<PublishCommand>)> {
        let bind_addr = SocketAddr::from((host_addr, 0));
        let tcp_listener = TcpListener::bind(bind_addr).await?;
        let listener_port = tcp_listener.local_addr()?.port();

        let (sender, receiver) = mpsc::channel::<PublishCommand>(options.queue_size.max(1) * 4);

        let responding_header = ConnectionHeader {
            caller_id: node_name.to_owned(),
            topic: Some(topic_name.to_owned()),
            service: None,
            topic_type: topic_type.to_owned(),
            md5sum: Some(md5sum.to_owned()),
            message_definition: msg_definition.to_owned(),
            latching: options.latching,
            persistent: false,
            tcp_nodelay: options.tcp_nodelay,
            error: None,
        };

        let subscriber_streams = Arc::new(RwLock::new(Vec::<TcpStream>::new()));
        let last_message = Arc::new(RwLock::new(None::<Vec<u8>>));

        let accept_streams = subscriber_streams.clone();
        let accept_last_message = last_message.clone();
        let accept_topic = topic_name.to_owned();
        let accept_header = responding_header.clone();
        let tcp_accept_handle = tokio::spawn(async move {
            Self::tcp_accept_task(
                tcp_listener,
                accept_streams,
                accept_topic,
                accept_header,
                accept_last_message,
            )
            .await
        });

        let publish_topic = topic_name.to_owned();
        let publish_handle = tokio::spawn(async move {
            Self::publish_task(
                receiver,
                subscriber_streams,
                last_message,
                node_handle,
                publish_topic,
                options.queue_size.max(1),
                options.throttle,
            )
            .await
        });

        let sender_copy = sender.clone();
        Ok((
            Self {
                topic_type: topic_type.to_owned(),
                listener_port,
                _tcp_accept_task: tcp_accept_handle.into(),
                _publish_task: publish_handle.into(),
                command_sender: sender.downgrade(),
            },
            sender_copy,
        ))
    }

    pub(crate) fn port(&self) -> u16 {
        self.listener_port
    }

    pub(crate) fn topic_type(&self) -> &str {
        &self.topic_type
    }

    pub(crate) fn get_sender(&self) -> Option<mpsc::Sender<PublishCommand>> {
        self.command_sender.clone().upgrade()
    }

    /// The flush+fan-out+latch loop. Owns the outbound ring buffer and debounce timer.
    async fn publish_task(
        mut rx: mpsc::Receiver<PublishCommand>,
        subscriber_streams: Arc<RwLock<Vec<TcpStream>>>,
        last_message: Arc<RwLock<Option<Vec<u8>>>>,
        node_handle: NodeServerHandle,
        topic: String,
        queue_size: usize,
        throttle: Option<Duration>,
    ) {
        let mut outbound: VecDeque<Vec<u8>> = VecDeque::with_capacity(queue_size);
        let mut last_flush = Instant::now() - Duration::from_secs(3600);
        // `Some(deadline)` while a debounce window is armed; the sleep is polled as a select!
        // branch rather than awaited inline so CountSubs/Disconnect/further Publish commands
        // keep draining off `rx` during the wait instead of blocking the whole loop.
        let mut debounce_deadline: Option<Instant> = None;

        log::debug!("Publish task has started for publication: {topic}");
        loop {
            tokio::select! {
                maybe_cmd = rx.recv() => {
                    match maybe_cmd {
                        Some(PublishCommand::Publish(bytes)) => {
                            if outbound.len() >= queue_size {
                                outbound.pop_front();
                            }
                            outbound.push_back(bytes);

                            match throttle {
                                None => {
                                    Self::flush(&mut outbound, &subscriber_streams, &last_message).await;
                                    last_flush = Instant::now();
                                }
                                Some(period) => {
                                    if debounce_deadline.is_none() {
                                        let wait = period.saturating_sub(Instant::now().saturating_duration_since(last_flush));
                                        debounce_deadline = Some(Instant::now() + wait);
                                    }
                                }
                            }
                        }
                        Some(PublishCommand::CountSubs(resp)) => {
                            let count = subscriber_streams.read().await.len();
                            let _ = resp.send(count);
                        }
                        Some(PublishCommand::Disconnect) => {
                            subscriber_streams.write().await.clear();
                            outbound.clear();
                            debounce_deadline = None;
                        }
                        None => {
                            log::debug!("No more senders for publisher channel, cleaning up publication {topic}");
                            let nh_copy = node_handle.clone();
                            let topic_copy = topic.clone();
                            tokio::spawn(async move {
                                let _ = nh_copy.unregister_publisher(&topic_copy).await;
                            });
                            break;
                        }
                    }
                }
                _ = tokio::time::sleep_until(debounce_deadline.unwrap_or_else(Instant::now).into()), if debounce_deadline.is_some() => {
                    Self::flush(&mut outbound, &subscriber_streams, &last_message).await;
                    last_flush = Instant::now();
                    debounce_deadline = None;
                }
            }
        }
        log::debug!("Publish task has exited for publication: {topic}");
    }

    async fn flush(
        outbound: &mut VecDeque<Vec<u8>>,
        subscriber_streams: &Arc<RwLock<Vec<TcpStream>>>,
        last_message: &Arc<RwLock<Option<Vec<u8>>>>,
    ) {
        if outbound.is_empty() {
            return;
        }
        let mut streams = subscriber_streams.write().await;
        for msg in outbound.drain(..) {
            let framed = match frame_message(&msg) {
                Ok(f) => f,
                Err(e) => {
                    log::error!("Failed to frame outbound message: {e}");
                    continue;
                }
            };
            let mut to_remove = Vec::new();
            for (idx, stream) in streams.iter_mut().enumerate() {
                if let Err(err) = stream.write_all(&framed).await {
                    log::debug!("Failed to send data to subscriber: {err}, removing");
                    to_remove.push(idx);
                }
            }
            for (removed, idx) in to_remove.into_iter().enumerate() {
                streams.remove(idx - removed);
            }
            *last_message.write().await = Some(framed);
        }
    }

    async fn tcp_accept_task(
        tcp_listener: TcpListener,
        subscriber_streams: Arc<RwLock<Vec<TcpStream>>>,
        topic_name: String,
        responding_header: ConnectionHeader,
        last_message: Arc<RwLock<Option<Vec<u8>>>>,
    ) {
        log::debug!("TCP accept task has started for publication: {topic_name}");
        loop {
            let (mut stream, peer_addr) = match tcp_listener.accept().await {
                Ok(pair) => pair,
                Err(e) => {
                    log::error!("Publisher accept loop error: {e}");
                    continue;
                }
            };
            log::info!("Received connection from subscriber at {peer_addr} for topic {topic_name}");

            let connection_header = match tcpros::receive_header(&mut stream).await {
                Ok(header) => header,
                Err(e) => {
                    log::error!("Failed to read connection header from {peer_addr}: {e}");
                    let _ = stream.shutdown().await;
                    continue;
                }
            };

            let expected_md5 = responding_header.md5sum.as_deref().unwrap_or("*");
            if !connection_header.md5_compatible(expected_md5)
                || !connection_header.type_compatible(&responding_header.topic_type)
            {
                log::warn!(
                    "Rejecting subscribe request for {topic_name} from {peer_addr}: type/md5 mismatch"
                );
                let error_header = ConnectionHeader {
                    error: Some(format!(
                        "topic [{topic_name}] does not match type/md5 of publisher"
                    )),
                    ..Default::default()
                };
                let _ = error_header.write(&mut stream).await;
                let _ = stream.shutdown().await;
                continue;
            }

            if let Err(e) = responding_header.write(&mut stream).await {
                log::error!("Unable to write response header to {peer_addr}: {e}");
                continue;
            }

            if responding_header.latching {
                if let Some(last) = last_message.read().await.as_ref() {
                    if let Err(e) = stream.write_all(last).await {
                        log::error!("Failed to send latch message to {peer_addr}: {e}");
                    }
                }
            }

            subscriber_streams.write().await.push(stream);
            log::debug!("Added stream for topic {topic_name} from {peer_addr}");
        }
    }
}

fn frame_message(payload: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut out = Vec::with_capacity(payload.len() + 4);
    out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    out.extend_from_slice(payload);
    Ok(out)
}

impl Drop for Publication {
    fn drop(&mut self) {
        log::debug!("Dropping publication for topic type {}", self.topic_type);
    }
}
