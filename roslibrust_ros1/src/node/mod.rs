//! The node facade: the public entry point tying the Master client, the Slave-API XML-RPC
//! server, and the publication/subscription/service registries together into the
//! [`roslibrust_common`] traits application code is written against.

pub(crate) mod actor;
mod slave_api;

use crate::error::Ros1Error;
use crate::master_client::{MasterClient, ReadyGate};
use crate::names::{Name, Remappings};
use crate::publisher::{Publication, Publisher, PublisherOptions};
use crate::service_client::ServiceClient;
use crate::service_server::{RawServiceHandler, ServiceServer};
use crate::subscriber::{Subscriber, SubscriberOptions, Subscription};
use abort_on_drop::ChildTask;
use actor::NodeServerHandle;
use roslibrust_common::{RosMessageType, RosServiceType, ServiceFn};
use std::collections::HashSet;
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::RwLock;

lazy_static::lazy_static! {
    /// Enforces one live node per (process, name): ROS processes conventionally run a single
    /// node, and re-initializing the same name while it's still running almost always
    /// indicates a bug rather than an intentional second node.
    static ref ACTIVE_NODES: StdMutex<HashSet<String>> = StdMutex::new(HashSet::new());
}

/// A handle to a running ROS1 node. Cloning shares the same underlying node (registries,
/// Master client, Slave-API server); the node itself shuts down once the last clone drops.
#[derive(Clone)]
pub struct NodeHandle {
    inner: Arc<NodeInner>,
}

struct NodeInner {
    node_name: String,
    host: String,
    master_uri: String,
    remappings: Remappings,
    actor: NodeServerHandle,
    _xmlrpc_server: ChildTask<()>,
    /// Live publication/subscription/service-server objects, keyed so they can be looked up
    /// by repeated `advertise`/`subscribe` calls on the same topic instead of creating
    /// duplicate TCP listeners.
    publications: RwLock<std::collections::HashMap<String, Arc<Publication>>>,
    subscriptions: RwLock<std::collections::HashMap<String, Arc<Subscription>>>,
}

impl NodeHandle {
    /// Connects to the Master at `master_uri` and brings up this node's Slave-API server.
    /// `name` is validated as a ROS graph name (see [`crate::names::Name`]).
    pub async fn new(master_uri: &str, name: &str) -> Result<Self, Ros1Error> {
        Self::new_with_name(master_uri, name.to_string(), false).await
    }

    /// As [`Self::new`], but appends a pid/timestamp suffix to `base_name` first, the way
    /// `roscpp`/`rospy` nodes do when started with an anonymous-name flag. Useful for nodes of
    /// which many instances may run at once (e.g. short-lived tools, demos).
    pub async fn new_anonymous(master_uri: &str, base_name: &str) -> Result<Self, Ros1Error> {
        Self::new_with_name(master_uri, base_name.to_string(), true).await
    }

    async fn new_with_name(
        master_uri: &str,
        base_name: String,
        anonymous: bool,
    ) -> Result<Self, Ros1Error> {
        let remappings = Remappings::parse(std::env::args());

        // `__name` always wins over the name passed in code, matching roscpp/rospy; `__ns`
        // prefixes whichever name results, unless that name is already fully qualified.
        let requested_name = remappings.name.clone().unwrap_or(base_name);
        let mut node_name = Name::new(&requested_name)
            .map_err(|e| Ros1Error::Other(anyhow::anyhow!(e)))?
            .as_str()
            .to_owned();
        if anonymous {
            node_name = Name::anonymize(&node_name).as_str().to_owned();
        }
        if let Some(ns) = &remappings.namespace {
            if !requested_name.starts_with('/') {
                let ns = ns.trim_end_matches('/');
                node_name = Name::new(&format!("{ns}{node_name}"))
                    .map_err(|e| Ros1Error::Other(anyhow::anyhow!(e)))?
                    .as_str()
                    .to_owned();
            }
        }

        {
            let mut active = ACTIVE_NODES.lock().unwrap();
            if active.contains(&node_name) {
                return Err(Ros1Error::Other(anyhow::anyhow!(
                    "node {node_name} is already running in this process"
                )));
            }
            active.insert(node_name.clone());
        }

        let master_uri = remappings.master.clone().unwrap_or_else(|| master_uri.to_string());
        let host = remappings.resolve_host();
        let (ready_gate, ready_rx) = ReadyGate::new();

        // The Master client needs this node's own Slave-API URL on every registration call,
        // but that URL's port isn't known until the Slave-API server is bound, which in turn
        // needs a handle to the actor that needs the Master client. `MasterClient` breaks the
        // cycle by holding its caller API behind a lock that's filled in once the Slave-API
        // port is known, before `ready()` (and therefore any registration) can proceed.
        let master = MasterClient::new(&master_uri, node_name.clone(), ready_rx);
        let actor = NodeServerHandle::spawn(node_name.clone(), host.clone(), master.clone());

        let (xmlrpc_port, xmlrpc_task) =
            slave_api::serve(host.clone(), master_uri.clone(), actor.clone()).await?;
        master.set_caller_api(format!("http://{host}:{xmlrpc_port}/")).await;
        ready_gate.signal_ready();
        log::info!("Node {node_name} Slave API listening on {host}:{xmlrpc_port}");

        Ok(Self {
            inner: Arc::new(NodeInner {
                node_name,
                host,
                master_uri,
                remappings,
                actor,
                _xmlrpc_server: xmlrpc_task,
                publications: RwLock::new(std::collections::HashMap::new()),
                subscriptions: RwLock::new(std::collections::HashMap::new()),
            }),
        })
    }

    /// Applies `__ns`/explicit topic remaps documented in [`crate::names::Remappings`] before
    /// validating the result as a graph name.
    fn resolve_graph_name(&self, name: &str) -> String {
        if let Some(mapped) = self.inner.remappings.topics.get(name) {
            return mapped.clone();
        }
        if name.starts_with('/') {
            return name.to_string();
        }
        match &self.inner.remappings.namespace {
            Some(ns) => format!("{}/{name}", ns.trim_end_matches('/')),
            None => name.to_string(),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.node_name
    }

    pub fn master_uri(&self) -> &str {
        &self.inner.master_uri
    }

    /// Gracefully unregisters every publication, subscription, and service from the Master.
    pub async fn shutdown(&self) {
        self.inner.actor.shutdown();
    }

    async fn advertise_typed<T: RosMessageType>(
        &self,
        topic: &str,
    ) -> Result<Publisher<T>, Ros1Error> {
        self.advertise_with_options_typed(topic, PublisherOptions::default())
            .await
    }

    /// As [`Self::advertise`], but with explicit control over latching/queueing/throttling.
    /// Not part of the generic [`roslibrust_common::TopicProvider`] surface since those knobs
    /// are ROS1-specific; call this directly on a [`NodeHandle`] when they're needed.
    pub async fn advertise_with_options<T: RosMessageType>(
        &self,
        topic: &str,
        options: PublisherOptions,
    ) -> Result<Publisher<T>, Ros1Error> {
        self.advertise_with_options_typed(topic, options).await
    }

    async fn advertise_with_options_typed<T: RosMessageType>(
        &self,
        topic: &str,
        options: PublisherOptions,
    ) -> Result<Publisher<T>, Ros1Error> {
        let topic = Name::new(&self.resolve_graph_name(topic))
            .map_err(|e| Ros1Error::Other(anyhow::anyhow!(e)))?
            .as_str()
            .to_owned();

        let mut publications = self.inner.publications.write().await;
        if let Some(publication) = publications.get(&topic) {
            if publication.topic_type() != T::ROS_TYPE_NAME {
                return Err(Ros1Error::Other(anyhow::anyhow!(
                    "topic {topic} is already advertised as {}, not {}",
                    publication.topic_type(),
                    T::ROS_TYPE_NAME
                )));
            }
            if let Some(sender) = publication.get_sender() {
                return Ok(Publisher::new(&topic, sender));
            }
        }

        let host_addr: Ipv4Addr = self.inner.host.parse().unwrap_or(Ipv4Addr::LOCALHOST);
        let (publication, sender) = Publication::new(
            &self.inner.node_name,
            &topic,
            host_addr,
            T::DEFINITION,
            T::MD5SUM,
            T::ROS_TYPE_NAME,
            options,
            self.inner.actor.clone(),
        )
        .await
        .map_err(Ros1Error::Io)?;

        self.inner
            .actor
            .register_publisher(&topic, publication.port(), T::ROS_TYPE_NAME)
            .await?;

        publications.insert(topic.clone(), Arc::new(publication));
        Ok(Publisher::new(&topic, sender))
    }

    async fn subscribe_typed<T: RosMessageType>(
        &self,
        topic: &str,
    ) -> Result<Subscriber<T>, Ros1Error> {
        self.subscribe_with_options_typed(topic, SubscriberOptions::default())
            .await
    }

    /// As [`Self::subscribe`], but with explicit control over queue size and delivery
    /// throttle, routed through the node's [`crate::spinner::Spinner`]. Not part of the
    /// generic [`roslibrust_common::TopicProvider`] surface for the same reason
    /// [`Self::advertise_with_options`] isn't.
    pub async fn subscribe_with_options<T: RosMessageType>(
        &self,
        topic: &str,
        options: SubscriberOptions,
    ) -> Result<Subscriber<T>, Ros1Error> {
        self.subscribe_with_options_typed(topic, options).await
    }

    async fn subscribe_with_options_typed<T: RosMessageType>(
        &self,
        topic: &str,
        options: SubscriberOptions,
    ) -> Result<Subscriber<T>, Ros1Error> {
        let topic = Name::new(&self.resolve_graph_name(topic))
            .map_err(|e| Ros1Error::Other(anyhow::anyhow!(e)))?
            .as_str()
            .to_owned();

        let mut subscriptions = self.inner.subscriptions.write().await;
        if let Some(existing) = subscriptions.get(&topic) {
            if existing.topic_type() != T::ROS_TYPE_NAME {
                return Err(Ros1Error::Other(anyhow::anyhow!(
                    "topic {topic} is already subscribed as {}, not {}",
                    existing.topic_type(),
                    T::ROS_TYPE_NAME
                )));
            }
            return Ok(existing.subscribe(&topic));
        }

        let subscription = Subscription::new(
            self.inner.node_name.clone(),
            topic.clone(),
            T::ROS_TYPE_NAME.to_string(),
            T::MD5SUM.to_string(),
            T::DEFINITION.to_string(),
            options.queue_size,
            options.throttle,
            self.inner.actor.clone(),
        );

        let publishers = self
            .inner
            .actor
            .register_subscriber(&topic, T::ROS_TYPE_NAME, subscription.commands())
            .await?;
        subscription.publisher_update(publishers).await;

        let subscription = Arc::new(subscription);
        subscriptions.insert(topic.clone(), subscription.clone());
        Ok(subscription.subscribe(&topic))
    }

    async fn call_service_typed<T: RosServiceType>(
        &self,
        topic: &str,
        request: T::Request,
    ) -> Result<T::Response, Ros1Error> {
        let client = ServiceClient::<T>::new(
            self.inner.node_name.clone(),
            self.resolve_graph_name(topic),
            self.inner.actor.clone(),
        );
        client.call_oneshot(&request).await
    }

    async fn service_client_typed<T: RosServiceType>(
        &self,
        topic: &str,
    ) -> Result<ServiceClient<T>, Ros1Error> {
        Ok(ServiceClient::new(
            self.inner.node_name.clone(),
            self.resolve_graph_name(topic),
            self.inner.actor.clone(),
        ))
    }

    async fn advertise_service_typed<T, F>(
        &self,
        topic: &str,
        server: F,
    ) -> Result<ServiceServer, Ros1Error>
    where
        T: RosServiceType,
        F: ServiceFn<T>,
    {
        let topic = Name::new(&self.resolve_graph_name(topic))
            .map_err(|e| Ros1Error::Other(anyhow::anyhow!(e)))?
            .as_str()
            .to_owned();

        let handler: RawServiceHandler = Arc::new(move |bytes: Vec<u8>| {
            let request: T::Request =
                serde_rosmsg::from_slice(&bytes).map_err(|e| e.to_string())?;
            let response = server(request).map_err(|e| e.to_string())?;
            serde_rosmsg::to_vec(&response).map_err(|e| e.to_string())
        });

        let host_addr: Ipv4Addr = self.inner.host.parse().unwrap_or(Ipv4Addr::LOCALHOST);
        let (server_handle, port) = ServiceServer::new(
            &self.inner.node_name,
            &topic,
            host_addr,
            T::ROS_SERVICE_NAME,
            T::MD5SUM,
            handler,
            self.inner.actor.clone(),
        )
        .await
        .map_err(Ros1Error::Io)?;

        self.inner.actor.register_service(&topic, port).await?;
        Ok(server_handle)
    }
}

impl roslibrust_common::TopicProvider for NodeHandle {
    type Publisher<T: RosMessageType> = Publisher<T>;
    type Subscriber<T: RosMessageType> = Subscriber<T>;

    async fn advertise<T: RosMessageType>(
        &self,
        topic: &str,
    ) -> roslibrust_common::Result<Self::Publisher<T>> {
        self.advertise_typed(topic).await.map_err(Into::into)
    }

    async fn subscribe<T: RosMessageType>(
        &self,
        topic: &str,
    ) -> roslibrust_common::Result<Self::Subscriber<T>> {
        self.subscribe_typed(topic).await.map_err(Into::into)
    }
}

impl roslibrust_common::ServiceProvider for NodeHandle {
    type ServiceClient<T: RosServiceType> = ServiceClient<T>;
    type ServiceServer = ServiceServer;

    async fn call_service<T: RosServiceType>(
        &self,
        topic: &str,
        request: T::Request,
    ) -> roslibrust_common::Result<T::Response> {
        self.call_service_typed::<T>(topic, request)
            .await
            .map_err(Into::into)
    }

    async fn service_client<T: RosServiceType + 'static>(
        &self,
        topic: &str,
    ) -> roslibrust_common::Result<Self::ServiceClient<T>> {
        self.service_client_typed::<T>(topic).await.map_err(Into::into)
    }

    async fn advertise_service<T: RosServiceType + 'static, F>(
        &self,
        topic: &str,
        server: F,
    ) -> roslibrust_common::Result<Self::ServiceServer>
    where
        F: ServiceFn<T>,
    {
        self.advertise_service_typed::<T, F>(topic, server)
            .await
            .map_err(Into::into)
    }
}

impl Drop for NodeInner {
    fn drop(&mut self) {
        ACTIVE_NODES.lock().unwrap().remove(&self.node_name);
        self.actor.shutdown();
    }
}
