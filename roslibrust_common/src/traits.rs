use crate::{Result, RosMessageType, RosServiceType, ServiceFn};

/// Indicates that something is a publisher and has our expected publish
/// Implementors of this trait are expected to auto-cleanup the publisher when dropped
pub trait Publish<T: RosMessageType> {
    // Note: this is really just syntactic de-sugared `async fn`
    // We only plan to work with multi-threaded work stealing executors (e.g. tokio) so we're manually specifying Send
    fn publish(&self, data: &T) -> impl futures::Future<Output = Result<()>> + Send;
}

/// Indicates that something is a subscriber and has our expected subscribe method
/// Implementors of this trait are expected to auto-cleanup the subscriber when dropped
pub trait Subscribe<T: RosMessageType> {
    fn next(&mut self) -> impl futures::Future<Output = Result<T>> + Send;
}

/// This trait generically describes the capability of something to act as an async interface to a set of topics
///
/// This trait is largely based on ROS concepts, but could be extended to other protocols / concepts.
/// It assumes that topics are uniquely identified by a string name, and carry one data type, but
/// does not itself enforce that.
pub trait TopicProvider {
    // These associated types makeup the other half of the API
    // They are expected to be "self-deregistering", where dropping them results in unadvertise or unsubscribe operations as appropriate
    type Publisher<T: RosMessageType>: Publish<T> + Send + 'static;
    type Subscriber<T: RosMessageType>: Subscribe<T> + Send + 'static;

    /// Advertises a topic to be published to and returns a type specific publisher to use.
    fn advertise<T: RosMessageType>(
        &self,
        topic: &str,
    ) -> impl futures::Future<Output = Result<Self::Publisher<T>>> + Send;

    /// Subscribes to a topic and returns a type specific subscriber to use.
    fn subscribe<T: RosMessageType>(
        &self,
        topic: &str,
    ) -> impl futures::Future<Output = Result<Self::Subscriber<T>>> + Send;
}

/// Defines what it means to be something that is callable as a service
pub trait Service<T: RosServiceType> {
    fn call(
        &self,
        request: &T::Request,
    ) -> impl futures::Future<Output = Result<T::Response>> + Send;
}

/// This trait is analogous to TopicProvider, but instead provides the capability to create service servers and service clients
pub trait ServiceProvider {
    type ServiceClient<T: RosServiceType>: Service<T> + Send + 'static;
    type ServiceServer;

    /// A "oneshot" service call good for low frequency calls or where the service_provider may not always be available.
    fn call_service<T: RosServiceType>(
        &self,
        topic: &str,
        request: T::Request,
    ) -> impl futures::Future<Output = Result<T::Response>> + Send;

    /// An optimized version of call_service that returns a persistent client that can be used to repeatedly call a service.
    /// Dropping the returned client will perform all needed cleanup.
    fn service_client<T: RosServiceType + 'static>(
        &self,
        topic: &str,
    ) -> impl futures::Future<Output = Result<Self::ServiceClient<T>>> + Send;

    /// Advertise a service function to be available for clients to call.
    /// Dropping the returned handle unadvertises the service.
    fn advertise_service<T: RosServiceType + 'static, F>(
        &self,
        topic: &str,
        server: F,
    ) -> impl futures::Future<Output = Result<Self::ServiceServer>> + Send
    where
        F: ServiceFn<T>;
}

/// Represents all "standard" ROS functionality generically supported by roslibrust
///
/// Cloning the handle does not create additional underlying connections, but instead simply
/// returns another handle to interact with the underlying node. When the last handle for a
/// given node is dropped, the underlying node is expected to shut down and clean up.
pub trait Ros: 'static + Send + Sync + TopicProvider + ServiceProvider + Clone {}

/// The Ros trait is auto implemented for any type that implements the required traits
impl<T: 'static + Send + Sync + TopicProvider + ServiceProvider + Clone> Ros for T {}
