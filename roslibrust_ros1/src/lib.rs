//! A native ROS1 client implementation: TCPROS transport, the XML-RPC Master/Slave APIs,
//! publisher/subscriber/service engines, the cooperative dispatch spinner, and an actionlib
//! client/server built on top of them.
//!
//! Application code is written against the backend-agnostic traits in
//! [`roslibrust_common`]; [`NodeHandle`] is this crate's implementation of them.

pub mod action;
pub mod error;
pub mod names;
mod node;
pub mod publisher;
pub mod service_client;
pub mod service_server;
pub mod spinner;
pub mod subscriber;
pub mod tcpros;
mod xmlrpc_client;
mod master_client;

pub use error::{Ros1Error, Ros1Result};
pub use names::{Name, Remappings};
pub use node::NodeHandle;
pub use publisher::{Publisher, PublisherAny, PublisherOptions};
pub use service_client::ServiceClient;
pub use service_server::ServiceServer;
pub use spinner::Spinner;
pub use subscriber::{Subscriber, SubscriberOptions};
pub use tcpros::ConnectionHeader;

// Re-exported so downstream crates only need to depend on `roslibrust_ros1` for the common
// trait surface as well as the backend that implements it.
pub use roslibrust_common::{
    Error, Publish, Result, Ros, RosMessageType, RosServiceType, Service, ServiceFn, ShapeShifter,
    Subscribe, TopicProvider,
};
