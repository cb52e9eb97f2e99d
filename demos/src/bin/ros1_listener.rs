//! Subscribes to `/chatter` and logs every `std_msgs/String` received.

use roslibrust_ros1::{NodeHandle, Subscribe, TopicProvider};
use roslibrust_test_msgs::std_msgs::String as RosString;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let master_uri =
        std::env::var("ROS_MASTER_URI").unwrap_or_else(|_| "http://localhost:11311".to_string());
    let node = NodeHandle::new(&master_uri, "/listener").await?;
    let mut subscriber = node.subscribe::<RosString>("/chatter").await?;

    loop {
        let msg = subscriber.next().await?;
        log::info!("Heard: {}", msg.data);
    }
}
