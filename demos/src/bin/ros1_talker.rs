//! Publishes `std_msgs/String` on `/chatter` at 1Hz, actionlib-tutorial style.

use roslibrust_ros1::{NodeHandle, TopicProvider};
use roslibrust_test_msgs::std_msgs::String as RosString;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let master_uri =
        std::env::var("ROS_MASTER_URI").unwrap_or_else(|_| "http://localhost:11311".to_string());
    let node = NodeHandle::new(&master_uri, "/talker").await?;
    let publisher = node.advertise::<RosString>("/chatter").await?;

    let mut count = 0u64;
    let mut interval = tokio::time::interval(std::time::Duration::from_secs(1));
    loop {
        interval.tick().await;
        let msg = RosString {
            data: format!("hello world {count}"),
        };
        publisher.publish(&msg).await?;
        log::info!("Published: {}", msg.data);
        count += 1;
    }
}
