//! Calls `/toggle` once with `data: true` and prints the response.

use roslibrust_ros1::{NodeHandle, ServiceProvider};
use roslibrust_test_msgs::std_srvs::{SetBool, SetBoolRequest};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let master_uri =
        std::env::var("ROS_MASTER_URI").unwrap_or_else(|_| "http://localhost:11311".to_string());
    let node = NodeHandle::new(&master_uri, "/toggle_client").await?;

    let response = node
        .call_service::<SetBool>("/toggle", SetBoolRequest { data: true })
        .await?;
    log::info!("Response: success={} message={}", response.success, response.message);
    Ok(())
}
