//! Advertises `/toggle`, a `std_srvs/SetBool` service that echoes the requested value back.

use roslibrust_ros1::{NodeHandle, ServiceProvider};
use roslibrust_test_msgs::std_srvs::{SetBool, SetBoolResponse};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let master_uri =
        std::env::var("ROS_MASTER_URI").unwrap_or_else(|_| "http://localhost:11311".to_string());
    let node = NodeHandle::new(&master_uri, "/toggle_server").await?;

    let _server = node
        .advertise_service::<SetBool, _>("/toggle", |req| {
            log::info!("Received toggle request: {}", req.data);
            Ok(SetBoolResponse {
                success: true,
                message: format!("toggled to {}", req.data),
            })
        })
        .await?;

    log::info!("Serving /toggle, press ctrl-c to exit");
    tokio::signal::ctrl_c().await?;
    Ok(())
}
