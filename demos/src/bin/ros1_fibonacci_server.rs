//! Runs the Fibonacci actionlib server fixture: computes the sequence one step per second,
//! publishing feedback along the way.

use roslibrust_ros1::action::ActionServer;
use roslibrust_ros1::NodeHandle;
use roslibrust_test_msgs::fibonacci::{Feedback, Fibonacci, Result as FibResult};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let master_uri =
        std::env::var("ROS_MASTER_URI").unwrap_or_else(|_| "http://localhost:11311".to_string());
    let node = NodeHandle::new(&master_uri, "/fibonacci_server").await?;

    let mut server = ActionServer::<Fibonacci, NodeHandle>::new(
        &node,
        "",
        5.0,
        std::time::Duration::from_secs(5),
    )
    .await?;

    log::info!("Fibonacci action server ready");
    while let Some(goal) = server.next_goal().await {
        goal.set_accepted().await;
        log::info!("Accepted goal for order {}", goal.goal.order);

        let mut sequence = vec![0, 1];
        for _ in 0..goal.goal.order.max(0) {
            let next = sequence[sequence.len() - 1] + sequence[sequence.len() - 2];
            sequence.push(next);
            goal.publish_feedback(Feedback {
                sequence: sequence.clone(),
            })
            .await?;
            tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        }
        goal.set_succeeded(FibResult { sequence }).await?;
    }
    Ok(())
}
