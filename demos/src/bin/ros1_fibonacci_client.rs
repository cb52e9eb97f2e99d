//! Sends one Fibonacci goal, logs feedback as it arrives, and prints the final sequence.

use roslibrust_ros1::action::{ActionClient, SimpleGoalState};
use roslibrust_ros1::NodeHandle;
use roslibrust_test_msgs::fibonacci::{Fibonacci, Goal};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let master_uri =
        std::env::var("ROS_MASTER_URI").unwrap_or_else(|_| "http://localhost:11311".to_string());
    let node = NodeHandle::new(&master_uri, "/fibonacci_client").await?;

    let client = ActionClient::<Fibonacci, NodeHandle>::new(&node, "", "/fibonacci_client").await?;
    let mut goal = client.send_goal(Goal { order: 10 }).await?;
    log::info!("Sent goal {}", goal.goal_id().id);

    while goal.state().as_simple() != SimpleGoalState::Done {
        if let Some(feedback) = goal.latest_feedback().await {
            log::info!("Feedback: {:?}", feedback.sequence);
        }
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    }

    if let Some((status, result)) = goal.result().await {
        log::info!(
            "Goal finished with status {}: {:?}",
            status.status,
            result.sequence
        );
    }
    Ok(())
}
