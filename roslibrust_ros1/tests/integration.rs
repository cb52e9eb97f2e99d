//! End-to-end scenarios run against an in-process fake master (see `tests/common`) instead of
//! a real `rosmaster`: echo, latch replay, service round trips, publisher-update convergence,
//! service client mutual exclusion, and a full actionlib goal life cycle.

mod common;

use common::FakeMaster;
use roslibrust_ros1::action::{ActionClient, ActionServer, SimpleGoalState};
use roslibrust_ros1::{NodeHandle, PublisherOptions, ServiceProvider, TopicProvider};
use roslibrust_test_msgs::fibonacci::{Fibonacci, Goal as FibGoal};
use roslibrust_test_msgs::std_msgs::String as RosString;
use roslibrust_test_msgs::std_srvs::{SetBool, SetBoolRequest, SetBoolResponse};
use std::time::Duration;

/// All nodes under test bind on loopback; the fake master's callback URLs only make sense if
/// every node's Slave API is reachable there too.
fn use_loopback() {
    std::env::set_var("ROS_IP", "127.0.0.1");
}

async fn timeout<F: std::future::Future>(fut: F) -> F::Output {
    tokio::time::timeout(Duration::from_secs(5), fut)
        .await
        .expect("operation timed out")
}

#[tokio::test]
async fn echo_pub_sub_round_trip() {
    use_loopback();
    let master = FakeMaster::spawn().await;

    let talker = NodeHandle::new(&master.uri, "/echo_talker").await.unwrap();
    let listener = NodeHandle::new(&master.uri, "/echo_listener").await.unwrap();

    let mut subscriber = timeout(listener.subscribe::<RosString>("/echo_chatter"))
        .await
        .unwrap();
    // Give the subscriber's registerSubscriber a moment to land before the publisher shows up.
    tokio::time::sleep(Duration::from_millis(100)).await;
    let publisher = timeout(talker.advertise::<RosString>("/echo_chatter"))
        .await
        .unwrap();

    // The publisher only learns about itself once it's had a chance to receive the
    // publisherUpdate push triggered by its own registration; poll briefly before publishing.
    for _ in 0..20 {
        if publisher.num_subscribers().await > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    publisher
        .publish(&RosString {
            data: "hello".to_string(),
        })
        .await
        .unwrap();

    let received = timeout(subscriber.next()).await.unwrap();
    assert_eq!(received.data, "hello");
}

#[tokio::test]
async fn latched_publisher_replays_last_message_to_late_subscriber() {
    use_loopback();
    let master = FakeMaster::spawn().await;

    let talker = NodeHandle::new(&master.uri, "/latch_talker").await.unwrap();
    let publisher = talker
        .advertise_with_options::<RosString>(
            "/latch_chatter",
            PublisherOptions {
                latching: true,
                ..Default::default()
            },
        )
        .await
        .unwrap();
    publisher
        .publish(&RosString {
            data: "latched".to_string(),
        })
        .await
        .unwrap();

    // A subscriber that connects well after the publish should still see the latched value on
    // first connection, without the talker publishing again.
    let listener = NodeHandle::new(&master.uri, "/latch_listener").await.unwrap();
    let mut subscriber = timeout(listener.subscribe::<RosString>("/latch_chatter"))
        .await
        .unwrap();

    let received = timeout(subscriber.next()).await.unwrap();
    assert_eq!(received.data, "latched");
}

#[tokio::test]
async fn service_round_trip_via_oneshot_and_persistent_client() {
    use_loopback();
    let master = FakeMaster::spawn().await;

    let server_node = NodeHandle::new(&master.uri, "/toggle_server_test").await.unwrap();
    let _server = server_node
        .advertise_service::<SetBool, _>("/toggle_test", |req: SetBoolRequest| {
            Ok(SetBoolResponse {
                success: true,
                message: format!("toggled to {}", req.data),
            })
        })
        .await
        .unwrap();

    let client_node = NodeHandle::new(&master.uri, "/toggle_client_test").await.unwrap();

    let response = timeout(
        client_node.call_service::<SetBool>("/toggle_test", SetBoolRequest { data: true }),
    )
    .await
    .unwrap();
    assert!(response.success);
    assert_eq!(response.message, "toggled to true");

    let persistent = timeout(client_node.service_client::<SetBool>("/toggle_test"))
        .await
        .unwrap();
    let response = timeout(persistent.call(&SetBoolRequest { data: false }))
        .await
        .unwrap();
    assert_eq!(response.message, "toggled to false");
}

#[tokio::test]
async fn subscriber_converges_onto_publisher_registered_after_it() {
    use_loopback();
    let master = FakeMaster::spawn().await;

    let listener = NodeHandle::new(&master.uri, "/converge_listener").await.unwrap();
    let mut subscriber = timeout(listener.subscribe::<RosString>("/converge_chatter"))
        .await
        .unwrap();

    // No publisher exists yet; the subscription should pick one up once the master pushes a
    // publisherUpdate for it, with no further action from the subscriber.
    let talker = NodeHandle::new(&master.uri, "/converge_talker").await.unwrap();
    let publisher = timeout(talker.advertise::<RosString>("/converge_chatter"))
        .await
        .unwrap();

    for _ in 0..40 {
        if publisher.num_subscribers().await > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    publisher
        .publish(&RosString {
            data: "converged".to_string(),
        })
        .await
        .unwrap();

    let received = timeout(subscriber.next()).await.unwrap();
    assert_eq!(received.data, "converged");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_service_calls_on_one_client_are_rejected_not_queued() {
    use_loopback();
    let master = FakeMaster::spawn().await;

    let server_node = NodeHandle::new(&master.uri, "/busy_server_test").await.unwrap();
    // Slow enough that the second call below reliably lands while the first still holds the
    // client's mutual-exclusion guard, without relying on a hand-tuned sleep on the client side.
    let _server = server_node
        .advertise_service::<SetBool, _>("/busy_test", |req: SetBoolRequest| {
            std::thread::sleep(Duration::from_millis(300));
            Ok(SetBoolResponse {
                success: req.data,
                message: String::new(),
            })
        })
        .await
        .unwrap();

    let client_node = NodeHandle::new(&master.uri, "/busy_client_test").await.unwrap();
    let client = std::sync::Arc::new(
        timeout(client_node.service_client::<SetBool>("/busy_test"))
            .await
            .unwrap(),
    );

    let first = {
        let client = client.clone();
        tokio::spawn(async move { client.call(&SetBoolRequest { data: true }).await })
    };
    // Give the first call a moment to acquire the mutual-exclusion guard before firing the
    // second one, so the race is deterministic rather than coincidental.
    tokio::time::sleep(Duration::from_millis(20)).await;
    let second = client.call(&SetBoolRequest { data: false }).await;

    assert!(second.is_err(), "concurrent call should be rejected, not queued");
    let first = timeout(first).await.unwrap();
    assert!(first.unwrap().success);
}

#[tokio::test]
async fn fibonacci_action_goal_runs_to_success() {
    use_loopback();
    let master = FakeMaster::spawn().await;

    let server_node = NodeHandle::new(&master.uri, "/fib_server_test").await.unwrap();
    let mut server = ActionServer::<Fibonacci, NodeHandle>::new(
        &server_node,
        "",
        10.0,
        Duration::from_secs(2),
    )
    .await
    .unwrap();

    tokio::spawn(async move {
        while let Some(goal) = server.next_goal().await {
            goal.set_accepted().await;
            let mut sequence = vec![0, 1];
            for _ in 0..goal.goal.order.max(0) {
                let next = sequence[sequence.len() - 1] + sequence[sequence.len() - 2];
                sequence.push(next);
            }
            goal
                .set_succeeded(roslibrust_test_msgs::fibonacci::Result { sequence })
                .await
                .unwrap();
        }
    });

    let client_node = NodeHandle::new(&master.uri, "/fib_client_test").await.unwrap();
    // Give the server time to advertise/subscribe before the client's goal publish races it.
    tokio::time::sleep(Duration::from_millis(200)).await;
    let client = ActionClient::<Fibonacci, NodeHandle>::new(&client_node, "", "/fib_client_test")
        .await
        .unwrap();
    // Let the goal/cancel/status/feedback/result topics converge both ways before publishing
    // the goal, same as the plain pub/sub tests above.
    tokio::time::sleep(Duration::from_millis(300)).await;

    let mut goal = timeout(client.send_goal(FibGoal { order: 5 })).await.unwrap();
    let state = timeout(goal.wait_for_result()).await;
    assert_eq!(state.as_simple(), SimpleGoalState::Done);

    let (status, result) = goal.result().await.unwrap();
    assert_eq!(status.status, 3); // Succeeded
    assert_eq!(result.sequence, vec![0, 1, 1, 2, 3, 5, 8]);
}
