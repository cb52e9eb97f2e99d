//! The actionlib server: accepts goals off the `goal` topic, lets the application drive each
//! goal through `Active -> {Succeeded, Aborted, Preempted, Rejected}`, and publishes status at
//! a fixed rate plus feedback/result as the application produces them.
//!
//! Terminal statuses are retained in the status list for `status_list_timeout` (actionlib's
//! `status_list_timeout`, default 5s) so that late-joining clients still observe the final
//! state of a goal that finished just before they subscribed, then pruned.

use crate::action::msgs::{
    ActionFeedbackEnvelope, ActionGoalEnvelope, ActionResultEnvelope, GoalId, GoalStatus,
    GoalStatusArray, Header, RosActionType,
};
use roslibrust_common::{Publish, Ros, Subscribe, TopicProvider};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Mutex};

struct TrackedServerGoal {
    status: GoalStatus,
    finished_at: Option<Instant>,
}

struct Shared<A: RosActionType, R: Ros> {
    goals: Mutex<HashMap<String, TrackedServerGoal>>,
    feedback_pub: R::Publisher<A::ActionFeedback>,
    result_pub: R::Publisher<A::ActionResult>,
    status_list_timeout: Duration,
}

/// One incoming goal delivered to the application for handling.
pub struct ServerGoalHandle<A: RosActionType, R: Ros> {
    pub goal_id: GoalId,
    pub goal: A::Goal,
    shared: Arc<Shared<A, R>>,
}

impl<A: RosActionType, R: Ros> ServerGoalHandle<A, R> {
    async fn set_status(&self, code: u8, text: &str) {
        let mut goals = self.shared.goals.lock().await;
        if let Some(tracked) = goals.get_mut(&self.goal_id.id) {
            tracked.status.status = code;
            tracked.status.text = text.to_string();
            if crate::action::msgs::GoalStatusCode::from_u8(code).is_terminal() {
                tracked.finished_at = Some(Instant::now());
            }
        }
    }

    pub async fn set_accepted(&self) {
        self.set_status(1, "").await; // Active
    }

    pub async fn set_rejected(&self, text: &str) {
        self.set_status(5, text).await; // Rejected
    }

    pub async fn publish_feedback(&self, feedback: A::Feedback) -> roslibrust_common::Result<()> {
        let status = self
            .shared
            .goals
            .lock()
            .await
            .get(&self.goal_id.id)
            .map(|t| t.status.clone())
            .unwrap_or(GoalStatus {
                goal_id: self.goal_id.clone(),
                status: 1,
                text: String::new(),
            });
        let envelope = A::ActionFeedback::wrap(Header::default(), status, feedback);
        self.shared.feedback_pub.publish(&envelope).await
    }

    pub async fn set_succeeded(&self, result: A::Result) -> roslibrust_common::Result<()> {
        self.finish(3, "", result).await // Succeeded
    }

    pub async fn set_aborted(&self, text: &str, result: A::Result) -> roslibrust_common::Result<()> {
        self.finish(4, text, result).await // Aborted
    }

    pub async fn set_canceled(&self, result: A::Result) -> roslibrust_common::Result<()> {
        self.finish(8, "", result).await // Recalled
    }

    async fn finish(&self, code: u8, text: &str, result: A::Result) -> roslibrust_common::Result<()> {
        self.set_status(code, text).await;
        let status = GoalStatus {
            goal_id: self.goal_id.clone(),
            status: code,
            text: text.to_string(),
        };
        let envelope = A::ActionResult::wrap(Header::default(), status, result);
        self.shared.result_pub.publish(&envelope).await
    }
}

/// A running action server. Drop to stop accepting new goals (existing `ServerGoalHandle`s
/// remain usable until the process drops the publishers they hold).
pub struct ActionServer<A: RosActionType, R: Ros> {
    goal_rx: mpsc::Receiver<ServerGoalHandle<A, R>>,
    _status_timer: tokio::task::JoinHandle<()>,
}

impl<A: RosActionType, R: Ros> ActionServer<A, R> {
    pub async fn new(
        ros: &R,
        ns: &str,
        status_frequency_hz: f64,
        status_list_timeout: Duration,
    ) -> roslibrust_common::Result<Self> {
        let base = format!("{ns}/{}", A::ACTION_NAME);
        let mut goal_sub = ros.subscribe::<A::ActionGoal>(&format!("{base}/goal")).await?;
        let mut cancel_sub = ros.subscribe::<GoalId>(&format!("{base}/cancel")).await?;
        let status_pub = ros.advertise::<GoalStatusArray>(&format!("{base}/status")).await?;
        let feedback_pub = ros.advertise::<A::ActionFeedback>(&format!("{base}/feedback")).await?;
        let result_pub = ros.advertise::<A::ActionResult>(&format!("{base}/result")).await?;

        let shared = Arc::new(Shared::<A, R> {
            goals: Mutex::new(HashMap::new()),
            feedback_pub,
            result_pub,
            status_list_timeout,
        });

        let (goal_tx, goal_rx) = mpsc::channel(16);

        let accept_shared = shared.clone();
        tokio::spawn(async move {
            while let Ok(envelope) = goal_sub.next().await {
                let goal_id = envelope.goal_id().clone();
                accept_shared.goals.lock().await.insert(
                    goal_id.id.clone(),
                    TrackedServerGoal {
                        status: GoalStatus {
                            goal_id: goal_id.clone(),
                            status: 0, // Pending
                            text: String::new(),
                        },
                        finished_at: None,
                    },
                );
                let handle = ServerGoalHandle {
                    goal_id,
                    goal: envelope.goal(),
                    shared: accept_shared.clone(),
                };
                if goal_tx.send(handle).await.is_err() {
                    break;
                }
            }
        });

        let cancel_shared = shared.clone();
        tokio::spawn(async move {
            while let Ok(cancel) = cancel_sub.next().await {
                let mut goals = cancel_shared.goals.lock().await;
                // Empty id + zero stamp: cancel everything. Non-empty id: cancel that goal
                // exactly. Empty id + non-zero stamp: cancel everything stamped strictly
                // earlier than the cancel message.
                for tracked in goals.values_mut() {
                    let matches = if !cancel.id.is_empty() {
                        tracked.status.goal_id.id == cancel.id
                    } else if cancel.stamp_secs == 0 && cancel.stamp_nsecs == 0 {
                        true
                    } else {
                        tracked.status.goal_id.stamp_secs < cancel.stamp_secs
                            || (tracked.status.goal_id.stamp_secs == cancel.stamp_secs
                                && tracked.status.goal_id.stamp_nsecs < cancel.stamp_nsecs)
                    };
                    if matches && !crate::action::msgs::GoalStatusCode::from_u8(tracked.status.status).is_terminal()
                    {
                        tracked.status.status = 7; // Recalling
                    }
                }
            }
        });

        let status_shared = shared.clone();
        let status_pub = Arc::new(status_pub);
        let period = Duration::from_secs_f64(1.0 / status_frequency_hz.max(0.1));
        let status_timer = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                let mut goals = status_shared.goals.lock().await;
                let now = Instant::now();
                goals.retain(|_, tracked| {
                    tracked
                        .finished_at
                        .map(|t| now.duration_since(t) < status_shared.status_list_timeout)
                        .unwrap_or(true)
                });
                let status_list = goals.values().map(|t| t.status.clone()).collect();
                drop(goals);
                let array = GoalStatusArray {
                    header: Header::default(),
                    status_list,
                };
                let _ = status_pub.publish(&array).await;
            }
        });

        Ok(Self {
            goal_rx,
            _status_timer: status_timer,
        })
    }

    /// Awaits the next goal submitted by a client.
    pub async fn next_goal(&mut self) -> Option<ServerGoalHandle<A, R>> {
        self.goal_rx.recv().await
    }
}

impl<A: RosActionType, R: Ros> Drop for ActionServer<A, R> {
    fn drop(&mut self) {
        self._status_timer.abort();
    }
}
