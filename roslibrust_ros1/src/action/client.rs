//! The actionlib client: submits goals, watches their status/feedback/result topics, and
//! exposes both the full eight-state goal machine and the three-state "simple client" view.

use crate::action::msgs::{
    ActionFeedbackEnvelope, ActionGoalEnvelope, ActionResultEnvelope, GoalId, GoalStatus,
    GoalStatusArray, Header, RosActionType,
};
use roslibrust_common::{Publish, Ros, Subscribe, TopicProvider};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::{watch, Mutex};

/// The full actionlib goal state machine (the "extended" client view).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GoalState {
    WaitingForGoalAck,
    Pending,
    Active,
    WaitingForResult,
    WaitingForCancelAck,
    Recalling,
    Preempting,
    Done,
}

impl GoalState {
    fn from_status_code(code: u8) -> Self {
        match code {
            0 => GoalState::Pending,
            1 => GoalState::Active,
            6 => GoalState::Preempting,
            7 => GoalState::Recalling,
            2 | 3 | 4 | 5 | 8 | 9 => GoalState::Done,
            _ => GoalState::Done,
        }
    }

    /// The collapsed three-state view `SimpleActionClient` users see.
    pub fn as_simple(self) -> SimpleGoalState {
        match self {
            GoalState::WaitingForGoalAck | GoalState::Pending => SimpleGoalState::Pending,
            GoalState::Active
            | GoalState::WaitingForCancelAck
            | GoalState::Recalling
            | GoalState::Preempting
            | GoalState::WaitingForResult => SimpleGoalState::Active,
            GoalState::Done => SimpleGoalState::Done,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimpleGoalState {
    Pending,
    Active,
    Done,
}

struct TrackedGoal<A: RosActionType> {
    state: watch::Sender<GoalState>,
    latest_feedback: Mutex<Option<A::Feedback>>,
    result: Mutex<Option<(GoalStatus, A::Result)>>,
}

/// A handle to one submitted goal. Dropping it does not cancel the goal — call
/// [`GoalHandle::cancel`] explicitly, matching actionlib's semantics.
pub struct GoalHandle<A: RosActionType, R: Ros> {
    goal_id: GoalId,
    tracked: Arc<TrackedGoal<A>>,
    watch: watch::Receiver<GoalState>,
    cancel_pub: Arc<R::Publisher<GoalId>>,
}

impl<A: RosActionType, R: Ros> GoalHandle<A, R> {
    pub fn goal_id(&self) -> &GoalId {
        &self.goal_id
    }

    pub fn state(&self) -> GoalState {
        *self.watch.borrow()
    }

    /// Awaits until the goal reaches a terminal status.
    pub async fn wait_for_result(&mut self) -> GoalState {
        loop {
            if *self.watch.borrow() == GoalState::Done {
                return GoalState::Done;
            }
            if self.watch.changed().await.is_err() {
                return GoalState::Done;
            }
        }
    }

    pub async fn latest_feedback(&self) -> Option<A::Feedback> {
        self.tracked.latest_feedback.lock().await.clone()
    }

    pub async fn result(&self) -> Option<(GoalStatus, A::Result)> {
        self.tracked.result.lock().await.clone()
    }

    /// Requests cancellation of exactly this goal (matching `id`, zero timestamp convention).
    pub async fn cancel(&self) -> roslibrust_common::Result<()> {
        self.cancel_pub.publish(&self.goal_id).await
    }
}

impl<A: RosActionType, R: Ros> Clone for GoalHandle<A, R> {
    fn clone(&self) -> Self {
        Self {
            goal_id: self.goal_id.clone(),
            tracked: self.tracked.clone(),
            watch: self.watch.clone(),
            cancel_pub: self.cancel_pub.clone(),
        }
    }
}

/// A client for one action, parameterized over both the action type and the ROS backend.
pub struct ActionClient<A: RosActionType, R: Ros> {
    goal_pub: R::Publisher<A::ActionGoal>,
    cancel_pub: Arc<R::Publisher<GoalId>>,
    goals: Arc<Mutex<HashMap<String, Arc<TrackedGoal<A>>>>>,
    next_id: Arc<std::sync::atomic::AtomicU64>,
    caller_id: String,
}

impl<A: RosActionType, R: Ros> ActionClient<A, R> {
    /// Advertises the goal/cancel topics and subscribes to status/feedback/result, all under
    /// `{ns}/{A::ACTION_NAME}/...`.
    pub async fn new(ros: &R, ns: &str, caller_id: &str) -> roslibrust_common::Result<Self> {
        let base = format!("{ns}/{}", A::ACTION_NAME);
        let goal_pub = ros.advertise::<A::ActionGoal>(&format!("{base}/goal")).await?;
        let cancel_pub = ros.advertise::<GoalId>(&format!("{base}/cancel")).await?;
        let mut status_sub = ros.subscribe::<GoalStatusArray>(&format!("{base}/status")).await?;
        let mut feedback_sub = ros
            .subscribe::<A::ActionFeedback>(&format!("{base}/feedback"))
            .await?;
        let mut result_sub = ros.subscribe::<A::ActionResult>(&format!("{base}/result")).await?;

        let goals: Arc<Mutex<HashMap<String, Arc<TrackedGoal<A>>>>> =
            Arc::new(Mutex::new(HashMap::new()));

        let status_goals = goals.clone();
        tokio::spawn(async move {
            while let Ok(status_array) = status_sub.next().await {
                let map = status_goals.lock().await;
                for status in status_array.status_list {
                    if let Some(tracked) = map.get(&status.goal_id.id) {
                        let _ = tracked.state.send(GoalState::from_status_code(status.status));
                    }
                }
            }
        });

        let feedback_goals = goals.clone();
        tokio::spawn(async move {
            while let Ok(envelope) = feedback_sub.next().await {
                let status = envelope.status().clone();
                let map = feedback_goals.lock().await;
                if let Some(tracked) = map.get(&status.goal_id.id) {
                    *tracked.latest_feedback.lock().await = Some(envelope.feedback());
                }
            }
        });

        let result_goals = goals.clone();
        tokio::spawn(async move {
            while let Ok(envelope) = result_sub.next().await {
                let status = envelope.status().clone();
                let map = result_goals.lock().await;
                if let Some(tracked) = map.get(&status.goal_id.id) {
                    let _ = tracked.state.send(GoalState::Done);
                    *tracked.result.lock().await = Some((status.clone(), envelope.clone().result()));
                }
            }
        });

        Ok(Self {
            goal_pub,
            cancel_pub: Arc::new(cancel_pub),
            goals,
            next_id: Arc::new(std::sync::atomic::AtomicU64::new(0)),
            caller_id: caller_id.to_string(),
        })
    }

    /// Submits a new goal and returns a handle tracking it through the state machine.
    pub async fn send_goal(&self, goal: A::Goal) -> roslibrust_common::Result<GoalHandle<A, R>> {
        let seq = self
            .next_id
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        let goal_id = GoalId {
            stamp_secs: now.as_secs() as i32,
            stamp_nsecs: now.subsec_nanos() as i32,
            id: format!(
                "{}-{}-{}.{}",
                self.caller_id,
                seq,
                now.as_secs(),
                now.subsec_nanos()
            ),
        };

        let tracked = Arc::new(TrackedGoal {
            state: watch::channel(GoalState::WaitingForGoalAck).0,
            latest_feedback: Mutex::new(None),
            result: Mutex::new(None),
        });
        self.goals
            .lock()
            .await
            .insert(goal_id.id.clone(), tracked.clone());

        let envelope = A::ActionGoal::wrap(Header::default(), goal_id.clone(), goal);
        self.goal_pub.publish(&envelope).await?;
        let _ = tracked.state.send(GoalState::Pending);

        Ok(GoalHandle {
            watch: tracked.state.subscribe(),
            goal_id,
            tracked,
            cancel_pub: self.cancel_pub.clone(),
        })
    }

    /// Cancels every goal currently tracked by this client (empty id, zero stamp convention).
    pub async fn cancel_all(&self) -> roslibrust_common::Result<()> {
        self.cancel_pub.publish(&GoalId::default()).await
    }
}
