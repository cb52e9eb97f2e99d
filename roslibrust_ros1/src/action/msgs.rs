//! Hand-written actionlib envelope messages (`actionlib_msgs/*`), and the generic trait
//! describing one action's five wire types. Concrete actions (goal/result/feedback payloads
//! and their envelopes) are provided by downstream crates, the way a code generator would
//! otherwise emit them from a `.action` file.

use roslibrust_common::RosMessageType;
use serde::{Deserialize, Serialize};

/// `std_msgs/Header`, reused verbatim by every actionlib envelope.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Header {
    pub seq: u32,
    pub stamp_secs: i32,
    pub stamp_nsecs: i32,
    pub frame_id: String,
}

impl RosMessageType for Header {
    const ROS_TYPE_NAME: &'static str = "std_msgs/Header";
    const MD5SUM: &'static str = "2176decaecbce78abc3b96ef049fabed";
    const DEFINITION: &'static str = "uint32 seq\ntime stamp\nstring frame_id";
}

/// `actionlib_msgs/GoalID`: uniquely identifies one goal submission.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GoalId {
    pub stamp_secs: i32,
    pub stamp_nsecs: i32,
    pub id: String,
}

impl RosMessageType for GoalId {
    const ROS_TYPE_NAME: &'static str = "actionlib_msgs/GoalID";
    const MD5SUM: &'static str = "302881f31927c1df708a2dbab0e80ee8";
    const DEFINITION: &'static str = "time stamp\nstring id";
}

/// `actionlib_msgs/GoalStatus` status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum GoalStatusCode {
    Pending = 0,
    Active = 1,
    Preempted = 2,
    Succeeded = 3,
    Aborted = 4,
    Rejected = 5,
    Preempting = 6,
    Recalling = 7,
    Recalled = 8,
    Lost = 9,
}

impl GoalStatusCode {
    /// Maps a raw `actionlib_msgs/GoalStatus.status` byte to its named variant, treating any
    /// unrecognized code as `Lost` rather than panicking.
    pub fn from_u8(code: u8) -> Self {
        match code {
            0 => GoalStatusCode::Pending,
            1 => GoalStatusCode::Active,
            2 => GoalStatusCode::Preempted,
            3 => GoalStatusCode::Succeeded,
            4 => GoalStatusCode::Aborted,
            5 => GoalStatusCode::Rejected,
            6 => GoalStatusCode::Preempting,
            7 => GoalStatusCode::Recalling,
            8 => GoalStatusCode::Recalled,
            _ => GoalStatusCode::Lost,
        }
    }

    /// A status is terminal once the server will never transition it again.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            GoalStatusCode::Preempted
                | GoalStatusCode::Succeeded
                | GoalStatusCode::Aborted
                | GoalStatusCode::Rejected
                | GoalStatusCode::Recalled
                | GoalStatusCode::Lost
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GoalStatus {
    pub goal_id: GoalId,
    pub status: u8,
    pub text: String,
}

impl RosMessageType for GoalStatus {
    const ROS_TYPE_NAME: &'static str = "actionlib_msgs/GoalStatus";
    const MD5SUM: &'static str = "d388f9b87b3c471f784434d671988d4a";
    const DEFINITION: &'static str = "GoalID goal_id\nuint8 status\nstring text";
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GoalStatusArray {
    pub header: Header,
    pub status_list: Vec<GoalStatus>,
}

impl RosMessageType for GoalStatusArray {
    const ROS_TYPE_NAME: &'static str = "actionlib_msgs/GoalStatusArray";
    const MD5SUM: &'static str = "8b2b82f13216d0a8ea88bd3af735e619";
    const DEFINITION: &'static str = "Header header\nGoalStatus[] status_list";
}

/// Describes one action's five wire types and its name, the way generated code would.
/// Implement this (plus the envelope wrapper types it names) for a concrete action.
pub trait RosActionType: 'static + Send + Sync {
    /// Base name used to derive the five topics, e.g. `fibonacci` for `/fibonacci/goal` etc.
    const ACTION_NAME: &'static str;

    type Goal: RosMessageType;
    type Result: RosMessageType;
    type Feedback: RosMessageType;

    type ActionGoal: RosMessageType + ActionGoalEnvelope<Self::Goal>;
    type ActionResult: RosMessageType + ActionResultEnvelope<Self::Result>;
    type ActionFeedback: RosMessageType + ActionFeedbackEnvelope<Self::Feedback>;
}

pub trait ActionGoalEnvelope<G>: Clone {
    fn wrap(header: Header, goal_id: GoalId, goal: G) -> Self;
    fn goal_id(&self) -> &GoalId;
    fn goal(self) -> G;
}

pub trait ActionResultEnvelope<R>: Clone {
    fn wrap(header: Header, status: GoalStatus, result: R) -> Self;
    fn status(&self) -> &GoalStatus;
    fn result(self) -> R;
}

pub trait ActionFeedbackEnvelope<F>: Clone {
    fn wrap(header: Header, status: GoalStatus, feedback: F) -> Self;
    fn status(&self) -> &GoalStatus;
    fn feedback(self) -> F;
}
