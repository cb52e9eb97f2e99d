//! Actionlib: long-running, preemptible goals layered on five conventional topics
//! (`goal`, `cancel`, `status`, `feedback`, `result`) per action.

pub mod client;
pub mod msgs;
pub mod server;

pub use client::{ActionClient, GoalHandle, GoalState, SimpleGoalState};
pub use msgs::{GoalId, GoalStatus, GoalStatusArray, GoalStatusCode, Header, RosActionType};
pub use server::{ActionServer, ServerGoalHandle};
