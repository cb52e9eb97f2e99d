//! Hand-written message, service, and action fixtures standing in for generated code
//! (code generation is out of scope for this crate; see `roslibrust_ros1`'s docs).

pub mod std_msgs {
    use roslibrust_common::RosMessageType;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    pub struct String {
        pub data: std::string::String,
    }

    impl RosMessageType for String {
        const ROS_TYPE_NAME: &'static str = "std_msgs/String";
        const MD5SUM: &'static str = "992ce8a1687cec8c8bd883ec73ca41d1";
        const DEFINITION: &'static str = "string data";
    }

    #[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
    pub struct Int32 {
        pub data: i32,
    }

    impl RosMessageType for Int32 {
        const ROS_TYPE_NAME: &'static str = "std_msgs/Int32";
        const MD5SUM: &'static str = "da5909fbe378aeaf85e547e830cc1bb7";
        const DEFINITION: &'static str = "int32 data";
    }
}

pub mod std_srvs {
    use roslibrust_common::{RosMessageType, RosServiceType};
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    pub struct SetBoolRequest {
        pub data: bool,
    }

    impl RosMessageType for SetBoolRequest {
        const ROS_TYPE_NAME: &'static str = "std_srvs/SetBoolRequest";
        const MD5SUM: &'static str = "8b94c1b53db61fb6aed406028ad6332a";
        const DEFINITION: &'static str = "bool data";
    }

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    pub struct SetBoolResponse {
        pub success: bool,
        pub message: std::string::String,
    }

    impl RosMessageType for SetBoolResponse {
        const ROS_TYPE_NAME: &'static str = "std_srvs/SetBoolResponse";
        const MD5SUM: &'static str = "937c9679a518e3a18d831e57125ea522";
        const DEFINITION: &'static str = "bool success\nstring message";
    }

    pub struct SetBool;

    impl RosServiceType for SetBool {
        const ROS_SERVICE_NAME: &'static str = "std_srvs/SetBool";
        const MD5SUM: &'static str = "09fb03525b03e7ea1fd13244869a0e9d";
        type Request = SetBoolRequest;
        type Response = SetBoolResponse;
    }
}

/// A Fibonacci action fixture matching `actionlib_tutorials/Fibonacci`: request an order,
/// stream back the partial sequence as feedback, and return the full sequence as the result.
pub mod fibonacci {
    use roslibrust_common::RosMessageType;
    use roslibrust_ros1::action::msgs::{
        ActionFeedbackEnvelope, ActionGoalEnvelope, ActionResultEnvelope, GoalId, GoalStatus,
        Header, RosActionType,
    };
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    pub struct Goal {
        pub order: i32,
    }
    impl RosMessageType for Goal {
        const ROS_TYPE_NAME: &'static str = "roslibrust_test_msgs/FibonacciGoal";
        const MD5SUM: &'static str = "e4af0a0e4e0a02062f70ef3bcc1a0aab";
        const DEFINITION: &'static str = "int32 order";
    }

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    pub struct Result {
        pub sequence: Vec<i32>,
    }
    impl RosMessageType for Result {
        const ROS_TYPE_NAME: &'static str = "roslibrust_test_msgs/FibonacciResult";
        const MD5SUM: &'static str = "b4b6e8e8ad70ef83e2fc4443a28d7c4b";
        const DEFINITION: &'static str = "int32[] sequence";
    }

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    pub struct Feedback {
        pub sequence: Vec<i32>,
    }
    impl RosMessageType for Feedback {
        const ROS_TYPE_NAME: &'static str = "roslibrust_test_msgs/FibonacciFeedback";
        const MD5SUM: &'static str = "b4b6e8e8ad70ef83e2fc4443a28d7c4b";
        const DEFINITION: &'static str = "int32[] sequence";
    }

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    pub struct ActionGoal {
        pub header: Header,
        pub goal_id: GoalId,
        pub goal: Goal,
    }
    impl RosMessageType for ActionGoal {
        const ROS_TYPE_NAME: &'static str = "roslibrust_test_msgs/FibonacciActionGoal";
        const MD5SUM: &'static str = "30f4627f87654f102541f900b9c5b3f0";
        const DEFINITION: &'static str = "Header header\nactionlib_msgs/GoalID goal_id\nFibonacciGoal goal";
    }
    impl ActionGoalEnvelope<Goal> for ActionGoal {
        fn wrap(header: Header, goal_id: GoalId, goal: Goal) -> Self {
            Self { header, goal_id, goal }
        }
        fn goal_id(&self) -> &GoalId {
            &self.goal_id
        }
        fn goal(self) -> Goal {
            self.goal
        }
    }

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    pub struct ActionResult {
        pub header: Header,
        pub status: GoalStatus,
        pub result: Result,
    }
    impl RosMessageType for ActionResult {
        const ROS_TYPE_NAME: &'static str = "roslibrust_test_msgs/FibonacciActionResult";
        const MD5SUM: &'static str = "c486d5f16ee57dff4bc8b6d5edaf19ef";
        const DEFINITION: &'static str = "Header header\nactionlib_msgs/GoalStatus status\nFibonacciResult result";
    }
    impl ActionResultEnvelope<Result> for ActionResult {
        fn wrap(header: Header, status: GoalStatus, result: Result) -> Self {
            Self { header, status, result }
        }
        fn status(&self) -> &GoalStatus {
            &self.status
        }
        fn result(self) -> Result {
            self.result
        }
    }

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    pub struct ActionFeedback {
        pub header: Header,
        pub status: GoalStatus,
        pub feedback: Feedback,
    }
    impl RosMessageType for ActionFeedback {
        const ROS_TYPE_NAME: &'static str = "roslibrust_test_msgs/FibonacciActionFeedback";
        const MD5SUM: &'static str = "29380fdd2b9123d3b2b0f1e1d0e5a6ea";
        const DEFINITION: &'static str = "Header header\nactionlib_msgs/GoalStatus status\nFibonacciFeedback feedback";
    }
    impl ActionFeedbackEnvelope<Feedback> for ActionFeedback {
        fn wrap(header: Header, status: GoalStatus, feedback: Feedback) -> Self {
            Self { header, status, feedback }
        }
        fn status(&self) -> &GoalStatus {
            &self.status
        }
        fn feedback(self) -> Feedback {
            self.feedback
        }
    }

    pub struct Fibonacci;
    impl RosActionType for Fibonacci {
        const ACTION_NAME: &'static str = "fibonacci";
        type Goal = Goal;
        type Result = Result;
        type Feedback = Feedback;
        type ActionGoal = ActionGoal;
        type ActionResult = ActionResult;
        type ActionFeedback = ActionFeedback;
    }
}
