use std::fmt;

use serde::Serialize;

/// Steps of the expand/shrink scenario, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    WorkloadStarting,
    InitialTrafficWait,
    Expanding,
    PostExpandVerify,
    Blacklisting,
    MoveWait,
    Killing,
    HeartbeatExpiryWait,
    PostShrinkVerify,
    Done,
    Failed,
}

impl Phase {
    /// The phase that must follow this one on success.
    pub fn next(self) -> Option<Phase> {
        use Phase::*;
        match self {
            Idle => Some(WorkloadStarting),
            WorkloadStarting => Some(InitialTrafficWait),
            InitialTrafficWait => Some(Expanding),
            Expanding => Some(PostExpandVerify),
            PostExpandVerify => Some(Blacklisting),
            Blacklisting => Some(MoveWait),
            MoveWait => Some(Killing),
            Killing => Some(HeartbeatExpiryWait),
            HeartbeatExpiryWait => Some(PostShrinkVerify),
            PostShrinkVerify => Some(Done),
            Done | Failed => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Done | Phase::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Idle => "idle",
            Phase::WorkloadStarting => "workload_starting",
            Phase::InitialTrafficWait => "initial_traffic_wait",
            Phase::Expanding => "expanding",
            Phase::PostExpandVerify => "post_expand_verify",
            Phase::Blacklisting => "blacklisting",
            Phase::MoveWait => "move_wait",
            Phase::Killing => "killing",
            Phase::HeartbeatExpiryWait => "heartbeat_expiry_wait",
            Phase::PostShrinkVerify => "post_shrink_verify",
            Phase::Done => "done",
            Phase::Failed => "failed",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
