use thiserror::Error;
use uuid::Uuid;

use crate::store::SchedulerClass;

#[derive(Error, Debug)]
pub enum SchedError {
    /// CAS lost a race against another configuration write. The caller must
    /// re-read, re-merge its changes, and try again.
    #[error("scheduler configuration could not be atomically updated (expected version {expected}, current {current}), please try again")]
    StaleVersion { expected: u64, current: u64 },

    #[error("an evaluation for job {0} is already in flight")]
    DuplicateEval(Uuid),

    #[error("lease {0} has expired")]
    LeaseExpired(Uuid),

    #[error("unknown lease token: {0}")]
    UnknownLease(Uuid),

    #[error("evaluation not found: {0}")]
    EvalNotFound(Uuid),

    #[error("no feasible placement: {0}")]
    InfeasiblePlacement(String),

    #[error("preemption is disabled for the {0} scheduler")]
    PreemptionDenied(SchedulerClass),

    #[error("permission denied: {0}")]
    AdmissionDenied(String),

    #[error("node snapshot unavailable: {0}")]
    NodeSnapshot(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, SchedError>;
