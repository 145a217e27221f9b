use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::placement::TaskRequest;
use crate::store::SchedulerClass;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EvalStatus {
    Pending,
    Leased,
    Complete,
    Failed,
    Cancelled,
    /// No feasible placement exists right now; waiting for capacity to change.
    Blocked,
}

impl std::fmt::Display for EvalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EvalStatus::Pending => write!(f, "pending"),
            EvalStatus::Leased => write!(f, "leased"),
            EvalStatus::Complete => write!(f, "complete"),
            EvalStatus::Failed => write!(f, "failed"),
            EvalStatus::Cancelled => write!(f, "cancelled"),
            EvalStatus::Blocked => write!(f, "blocked"),
        }
    }
}

/// One unit of scheduling work: the need to (re)place a job's allocations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Evaluation {
    pub id: Uuid,
    pub job_id: Uuid,
    pub scheduler_class: SchedulerClass,
    /// Higher is more important; also bounds which allocations this
    /// evaluation may preempt.
    pub priority: i32,
    pub status: EvalStatus,
    /// Ordering tiebreaker within a priority band. Stamped by the broker at
    /// enqueue, standing in for the replication log index.
    pub create_index: u64,
    /// Incremented by exactly one per nack or lease expiry.
    pub retries: u32,
    pub created_at: DateTime<Utc>,
    /// What the job spec demands for one task group instance.
    pub task: TaskRequest,
}

impl Evaluation {
    pub fn new(job_id: Uuid, class: SchedulerClass, priority: i32, task: TaskRequest) -> Self {
        Self {
            id: Uuid::new_v4(),
            job_id,
            scheduler_class: class,
            priority,
            status: EvalStatus::Pending,
            create_index: 0,
            retries: 0,
            created_at: Utc::now(),
            task,
        }
    }
}
