use crate::error::{Result, SchedError};
use crate::store::ConfigStore;

/// Caller capability, as supplied by the ACL collaborator. Callers without
/// an ACL system behind them are always `Standard`, so with the reject flag
/// set everyone is blocked, which is the documented behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    Management,
    Standard,
}

/// The job intake operations the admission gate covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOperation {
    Register,
    Dispatch,
    Scale,
}

impl std::fmt::Display for JobOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobOperation::Register => write!(f, "register"),
            JobOperation::Dispatch => write!(f, "dispatch"),
            JobOperation::Scale => write!(f, "scale"),
        }
    }
}

/// Backpressure gate for new job intake.
///
/// Stateless: each call is a pure function of the current configuration
/// snapshot and the caller's capability. Lets operators shed load from
/// automated submitters during incident response while management callers
/// keep working.
pub struct AdmissionGate<'a> {
    config: &'a ConfigStore,
}

impl<'a> AdmissionGate<'a> {
    pub fn new(config: &'a ConfigStore) -> Self {
        Self { config }
    }

    pub fn admit(&self, operation: JobOperation, capability: Capability) -> Result<()> {
        let snapshot = self.config.get();
        if snapshot.config.reject_job_registration && capability != Capability::Management {
            tracing::info!(%operation, "Job intake rejected by scheduler configuration");
            return Err(SchedError::AdmissionDenied(format!(
                "job {operation} is currently disabled by the scheduler configuration"
            )));
        }
        Ok(())
    }
}
