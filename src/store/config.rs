use serde::{Deserialize, Serialize};

/// Placement scoring strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulerAlgorithm {
    /// Minimize leftover node capacity, consolidating work onto fewer nodes.
    Binpack,
    /// Maximize distribution across nodes to reduce correlated failures.
    Spread,
}

impl std::fmt::Display for SchedulerAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SchedulerAlgorithm::Binpack => write!(f, "binpack"),
            SchedulerAlgorithm::Spread => write!(f, "spread"),
        }
    }
}

impl std::str::FromStr for SchedulerAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "binpack" => Ok(SchedulerAlgorithm::Binpack),
            "spread" => Ok(SchedulerAlgorithm::Spread),
            other => Err(format!(
                "invalid scheduler algorithm {other:?}, expected \"binpack\" or \"spread\""
            )),
        }
    }
}

/// Category of job with an independently configurable preemption policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulerClass {
    Service,
    Batch,
    System,
    SysBatch,
}

impl SchedulerClass {
    pub const ALL: [SchedulerClass; 4] = [
        SchedulerClass::Service,
        SchedulerClass::Batch,
        SchedulerClass::System,
        SchedulerClass::SysBatch,
    ];
}

impl std::fmt::Display for SchedulerClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SchedulerClass::Service => write!(f, "service"),
            SchedulerClass::Batch => write!(f, "batch"),
            SchedulerClass::System => write!(f, "system"),
            SchedulerClass::SysBatch => write!(f, "sysbatch"),
        }
    }
}

/// Per-class preemption switches.
///
/// A class with preemption enabled may evict strictly lower-priority
/// allocations of any other class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreemptionConfig {
    pub system_scheduler_enabled: bool,
    pub service_scheduler_enabled: bool,
    pub batch_scheduler_enabled: bool,
    pub sys_batch_scheduler_enabled: bool,
}

impl Default for PreemptionConfig {
    fn default() -> Self {
        // System jobs preempt by default; everything else opts in.
        Self {
            system_scheduler_enabled: true,
            service_scheduler_enabled: false,
            batch_scheduler_enabled: false,
            sys_batch_scheduler_enabled: false,
        }
    }
}

impl PreemptionConfig {
    pub fn enabled_for(&self, class: SchedulerClass) -> bool {
        match class {
            SchedulerClass::Service => self.service_scheduler_enabled,
            SchedulerClass::Batch => self.batch_scheduler_enabled,
            SchedulerClass::System => self.system_scheduler_enabled,
            SchedulerClass::SysBatch => self.sys_batch_scheduler_enabled,
        }
    }
}

/// The replicated scheduler configuration record.
///
/// This is the persisted shape; the version lives alongside it in
/// [`VersionedConfig`](crate::store::VersionedConfig) and is assigned by the
/// store on every successful write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerConfiguration {
    pub scheduler_algorithm: SchedulerAlgorithm,
    pub preemption_config: PreemptionConfig,
    /// When true, tasks that declare a memory ceiling may exceed their
    /// reserved memory up to that ceiling.
    pub memory_oversubscription_enabled: bool,
    /// When true, job registration, dispatch, and scale requests are denied
    /// unless the caller holds a management capability.
    pub reject_job_registration: bool,
    /// When true, the eval broker stops issuing new leases. Leases already
    /// held keep running to completion.
    pub pause_eval_broker: bool,
}

impl Default for SchedulerConfiguration {
    fn default() -> Self {
        Self {
            scheduler_algorithm: SchedulerAlgorithm::Binpack,
            preemption_config: PreemptionConfig::default(),
            memory_oversubscription_enabled: false,
            reject_job_registration: false,
            pause_eval_broker: false,
        }
    }
}

/// A selective update to the scheduler configuration.
///
/// Only fields the operator explicitly set are merged onto a freshly read
/// configuration; unset fields carry the previous value forward. This is
/// what makes concurrent operators safe to combine with check-and-set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchedulerConfigPatch {
    pub scheduler_algorithm: Option<SchedulerAlgorithm>,
    pub memory_oversubscription_enabled: Option<bool>,
    pub reject_job_registration: Option<bool>,
    pub pause_eval_broker: Option<bool>,
    pub preemption_system_scheduler: Option<bool>,
    pub preemption_service_scheduler: Option<bool>,
    pub preemption_batch_scheduler: Option<bool>,
    pub preemption_sys_batch_scheduler: Option<bool>,
}

impl SchedulerConfigPatch {
    /// Merge the set fields onto `config`, leaving the rest untouched.
    pub fn apply_to(&self, config: &mut SchedulerConfiguration) {
        if let Some(algorithm) = self.scheduler_algorithm {
            config.scheduler_algorithm = algorithm;
        }
        if let Some(v) = self.memory_oversubscription_enabled {
            config.memory_oversubscription_enabled = v;
        }
        if let Some(v) = self.reject_job_registration {
            config.reject_job_registration = v;
        }
        if let Some(v) = self.pause_eval_broker {
            config.pause_eval_broker = v;
        }
        if let Some(v) = self.preemption_system_scheduler {
            config.preemption_config.system_scheduler_enabled = v;
        }
        if let Some(v) = self.preemption_service_scheduler {
            config.preemption_config.service_scheduler_enabled = v;
        }
        if let Some(v) = self.preemption_batch_scheduler {
            config.preemption_config.batch_scheduler_enabled = v;
        }
        if let Some(v) = self.preemption_sys_batch_scheduler {
            config.preemption_config.sys_batch_scheduler_enabled = v;
        }
    }

    pub fn is_empty(&self) -> bool {
        self.scheduler_algorithm.is_none()
            && self.memory_oversubscription_enabled.is_none()
            && self.reject_job_registration.is_none()
            && self.pause_eval_broker.is_none()
            && self.preemption_system_scheduler.is_none()
            && self.preemption_service_scheduler.is_none()
            && self.preemption_batch_scheduler.is_none()
            && self.preemption_sys_batch_scheduler.is_none()
    }
}
