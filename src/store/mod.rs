//! Cluster-wide scheduler configuration.
//!
//! The configuration is a single replicated record guarded by a monotonic
//! version. All writes go through check-and-set; readers always see a
//! consistent snapshot and never block a writer.

pub mod config;
pub mod config_store;

pub use config::{
    PreemptionConfig, SchedulerAlgorithm, SchedulerClass, SchedulerConfigPatch,
    SchedulerConfiguration,
};
pub use config_store::{ConfigStore, VersionedConfig};
