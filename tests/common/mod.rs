//! Shared helpers for integration tests.
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use flotilla::broker::{EvalBroker, Evaluation};
use flotilla::config::BrokerConfig;
use flotilla::placement::{NodeSnapshot, Resources, TaskRequest};
use flotilla::store::{ConfigStore, SchedulerClass};
use uuid::Uuid;

/// Broker timings tightened for tests: short lease TTL, fast reaper, near
/// immediate nack redelivery.
pub fn fast_broker_config() -> BrokerConfig {
    BrokerConfig {
        lease_ttl: Duration::from_millis(200),
        reap_interval: Duration::from_millis(20),
        initial_nack_delay: Duration::from_millis(1),
        max_nack_delay: Duration::from_millis(50),
        blocked_backoff: Duration::from_secs(60),
        max_retries: 3,
    }
}

pub fn broker_with(config: BrokerConfig) -> (Arc<EvalBroker>, Arc<ConfigStore>) {
    let store = Arc::new(ConfigStore::default());
    let broker = Arc::new(EvalBroker::new(config, store.clone()));
    (broker, store)
}

pub fn service_eval(priority: i32) -> Evaluation {
    Evaluation::new(
        Uuid::new_v4(),
        SchedulerClass::Service,
        priority,
        TaskRequest::new(100, 128),
    )
}

pub fn node(id: &str, cpu_mhz: u64, memory_mb: u64) -> NodeSnapshot {
    NodeSnapshot::new(id, Resources::new(cpu_mhz, memory_mb))
}
