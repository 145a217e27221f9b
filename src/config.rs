use std::time::Duration;

/// Tuning knobs for the evaluation broker.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// How long a worker may hold a lease before the broker reclaims it.
    pub lease_ttl: Duration,
    /// How often the reaper sweeps for expired leases.
    pub reap_interval: Duration,
    /// Base delay before a nacked evaluation becomes eligible again.
    /// Doubles per retry, capped at `max_nack_delay`, with jitter.
    pub initial_nack_delay: Duration,
    pub max_nack_delay: Duration,
    /// Delay before a blocked evaluation re-enters the pending set without
    /// a capacity event.
    pub blocked_backoff: Duration,
    /// Nacks beyond this count mark the evaluation Failed.
    pub max_retries: u32,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            lease_ttl: Duration::from_secs(30),
            reap_interval: Duration::from_secs(1),
            initial_nack_delay: Duration::from_millis(250),
            max_nack_delay: Duration::from_secs(30),
            blocked_backoff: Duration::from_secs(60),
            max_retries: 5,
        }
    }
}

/// Tuning knobs for the scheduling worker pool.
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Number of concurrent scheduling workers.
    pub workers: usize,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self { workers: 4 }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ServerConfig {
    pub broker: BrokerConfig,
    pub pool: WorkerPoolConfig,
}

impl ServerConfig {
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.pool.workers = workers;
        self
    }

    pub fn with_lease_ttl(mut self, ttl: Duration) -> Self {
        self.broker.lease_ttl = ttl;
        self
    }
}
