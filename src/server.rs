use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::admission::{AdmissionGate, Capability, JobOperation};
use crate::broker::{BrokerStats, EvalBroker, Evaluation};
use crate::config::ServerConfig;
use crate::error::Result;
use crate::placement::{ClusterCatalog, NodeCatalog, NodeSnapshot, TaskRequest};
use crate::store::{ConfigStore, SchedulerClass, SchedulerConfiguration};

/// A job intake request, already parsed by the job-spec collaborator.
#[derive(Debug, Clone)]
pub struct JobSubmission {
    pub job_id: Uuid,
    pub scheduler_class: SchedulerClass,
    pub priority: i32,
    pub task: TaskRequest,
}

/// Wires the control plane together: configuration store, eval broker,
/// node catalog, and the scheduling worker pool.
pub struct Server {
    config: ServerConfig,
    store: Arc<ConfigStore>,
    broker: Arc<EvalBroker>,
    catalog: Arc<ClusterCatalog>,
}

impl Server {
    pub fn new(config: ServerConfig, initial: SchedulerConfiguration) -> Self {
        let store = Arc::new(ConfigStore::new(initial));
        let broker = Arc::new(EvalBroker::new(config.broker.clone(), store.clone()));
        Self {
            config,
            store,
            broker,
            catalog: Arc::new(ClusterCatalog::new()),
        }
    }

    pub fn store(&self) -> &Arc<ConfigStore> {
        &self.store
    }

    pub fn broker(&self) -> &Arc<EvalBroker> {
        &self.broker
    }

    pub fn catalog(&self) -> &Arc<ClusterCatalog> {
        &self.catalog
    }

    /// Register a node (or refresh its capacity view) and wake blocked
    /// evaluations, since new capacity may unblock them.
    pub async fn register_node(&self, node: NodeSnapshot) {
        self.catalog.upsert_node(node);
        self.broker.capacity_changed().await;
    }

    /// Admit a job submission and enqueue its evaluation.
    pub async fn submit_job(
        &self,
        operation: JobOperation,
        submission: JobSubmission,
        capability: Capability,
    ) -> Result<Uuid> {
        AdmissionGate::new(&self.store).admit(operation, capability)?;
        let eval = Evaluation::new(
            submission.job_id,
            submission.scheduler_class,
            submission.priority,
            submission.task,
        );
        self.broker.enqueue(eval).await
    }

    pub async fn stats(&self) -> BrokerStats {
        self.broker.stats().await
    }

    /// Run the control plane until `cancel` fires: lease reaper plus the
    /// worker pool. Resolves once every worker has drained.
    pub async fn run(&self, cancel: CancellationToken) {
        let reaper_broker = self.broker.clone();
        let reaper_cancel = cancel.clone();
        let reaper = tokio::spawn(async move {
            reaper_broker.run_expiry_loop(reaper_cancel).await;
        });

        let pool = crate::worker::WorkerPool::new(
            self.config.pool.clone(),
            self.broker.clone(),
            self.store.clone(),
            self.catalog.clone() as Arc<dyn NodeCatalog>,
        );
        let workers = pool.spawn(cancel.clone());
        tracing::info!(workers = workers.len(), "Control plane running");

        for handle in workers {
            let _ = handle.await;
        }
        let _ = reaper.await;
        tracing::info!("Control plane stopped");
    }
}
