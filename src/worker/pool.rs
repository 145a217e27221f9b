use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::broker::{BlockOutcome, EvalBroker, Evaluation, LeaseToken};
use crate::config::WorkerPoolConfig;
use crate::placement::{NodeCatalog, PlacementDenied, PlacementEngine};
use crate::store::{ConfigStore, SchedulerClass};

/// Spawns and runs the scheduling workers.
pub struct WorkerPool {
    config: WorkerPoolConfig,
    broker: Arc<EvalBroker>,
    scheduler_config: Arc<ConfigStore>,
    catalog: Arc<dyn NodeCatalog>,
}

impl WorkerPool {
    pub fn new(
        config: WorkerPoolConfig,
        broker: Arc<EvalBroker>,
        scheduler_config: Arc<ConfigStore>,
        catalog: Arc<dyn NodeCatalog>,
    ) -> Self {
        Self {
            config,
            broker,
            scheduler_config,
            catalog,
        }
    }

    /// Spawn the configured number of workers. The returned handles resolve
    /// once their worker has drained after `cancel` fires.
    pub fn spawn(&self, cancel: CancellationToken) -> Vec<tokio::task::JoinHandle<()>> {
        (0..self.config.workers)
            .map(|worker_id| {
                let broker = self.broker.clone();
                let scheduler_config = self.scheduler_config.clone();
                let catalog = self.catalog.clone();
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    run_worker(worker_id, broker, scheduler_config, catalog, cancel).await;
                })
            })
            .collect()
    }
}

/// One worker's dequeue/place/resolve loop.
async fn run_worker(
    worker_id: usize,
    broker: Arc<EvalBroker>,
    scheduler_config: Arc<ConfigStore>,
    catalog: Arc<dyn NodeCatalog>,
    cancel: CancellationToken,
) {
    tracing::info!(worker_id, "Scheduling worker started");
    let engine = PlacementEngine::new();

    loop {
        let Some((eval, token)) = broker.dequeue(&SchedulerClass::ALL, &cancel).await else {
            break;
        };
        process_eval(worker_id, &broker, &scheduler_config, &*catalog, &engine, eval, token).await;
    }

    tracing::info!(worker_id, "Scheduling worker stopped");
}

async fn process_eval(
    worker_id: usize,
    broker: &EvalBroker,
    scheduler_config: &ConfigStore,
    catalog: &dyn NodeCatalog,
    engine: &PlacementEngine,
    eval: Evaluation,
    token: LeaseToken,
) {
    let nodes = match catalog.snapshot() {
        Ok(nodes) => nodes,
        Err(e) => {
            // Transient collaborator failure; let the backoff retry it.
            tracing::warn!(worker_id, eval_id = %eval.id, error = %e, "Node snapshot failed, nacking");
            log_resolve(broker.nack(token).await, &eval, "nack");
            return;
        }
    };
    let config = scheduler_config.get().config;

    match engine.plan(&eval, &nodes, &config) {
        Ok(plan) => {
            let freed_capacity = !plan.evictions.is_empty();
            match catalog.apply(plan.alloc, &plan.evictions) {
                Ok(()) => {
                    tracing::info!(
                        worker_id,
                        eval_id = %eval.id,
                        job_id = %eval.job_id,
                        node_id = %plan.node_id,
                        "Evaluation placed"
                    );
                    log_resolve(broker.ack(token).await, &eval, "ack");
                    if freed_capacity {
                        // Evictions freed room that blocked evaluations may
                        // now be able to use.
                        broker.capacity_changed().await;
                    }
                }
                Err(e) => {
                    tracing::warn!(worker_id, eval_id = %eval.id, error = %e, "Plan application failed, nacking");
                    log_resolve(broker.nack(token).await, &eval, "nack");
                }
            }
        }
        Err(denied) => {
            // Expected outcome, not a fault: park the evaluation until
            // capacity changes.
            tracing::info!(
                worker_id,
                eval_id = %eval.id,
                job_id = %eval.job_id,
                reason = %denied,
                "No placement possible, blocking evaluation"
            );
            if matches!(denied, PlacementDenied::PreemptionDisabled) {
                tracing::warn!(
                    eval_id = %eval.id,
                    class = %eval.scheduler_class,
                    "Placement needs preemption but it is disabled for this scheduler class"
                );
            }
            match broker.block(token).await {
                Ok(BlockOutcome::Parked) => {}
                Ok(BlockOutcome::RetriesExhausted) => {
                    tracing::warn!(
                        worker_id,
                        eval_id = %eval.id,
                        job_id = %eval.job_id,
                        error = %denied.into_error(eval.scheduler_class),
                        "Evaluation stayed unplaceable past the retry ceiling, giving up"
                    );
                }
                Err(e) => log_resolve(Err(e), &eval, "block"),
            }
        }
    }
}

/// A lease may have expired under us; the broker already requeued the
/// evaluation, so the late result is dropped on the floor.
fn log_resolve(result: crate::error::Result<()>, eval: &Evaluation, action: &str) {
    if let Err(e) = result {
        tracing::debug!(eval_id = %eval.id, action, error = %e, "Stale lease resolution discarded");
    }
}
