use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use rand::Rng;
use tokio::sync::{Mutex, Notify};
use tokio::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::broker::eval::{EvalStatus, Evaluation};
use crate::config::BrokerConfig;
use crate::error::{Result, SchedError};
use crate::store::{ConfigStore, SchedulerClass};

/// Single-use claim on one evaluation.
pub type LeaseToken = Uuid;

/// Queue position: highest priority first, then oldest create index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PendingKey {
    priority: i32,
    create_index: u64,
    eval_id: Uuid,
}

impl Ord for PendingKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        other
            .priority
            .cmp(&self.priority)
            .then(self.create_index.cmp(&other.create_index))
            .then(self.eval_id.cmp(&other.eval_id))
    }
}

impl PartialOrd for PendingKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl PendingKey {
    fn for_eval(eval: &Evaluation) -> Self {
        Self {
            priority: eval.priority,
            create_index: eval.create_index,
            eval_id: eval.id,
        }
    }
}

/// A queued (Pending or Blocked) evaluation, with the earliest instant it may
/// be leased again.
#[derive(Debug)]
struct QueuedEval {
    eval: Evaluation,
    ready_at: Option<Instant>,
}

#[derive(Debug)]
struct Lease {
    eval: Evaluation,
    deadline: Instant,
}

#[derive(Debug, Default)]
struct BrokerState {
    /// Per-class queue order.
    order: HashMap<SchedulerClass, BTreeSet<PendingKey>>,
    /// Pending and Blocked evaluations by ID.
    queued: HashMap<Uuid, QueuedEval>,
    /// Active leases by single-use token. 1:1 with leased evaluations.
    leases: HashMap<LeaseToken, Lease>,
    /// Jobs with a live evaluation (Pending, Blocked, or Leased). Enforces
    /// one in-flight evaluation per job.
    jobs: HashMap<Uuid, Uuid>,
    /// Tokens reclaimed by the reaper, kept so a late ack/nack can be told
    /// apart from a bogus token.
    expired_tokens: HashSet<LeaseToken>,
    next_create_index: u64,
}

/// What [`EvalBroker::block`] did with the evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockOutcome {
    /// Parked as Blocked, awaiting capacity or the blocked backoff.
    Parked,
    /// Blocked once too often; the evaluation is now Failed and its job
    /// guard released.
    RetriesExhausted,
}

/// Counts of evaluations by state, for logging and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BrokerStats {
    pub pending: usize,
    pub blocked: usize,
    pub leased: usize,
}

/// Priority-partitioned evaluation queue with lease semantics.
///
/// Consults the [`ConfigStore`] pause flag before issuing any lease: while
/// `pause_eval_broker` is set, `dequeue` callers park until the flag clears.
/// Leases already issued are unaffected by a pause.
pub struct EvalBroker {
    config: BrokerConfig,
    scheduler_config: Arc<ConfigStore>,
    state: Mutex<BrokerState>,
    wakeup: Notify,
}

enum LeaseAttempt {
    Leased(Evaluation, LeaseToken),
    /// Work exists but nothing is ready before this instant.
    WaitUntil(Instant),
    Empty,
}

impl EvalBroker {
    pub fn new(config: BrokerConfig, scheduler_config: Arc<ConfigStore>) -> Self {
        Self {
            config,
            scheduler_config,
            state: Mutex::new(BrokerState::default()),
            wakeup: Notify::new(),
        }
    }

    /// Insert an evaluation into the queue.
    ///
    /// Fails with [`SchedError::DuplicateEval`] if the job already has a
    /// live evaluation; concurrent mutations of one job serialize through
    /// this rule. Returns the evaluation ID.
    pub async fn enqueue(&self, mut eval: Evaluation) -> Result<Uuid> {
        let mut state = self.state.lock().await;
        if let Some(existing) = state.jobs.get(&eval.job_id) {
            return Err(SchedError::DuplicateEval(*existing));
        }

        state.next_create_index += 1;
        eval.create_index = state.next_create_index;
        eval.status = EvalStatus::Pending;

        let id = eval.id;
        tracing::debug!(
            eval_id = %id,
            job_id = %eval.job_id,
            class = %eval.scheduler_class,
            priority = eval.priority,
            create_index = eval.create_index,
            "Evaluation enqueued"
        );
        state.jobs.insert(eval.job_id, id);
        state
            .order
            .entry(eval.scheduler_class)
            .or_default()
            .insert(PendingKey::for_eval(&eval));
        state.queued.insert(
            id,
            QueuedEval {
                eval,
                ready_at: None,
            },
        );
        drop(state);

        self.wakeup.notify_waiters();
        Ok(id)
    }

    /// Claim the highest-priority ready evaluation matching `classes`.
    ///
    /// Blocks the calling worker cooperatively until work is available or
    /// `cancel` fires; returns `None` on cancellation. No lease is issued
    /// while the broker is paused.
    pub async fn dequeue(
        &self,
        classes: &[SchedulerClass],
        cancel: &CancellationToken,
    ) -> Option<(Evaluation, LeaseToken)> {
        let mut config_rx = self.scheduler_config.subscribe();

        loop {
            if cancel.is_cancelled() {
                return None;
            }

            if config_rx.borrow().config.pause_eval_broker {
                tokio::select! {
                    _ = cancel.cancelled() => return None,
                    changed = config_rx.changed() => {
                        if changed.is_err() {
                            return None;
                        }
                    }
                }
                continue;
            }

            // Arm the wakeup before inspecting the queue so an enqueue
            // racing with the check cannot be missed.
            let notified = self.wakeup.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let attempt = {
                let mut state = self.state.lock().await;
                self.try_lease(&mut state, classes)
            };

            match attempt {
                LeaseAttempt::Leased(eval, token) => return Some((eval, token)),
                LeaseAttempt::WaitUntil(at) => {
                    tokio::select! {
                        _ = cancel.cancelled() => return None,
                        _ = &mut notified => {}
                        _ = tokio::time::sleep_until(at) => {}
                        _ = config_rx.changed() => {}
                    }
                }
                LeaseAttempt::Empty => {
                    tokio::select! {
                        _ = cancel.cancelled() => return None,
                        _ = &mut notified => {}
                        _ = config_rx.changed() => {}
                    }
                }
            }
        }
    }

    fn try_lease(&self, state: &mut BrokerState, classes: &[SchedulerClass]) -> LeaseAttempt {
        let now = Instant::now();
        let mut best: Option<PendingKey> = None;
        let mut next_ready: Option<Instant> = None;

        for class in classes {
            let Some(order) = state.order.get(class) else {
                continue;
            };
            for key in order {
                let ready_at = state
                    .queued
                    .get(&key.eval_id)
                    .and_then(|queued| queued.ready_at);
                match ready_at {
                    Some(at) if at > now => {
                        next_ready = Some(next_ready.map_or(at, |cur| cur.min(at)));
                    }
                    _ => {
                        if best.map_or(true, |cur| *key < cur) {
                            best = Some(*key);
                        }
                        // Entries further down this class are worse.
                        break;
                    }
                }
            }
        }

        let Some(key) = best else {
            return match next_ready {
                Some(at) => LeaseAttempt::WaitUntil(at),
                None => LeaseAttempt::Empty,
            };
        };

        let mut queued = state
            .queued
            .remove(&key.eval_id)
            .expect("queue order and eval map are in sync");
        if let Some(order) = state.order.get_mut(&queued.eval.scheduler_class) {
            order.remove(&key);
        }

        queued.eval.status = EvalStatus::Leased;
        let token = Uuid::new_v4();
        let eval = queued.eval.clone();
        state.leases.insert(
            token,
            Lease {
                eval: queued.eval,
                deadline: now + self.config.lease_ttl,
            },
        );
        tracing::debug!(eval_id = %eval.id, lease = %token, "Evaluation leased");
        LeaseAttempt::Leased(eval, token)
    }

    /// Mark the leased evaluation Complete and drop it from the in-flight set.
    pub async fn ack(&self, token: LeaseToken) -> Result<()> {
        let mut state = self.state.lock().await;
        let lease = self.take_lease(&mut state, token)?;
        state.jobs.remove(&lease.eval.job_id);
        tracing::debug!(eval_id = %lease.eval.id, lease = %token, "Evaluation acked");
        Ok(())
    }

    /// Return the leased evaluation to Pending with one more retry and an
    /// exponential backoff, or mark it Failed past the retry ceiling.
    pub async fn nack(&self, token: LeaseToken) -> Result<()> {
        let mut state = self.state.lock().await;
        let lease = self.take_lease(&mut state, token)?;
        self.requeue(&mut state, lease.eval, "nacked");
        drop(state);
        self.wakeup.notify_waiters();
        Ok(())
    }

    /// Deterministic infeasibility: park the evaluation as Blocked. It
    /// becomes eligible again after the blocked backoff, or immediately on
    /// [`capacity_changed`](Self::capacity_changed).
    ///
    /// Each block counts against the same retry ceiling as a nack, so an
    /// evaluation that stays unplaceable cannot cycle forever; past the
    /// ceiling it is marked Failed and [`BlockOutcome::RetriesExhausted`]
    /// is returned.
    pub async fn block(&self, token: LeaseToken) -> Result<BlockOutcome> {
        let mut state = self.state.lock().await;
        let mut lease = self.take_lease(&mut state, token)?;
        lease.eval.retries += 1;
        if lease.eval.retries > self.config.max_retries {
            lease.eval.status = EvalStatus::Failed;
            state.jobs.remove(&lease.eval.job_id);
            tracing::warn!(
                eval_id = %lease.eval.id,
                job_id = %lease.eval.job_id,
                retries = lease.eval.retries,
                "Blocked evaluation exceeded retry ceiling, marking failed"
            );
            return Ok(BlockOutcome::RetriesExhausted);
        }

        lease.eval.status = EvalStatus::Blocked;
        tracing::debug!(eval_id = %lease.eval.id, "Evaluation blocked, awaiting capacity");
        let key = PendingKey::for_eval(&lease.eval);
        state
            .order
            .entry(lease.eval.scheduler_class)
            .or_default()
            .insert(key);
        let ready_at = Instant::now() + self.config.blocked_backoff;
        state.queued.insert(
            lease.eval.id,
            QueuedEval {
                eval: lease.eval,
                ready_at: Some(ready_at),
            },
        );
        drop(state);
        self.wakeup.notify_waiters();
        Ok(BlockOutcome::Parked)
    }

    /// Wake every Blocked evaluation: cluster capacity changed, so a fresh
    /// placement attempt may now succeed.
    pub async fn capacity_changed(&self) {
        let mut state = self.state.lock().await;
        for queued in state.queued.values_mut() {
            if queued.eval.status == EvalStatus::Blocked {
                queued.ready_at = None;
            }
        }
        drop(state);
        self.wakeup.notify_waiters();
    }

    /// Drop a queued evaluation (e.g. its job was deregistered). Leased
    /// evaluations cannot be cancelled; they run to completion.
    pub async fn cancel_pending(&self, eval_id: Uuid) -> Result<()> {
        let mut state = self.state.lock().await;
        let mut queued = state
            .queued
            .remove(&eval_id)
            .ok_or(SchedError::EvalNotFound(eval_id))?;
        let key = PendingKey::for_eval(&queued.eval);
        if let Some(order) = state.order.get_mut(&queued.eval.scheduler_class) {
            order.remove(&key);
        }
        state.jobs.remove(&queued.eval.job_id);
        queued.eval.status = EvalStatus::Cancelled;
        tracing::debug!(eval_id = %eval_id, "Evaluation cancelled");
        Ok(())
    }

    pub async fn stats(&self) -> BrokerStats {
        let state = self.state.lock().await;
        let blocked = state
            .queued
            .values()
            .filter(|q| q.eval.status == EvalStatus::Blocked)
            .count();
        BrokerStats {
            pending: state.queued.len() - blocked,
            blocked,
            leased: state.leases.len(),
        }
    }

    /// Reclaim leases whose deadline has passed, requeueing their
    /// evaluations exactly as if the holder had nacked. Recovers from
    /// crashed or stuck workers without any self-reporting from them.
    pub async fn run_expiry_loop(&self, cancel: CancellationToken) {
        let mut tick = tokio::time::interval(self.config.reap_interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tick.tick() => {}
            }

            let mut state = self.state.lock().await;
            let now = Instant::now();
            let expired: Vec<LeaseToken> = state
                .leases
                .iter()
                .filter(|(_, lease)| lease.deadline <= now)
                .map(|(token, _)| *token)
                .collect();
            if expired.is_empty() {
                continue;
            }

            for token in expired {
                let lease = state.leases.remove(&token).expect("token seen under lock");
                // Bounded memory for late-ack detection.
                if state.expired_tokens.len() >= 1024 {
                    state.expired_tokens.clear();
                }
                state.expired_tokens.insert(token);
                tracing::warn!(
                    eval_id = %lease.eval.id,
                    lease = %token,
                    "Lease expired, reclaiming evaluation"
                );
                self.requeue(&mut state, lease.eval, "lease expired");
            }
            drop(state);
            self.wakeup.notify_waiters();
        }
    }

    fn take_lease(&self, state: &mut BrokerState, token: LeaseToken) -> Result<Lease> {
        match state.leases.remove(&token) {
            Some(lease) => Ok(lease),
            None if state.expired_tokens.remove(&token) => Err(SchedError::LeaseExpired(token)),
            None => Err(SchedError::UnknownLease(token)),
        }
    }

    fn requeue(&self, state: &mut BrokerState, mut eval: Evaluation, reason: &str) {
        eval.retries += 1;
        if eval.retries > self.config.max_retries {
            eval.status = EvalStatus::Failed;
            state.jobs.remove(&eval.job_id);
            tracing::warn!(
                eval_id = %eval.id,
                job_id = %eval.job_id,
                retries = eval.retries,
                "Evaluation exceeded retry ceiling, marking failed"
            );
            return;
        }

        let delay = self.nack_delay(eval.retries);
        tracing::debug!(
            eval_id = %eval.id,
            retries = eval.retries,
            delay_ms = delay.as_millis() as u64,
            reason,
            "Evaluation requeued"
        );
        eval.status = EvalStatus::Pending;
        let key = PendingKey::for_eval(&eval);
        state.order.entry(eval.scheduler_class).or_default().insert(key);
        let ready_at = Instant::now() + delay;
        state.queued.insert(
            eval.id,
            QueuedEval {
                eval,
                ready_at: Some(ready_at),
            },
        );
    }

    /// Exponential backoff with up to 25% jitter to avoid thrashing on a
    /// persistently failing job.
    fn nack_delay(&self, retries: u32) -> Duration {
        let base = self.config.initial_nack_delay.as_millis() as u64;
        let max = self.config.max_nack_delay.as_millis() as u64;
        let backoff = base.saturating_mul(1 << retries.saturating_sub(1).min(20)).min(max);
        let jitter = rand::thread_rng().gen_range(0..=backoff / 4);
        Duration::from_millis(backoff + jitter)
    }
}
