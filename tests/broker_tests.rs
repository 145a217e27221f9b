//! Eval broker queue, lease, and requeue behavior.

mod common;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use flotilla::broker::{BlockOutcome, EvalBroker, Evaluation};
use flotilla::error::SchedError;
use flotilla::placement::TaskRequest;
use flotilla::store::{SchedulerClass, SchedulerConfigPatch};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use common::{broker_with, fast_broker_config, service_eval};

async fn dequeue_now(broker: &EvalBroker) -> (Evaluation, Uuid) {
    let cancel = CancellationToken::new();
    tokio::time::timeout(
        Duration::from_secs(2),
        broker.dequeue(&SchedulerClass::ALL, &cancel),
    )
    .await
    .expect("dequeue should not stall")
    .expect("dequeue should yield an evaluation")
}

// ---------------------------------------------------------------------------
// Ordering and duplicates
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_priority_order_with_create_index_tiebreak() {
    let (broker, _store) = broker_with(fast_broker_config());

    let low = service_eval(10);
    let high = service_eval(90);
    let high_later = service_eval(90);

    broker.enqueue(low.clone()).await.unwrap();
    broker.enqueue(high.clone()).await.unwrap();
    broker.enqueue(high_later.clone()).await.unwrap();

    let (first, t1) = dequeue_now(&broker).await;
    let (second, t2) = dequeue_now(&broker).await;
    let (third, t3) = dequeue_now(&broker).await;

    assert_eq!(first.id, high.id);
    assert_eq!(second.id, high_later.id, "equal priority served FIFO");
    assert_eq!(third.id, low.id);

    for token in [t1, t2, t3] {
        broker.ack(token).await.unwrap();
    }
}

#[tokio::test]
async fn test_duplicate_job_evaluation_rejected() {
    let (broker, _store) = broker_with(fast_broker_config());
    let job_id = Uuid::new_v4();

    let first = Evaluation::new(job_id, SchedulerClass::Batch, 50, TaskRequest::new(1, 1));
    let first_id = first.id;
    broker.enqueue(first).await.unwrap();

    let second = Evaluation::new(job_id, SchedulerClass::Batch, 50, TaskRequest::new(1, 1));
    let err = broker.enqueue(second).await.unwrap_err();
    assert!(matches!(err, SchedError::DuplicateEval(id) if id == first_id));

    // Still duplicate while leased.
    let (_eval, token) = dequeue_now(&broker).await;
    let third = Evaluation::new(job_id, SchedulerClass::Batch, 50, TaskRequest::new(1, 1));
    assert!(broker.enqueue(third).await.is_err());

    // Resolved after ack.
    broker.ack(token).await.unwrap();
    let fourth = Evaluation::new(job_id, SchedulerClass::Batch, 50, TaskRequest::new(1, 1));
    broker.enqueue(fourth).await.unwrap();
}

#[tokio::test]
async fn test_dequeue_filters_by_worker_classes() {
    let (broker, _store) = broker_with(fast_broker_config());
    let batch = Evaluation::new(
        Uuid::new_v4(),
        SchedulerClass::Batch,
        80,
        TaskRequest::new(1, 1),
    );
    let service = service_eval(10);
    broker.enqueue(batch).await.unwrap();
    broker.enqueue(service.clone()).await.unwrap();

    let cancel = CancellationToken::new();
    let (eval, token) = broker
        .dequeue(&[SchedulerClass::Service], &cancel)
        .await
        .unwrap();
    // The higher priority batch eval is invisible to a service-only worker.
    assert_eq!(eval.id, service.id);
    broker.ack(token).await.unwrap();
}

// ---------------------------------------------------------------------------
// Ack / nack accounting
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_ack_round_trip_empties_broker() {
    let (broker, _store) = broker_with(fast_broker_config());
    broker.enqueue(service_eval(50)).await.unwrap();

    let (_eval, token) = dequeue_now(&broker).await;
    broker.ack(token).await.unwrap();

    let stats = broker.stats().await;
    assert_eq!(stats.pending, 0);
    assert_eq!(stats.leased, 0);
    assert_eq!(stats.blocked, 0);

    // A lease token is single-use.
    assert!(matches!(
        broker.ack(token).await,
        Err(SchedError::UnknownLease(_))
    ));
}

#[tokio::test]
async fn test_nack_increments_retries_and_redelivers() {
    let (broker, _store) = broker_with(fast_broker_config());
    broker.enqueue(service_eval(50)).await.unwrap();

    let (eval, token) = dequeue_now(&broker).await;
    assert_eq!(eval.retries, 0);
    broker.nack(token).await.unwrap();

    let (redelivered, token) = dequeue_now(&broker).await;
    assert_eq!(redelivered.id, eval.id);
    assert_eq!(redelivered.retries, 1, "nack increments by exactly one");
    broker.ack(token).await.unwrap();
}

#[tokio::test]
async fn test_retry_ceiling_marks_failed() {
    let config = fast_broker_config();
    let max_retries = config.max_retries;
    let (broker, _store) = broker_with(config);
    broker.enqueue(service_eval(50)).await.unwrap();

    for _ in 0..=max_retries {
        let (_eval, token) = dequeue_now(&broker).await;
        broker.nack(token).await.unwrap();
    }

    // Past the ceiling the evaluation is gone, not redelivered.
    let stats = broker.stats().await;
    assert_eq!(stats.pending, 0);
    assert_eq!(stats.leased, 0);
}

// ---------------------------------------------------------------------------
// Pause
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_pause_stops_issuance_and_resume_preserves_order() {
    let (broker, store) = broker_with(fast_broker_config());
    let pause = |on: bool| {
        store.set_config(
            &SchedulerConfigPatch {
                pause_eval_broker: Some(on),
                ..Default::default()
            },
            None,
        )
    };

    broker.enqueue(service_eval(10)).await.unwrap();
    pause(true).unwrap();

    // Enqueued while paused; should still be served first on resume.
    let high = service_eval(90);
    broker.enqueue(high.clone()).await.unwrap();

    let cancel = CancellationToken::new();
    let paused_attempt = tokio::time::timeout(
        Duration::from_millis(200),
        broker.dequeue(&SchedulerClass::ALL, &cancel),
    )
    .await;
    assert!(paused_attempt.is_err(), "no leases while paused");

    pause(false).unwrap();
    let (eval, token) = dequeue_now(&broker).await;
    assert_eq!(eval.id, high.id);
    broker.ack(token).await.unwrap();
}

#[tokio::test]
async fn test_pause_does_not_touch_outstanding_leases() {
    let (broker, store) = broker_with(fast_broker_config());
    broker.enqueue(service_eval(50)).await.unwrap();
    let (_eval, token) = dequeue_now(&broker).await;

    store
        .set_config(
            &SchedulerConfigPatch {
                pause_eval_broker: Some(true),
                ..Default::default()
            },
            None,
        )
        .unwrap();

    // The lease issued before the pause still resolves normally.
    broker.ack(token).await.unwrap();
}

// ---------------------------------------------------------------------------
// Lease expiry and exclusivity
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_expired_lease_is_reclaimed_and_requeued() {
    let (broker, _store) = broker_with(fast_broker_config());
    let reaper_cancel = CancellationToken::new();
    {
        let broker = broker.clone();
        let cancel = reaper_cancel.clone();
        tokio::spawn(async move { broker.run_expiry_loop(cancel).await });
    }

    broker.enqueue(service_eval(50)).await.unwrap();
    let (eval, token) = dequeue_now(&broker).await;

    // Sit on the lease past its TTL; the broker reclaims it as if nacked.
    let (redelivered, token2) = dequeue_now(&broker).await;
    assert_eq!(redelivered.id, eval.id);
    assert_eq!(redelivered.retries, 1);

    // The crashed worker's late ack reports the expiry distinctly.
    assert!(matches!(
        broker.ack(token).await,
        Err(SchedError::LeaseExpired(_))
    ));

    broker.ack(token2).await.unwrap();
    reaper_cancel.cancel();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_no_double_lease_under_concurrent_dequeue() {
    let (broker, _store) = broker_with(fast_broker_config());
    for _ in 0..20 {
        broker.enqueue(service_eval(50)).await.unwrap();
    }

    let mut handles = Vec::new();
    for _ in 0..8 {
        let broker: Arc<EvalBroker> = broker.clone();
        handles.push(tokio::spawn(async move {
            let cancel = CancellationToken::new();
            let mut seen = Vec::new();
            while let Ok(Some((eval, token))) = tokio::time::timeout(
                Duration::from_millis(200),
                broker.dequeue(&SchedulerClass::ALL, &cancel),
            )
            .await
            {
                seen.push(eval.id);
                broker.ack(token).await.unwrap();
            }
            seen
        }));
    }

    let mut all = Vec::new();
    for handle in handles {
        all.extend(handle.await.unwrap());
    }
    let unique: HashSet<Uuid> = all.iter().copied().collect();
    assert_eq!(all.len(), 20, "every evaluation leased exactly once");
    assert_eq!(unique.len(), 20, "no evaluation leased twice");
}

// ---------------------------------------------------------------------------
// Blocked evaluations and cancellation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_blocked_eval_wakes_on_capacity_change() {
    let (broker, _store) = broker_with(fast_broker_config());
    broker.enqueue(service_eval(50)).await.unwrap();

    let (eval, token) = dequeue_now(&broker).await;
    broker.block(token).await.unwrap();
    assert_eq!(broker.stats().await.blocked, 1);

    // Long blocked backoff in the test config: nothing is eligible yet.
    let cancel = CancellationToken::new();
    let attempt = tokio::time::timeout(
        Duration::from_millis(100),
        broker.dequeue(&SchedulerClass::ALL, &cancel),
    )
    .await;
    assert!(attempt.is_err());

    broker.capacity_changed().await;
    let (woken, token) = dequeue_now(&broker).await;
    assert_eq!(woken.id, eval.id);
    broker.ack(token).await.unwrap();
}

#[tokio::test]
async fn test_persistently_blocked_eval_fails_past_retry_ceiling() {
    let config = fast_broker_config();
    let max_retries = config.max_retries;
    let (broker, _store) = broker_with(config);
    let eval = service_eval(50);
    let job_id = eval.job_id;
    broker.enqueue(eval).await.unwrap();

    // Each block cycle counts one retry, just like a nack would.
    for cycle in 1..=max_retries {
        let (eval, token) = dequeue_now(&broker).await;
        assert_eq!(eval.retries, cycle - 1);
        assert_eq!(broker.block(token).await.unwrap(), BlockOutcome::Parked);
        broker.capacity_changed().await;
    }

    // The next block trips the ceiling: the evaluation is failed, not parked.
    let (_eval, token) = dequeue_now(&broker).await;
    assert_eq!(
        broker.block(token).await.unwrap(),
        BlockOutcome::RetriesExhausted
    );
    let stats = broker.stats().await;
    assert_eq!((stats.pending, stats.blocked, stats.leased), (0, 0, 0));

    // The job guard is released with the failure.
    let replacement = Evaluation::new(job_id, SchedulerClass::Service, 50, TaskRequest::new(1, 1));
    broker.enqueue(replacement).await.unwrap();
}

#[tokio::test]
async fn test_cancel_pending_removes_eval_and_frees_job() {
    let (broker, _store) = broker_with(fast_broker_config());
    let eval = service_eval(50);
    let job_id = eval.job_id;
    let eval_id = broker.enqueue(eval).await.unwrap();

    broker.cancel_pending(eval_id).await.unwrap();
    assert_eq!(broker.stats().await.pending, 0);

    // The job may submit a fresh evaluation afterwards.
    let replacement = Evaluation::new(job_id, SchedulerClass::Service, 50, TaskRequest::new(1, 1));
    broker.enqueue(replacement).await.unwrap();

    assert!(matches!(
        broker.cancel_pending(eval_id).await,
        Err(SchedError::EvalNotFound(_))
    ));
}

#[tokio::test]
async fn test_dequeue_honors_cancellation() {
    let (broker, _store) = broker_with(fast_broker_config());
    let cancel = CancellationToken::new();

    let waiter = {
        let broker = broker.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { broker.dequeue(&SchedulerClass::ALL, &cancel).await })
    };

    tokio::time::sleep(Duration::from_millis(50)).await;
    cancel.cancel();
    let result = tokio::time::timeout(Duration::from_secs(1), waiter)
        .await
        .expect("cancelled dequeue returns promptly")
        .unwrap();
    assert!(result.is_none());
}
