//! Check-and-set semantics of the scheduler configuration store.

use std::sync::Arc;

use flotilla::error::SchedError;
use flotilla::store::{
    ConfigStore, SchedulerAlgorithm, SchedulerConfigPatch, SchedulerConfiguration,
};

#[test]
fn test_get_returns_initial_default() {
    let store = ConfigStore::default();
    let snapshot = store.get();
    assert_eq!(snapshot.version, 0);
    assert_eq!(snapshot.config, SchedulerConfiguration::default());
}

#[test]
fn test_versions_strictly_increase() {
    let store = ConfigStore::default();
    for expected in 0..5 {
        let snapshot = store.get();
        assert_eq!(snapshot.version, expected);
        let version = store
            .compare_and_swap(snapshot.config, snapshot.version)
            .unwrap();
        assert_eq!(version, expected + 1);
    }
}

#[test]
fn test_stale_cas_reports_current_version_and_changes_nothing() {
    let store = ConfigStore::default();
    let base = store.get();

    let mut winner = base.config.clone();
    winner.pause_eval_broker = true;
    store.compare_and_swap(winner, base.version).unwrap();

    // A second write against the same expected version loses.
    let mut loser = base.config.clone();
    loser.scheduler_algorithm = SchedulerAlgorithm::Spread;
    let err = store.compare_and_swap(loser, base.version).unwrap_err();
    let SchedError::StaleVersion { expected, current } = err else {
        panic!("expected StaleVersion, got {err:?}");
    };
    assert_eq!(expected, 0);
    assert_eq!(current, 1);

    // The winner's write is intact.
    let now = store.get();
    assert!(now.config.pause_eval_broker);
    assert_eq!(now.config.scheduler_algorithm, SchedulerAlgorithm::Binpack);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_exactly_one_concurrent_cas_wins_per_version() {
    let store = Arc::new(ConfigStore::default());
    let base = store.get();

    let mut handles = Vec::new();
    for i in 0..16 {
        let store = store.clone();
        let config = base.config.clone();
        handles.push(tokio::spawn(async move {
            let mut config = config;
            config.memory_oversubscription_enabled = i % 2 == 0;
            store.compare_and_swap(config, 0)
        }));
    }

    let mut wins = 0;
    for handle in handles {
        if handle.await.unwrap().is_ok() {
            wins += 1;
        }
    }
    assert_eq!(wins, 1, "exactly one CAS may succeed per version");
    assert_eq!(store.get().version, 1);
}

#[test]
fn test_set_config_merges_only_set_fields() {
    let store = ConfigStore::default();
    store
        .set_config(
            &SchedulerConfigPatch {
                memory_oversubscription_enabled: Some(true),
                ..Default::default()
            },
            None,
        )
        .unwrap();
    store
        .set_config(
            &SchedulerConfigPatch {
                scheduler_algorithm: Some(SchedulerAlgorithm::Spread),
                ..Default::default()
            },
            None,
        )
        .unwrap();

    // The second patch did not reset the first patch's field.
    let config = store.get().config;
    assert!(config.memory_oversubscription_enabled);
    assert_eq!(config.scheduler_algorithm, SchedulerAlgorithm::Spread);
}

#[test]
fn test_set_config_with_empty_patch_writes_nothing() {
    let store = ConfigStore::default();
    let patch = SchedulerConfigPatch::default();
    assert!(patch.is_empty());

    // No fields set: no version bump and no subscriber wakeup.
    let rx = store.subscribe();
    let version = store.set_config(&patch, None).unwrap();
    assert_eq!(version, 0);
    assert_eq!(store.get().version, 0);
    assert!(!rx.has_changed().unwrap());
}

#[test]
fn test_set_config_with_explicit_stale_version_is_rejected() {
    let store = ConfigStore::default();
    let patch = SchedulerConfigPatch {
        pause_eval_broker: Some(true),
        ..Default::default()
    };
    store.set_config(&patch, None).unwrap();

    // An operator working from the stale version gets the retry signal
    // instead of a silent overwrite.
    let err = store.set_config(&patch, Some(0)).unwrap_err();
    assert!(matches!(err, SchedError::StaleVersion { .. }));
    assert!(err.to_string().contains("please try again"));
}

#[tokio::test]
async fn test_subscribe_sees_updates() {
    let store = ConfigStore::default();
    let mut rx = store.subscribe();
    assert!(!rx.borrow().config.pause_eval_broker);

    store
        .set_config(
            &SchedulerConfigPatch {
                pause_eval_broker: Some(true),
                ..Default::default()
            },
            None,
        )
        .unwrap();

    rx.changed().await.unwrap();
    let snapshot = rx.borrow().clone();
    assert!(snapshot.config.pause_eval_broker);
    assert_eq!(snapshot.version, 1);
}
