//! Admission gate backpressure behavior.

use flotilla::admission::{AdmissionGate, Capability, JobOperation};
use flotilla::error::SchedError;
use flotilla::store::{ConfigStore, SchedulerConfigPatch};

fn store_with_reject(reject: bool) -> ConfigStore {
    let store = ConfigStore::default();
    store
        .set_config(
            &SchedulerConfigPatch {
                reject_job_registration: Some(reject),
                ..Default::default()
            },
            None,
        )
        .unwrap();
    store
}

#[test]
fn test_open_gate_admits_everyone() {
    let store = store_with_reject(false);
    let gate = AdmissionGate::new(&store);
    assert!(gate
        .admit(JobOperation::Register, Capability::Standard)
        .is_ok());
    assert!(gate
        .admit(JobOperation::Register, Capability::Management)
        .is_ok());
}

#[test]
fn test_reject_denies_standard_allows_management() {
    let store = store_with_reject(true);
    let gate = AdmissionGate::new(&store);

    let denied = gate
        .admit(JobOperation::Register, Capability::Standard)
        .unwrap_err();
    assert!(matches!(denied, SchedError::AdmissionDenied(_)));

    assert!(gate
        .admit(JobOperation::Register, Capability::Management)
        .is_ok());
}

#[test]
fn test_reject_covers_dispatch_and_scale_uniformly() {
    let store = store_with_reject(true);
    let gate = AdmissionGate::new(&store);

    for operation in [JobOperation::Dispatch, JobOperation::Scale] {
        assert!(gate.admit(operation, Capability::Standard).is_err());
        assert!(gate.admit(operation, Capability::Management).is_ok());
    }
}

#[test]
fn test_gate_follows_configuration_changes() {
    let store = store_with_reject(true);
    let gate = AdmissionGate::new(&store);
    assert!(gate
        .admit(JobOperation::Register, Capability::Standard)
        .is_err());

    store
        .set_config(
            &SchedulerConfigPatch {
                reject_job_registration: Some(false),
                ..Default::default()
            },
            None,
        )
        .unwrap();
    assert!(gate
        .admit(JobOperation::Register, Capability::Standard)
        .is_ok());
}
