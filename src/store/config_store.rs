use std::sync::Mutex;

use tokio::sync::watch;

use crate::error::{Result, SchedError};
use crate::store::config::{SchedulerConfigPatch, SchedulerConfiguration};

/// A configuration snapshot together with the version it was read at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionedConfig {
    pub config: SchedulerConfiguration,
    /// Strictly increasing; assigned by the store on every successful write.
    pub version: u64,
}

/// Holds the single current [`SchedulerConfiguration`].
///
/// Writes are check-and-set against the version: exactly one writer succeeds
/// per version increment, losers get [`SchedError::StaleVersion`] carrying
/// nothing but the version numbers (they re-read via [`get`](Self::get)).
/// Reads never block and never lock out a writer; the hot path tolerates a
/// snapshot that lags the latest write by one update.
pub struct ConfigStore {
    current: watch::Sender<VersionedConfig>,
    // Serializes writers so the compare step and the publish step are one
    // linearized operation. Readers do not touch this lock.
    write_lock: Mutex<()>,
}

impl ConfigStore {
    pub fn new(initial: SchedulerConfiguration) -> Self {
        let (tx, _rx) = watch::channel(VersionedConfig {
            config: initial,
            version: 0,
        });
        Self {
            current: tx,
            write_lock: Mutex::new(()),
        }
    }

    /// Snapshot read of the latest locally observed configuration.
    pub fn get(&self) -> VersionedConfig {
        self.current.borrow().clone()
    }

    /// Subscribe to configuration changes. The broker parks on this while
    /// the eval broker is paused.
    pub fn subscribe(&self) -> watch::Receiver<VersionedConfig> {
        self.current.subscribe()
    }

    /// Conditionally replace the configuration.
    ///
    /// Succeeds only if `expected_version` matches the current version at
    /// the moment of the write, returning the newly assigned version. On a
    /// mismatch nothing changes and the caller must re-read, re-merge its
    /// intended field changes, and retry.
    pub fn compare_and_swap(
        &self,
        new: SchedulerConfiguration,
        expected_version: u64,
    ) -> Result<u64> {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| SchedError::Internal("config store writer lock poisoned".to_string()))?;

        let current_version = self.current.borrow().version;
        if current_version != expected_version {
            return Err(SchedError::StaleVersion {
                expected: expected_version,
                current: current_version,
            });
        }

        let version = current_version + 1;
        self.current.send_replace(VersionedConfig {
            config: new,
            version,
        });
        tracing::info!(version, "Scheduler configuration updated");
        Ok(version)
    }

    /// Operator entry point: read the current configuration, merge the
    /// patch's set fields onto it, and check-and-set once.
    ///
    /// With `expected: None` the snapshot's own version is used, so the call
    /// fails only if another write lands between the read and the swap. A
    /// lost race surfaces as [`SchedError::StaleVersion`] ("please try
    /// again") rather than being retried on the operator's behalf.
    ///
    /// A patch with no fields set writes nothing: the current version is
    /// returned unchanged and subscribers are not woken.
    pub fn set_config(&self, patch: &SchedulerConfigPatch, expected: Option<u64>) -> Result<u64> {
        let snapshot = self.get();
        if patch.is_empty() {
            return Ok(snapshot.version);
        }
        let mut config = snapshot.config;
        patch.apply_to(&mut config);
        self.compare_and_swap(config, expected.unwrap_or(snapshot.version))
    }
}

impl Default for ConfigStore {
    fn default() -> Self {
        Self::new(SchedulerConfiguration::default())
    }
}
