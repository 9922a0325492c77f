//! In-memory VM registry.
//!
//! The name → entry map is guarded by a `RwLock` that is only held for
//! lookups and inserts, never across an `.await`. Each entry carries its
//! own async mutex around the process handle; holding it serialises all
//! lifecycle operations for that one name while other names proceed.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, MutexGuard, TryLockError};
use vmctl_core::{VmInfo, VmName, VmStatus};

use crate::config::VmPaths;
use crate::network::NetworkLease;
use crate::ExecutorError;

/// Authoritative state of one VM.
#[derive(Debug)]
pub struct VmRecord {
    name: VmName,
    status: VmStatus,
    paths: VmPaths,
    lease: NetworkLease,
    entry_point: Option<String>,
    created_at: DateTime<Utc>,
}

impl VmRecord {
    /// New record in [`VmStatus::Creating`].
    #[must_use]
    pub fn new(name: VmName, paths: VmPaths, lease: NetworkLease, entry_point: Option<String>) -> Self {
        Self { name, status: VmStatus::Creating, paths, lease, entry_point, created_at: Utc::now() }
    }

    #[must_use]
    pub fn name(&self) -> &VmName {
        &self.name
    }

    #[must_use]
    pub fn status(&self) -> VmStatus {
        self.status
    }

    #[must_use]
    pub fn paths(&self) -> &VmPaths {
        &self.paths
    }

    #[must_use]
    pub fn lease(&self) -> &NetworkLease {
        &self.lease
    }

    #[must_use]
    pub fn entry_point(&self) -> Option<&str> {
        self.entry_point.as_deref()
    }

    /// Wire projection of this record.
    #[must_use]
    pub fn info(&self) -> VmInfo {
        VmInfo::new(
            self.name.clone(),
            self.status,
            self.lease.guest_ip(),
            self.lease.tap_device().to_owned(),
            self.entry_point.clone(),
            self.created_at,
        )
    }
}

/// Registry slot: the record plus the process handle that owns the VM's
/// hypervisor.
///
/// `process` is `None` whenever no hypervisor is running; the status is
/// never `Booting` or `Running` in that case.
pub struct VmEntry<P> {
    record: RwLock<VmRecord>,
    process: Mutex<Option<P>>,
}

impl<P> VmEntry<P> {
    #[must_use]
    pub fn new(record: VmRecord) -> Self {
        Self { record: RwLock::new(record), process: Mutex::new(None) }
    }

    /// Run `f` against the record under the read lock.
    ///
    /// # Panics
    /// Panics if the internal `RwLock` is poisoned.
    pub fn with_record<R>(&self, f: impl FnOnce(&VmRecord) -> R) -> R {
        #[expect(clippy::expect_used, reason = "lock poisoning is unrecoverable")]
        let record = self.record.read().expect("vm record read lock poisoned");
        f(&record)
    }

    #[must_use]
    pub fn status(&self) -> VmStatus {
        self.with_record(VmRecord::status)
    }

    #[must_use]
    pub fn info(&self) -> VmInfo {
        self.with_record(VmRecord::info)
    }

    /// Move the record to `next`.
    ///
    /// Callers hold the process lock, so transitions for one name never
    /// interleave.
    ///
    /// # Panics
    /// Panics if the internal `RwLock` is poisoned.
    pub(crate) fn set_status(&self, next: VmStatus) {
        #[expect(clippy::expect_used, reason = "lock poisoning is unrecoverable")]
        let mut record = self.record.write().expect("vm record write lock poisoned");
        debug_assert!(
            record.status.can_transition_to(next),
            "illegal transition {} -> {next} for {}",
            record.status,
            record.name
        );
        tracing::debug!(vm = %record.name, from = %record.status, to = %next, "status change");
        record.status = next;
    }

    /// Wait for exclusive control of this VM.
    pub async fn lock(&self) -> MutexGuard<'_, Option<P>> {
        self.process.lock().await
    }

    /// Take exclusive control only if no other operation holds it.
    ///
    /// # Errors
    /// Returns [`TryLockError`] if the VM is busy.
    pub fn try_lock(&self) -> Result<MutexGuard<'_, Option<P>>, TryLockError> {
        self.process.try_lock()
    }
}

/// Thread-safe map of VM name to registry entry.
pub struct VmRegistry<P> {
    entries: RwLock<HashMap<VmName, Arc<VmEntry<P>>>>,
}

impl<P> Default for VmRegistry<P> {
    fn default() -> Self {
        Self { entries: RwLock::new(HashMap::new()) }
    }
}

impl<P> VmRegistry<P> {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `entry` under its record's name.
    ///
    /// # Errors
    /// Returns [`ExecutorError::AlreadyExists`] if the name is taken.
    ///
    /// # Panics
    /// Panics if the internal `RwLock` is poisoned.
    pub fn insert(&self, entry: Arc<VmEntry<P>>) -> Result<(), ExecutorError> {
        let name = entry.with_record(|r| r.name().clone());
        #[expect(clippy::expect_used, reason = "lock poisoning is unrecoverable")]
        let mut entries = self.entries.write().expect("vm registry write lock poisoned");
        if entries.contains_key(&name) {
            return Err(ExecutorError::AlreadyExists(name));
        }
        entries.insert(name, entry);
        Ok(())
    }

    /// Look up the entry for `name`.
    ///
    /// # Panics
    /// Panics if the internal `RwLock` is poisoned.
    #[must_use]
    pub fn get(&self, name: &VmName) -> Option<Arc<VmEntry<P>>> {
        #[expect(clippy::expect_used, reason = "lock poisoning is unrecoverable")]
        self.entries
            .read()
            .expect("vm registry read lock poisoned")
            .get(name)
            .cloned()
    }

    /// Remove `name` if it still maps to `entry`. Returns `true` if removed.
    ///
    /// # Panics
    /// Panics if the internal `RwLock` is poisoned.
    pub fn remove(&self, name: &VmName, entry: &Arc<VmEntry<P>>) -> bool {
        #[expect(clippy::expect_used, reason = "lock poisoning is unrecoverable")]
        let mut entries = self.entries.write().expect("vm registry write lock poisoned");
        match entries.get(name) {
            Some(current) if Arc::ptr_eq(current, entry) => {
                entries.remove(name);
                true
            }
            _ => false,
        }
    }

    /// All entries, ordered by name.
    ///
    /// # Panics
    /// Panics if the internal `RwLock` is poisoned.
    #[must_use]
    pub fn entries(&self) -> Vec<(VmName, Arc<VmEntry<P>>)> {
        #[expect(clippy::expect_used, reason = "lock poisoning is unrecoverable")]
        let entries = self.entries.read().expect("vm registry read lock poisoned");
        let mut all: Vec<_> = entries.iter().map(|(k, v)| (k.clone(), Arc::clone(v))).collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all
    }

    /// Number of registered VMs.
    ///
    /// # Panics
    /// Panics if the internal `RwLock` is poisoned.
    #[must_use]
    pub fn len(&self) -> usize {
        #[expect(clippy::expect_used, reason = "lock poisoning is unrecoverable")]
        self.entries.read().expect("vm registry read lock poisoned").len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
