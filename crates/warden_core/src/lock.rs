//! Exclusive, non-blocking lock on a target directory.
//!
//! The lock is a marker file created with `create_new`, so acquisition is a
//! single atomic "create if absent" against the filesystem. A second caller
//! is told the directory is busy; it is never queued.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::WardenResult;

/// Identity of the pipeline run holding a directory lock.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LockRecord {
    pub holder_id: Uuid,
    pub pid: u32,
    pub acquired_at: DateTime<Utc>,
}

impl LockRecord {
    pub fn new(holder_id: Uuid) -> Self {
        Self {
            holder_id,
            pid: std::process::id(),
            acquired_at: Utc::now(),
        }
    }
}

/// Result of trying to take the lock. Contention is an outcome, not an error.
#[derive(Debug)]
pub enum LockAcquisition {
    Acquired(BuildLock),
    /// Someone else holds the lock; the record is `None` if it could not be read
    Busy(Option<LockRecord>),
}

/// A held directory lock. Released explicitly or when dropped.
#[derive(Debug)]
pub struct BuildLock {
    path: PathBuf,
    record: LockRecord,
    released: AtomicBool,
}

impl BuildLock {
    pub fn record(&self) -> &LockRecord {
        &self.record
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove the marker. Safe to call more than once.
    pub fn release(&self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }
        match fs::remove_file(&self.path) {
            Ok(()) => debug!("Released build lock {}", self.path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove lock {}: {}", self.path.display(), e),
        }
    }
}

impl Drop for BuildLock {
    fn drop(&mut self) {
        self.release();
    }
}

/// Creates, inspects and removes the lock marker of one directory.
#[derive(Debug, Clone)]
pub struct LockManager {
    path: PathBuf,
}

impl LockManager {
    /// `path` is the full path of the marker file.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Try to take the lock without waiting.
    pub fn acquire(&self, holder_id: Uuid) -> WardenResult<LockAcquisition> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)
        {
            Ok(mut file) => {
                let record = LockRecord::new(holder_id);
                let lock = BuildLock {
                    path: self.path.clone(),
                    record,
                    released: AtomicBool::new(false),
                };
                // From here on the guard owns the marker, so a failed write still removes it.
                let payload = serde_json::to_vec(&lock.record)?;
                file.write_all(&payload)?;
                file.sync_all()?;
                info!("Acquired build lock {} ({})", self.path.display(), holder_id);
                Ok(LockAcquisition::Acquired(lock))
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                let holder = self.inspect();
                info!(
                    "Build lock {} is held by {:?}",
                    self.path.display(),
                    holder.as_ref().map(|r| r.holder_id)
                );
                Ok(LockAcquisition::Busy(holder))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Read the current holder, if any.
    ///
    /// Returns `None` both when the directory is free and when the marker
    /// exists but is still being written or is unreadable.
    pub fn inspect(&self) -> Option<LockRecord> {
        let content = fs::read_to_string(&self.path).ok()?;
        serde_json::from_str(&content).ok()
    }

    pub fn is_locked(&self) -> bool {
        self.path.exists()
    }

    /// Remove a marker left behind by a crashed run. Returns the removed record.
    pub fn force_release(&self) -> WardenResult<Option<LockRecord>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let record = self.inspect();
        fs::remove_file(&self.path)?;
        warn!(
            "Force-released build lock {} (holder {:?})",
            self.path.display(),
            record.as_ref().map(|r| r.holder_id)
        );
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager(dir: &Path) -> LockManager {
        LockManager::new(dir.join(".warden.lock"))
    }

    #[test]
    fn test_second_acquire_is_busy() {
        let dir = tempfile::tempdir().unwrap();
        let locks = manager(dir.path());
        let first_id = Uuid::new_v4();

        let first = locks.acquire(first_id).unwrap();
        assert!(matches!(first, LockAcquisition::Acquired(_)));

        match locks.acquire(Uuid::new_v4()).unwrap() {
            LockAcquisition::Busy(Some(record)) => {
                assert_eq!(record.holder_id, first_id);
                assert_eq!(record.pid, std::process::id());
            }
            other => panic!("expected busy, got {:?}", other),
        }
    }

    #[test]
    fn test_drop_releases_marker() {
        let dir = tempfile::tempdir().unwrap();
        let locks = manager(dir.path());

        {
            let _held = locks.acquire(Uuid::new_v4()).unwrap();
            assert!(locks.is_locked());
        }

        assert!(!locks.is_locked());
        assert!(matches!(
            locks.acquire(Uuid::new_v4()).unwrap(),
            LockAcquisition::Acquired(_)
        ));
    }

    #[test]
    fn test_release_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let locks = manager(dir.path());

        let LockAcquisition::Acquired(lock) = locks.acquire(Uuid::new_v4()).unwrap() else {
            panic!("expected to acquire");
        };
        lock.release();
        lock.release();
        assert!(!locks.is_locked());

        // A new holder's marker must survive the old guard being dropped.
        let second = locks.acquire(Uuid::new_v4()).unwrap();
        drop(lock);
        assert!(locks.is_locked());
        drop(second);
    }

    #[test]
    fn test_force_release_removes_stale_marker() {
        let dir = tempfile::tempdir().unwrap();
        let locks = manager(dir.path());
        let stale = LockRecord::new(Uuid::new_v4());
        fs::write(locks.path(), serde_json::to_string(&stale).unwrap()).unwrap();

        let removed = locks.force_release().unwrap();

        assert_eq!(removed, Some(stale));
        assert!(!locks.is_locked());
        assert_eq!(locks.force_release().unwrap(), None);
    }
}
