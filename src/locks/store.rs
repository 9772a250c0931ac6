//! Lock record storage.
//!
//! The lock directory is the only state workers share. [`LockStore`] keeps
//! the manager independent of where that directory lives so tests can run
//! against [`MemoryLockStore`].

use super::types::TaskLock;
use crate::error::{ChadgiError, Result};
use crate::fs::{CreateOutcome, atomic_write, create_exclusive};
use regex::Regex;
use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// How long to wait for another worker's record guard.
const GUARD_WAIT: Duration = Duration::from_secs(5);

/// A guard this old was left behind by a worker that died holding it.
const GUARD_ABANDONED_AFTER: Duration = Duration::from_secs(30);

const GUARD_RETRY_INTERVAL: Duration = Duration::from_millis(5);

static LOCK_FILE_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^issue-(\d+)\.lock$").expect("lock file pattern is valid"));

/// Storage for lock records, keyed by issue number.
pub trait LockStore: Send + Sync {
    /// Make sure the storage location exists.
    fn ensure_ready(&self) -> Result<()>;

    /// Whether any record exists for the issue, readable or not.
    fn exists(&self, issue_number: u64) -> Result<bool>;

    /// Read the record for an issue.
    ///
    /// Returns `Err(ChadgiError::CorruptLock)` when a record exists but
    /// cannot be parsed.
    fn read(&self, issue_number: u64) -> Result<Option<TaskLock>>;

    /// Create a record only if none exists for the issue.
    fn create(&self, lock: &TaskLock) -> Result<CreateOutcome>;

    /// Atomically overwrite the record for the issue.
    fn replace(&self, lock: &TaskLock) -> Result<()>;

    /// Overwrite the record only while `lock.session_id` still owns it.
    ///
    /// Returns false, leaving storage untouched, when the record is missing,
    /// unreadable, or owned by another session.
    fn replace_if_owner(&self, lock: &TaskLock) -> Result<bool>;

    /// Delete the record. Returns whether anything was deleted.
    fn remove(&self, issue_number: u64) -> Result<bool>;

    /// Delete the record only if it still equals `expected`.
    ///
    /// `None` matches only a record that cannot be parsed. Returns whether
    /// this call deleted it.
    fn remove_if_unchanged(&self, issue_number: u64, expected: Option<&TaskLock>) -> Result<bool>;

    /// All readable records, ordered by issue number.
    ///
    /// Unreadable entries are skipped.
    fn scan(&self) -> Result<Vec<TaskLock>>;

    /// Human-readable location for messages.
    fn describe(&self) -> String;
}

impl<S: LockStore + ?Sized> LockStore for Arc<S> {
    fn ensure_ready(&self) -> Result<()> {
        (**self).ensure_ready()
    }

    fn exists(&self, issue_number: u64) -> Result<bool> {
        (**self).exists(issue_number)
    }

    fn read(&self, issue_number: u64) -> Result<Option<TaskLock>> {
        (**self).read(issue_number)
    }

    fn create(&self, lock: &TaskLock) -> Result<CreateOutcome> {
        (**self).create(lock)
    }

    fn replace(&self, lock: &TaskLock) -> Result<()> {
        (**self).replace(lock)
    }

    fn replace_if_owner(&self, lock: &TaskLock) -> Result<bool> {
        (**self).replace_if_owner(lock)
    }

    fn remove(&self, issue_number: u64) -> Result<bool> {
        (**self).remove(issue_number)
    }

    fn remove_if_unchanged(&self, issue_number: u64, expected: Option<&TaskLock>) -> Result<bool> {
        (**self).remove_if_unchanged(issue_number, expected)
    }

    fn scan(&self) -> Result<Vec<TaskLock>> {
        (**self).scan()
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}

/// Get the lock file name for an issue.
pub fn lock_file_name(issue_number: u64) -> String {
    format!("issue-{}.lock", issue_number)
}

/// Extract the issue number from a lock file name.
pub fn parse_lock_file_name(name: &str) -> Option<u64> {
    LOCK_FILE_NAME
        .captures(name)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// One `issue-<N>.lock` JSON file per locked issue in a directory.
///
/// New records appear only through an exclusive create. Every change to an
/// existing record, deletion included, happens under that record's
/// `.issue-<N>.lock.guard` file, so a record read under the guard stays as
/// read until the guard is dropped.
#[derive(Debug, Clone)]
pub struct FsLockStore {
    dir: PathBuf,
}

impl FsLockStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Get the path to the lock file for an issue.
    pub fn lock_path(&self, issue_number: u64) -> PathBuf {
        self.dir.join(lock_file_name(issue_number))
    }

    fn remove_unguarded(&self, issue_number: u64) -> Result<bool> {
        let path = self.lock_path(issue_number);
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(ChadgiError::StorageError(format!(
                "failed to remove lock file '{}': {}",
                path.display(),
                e
            ))),
        }
    }

    fn guard_path(&self, issue_number: u64) -> PathBuf {
        self.dir.join(format!(".{}.guard", lock_file_name(issue_number)))
    }

    /// Take the guard for changing an existing record.
    ///
    /// Returns `None` when there is no record to change.
    fn guard_existing(&self, issue_number: u64) -> Result<Option<RecordGuard>> {
        if !self.exists(issue_number)? {
            return Ok(None);
        }
        RecordGuard::acquire(self.guard_path(issue_number)).map(Some)
    }
}

impl LockStore for FsLockStore {
    fn ensure_ready(&self) -> Result<()> {
        fs::create_dir_all(&self.dir).map_err(|e| {
            ChadgiError::StorageError(format!(
                "failed to create locks directory '{}': {}",
                self.dir.display(),
                e
            ))
        })
    }

    fn exists(&self, issue_number: u64) -> Result<bool> {
        let path = self.lock_path(issue_number);
        match fs::symlink_metadata(&path) {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(ChadgiError::StorageError(format!(
                "failed to stat lock file '{}': {}",
                path.display(),
                e
            ))),
        }
    }

    fn read(&self, issue_number: u64) -> Result<Option<TaskLock>> {
        let path = self.lock_path(issue_number);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(ChadgiError::StorageError(format!(
                    "failed to read lock file '{}': {}",
                    path.display(),
                    e
                )));
            }
        };

        let lock = TaskLock::from_json(&content).map_err(|e| match e {
            ChadgiError::CorruptLock(msg) => {
                ChadgiError::CorruptLock(format!("'{}': {}", path.display(), msg))
            }
            other => other,
        })?;

        if lock.issue_number != issue_number {
            return Err(ChadgiError::CorruptLock(format!(
                "'{}' records issue #{}",
                path.display(),
                lock.issue_number
            )));
        }

        Ok(Some(lock))
    }

    fn create(&self, lock: &TaskLock) -> Result<CreateOutcome> {
        create_exclusive(self.lock_path(lock.issue_number), lock.to_json()?.as_bytes())
    }

    fn replace(&self, lock: &TaskLock) -> Result<()> {
        atomic_write(self.lock_path(lock.issue_number), lock.to_json()?.as_bytes())
    }

    fn replace_if_owner(&self, lock: &TaskLock) -> Result<bool> {
        let Some(_guard) = self.guard_existing(lock.issue_number)? else {
            return Ok(false);
        };

        match self.read(lock.issue_number) {
            Ok(Some(current)) if current.session_id == lock.session_id => {
                self.replace(lock)?;
                Ok(true)
            }
            Ok(_) | Err(ChadgiError::CorruptLock(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn remove(&self, issue_number: u64) -> Result<bool> {
        let Some(_guard) = self.guard_existing(issue_number)? else {
            return Ok(false);
        };
        self.remove_unguarded(issue_number)
    }

    fn remove_if_unchanged(&self, issue_number: u64, expected: Option<&TaskLock>) -> Result<bool> {
        let Some(_guard) = self.guard_existing(issue_number)? else {
            return Ok(false);
        };

        let unchanged = match self.read(issue_number) {
            Ok(current) => expected.is_some() && current.as_ref() == expected,
            Err(ChadgiError::CorruptLock(_)) => expected.is_none(),
            Err(e) => return Err(e),
        };

        if unchanged {
            self.remove_unguarded(issue_number)
        } else {
            Ok(false)
        }
    }

    fn scan(&self) -> Result<Vec<TaskLock>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(ChadgiError::StorageError(format!(
                    "failed to read locks directory '{}': {}",
                    self.dir.display(),
                    e
                )));
            }
        };

        let mut locks = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| {
                ChadgiError::StorageError(format!("failed to read locks directory entry: {}", e))
            })?;

            // Skips staging files and anything else that is not a lock.
            let name = entry.file_name();
            let Some(issue_number) = name.to_str().and_then(parse_lock_file_name) else {
                continue;
            };

            match self.read(issue_number) {
                Ok(Some(lock)) => locks.push(lock),
                Ok(None) => {}
                Err(e) => debug!(issue = issue_number, error = %e, "skipping unreadable lock"),
            }
        }

        locks.sort_by_key(|lock| lock.issue_number);
        Ok(locks)
    }

    fn describe(&self) -> String {
        self.dir.display().to_string()
    }
}

/// Exclusive right to change one existing lock record.
///
/// The guard file is created with `create_new` and deleted on drop. It is
/// held only for a read-compare-write, so one older than
/// [`GUARD_ABANDONED_AFTER`] is broken.
#[derive(Debug)]
struct RecordGuard {
    path: PathBuf,
}

impl RecordGuard {
    fn acquire(path: PathBuf) -> Result<Self> {
        let deadline = Instant::now() + GUARD_WAIT;
        loop {
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(_) => return Ok(Self { path }),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {}
                Err(e) => {
                    return Err(ChadgiError::StorageError(format!(
                        "failed to create record guard '{}': {}",
                        path.display(),
                        e
                    )));
                }
            }

            if guard_is_abandoned(&path) {
                warn!(path = %path.display(), "breaking abandoned record guard");
                let _ = fs::remove_file(&path);
                continue;
            }

            if Instant::now() >= deadline {
                return Err(ChadgiError::StorageError(format!(
                    "timed out waiting for record guard '{}'",
                    path.display()
                )));
            }
            thread::sleep(GUARD_RETRY_INTERVAL);
        }
    }
}

impl Drop for RecordGuard {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path)
            && e.kind() != ErrorKind::NotFound
        {
            warn!(path = %self.path.display(), error = %e, "failed to remove record guard");
        }
    }
}

fn guard_is_abandoned(path: &Path) -> bool {
    fs::metadata(path)
        .and_then(|metadata| metadata.modified())
        .ok()
        .and_then(|modified| modified.elapsed().ok())
        .is_some_and(|age| age > GUARD_ABANDONED_AFTER)
}

/// Lock records held in process memory.
#[derive(Debug, Default)]
pub struct MemoryLockStore {
    locks: Mutex<BTreeMap<u64, TaskLock>>,
}

impl MemoryLockStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn locks(&self) -> MutexGuard<'_, BTreeMap<u64, TaskLock>> {
        self.locks.lock().unwrap_or_else(|poison| poison.into_inner())
    }
}

impl LockStore for MemoryLockStore {
    fn ensure_ready(&self) -> Result<()> {
        Ok(())
    }

    fn exists(&self, issue_number: u64) -> Result<bool> {
        Ok(self.locks().contains_key(&issue_number))
    }

    fn read(&self, issue_number: u64) -> Result<Option<TaskLock>> {
        Ok(self.locks().get(&issue_number).cloned())
    }

    fn create(&self, lock: &TaskLock) -> Result<CreateOutcome> {
        let mut locks = self.locks();
        if locks.contains_key(&lock.issue_number) {
            return Ok(CreateOutcome::AlreadyExists);
        }
        locks.insert(lock.issue_number, lock.clone());
        Ok(CreateOutcome::Created)
    }

    fn replace(&self, lock: &TaskLock) -> Result<()> {
        self.locks().insert(lock.issue_number, lock.clone());
        Ok(())
    }

    fn replace_if_owner(&self, lock: &TaskLock) -> Result<bool> {
        let mut locks = self.locks();
        match locks.get_mut(&lock.issue_number) {
            Some(current) if current.session_id == lock.session_id => {
                *current = lock.clone();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn remove(&self, issue_number: u64) -> Result<bool> {
        Ok(self.locks().remove(&issue_number).is_some())
    }

    fn remove_if_unchanged(&self, issue_number: u64, expected: Option<&TaskLock>) -> Result<bool> {
        let mut locks = self.locks();
        let unchanged = expected.is_some() && locks.get(&issue_number) == expected;
        if unchanged {
            locks.remove(&issue_number);
        }
        Ok(unchanged)
    }

    fn scan(&self) -> Result<Vec<TaskLock>> {
        Ok(self.locks().values().cloned().collect())
    }

    fn describe(&self) -> String {
        "in-memory lock store".to_string()
    }
}
