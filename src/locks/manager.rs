//! Task lock manager.
//!
//! Advisory, per-issue mutual exclusion between workers that share nothing
//! but a lock directory. Holders prove liveness by heartbeating; locks whose
//! heartbeat expires, or whose local holder process has exited, may be
//! force-claimed by another session.
//!
//! Every operation resolves failures into its return value. Storage errors
//! are logged and never propagate to the caller.

use super::clock::{Clock, SystemClock};
use super::probe::{ProcessProbe, SystemProbe};
use super::session::{generate_session_id, local_hostname};
use super::store::{FsLockStore, LockStore};
use super::types::{Abandonment, AcquireOptions, AcquireOutcome, LockStatus, TaskLock};
use crate::error::{ChadgiError, Result};
use crate::fs::CreateOutcome;
use std::fmt;
use std::path::PathBuf;
use tracing::{debug, info, warn};

const UPDATE_ATTEMPTS: usize = 3;

/// Coordinates lock records for one lock directory.
pub struct TaskLockManager {
    store: Box<dyn LockStore>,
    probe: Box<dyn ProcessProbe>,
    clock: Box<dyn Clock>,
    hostname: String,
    pid: u32,
}

impl fmt::Debug for TaskLockManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskLockManager")
            .field("store", &self.store.describe())
            .field("hostname", &self.hostname)
            .field("pid", &self.pid)
            .finish_non_exhaustive()
    }
}

impl TaskLockManager {
    /// Create a manager over `store` using the system clock, the OS process
    /// table, and this machine's identity.
    pub fn new(store: impl LockStore + 'static) -> Self {
        Self {
            store: Box::new(store),
            probe: Box::new(SystemProbe),
            clock: Box::new(SystemClock),
            hostname: local_hostname(),
            pid: std::process::id(),
        }
    }

    /// Create a manager over a lock directory on the filesystem.
    pub fn open(locks_dir: impl Into<PathBuf>) -> Self {
        Self::new(FsLockStore::new(locks_dir))
    }

    pub fn with_probe(mut self, probe: impl ProcessProbe + 'static) -> Self {
        self.probe = Box::new(probe);
        self
    }

    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    /// Override the machine identity recorded in, and compared against, locks.
    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = hostname.into();
        self
    }

    /// Override the process ID recorded in new locks.
    pub fn with_pid(mut self, pid: u32) -> Self {
        self.pid = pid;
        self
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn store_location(&self) -> String {
        self.store.describe()
    }

    /// A fresh session ID for this host and process.
    pub fn generate_session_id(&self) -> String {
        generate_session_id(&self.hostname, self.pid, self.clock.now())
    }

    /// Try to claim `issue_number` for `session_id`.
    ///
    /// Re-acquiring a lock the session already holds refreshes its heartbeat.
    /// A lock held by another session is reported as `AlreadyLocked` while
    /// its holder looks alive, and as `StaleLock` once it looks abandoned,
    /// unless `force_claim` is set, in which case it is replaced.
    pub fn acquire(
        &self,
        issue_number: u64,
        session_id: &str,
        options: &AcquireOptions,
    ) -> AcquireOutcome {
        match self.try_acquire(issue_number, session_id, options) {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(
                    issue = issue_number,
                    session = session_id,
                    error = %e,
                    "lock acquisition failed"
                );
                AcquireOutcome::Error {
                    message: e.to_string(),
                }
            }
        }
    }

    fn try_acquire(
        &self,
        issue_number: u64,
        session_id: &str,
        options: &AcquireOptions,
    ) -> Result<AcquireOutcome> {
        self.store.ensure_ready()?;

        // A record that changes underneath us is re-evaluated against its new
        // state, a bounded number of times.
        for _ in 0..UPDATE_ATTEMPTS {
            let existing = match self.store.read(issue_number) {
                Ok(existing) => existing,
                Err(ChadgiError::CorruptLock(msg)) if options.force_claim => {
                    warn!(issue = issue_number, error = %msg, "replacing corrupt lock record");
                    if !self.store.remove_if_unchanged(issue_number, None)? {
                        debug!(issue = issue_number, "corrupt lock changed before removal");
                        continue;
                    }
                    None
                }
                Err(e) => return Err(e),
            };

            let Some(existing) = existing else {
                let lock = self.new_lock(issue_number, session_id, options);
                match self.store.create(&lock)? {
                    CreateOutcome::Created => {
                        info!(issue = issue_number, session = session_id, "lock acquired");
                        return Ok(AcquireOutcome::Acquired {
                            lock,
                            previous: None,
                        });
                    }
                    CreateOutcome::AlreadyExists => {
                        debug!(issue = issue_number, "lost lock creation race, re-reading");
                        continue;
                    }
                }
            };

            if existing.session_id == session_id {
                let mut refreshed = existing;
                refreshed.last_heartbeat = self.clock.now();
                if !self.store.replace_if_owner(&refreshed)? {
                    debug!(issue = issue_number, "lock changed hands during re-acquire");
                    continue;
                }
                debug!(issue = issue_number, session = session_id, "lock re-acquired by owner");
                return Ok(AcquireOutcome::Acquired {
                    lock: refreshed,
                    previous: None,
                });
            }

            let Some(abandonment) = self.abandonment(&existing, options.timeout_minutes) else {
                return Ok(AcquireOutcome::AlreadyLocked { holder: existing });
            };

            if !options.force_claim {
                return Ok(AcquireOutcome::StaleLock {
                    holder: existing,
                    abandonment,
                });
            }

            if !self.store.remove_if_unchanged(issue_number, Some(&existing))? {
                debug!(issue = issue_number, "abandoned lock changed before it was claimed");
                continue;
            }
            let lock = self.new_lock(issue_number, session_id, options);
            match self.store.create(&lock)? {
                CreateOutcome::Created => {
                    info!(
                        issue = issue_number,
                        session = session_id,
                        previous = %existing.session_id,
                        reason = %abandonment,
                        "abandoned lock force-claimed"
                    );
                    return Ok(AcquireOutcome::Acquired {
                        lock,
                        previous: Some(existing),
                    });
                }
                CreateOutcome::AlreadyExists => {
                    debug!(issue = issue_number, "another session reclaimed first, re-reading");
                    continue;
                }
            }
        }

        match self.store.read(issue_number)? {
            Some(holder) => Ok(AcquireOutcome::AlreadyLocked { holder }),
            None => Err(ChadgiError::LockError(format!(
                "lock for issue #{} changed repeatedly during acquisition",
                issue_number
            ))),
        }
    }

    fn new_lock(&self, issue_number: u64, session_id: &str, options: &AcquireOptions) -> TaskLock {
        let now = self.clock.now();
        TaskLock {
            issue_number,
            session_id: session_id.to_string(),
            pid: options.holder_pid.unwrap_or(self.pid),
            hostname: self.hostname.clone(),
            locked_at: now,
            last_heartbeat: now,
            worker_id: options.worker_id.clone(),
            repo_name: options.repo_name.clone(),
        }
    }

    /// Why `lock` should be considered abandoned, if it should.
    ///
    /// The process check only applies to locks taken on this machine; a pid
    /// from another host means nothing here.
    pub fn abandonment(&self, lock: &TaskLock, timeout_minutes: u32) -> Option<Abandonment> {
        let now = self.clock.now();
        if lock.is_stale_at(now, timeout_minutes) {
            return Some(Abandonment::HeartbeatExpired {
                age_minutes: lock.heartbeat_age(now).num_minutes(),
            });
        }

        if lock.hostname == self.hostname && !self.probe.is_alive(lock.pid) {
            return Some(Abandonment::ProcessGone { pid: lock.pid });
        }

        None
    }

    /// Whether the lock's heartbeat is older than `timeout_minutes`.
    pub fn is_lock_stale(&self, lock: &TaskLock, timeout_minutes: u32) -> bool {
        lock.is_stale_at(self.clock.now(), timeout_minutes)
    }

    /// Release a lock.
    ///
    /// With a `session_id`, only the owning session may release, and a
    /// record that changes hands mid-release is left alone. A missing lock
    /// counts as released.
    pub fn release(&self, issue_number: u64, session_id: Option<&str>) -> bool {
        let Some(session_id) = session_id else {
            return self.force_release(issue_number);
        };

        for _ in 0..UPDATE_ATTEMPTS {
            let existing = match self.store.read(issue_number) {
                Ok(Some(existing)) => existing,
                Ok(None) => return true,
                Err(e) => {
                    warn!(issue = issue_number, error = %e, "cannot read lock for release");
                    return false;
                }
            };

            if existing.session_id != session_id {
                debug!(
                    issue = issue_number,
                    session = session_id,
                    owner = %existing.session_id,
                    "release refused: not the owner"
                );
                return false;
            }

            match self.store.remove_if_unchanged(issue_number, Some(&existing)) {
                Ok(true) => {
                    info!(issue = issue_number, session = session_id, "lock released");
                    return true;
                }
                Ok(false) => {
                    debug!(issue = issue_number, "lock changed during release, re-reading");
                }
                Err(e) => {
                    warn!(issue = issue_number, error = %e, "failed to release lock");
                    return false;
                }
            }
        }

        warn!(issue = issue_number, session = session_id, "lock kept changing during release");
        false
    }

    /// Delete a lock regardless of its owner.
    pub fn force_release(&self, issue_number: u64) -> bool {
        match self.store.remove(issue_number) {
            Ok(removed) => {
                if removed {
                    info!(issue = issue_number, "lock force-released");
                }
                true
            }
            Err(e) => {
                warn!(issue = issue_number, error = %e, "failed to force-release lock");
                false
            }
        }
    }

    /// Refresh the heartbeat of a lock owned by `session_id`.
    ///
    /// Returns false without touching the record when the session is not
    /// the owner or the lock no longer exists.
    pub fn heartbeat(&self, issue_number: u64, session_id: &str) -> bool {
        let mut lock = match self.store.read(issue_number) {
            Ok(Some(lock)) => lock,
            Ok(None) => {
                debug!(issue = issue_number, session = session_id, "heartbeat for missing lock");
                return false;
            }
            Err(e) => {
                warn!(issue = issue_number, error = %e, "cannot read lock for heartbeat");
                return false;
            }
        };

        if lock.session_id != session_id {
            debug!(
                issue = issue_number,
                session = session_id,
                owner = %lock.session_id,
                "heartbeat refused: not the owner"
            );
            return false;
        }

        lock.last_heartbeat = self.clock.now();
        match self.store.replace_if_owner(&lock) {
            Ok(true) => true,
            Ok(false) => {
                debug!(
                    issue = issue_number,
                    session = session_id,
                    "heartbeat refused: lock changed hands"
                );
                false
            }
            Err(e) => {
                warn!(issue = issue_number, error = %e, "failed to write heartbeat");
                false
            }
        }
    }

    /// Status of a single lock, if one can be read.
    pub fn status(&self, issue_number: u64, timeout_minutes: u32) -> Option<LockStatus> {
        match self.store.read(issue_number) {
            Ok(lock) => lock.map(|lock| LockStatus::at(lock, self.clock.now(), timeout_minutes)),
            Err(e) => {
                warn!(issue = issue_number, error = %e, "cannot read lock status");
                None
            }
        }
    }

    /// All readable locks with their derived status, ordered by issue.
    pub fn list(&self, timeout_minutes: u32) -> Vec<LockStatus> {
        let locks = match self.store.scan() {
            Ok(locks) => locks,
            Err(e) => {
                warn!(store = %self.store.describe(), error = %e, "cannot list locks");
                return Vec::new();
            }
        };

        let now = self.clock.now();
        locks
            .into_iter()
            .map(|lock| LockStatus::at(lock, now, timeout_minutes))
            .collect()
    }

    /// Locks whose heartbeat exceeds the timeout.
    pub fn find_stale(&self, timeout_minutes: u32) -> Vec<LockStatus> {
        self.list(timeout_minutes)
            .into_iter()
            .filter(|status| status.is_stale)
            .collect()
    }

    /// Force-release every stale lock, returning how many were removed.
    pub fn cleanup_stale(&self, timeout_minutes: u32) -> usize {
        self.cleanup_stale_issues(timeout_minutes).len()
    }

    /// Force-release every stale lock, returning the issues this call removed.
    ///
    /// A lock heartbeated or reclaimed after the scan is left in place.
    pub fn cleanup_stale_issues(&self, timeout_minutes: u32) -> Vec<u64> {
        self.find_stale(timeout_minutes)
            .iter()
            .filter(|status| self.remove_counted(&status.lock))
            .map(|status| status.lock.issue_number)
            .collect()
    }

    /// Whether any lock record exists for the issue, stale or not.
    pub fn is_locked(&self, issue_number: u64) -> bool {
        match self.store.exists(issue_number) {
            Ok(exists) => exists,
            Err(e) => {
                warn!(issue = issue_number, error = %e, "cannot check lock");
                false
            }
        }
    }

    /// Whether another live session holds the issue.
    ///
    /// Stale locks and locks whose local holder process has exited do not
    /// block.
    pub fn is_locked_by_other(
        &self,
        issue_number: u64,
        current_session_id: &str,
        timeout_minutes: u32,
    ) -> bool {
        match self.store.read(issue_number) {
            Ok(Some(lock)) => {
                lock.session_id != current_session_id
                    && self.abandonment(&lock, timeout_minutes).is_none()
            }
            Ok(None) => false,
            Err(e) => {
                warn!(issue = issue_number, error = %e, "cannot check lock owner");
                false
            }
        }
    }

    /// Force-release every lock owned by `session_id`.
    pub fn release_all_for_session(&self, session_id: &str) -> usize {
        let locks = match self.store.scan() {
            Ok(locks) => locks,
            Err(e) => {
                warn!(session = session_id, error = %e, "cannot list locks for session cleanup");
                return 0;
            }
        };

        locks
            .iter()
            .filter(|lock| lock.session_id == session_id)
            .filter(|lock| self.remove_counted(lock))
            .count()
    }

    /// Remove a scanned lock for a bulk operation; true only if this call
    /// deleted it unchanged.
    fn remove_counted(&self, lock: &TaskLock) -> bool {
        let issue_number = lock.issue_number;
        match self.store.remove_if_unchanged(issue_number, Some(lock)) {
            Ok(removed) => {
                if removed {
                    info!(issue = issue_number, session = %lock.session_id, "lock removed");
                } else {
                    debug!(issue = issue_number, "lock changed since scan, skipped");
                }
                removed
            }
            Err(e) => {
                warn!(issue = issue_number, error = %e, "failed to remove lock");
                false
            }
        }
    }
}
