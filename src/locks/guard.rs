//! RAII guard for a held issue lock.

use super::heartbeat::HeartbeatTask;
use super::manager::TaskLockManager;
use super::types::{AcquireOptions, AcquireOutcome, TaskLock};
use crate::error::{ChadgiError, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// A lock held for the lifetime of this guard.
///
/// The guard heartbeats in the background and releases the lock when
/// dropped. If release fails during drop, a warning is logged but no panic
/// occurs.
#[derive(Debug)]
pub struct IssueLock {
    manager: Arc<TaskLockManager>,
    lock: TaskLock,
    heartbeat: Option<HeartbeatTask>,
    released: bool,
}

impl IssueLock {
    /// Acquire `issue_number` and start heartbeating every `heartbeat_interval`.
    ///
    /// # Returns
    ///
    /// * `Ok((IssueLock, AcquireOutcome))` - Lock held; the outcome reports any
    ///   abandoned lock that was replaced
    /// * `Err(AcquireOutcome)` - The unsuccessful outcome
    pub fn acquire(
        manager: &Arc<TaskLockManager>,
        issue_number: u64,
        session_id: &str,
        options: &AcquireOptions,
        heartbeat_interval: Duration,
    ) -> std::result::Result<(Self, AcquireOutcome), AcquireOutcome> {
        let outcome = manager.acquire(issue_number, session_id, options);
        let AcquireOutcome::Acquired { lock, .. } = &outcome else {
            return Err(outcome);
        };

        let heartbeat = HeartbeatTask::spawn(
            Arc::clone(manager),
            issue_number,
            session_id,
            heartbeat_interval,
        );

        let guard = Self {
            manager: Arc::clone(manager),
            lock: lock.clone(),
            heartbeat: Some(heartbeat),
            released: false,
        };
        Ok((guard, outcome))
    }

    /// The lock record as it was when acquired.
    pub fn lock(&self) -> &TaskLock {
        &self.lock
    }

    /// Whether the background heartbeat discovered the lock was taken away.
    pub fn is_lost(&self) -> bool {
        self.heartbeat.as_ref().is_some_and(HeartbeatTask::is_lost)
    }

    /// Stop heartbeating and release the lock, reporting failure.
    pub fn release(mut self) -> Result<()> {
        self.released = true;
        self.stop_heartbeat();

        if self
            .manager
            .release(self.lock.issue_number, Some(self.lock.session_id.as_str()))
        {
            Ok(())
        } else {
            Err(ChadgiError::LockError(format!(
                "failed to release lock for issue #{}: no longer owned by session {}",
                self.lock.issue_number, self.lock.session_id
            )))
        }
    }

    fn stop_heartbeat(&mut self) {
        if let Some(heartbeat) = self.heartbeat.take() {
            heartbeat.stop();
        }
    }
}

impl Drop for IssueLock {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        self.stop_heartbeat();
        if !self
            .manager
            .release(self.lock.issue_number, Some(self.lock.session_id.as_str()))
        {
            warn!(
                issue = self.lock.issue_number,
                session = %self.lock.session_id,
                "failed to release lock on drop"
            );
        }
    }
}
