//! Lock records, derived status, and acquisition outcomes.

use crate::error::{ChadgiError, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Minutes without a heartbeat before a lock is treated as abandoned.
pub const DEFAULT_LOCK_TIMEOUT_MINUTES: u32 = 120;

/// A persisted claim on a single issue.
///
/// Keys are camelCase on disk so lock directories stay readable by every
/// ChadGI worker sharing them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskLock {
    /// The issue this lock claims; also the identity of the lock file.
    pub issue_number: u64,

    /// Session that acquired the lock. Never changes once written.
    pub session_id: String,

    /// Process ID of the holder, meaningful only on `hostname`.
    pub pid: u32,

    /// Machine the holder runs on.
    pub hostname: String,

    /// When the lock was first created.
    pub locked_at: DateTime<Utc>,

    /// Last time the holder proved it was still working.
    pub last_heartbeat: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo_name: Option<String>,
}

impl TaskLock {
    /// Parse a lock record from JSON.
    pub fn from_json(content: &str) -> Result<Self> {
        serde_json::from_str(content)
            .map_err(|e| ChadgiError::CorruptLock(format!("invalid lock JSON: {}", e)))
    }

    /// Serialize the lock record to pretty JSON with a trailing newline.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map(|json| json + "\n")
            .map_err(|e| ChadgiError::StorageError(format!("failed to serialize lock: {}", e)))
    }

    /// Time since the last heartbeat.
    pub fn heartbeat_age(&self, now: DateTime<Utc>) -> Duration {
        now.signed_duration_since(self.last_heartbeat)
    }

    /// Time since the lock was created.
    pub fn held_for(&self, now: DateTime<Utc>) -> Duration {
        now.signed_duration_since(self.locked_at)
    }

    /// Whether the heartbeat is older than `timeout_minutes`.
    ///
    /// Staleness is never stored; it is recomputed on every query.
    pub fn is_stale_at(&self, now: DateTime<Utc>, timeout_minutes: u32) -> bool {
        self.heartbeat_age(now) > Duration::minutes(i64::from(timeout_minutes))
    }

    /// One-line description of the holder for messages.
    pub fn holder_description(&self) -> String {
        let mut description = format!(
            "session {} (host {}, pid {}",
            self.session_id, self.hostname, self.pid
        );
        if let Some(worker) = &self.worker_id {
            description.push_str(&format!(", worker {}", worker));
        }
        description.push(')');
        description
    }
}

/// Format a duration as a compact human-readable age.
pub fn format_age(age: Duration) -> String {
    let age = age.max(Duration::zero());
    let minutes = age.num_minutes();
    let hours = age.num_hours();
    let days = age.num_days();

    if days > 0 {
        format!("{}d {}h", days, hours % 24)
    } else if hours > 0 {
        format!("{}h {}m", hours, minutes % 60)
    } else if minutes > 0 {
        format!("{}m", minutes)
    } else {
        format!("{}s", age.num_seconds())
    }
}

/// A lock record together with its ages and staleness at query time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LockStatus {
    #[serde(flatten)]
    pub lock: TaskLock,

    /// Seconds since `locked_at`.
    pub locked_seconds: i64,

    /// Seconds since `last_heartbeat`.
    pub heartbeat_age_seconds: i64,

    /// Whether the heartbeat exceeds the timeout used for this query.
    pub is_stale: bool,
}

impl LockStatus {
    /// Derive the status of `lock` as of `now`.
    pub fn at(lock: TaskLock, now: DateTime<Utc>, timeout_minutes: u32) -> Self {
        Self {
            locked_seconds: lock.held_for(now).num_seconds(),
            heartbeat_age_seconds: lock.heartbeat_age(now).num_seconds(),
            is_stale: lock.is_stale_at(now, timeout_minutes),
            lock,
        }
    }
}

impl fmt::Display for LockStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#{} (session: {}, held: {}, heartbeat: {} ago{})",
            self.lock.issue_number,
            self.lock.session_id,
            format_age(Duration::seconds(self.locked_seconds)),
            format_age(Duration::seconds(self.heartbeat_age_seconds)),
            if self.is_stale { ", STALE" } else { "" }
        )
    }
}

/// Options for [`TaskLockManager::acquire`](super::TaskLockManager::acquire).
#[derive(Debug, Clone)]
pub struct AcquireOptions {
    /// Replace a lock that looks abandoned instead of reporting it.
    pub force_claim: bool,

    /// Heartbeat age, in minutes, beyond which a lock is abandoned.
    pub timeout_minutes: u32,

    pub worker_id: Option<String>,

    pub repo_name: Option<String>,

    /// Process to record as the holder. Defaults to the manager's own pid.
    ///
    /// Short-lived callers (the CLI invoked from a worker loop) record the
    /// long-lived worker process instead of themselves.
    pub holder_pid: Option<u32>,
}

impl Default for AcquireOptions {
    fn default() -> Self {
        Self {
            force_claim: false,
            timeout_minutes: DEFAULT_LOCK_TIMEOUT_MINUTES,
            worker_id: None,
            repo_name: None,
            holder_pid: None,
        }
    }
}

/// Why a foreign lock is considered abandoned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Abandonment {
    /// No heartbeat within the timeout.
    HeartbeatExpired { age_minutes: i64 },
    /// The holder ran on this machine and its process no longer exists.
    ProcessGone { pid: u32 },
}

impl fmt::Display for Abandonment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Abandonment::HeartbeatExpired { age_minutes } => {
                write!(f, "last heartbeat {} minutes ago", age_minutes)
            }
            Abandonment::ProcessGone { pid } => {
                write!(f, "holder process {} is no longer running", pid)
            }
        }
    }
}

/// Machine-readable reason an acquisition did not succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    AlreadyLocked,
    StaleLock,
    Error,
}

impl FailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureReason::AlreadyLocked => "already_locked",
            FailureReason::StaleLock => "stale_lock",
            FailureReason::Error => "error",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of an acquisition attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// The caller now holds `lock`.
    ///
    /// `previous` is the abandoned lock that was force-claimed, if any.
    Acquired {
        lock: TaskLock,
        previous: Option<TaskLock>,
    },
    /// Another live session holds the lock.
    AlreadyLocked { holder: TaskLock },
    /// The holder looks abandoned; retry with `force_claim` to take over.
    StaleLock {
        holder: TaskLock,
        abandonment: Abandonment,
    },
    /// Storage failed or the existing record is unreadable.
    Error { message: String },
}

impl AcquireOutcome {
    pub fn acquired(&self) -> bool {
        matches!(self, AcquireOutcome::Acquired { .. })
    }

    pub fn reason(&self) -> Option<FailureReason> {
        match self {
            AcquireOutcome::Acquired { .. } => None,
            AcquireOutcome::AlreadyLocked { .. } => Some(FailureReason::AlreadyLocked),
            AcquireOutcome::StaleLock { .. } => Some(FailureReason::StaleLock),
            AcquireOutcome::Error { .. } => Some(FailureReason::Error),
        }
    }

    /// The lock record involved: the new lock when acquired, else the holder's.
    pub fn lock(&self) -> Option<&TaskLock> {
        match self {
            AcquireOutcome::Acquired { lock, .. } => Some(lock),
            AcquireOutcome::AlreadyLocked { holder } => Some(holder),
            AcquireOutcome::StaleLock { holder, .. } => Some(holder),
            AcquireOutcome::Error { .. } => None,
        }
    }

    /// Human-readable explanation of a failed acquisition.
    pub fn message(&self) -> Option<String> {
        match self {
            AcquireOutcome::Acquired { .. } => None,
            AcquireOutcome::AlreadyLocked { holder } => Some(format!(
                "issue #{} is already locked by {}",
                holder.issue_number,
                holder.holder_description()
            )),
            AcquireOutcome::StaleLock {
                holder,
                abandonment,
            } => Some(format!(
                "issue #{} has an abandoned lock from {} ({}); use force claim to take it over",
                holder.issue_number,
                holder.holder_description(),
                abandonment
            )),
            AcquireOutcome::Error { message } => Some(message.clone()),
        }
    }

    /// Flatten into the `{acquired, lock, reason, error}` report shape.
    pub fn to_report(&self) -> AcquireReport {
        AcquireReport {
            acquired: self.acquired(),
            lock: self.lock().cloned(),
            reason: self.reason(),
            error: self.message(),
        }
    }
}

/// Serializable summary of an [`AcquireOutcome`].
#[derive(Debug, Clone, Serialize)]
pub struct AcquireReport {
    pub acquired: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub lock: Option<TaskLock>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<FailureReason>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
