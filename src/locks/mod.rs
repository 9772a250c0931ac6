//! Task locks for chadgi.
//!
//! Workers claim GitHub issues by writing one lock file per issue into a
//! shared lock directory, so that two workers never implement the same issue
//! at once, even on different machines.
//!
//! # Lock Files
//!
//! Lock files are named `issue-<N>.lock` and contain JSON:
//! - `issueNumber`: The claimed issue
//! - `sessionId`: The worker session holding the lock
//! - `pid` / `hostname`: Where the holder runs
//! - `lockedAt` / `lastHeartbeat`: RFC3339 timestamps
//! - `workerId` / `repoName`: Optional context
//!
//! New locks are published with exclusive-create semantics; refreshes go
//! through an atomic rename. Readers never observe a partial record.
//! Changes to an existing record apply only if it is still the record the
//! caller read, so a session cannot clobber a lock that changed hands.
//!
//! # Liveness
//!
//! Holders heartbeat periodically ([`HeartbeatTask`]). A lock is stale once
//! its heartbeat is older than the timeout; a lock taken on this machine is
//! also abandoned once its holder process exits. Abandoned locks are only
//! replaced on an explicit force claim.
//!
//! # Guards
//!
//! [`IssueLock`] holds a lock for a scope: it heartbeats in the background
//! and releases on drop.

mod clock;
mod guard;
mod heartbeat;
mod manager;
mod probe;
mod session;
mod store;
mod types;


pub use clock::{Clock, ManualClock, SystemClock};
pub use guard::IssueLock;
pub use heartbeat::HeartbeatTask;
pub use manager::TaskLockManager;
pub use probe::{ProcessProbe, SystemProbe};
pub use session::{generate_session_id, local_hostname, owner_string};
pub use store::{FsLockStore, LockStore, MemoryLockStore, lock_file_name, parse_lock_file_name};
pub use types::{
    Abandonment, AcquireOptions, AcquireOutcome, AcquireReport, DEFAULT_LOCK_TIMEOUT_MINUTES,
    FailureReason, LockStatus, TaskLock, format_age,
};
