//! Config struct definition and default implementation.

use super::types::*;
use serde::{Deserialize, Serialize};

/// Lock settings for a ChadGI project.
///
/// Unknown fields in the YAML are ignored for forward compatibility.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Minutes without a heartbeat after which a lock is considered stale.
    #[serde(default = "default_lock_timeout_minutes")]
    pub lock_timeout_minutes: u32,

    /// Seconds between heartbeats while a worker holds a lock.
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,

    /// Lock directory, relative to `.chadgi/` unless absolute.
    #[serde(default = "default_locks_dir")]
    pub locks_dir: String,

    /// Worker identifier recorded in acquired locks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_id: Option<String>,

    /// Repository name recorded in acquired locks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo_name: Option<String>,

    /// Whether lock mutations from the CLI are appended to the events log.
    #[serde(default = "default_true")]
    pub audit_events: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            lock_timeout_minutes: default_lock_timeout_minutes(),
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
            locks_dir: default_locks_dir(),
            worker_id: None,
            repo_name: None,
            audit_events: default_true(),
        }
    }
}
