//! Configuration constants and defaults for chadgi.

/// Name of the config file inside the `.chadgi/` directory.
pub const CONFIG_FILE_NAME: &str = "chadgi-config.yaml";

// Default value functions for serde
pub(crate) fn default_lock_timeout_minutes() -> u32 {
    120
}
pub(crate) fn default_heartbeat_interval_secs() -> u64 {
    30
}
pub(crate) fn default_locks_dir() -> String {
    "locks".to_string()
}
pub(crate) fn default_true() -> bool {
    true
}
