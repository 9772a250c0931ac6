//! Session and machine identity.

use chrono::{DateTime, Utc};
use rand::Rng;
use rand::distributions::Alphanumeric;

/// Hostname of the local machine, or `unknown` if it cannot be read.
pub fn local_hostname() -> String {
    hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "unknown".to_string())
}

/// `user@HOST` string used as the actor in audit events.
pub fn owner_string() -> String {
    let user = std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown".to_string());

    format!("{}@{}", user, local_hostname())
}

/// Build a session ID of the form `{host}-{pid}-{millis}-{suffix}`.
///
/// The random six-character suffix separates sessions started by the same
/// process within the same millisecond.
pub fn generate_session_id(hostname: &str, pid: u32, now: DateTime<Utc>) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(6)
        .map(|b| char::from(b).to_ascii_lowercase())
        .collect();

    format!("{}-{}-{}-{}", hostname, pid, now.timestamp_millis(), suffix)
}
