//! Audit log of lock mutations.
//!
//! Operator-visible lock changes made through the CLI are appended to
//! `.chadgi/events/events.ndjson`, one JSON object per line, so that a
//! force-release or cleanup can be traced back to who ran it and when.
//!
//! # Event Format
//!
//! - `ts`: RFC3339 timestamp
//! - `action`: The lock action (acquire, release, force_release, ...)
//! - `actor`: The owner string (e.g., `user@HOST`)
//! - `issue`: Optional issue number for single-issue events
//! - `details`: Freeform object with action-specific details
//!
//! The lock files remain the source of truth. A failed append is reported by
//! [`record_event`] as a warning and never fails the command that caused it.

use crate::config::Config;
use crate::context::ProjectContext;
use crate::error::{ChadgiError, Result};
use crate::locks::owner_string;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs::{self, OpenOptions};
use std::io::Write;
use tracing::warn;

/// Lock actions that are recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventAction {
    /// Lock acquired, including force claims of abandoned locks
    Acquire,
    /// Lock released by its owner
    Release,
    /// Lock deleted regardless of owner
    ForceRelease,
    /// Stale locks removed in bulk
    Cleanup,
    /// All locks of one session removed
    ReleaseSession,
    /// Command run while holding a lock
    Run,
}

impl EventAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventAction::Acquire => "acquire",
            EventAction::Release => "release",
            EventAction::ForceRelease => "force_release",
            EventAction::Cleanup => "cleanup",
            EventAction::ReleaseSession => "release_session",
            EventAction::Run => "run",
        }
    }
}

impl std::fmt::Display for EventAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An event record for the audit log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub ts: DateTime<Utc>,

    pub action: EventAction,

    /// Who performed the action (e.g., `user@HOST`).
    pub actor: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub issue: Option<u64>,

    pub details: Value,
}

impl Event {
    /// Create an event stamped with the current time and local actor.
    pub fn new(action: EventAction) -> Self {
        Self {
            ts: Utc::now(),
            action,
            actor: owner_string(),
            issue: None,
            details: Value::Object(serde_json::Map::new()),
        }
    }

    pub fn with_issue(mut self, issue_number: u64) -> Self {
        self.issue = Some(issue_number);
        self
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }

    /// Serialize the event to a single-line JSON string.
    pub fn to_ndjson_line(&self) -> Result<String> {
        serde_json::to_string(self)
            .map_err(|e| ChadgiError::StorageError(format!("failed to serialize event: {}", e)))
    }
}

/// Append an event to the project's events log, creating it if needed.
pub fn append_event(ctx: &ProjectContext, event: &Event) -> Result<()> {
    let events_file = ctx.events_file();
    let json_line = event.to_ndjson_line()?;

    let events_dir = ctx.events_dir();
    fs::create_dir_all(&events_dir).map_err(|e| {
        ChadgiError::StorageError(format!(
            "failed to create events directory '{}': {}",
            events_dir.display(),
            e
        ))
    })?;

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&events_file)
        .map_err(|e| {
            ChadgiError::StorageError(format!(
                "failed to open events file '{}': {}",
                events_file.display(),
                e
            ))
        })?;

    writeln!(file, "{}", json_line).map_err(|e| {
        ChadgiError::StorageError(format!(
            "failed to write event to '{}': {}",
            events_file.display(),
            e
        ))
    })?;

    file.sync_all().map_err(|e| {
        ChadgiError::StorageError(format!(
            "failed to sync events file '{}': {}",
            events_file.display(),
            e
        ))
    })
}

/// Append an event if auditing is enabled, logging instead of failing.
pub fn record_event(ctx: &ProjectContext, config: &Config, event: Event) {
    if !config.audit_events {
        return;
    }
    if let Err(e) = append_event(ctx, &event) {
        warn!(action = %event.action, error = %e, "failed to record audit event");
    }
}

/// Read every event in the log, oldest first.
pub fn read_events(ctx: &ProjectContext) -> Result<Vec<Event>> {
    let events_file = ctx.events_file();
    let content = match fs::read_to_string(&events_file) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => {
            return Err(ChadgiError::StorageError(format!(
                "failed to read events file '{}': {}",
                events_file.display(),
                e
            )));
        }
    };

    content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            serde_json::from_str(line).map_err(|e| {
                ChadgiError::StorageError(format!(
                    "invalid event in '{}': {}",
                    events_file.display(),
                    e
                ))
            })
        })
        .collect()
}
