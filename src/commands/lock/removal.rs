//! `lock clear`, `lock cleanup` and `lock release-session`.
//!
//! These delete locks without asking their owners, so each one is recorded
//! in the events log.

use super::{LockEnv, print_json};
use crate::cli::{LockCleanupArgs, LockClearArgs, LockReleaseSessionArgs};
use crate::error::{ChadgiError, Result};
use crate::events::{Event, EventAction};
use serde_json::json;

/// Delete one issue's lock regardless of owner. Requires `--force`.
pub(super) fn cmd_clear(env: &LockEnv, args: LockClearArgs) -> Result<()> {
    if !args.force {
        return Err(ChadgiError::UserError(format!(
            "refusing to clear lock without --force flag.\n\n\
             Clearing a lock lets another worker start on an issue that may\n\
             still be in progress. Only clear locks whose holder has crashed.\n\n\
             To clear the lock, run:\n  chadgi lock clear {} --force",
            args.issue
        )));
    }

    let timeout = env.config.lock_timeout_minutes;
    let existing = env.manager.status(args.issue, timeout);

    if !env.manager.force_release(args.issue) {
        return Err(ChadgiError::StorageError(format!(
            "failed to clear lock for issue #{} in '{}'",
            args.issue,
            env.manager.store_location()
        )));
    }

    if let Some(status) = &existing {
        env.record(
            Event::new(EventAction::ForceRelease)
                .with_issue(args.issue)
                .with_details(json!({
                    "session_id": status.lock.session_id,
                    "hostname": status.lock.hostname,
                    "heartbeat_age_seconds": status.heartbeat_age_seconds,
                    "was_stale": status.is_stale,
                })),
        );
    }

    if env.json {
        return print_json(&json!({
            "issue": args.issue,
            "cleared": existing.is_some(),
            "lock": existing,
        }));
    }

    match existing {
        Some(status) => {
            println!("Cleared lock for issue #{}", args.issue);
            println!("  Session:    {}", status.lock.session_id);
            println!("  Host:       {}", status.lock.hostname);
            if status.is_stale {
                println!("  Status:     was STALE");
            }
        }
        None => println!("Issue #{} was not locked", args.issue),
    }
    Ok(())
}

/// Remove every stale lock, or list them with `--dry-run`.
pub(super) fn cmd_cleanup(env: &LockEnv, args: LockCleanupArgs) -> Result<()> {
    let timeout = env.timeout(args.timeout);
    let stale = env.manager.find_stale(timeout);

    let removed_issues = if args.dry_run {
        Vec::new()
    } else {
        let removed_issues = env.manager.cleanup_stale_issues(timeout);
        if !removed_issues.is_empty() {
            env.record(Event::new(EventAction::Cleanup).with_details(json!({
                "removed": removed_issues.len(),
                "timeout_minutes": timeout,
                "issues": removed_issues,
            })));
        }
        removed_issues
    };
    let removed = removed_issues.len();

    if env.json {
        return print_json(&json!({
            "dryRun": args.dry_run,
            "timeoutMinutes": timeout,
            "stale": stale,
            "removed": removed,
            "removedIssues": removed_issues,
        }));
    }

    if stale.is_empty() {
        println!("No stale locks.");
        return Ok(());
    }

    let verb = if args.dry_run { "Would remove" } else { "Stale" };
    for status in &stale {
        println!("  {}: {}", verb, status);
    }
    if !args.dry_run {
        println!();
        println!("Removed {} stale lock(s).", removed);
    }
    Ok(())
}

/// Remove every lock held by a session.
pub(super) fn cmd_release_session(env: &LockEnv, args: LockReleaseSessionArgs) -> Result<()> {
    let released = env.manager.release_all_for_session(&args.session);

    if released > 0 {
        env.record(
            Event::new(EventAction::ReleaseSession).with_details(json!({
                "session_id": args.session,
                "released": released,
            })),
        );
    }

    if env.json {
        print_json(&json!({
            "sessionId": args.session,
            "released": released,
        }))
    } else {
        println!("Released {} lock(s) held by {}", released, args.session);
        Ok(())
    }
}
