//! `lock session-id`, `lock acquire`, `lock release` and `lock heartbeat`.

use super::{LockEnv, caller_pid, outcome_error, print_json};
use crate::cli::{LockAcquireArgs, LockHeartbeatArgs, LockReleaseArgs};
use crate::error::{ChadgiError, Result};
use crate::events::{Event, EventAction};
use crate::locks::{
    AcquireOptions, AcquireOutcome, AcquireReport, generate_session_id, local_hostname,
};
use chrono::Utc;
use serde::Serialize;
use serde_json::json;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AcquireResponse {
    session_id: String,
    #[serde(flatten)]
    report: AcquireReport,
}

/// Print a fresh session ID for the calling worker.
pub(super) fn cmd_session_id(json: bool) -> Result<()> {
    let session_id = generate_session_id(&local_hostname(), caller_pid(), Utc::now());
    if json {
        print_json(&json!({ "sessionId": session_id }))
    } else {
        println!("{}", session_id);
        Ok(())
    }
}

/// Acquire an issue lock and print the session that holds it.
pub(super) fn cmd_acquire(env: &LockEnv, args: LockAcquireArgs) -> Result<()> {
    let session_id = args
        .session
        .unwrap_or_else(|| env.manager.generate_session_id());

    let options = AcquireOptions {
        force_claim: args.force_claim,
        timeout_minutes: env.timeout(args.timeout),
        worker_id: args.worker_id.or_else(|| env.config.worker_id.clone()),
        repo_name: args.repo.or_else(|| env.config.repo_name.clone()),
        holder_pid: args.pid,
    };

    let outcome = env.manager.acquire(args.issue, &session_id, &options);

    if env.json {
        print_json(&AcquireResponse {
            session_id: session_id.clone(),
            report: outcome.to_report(),
        })?;
    }

    let AcquireOutcome::Acquired { lock, previous } = &outcome else {
        return Err(outcome_error(&outcome));
    };

    env.record(
        Event::new(EventAction::Acquire)
            .with_issue(args.issue)
            .with_details(json!({
                "session_id": session_id,
                "pid": lock.pid,
                "force_claim": args.force_claim,
                "previous_session": previous.as_ref().map(|p| p.session_id.clone()),
            })),
    );

    if !env.json {
        if let Some(previous) = previous {
            eprintln!(
                "Force-claimed issue #{} from abandoned {}",
                args.issue,
                previous.holder_description()
            );
        }
        println!("{}", session_id);
    }

    Ok(())
}

/// Release an issue lock, optionally checking ownership.
pub(super) fn cmd_release(env: &LockEnv, args: LockReleaseArgs) -> Result<()> {
    let timeout = env.config.lock_timeout_minutes;
    let existing = env.manager.status(args.issue, timeout);

    if !env.manager.release(args.issue, args.session.as_deref()) {
        // The holder may have changed since `existing` was read.
        let current = env.manager.status(args.issue, timeout);
        let message = match (&current, &args.session) {
            (Some(status), Some(session)) if status.lock.session_id != *session => format!(
                "issue #{} is held by {}, not session {}",
                args.issue,
                status.lock.holder_description(),
                session
            ),
            _ => {
                return Err(ChadgiError::StorageError(format!(
                    "failed to release lock for issue #{} in '{}'",
                    args.issue,
                    env.manager.store_location()
                )));
            }
        };
        return Err(ChadgiError::LockError(message));
    }

    if let Some(status) = &existing {
        env.record(
            Event::new(EventAction::Release)
                .with_issue(args.issue)
                .with_details(json!({
                    "session_id": status.lock.session_id,
                    "checked_owner": args.session.is_some(),
                    "held_seconds": status.locked_seconds,
                })),
        );
    }

    if env.json {
        print_json(&json!({
            "issue": args.issue,
            "released": true,
            "existed": existing.is_some(),
        }))
    } else {
        match existing {
            Some(_) => println!("Released lock for issue #{}", args.issue),
            None => println!("Issue #{} was not locked", args.issue),
        }
        Ok(())
    }
}

/// Refresh the heartbeat of a lock held by the given session.
pub(super) fn cmd_heartbeat(env: &LockEnv, args: LockHeartbeatArgs) -> Result<()> {
    if !env.manager.heartbeat(args.issue, &args.session) {
        return Err(ChadgiError::LockError(format!(
            "issue #{} is not held by session {}",
            args.issue, args.session
        )));
    }

    if env.json {
        print_json(&json!({
            "issue": args.issue,
            "sessionId": args.session,
            "refreshed": true,
        }))
    } else {
        println!("Heartbeat recorded for issue #{}", args.issue);
        Ok(())
    }
}
