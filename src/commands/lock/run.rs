//! `lock run`: hold an issue lock for the lifetime of a child command.

use super::{LockEnv, outcome_error};
use crate::cli::LockRunArgs;
use crate::error::{ChadgiError, Result};
use crate::events::{Event, EventAction};
use crate::exit_codes;
use crate::locks::{AcquireOptions, AcquireOutcome, IssueLock, generate_session_id};
use chrono::Utc;
use serde_json::json;
use std::process::Command;
use tracing::{info, warn};

/// Environment variable carrying the session ID into the child.
pub const SESSION_ENV_VAR: &str = "CHADGI_SESSION_ID";

/// Environment variable carrying the issue number into the child.
pub const ISSUE_ENV_VAR: &str = "CHADGI_ISSUE";

pub(super) fn cmd_run(env: &LockEnv, args: LockRunArgs) -> Result<()> {
    let Some((program, program_args)) = args.command.split_first() else {
        return Err(ChadgiError::UserError(
            "no command given; usage: chadgi lock run <issue> -- <command>...".to_string(),
        ));
    };

    // This process lives as long as the child, so it is the holder.
    let pid = std::process::id();
    let session_id = args
        .session
        .unwrap_or_else(|| generate_session_id(env.manager.hostname(), pid, Utc::now()));

    let options = AcquireOptions {
        force_claim: args.force_claim,
        timeout_minutes: env.timeout(args.timeout),
        worker_id: args.worker_id.or_else(|| env.config.worker_id.clone()),
        repo_name: args.repo.or_else(|| env.config.repo_name.clone()),
        holder_pid: Some(pid),
    };

    let (guard, outcome) = IssueLock::acquire(
        &env.manager,
        args.issue,
        &session_id,
        &options,
        env.config.heartbeat_interval(),
    )
    .map_err(|outcome| outcome_error(&outcome))?;

    let previous = match &outcome {
        AcquireOutcome::Acquired { previous, .. } => {
            previous.as_ref().map(|p| p.session_id.clone())
        }
        _ => None,
    };
    env.record(
        Event::new(EventAction::Acquire)
            .with_issue(args.issue)
            .with_details(json!({
                "session_id": session_id,
                "pid": pid,
                "force_claim": args.force_claim,
                "previous_session": previous,
            })),
    );

    let command_line = args.command.join(" ");
    info!(
        issue = args.issue,
        session = %session_id,
        command = %command_line,
        "running command under lock"
    );

    let status = Command::new(program)
        .args(program_args)
        .env(SESSION_ENV_VAR, &session_id)
        .env(ISSUE_ENV_VAR, args.issue.to_string())
        .status();

    let lost = guard.is_lost();
    if lost {
        warn!(
            issue = args.issue,
            session = %session_id,
            "lock was taken over while the command ran"
        );
    }
    let released = guard.release();

    let exit_code = status.as_ref().ok().and_then(|s| s.code());
    env.record(
        Event::new(EventAction::Run)
            .with_issue(args.issue)
            .with_details(json!({
                "session_id": session_id,
                "command": command_line,
                "exit_code": exit_code,
                "lock_lost": lost,
            })),
    );

    let status =
        status.map_err(|e| ChadgiError::UserError(format!("failed to run '{}': {}", program, e)))?;

    if !status.success() {
        return Err(ChadgiError::CommandFailed {
            command: command_line,
            code: status.code().unwrap_or(exit_codes::COMMAND_FAILED),
        });
    }

    released
}
