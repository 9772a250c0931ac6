//! Implementation of the `chadgi lock` commands.
//!
//! Each handler resolves the project, builds a [`TaskLockManager`] over the
//! configured lock directory, and maps unsuccessful lock outcomes onto
//! errors so the process exit code reflects them.

mod acquire;
mod query;
mod removal;
mod run;

#[cfg(test)]
mod tests;

use crate::cli::{LockAction, LockCommand};
use crate::config::Config;
use crate::context::{ProjectContext, resolve_context};
use crate::error::{ChadgiError, Result};
use crate::events::{Event, record_event};
use crate::locks::{AcquireOutcome, TaskLockManager};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Dispatch lock subcommands.
///
/// Everything except `session-id` needs a resolved project.
pub fn dispatch_lock(lock_cmd: LockCommand, dir: Option<&Path>, json: bool) -> Result<()> {
    match lock_cmd.action {
        LockAction::SessionId => acquire::cmd_session_id(json),
        action => {
            let env = LockEnv::load(dir, json)?;
            run_action(&env, action)
        }
    }
}

fn run_action(env: &LockEnv, action: LockAction) -> Result<()> {
    match action {
        LockAction::SessionId => acquire::cmd_session_id(env.json),
        LockAction::Acquire(args) => acquire::cmd_acquire(env, args),
        LockAction::Release(args) => acquire::cmd_release(env, args),
        LockAction::Heartbeat(args) => acquire::cmd_heartbeat(env, args),
        LockAction::List(args) => query::cmd_list(env, args),
        LockAction::Show(args) => query::cmd_show(env, args),
        LockAction::Check(args) => query::cmd_check(env, args),
        LockAction::Clear(args) => removal::cmd_clear(env, args),
        LockAction::Cleanup(args) => removal::cmd_cleanup(env, args),
        LockAction::ReleaseSession(args) => removal::cmd_release_session(env, args),
        LockAction::Run(args) => run::cmd_run(env, args),
    }
}

/// Everything a lock command needs: project paths, config and a manager.
pub(crate) struct LockEnv {
    pub ctx: ProjectContext,
    pub config: Config,
    pub manager: Arc<TaskLockManager>,
    pub json: bool,
}

impl LockEnv {
    pub fn load(dir: Option<&Path>, json: bool) -> Result<Self> {
        let ctx = resolve_context(dir)?;
        let config = ctx.load_config()?;
        let locks_dir = ctx.locks_dir(&config);
        debug!(locks_dir = %locks_dir.display(), "using lock directory");

        // The CLI exits right after acquiring; the process that keeps working
        // on the issue is whoever invoked it.
        let manager = TaskLockManager::open(locks_dir).with_pid(caller_pid());

        Ok(Self {
            ctx,
            config,
            manager: Arc::new(manager),
            json,
        })
    }

    /// The staleness timeout: an explicit flag wins over the config.
    pub fn timeout(&self, flag: Option<u32>) -> u32 {
        flag.unwrap_or(self.config.lock_timeout_minutes)
    }

    pub fn record(&self, event: Event) {
        record_event(&self.ctx, &self.config, event);
    }
}

/// Process ID of whoever invoked this command.
#[cfg(unix)]
pub(crate) fn caller_pid() -> u32 {
    std::os::unix::process::parent_id()
}

#[cfg(not(unix))]
pub(crate) fn caller_pid() -> u32 {
    std::process::id()
}

/// Convert an unsuccessful acquisition into the error that sets the exit code.
pub(crate) fn outcome_error(outcome: &AcquireOutcome) -> ChadgiError {
    let message = outcome
        .message()
        .unwrap_or_else(|| "lock was not acquired".to_string());
    match outcome {
        AcquireOutcome::Error { .. } => ChadgiError::StorageError(message),
        _ => ChadgiError::LockError(message),
    }
}

pub(crate) fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| ChadgiError::UserError(format!("failed to serialize output: {}", e)))?;
    println!("{}", json);
    Ok(())
}
