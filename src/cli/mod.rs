//! CLI argument parsing for chadgi.
//!
//! Uses clap derive macros for declarative argument definitions.
//! This module defines the command structure; actual implementations
//! are in the `commands` module.

use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;

/// ChadGI task locks: per-issue mutual exclusion for autonomous coding workers.
///
/// Workers sharing a lock directory claim GitHub issues by writing one lock
/// file per issue, keep it alive with heartbeats, and release it when done.
/// Locks whose holder stops heartbeating can be force-claimed.
#[derive(Parser, Debug)]
#[command(name = "chadgi")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to the `.chadgi` directory (default: nearest one above the cwd).
    #[arg(long, global = true, value_name = "PATH")]
    pub dir: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug). CHADGI_LOG overrides.
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Print machine-readable JSON instead of text.
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands for chadgi.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Task lock management commands.
    ///
    /// Acquire, refresh, inspect and release per-issue locks.
    Lock(LockCommand),
}

/// Lock subcommands.
#[derive(Parser, Debug)]
pub struct LockCommand {
    #[command(subcommand)]
    pub action: LockAction,
}

/// Available lock actions.
#[derive(Subcommand, Debug)]
pub enum LockAction {
    /// Print a new session ID for this worker.
    SessionId,

    /// Acquire the lock for an issue.
    ///
    /// Prints the session ID on success. Exits with status 2 when the issue
    /// is locked by another session or its lock is abandoned and
    /// --force-claim was not given.
    Acquire(LockAcquireArgs),

    /// Release the lock for an issue.
    ///
    /// With --session, only the owning session may release.
    Release(LockReleaseArgs),

    /// Refresh the heartbeat of a lock owned by a session.
    Heartbeat(LockHeartbeatArgs),

    /// List all locks with their age and staleness.
    List(LockListArgs),

    /// Show the lock for a single issue.
    Show(LockShowArgs),

    /// Check whether another live session holds an issue.
    ///
    /// Exits with status 2 when the issue is blocked.
    Check(LockCheckArgs),

    /// Delete the lock for an issue regardless of its owner.
    ///
    /// Requires --force flag to prevent accidental clearing.
    Clear(LockClearArgs),

    /// Remove every lock whose heartbeat exceeds the timeout.
    Cleanup(LockCleanupArgs),

    /// Remove every lock held by a session.
    ReleaseSession(LockReleaseSessionArgs),

    /// Run a command while holding the lock for an issue.
    ///
    /// The lock is heartbeated in the background and released when the
    /// command exits. Exits with status 4 when the command fails, so a
    /// failing command is never mistaken for lock contention (2) or a
    /// storage failure (3).
    Run(LockRunArgs),
}

/// Arguments for the `lock acquire` command.
#[derive(Parser, Debug)]
pub struct LockAcquireArgs {
    /// Issue number to lock.
    #[arg(value_parser = clap::value_parser!(u64).range(1..))]
    pub issue: u64,

    /// Session ID to acquire as (default: a new session ID).
    #[arg(long)]
    pub session: Option<String>,

    /// Take over the lock if its holder looks abandoned.
    #[arg(long)]
    pub force_claim: bool,

    /// Minutes without a heartbeat before a lock is stale (default: from config).
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
    pub timeout: Option<u32>,

    /// Worker ID to record in the lock (default: from config).
    #[arg(long)]
    pub worker_id: Option<String>,

    /// Repository name to record in the lock (default: from config).
    #[arg(long)]
    pub repo: Option<String>,

    /// Process ID to record as the holder (default: the calling process).
    #[arg(long)]
    pub pid: Option<u32>,
}

/// Arguments for the `lock release` command.
#[derive(Parser, Debug)]
pub struct LockReleaseArgs {
    /// Issue number to release.
    #[arg(value_parser = clap::value_parser!(u64).range(1..))]
    pub issue: u64,

    /// Only release if this session owns the lock.
    #[arg(long)]
    pub session: Option<String>,
}

/// Arguments for the `lock heartbeat` command.
#[derive(Parser, Debug)]
pub struct LockHeartbeatArgs {
    /// Issue number whose lock to refresh.
    #[arg(value_parser = clap::value_parser!(u64).range(1..))]
    pub issue: u64,

    /// Session that owns the lock.
    #[arg(long)]
    pub session: String,
}

/// Arguments for the `lock list` command.
#[derive(Parser, Debug)]
pub struct LockListArgs {
    /// Only list stale locks.
    #[arg(long)]
    pub stale: bool,

    /// Minutes without a heartbeat before a lock is stale (default: from config).
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
    pub timeout: Option<u32>,
}

/// Arguments for the `lock show` command.
#[derive(Parser, Debug)]
pub struct LockShowArgs {
    /// Issue number to show.
    #[arg(value_parser = clap::value_parser!(u64).range(1..))]
    pub issue: u64,

    /// Minutes without a heartbeat before a lock is stale (default: from config).
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
    pub timeout: Option<u32>,
}

/// Arguments for the `lock check` command.
#[derive(Parser, Debug)]
pub struct LockCheckArgs {
    /// Issue number to check.
    #[arg(value_parser = clap::value_parser!(u64).range(1..))]
    pub issue: u64,

    /// The checking worker's own session.
    #[arg(long)]
    pub session: String,

    /// Minutes without a heartbeat before a lock is stale (default: from config).
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
    pub timeout: Option<u32>,
}

/// Arguments for the `lock clear` command.
#[derive(Parser, Debug)]
pub struct LockClearArgs {
    /// Issue number whose lock should be cleared.
    #[arg(value_parser = clap::value_parser!(u64).range(1..))]
    pub issue: u64,

    /// Force clearing the lock (required for safety).
    #[arg(long)]
    pub force: bool,
}

/// Arguments for the `lock cleanup` command.
#[derive(Parser, Debug)]
pub struct LockCleanupArgs {
    /// Minutes without a heartbeat before a lock is stale (default: from config).
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
    pub timeout: Option<u32>,

    /// Show what would be removed without removing anything.
    #[arg(long)]
    pub dry_run: bool,
}

/// Arguments for the `lock release-session` command.
#[derive(Parser, Debug)]
pub struct LockReleaseSessionArgs {
    /// Session whose locks should be removed.
    pub session: String,
}

/// Arguments for the `lock run` command.
#[derive(Parser, Debug)]
pub struct LockRunArgs {
    /// Issue number to lock while the command runs.
    #[arg(value_parser = clap::value_parser!(u64).range(1..))]
    pub issue: u64,

    /// Session ID to acquire as (default: a new session ID).
    #[arg(long)]
    pub session: Option<String>,

    /// Take over the lock if its holder looks abandoned.
    #[arg(long)]
    pub force_claim: bool,

    /// Minutes without a heartbeat before a lock is stale (default: from config).
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
    pub timeout: Option<u32>,

    /// Worker ID to record in the lock (default: from config).
    #[arg(long)]
    pub worker_id: Option<String>,

    /// Repository name to record in the lock (default: from config).
    #[arg(long)]
    pub repo: Option<String>,

    /// Command and arguments to run, after `--`.
    #[arg(last = true, required = true, value_name = "COMMAND")]
    pub command: Vec<String>,
}

impl Cli {
    /// Parse command line arguments.
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    fn parse_lock(args: &[&str]) -> LockAction {
        let mut argv = vec!["chadgi", "lock"];
        argv.extend_from_slice(args);
        let cli = Cli::try_parse_from(argv).unwrap();
        let Command::Lock(lock_cmd) = cli.command;
        lock_cmd.action
    }

    #[test]
    fn cli_debug_assert() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parse_session_id() {
        let action = parse_lock(&["session-id"]);
        assert!(matches!(action, LockAction::SessionId));
    }

    #[test]
    fn parse_acquire_minimal() {
        let action = parse_lock(&["acquire", "42"]);
        let LockAction::Acquire(args) = action else {
            panic!("Expected Acquire action");
        };
        assert_eq!(args.issue, 42);
        assert!(args.session.is_none());
        assert!(!args.force_claim);
        assert!(args.timeout.is_none());
        assert!(args.pid.is_none());
    }

    #[test]
    fn parse_acquire_full() {
        let action = parse_lock(&[
            "acquire",
            "42",
            "--session",
            "host-1-abc",
            "--force-claim",
            "--timeout",
            "30",
            "--worker-id",
            "worker-2",
            "--repo",
            "acme/widgets",
            "--pid",
            "777",
        ]);
        let LockAction::Acquire(args) = action else {
            panic!("Expected Acquire action");
        };
        assert_eq!(args.session.as_deref(), Some("host-1-abc"));
        assert!(args.force_claim);
        assert_eq!(args.timeout, Some(30));
        assert_eq!(args.worker_id.as_deref(), Some("worker-2"));
        assert_eq!(args.repo.as_deref(), Some("acme/widgets"));
        assert_eq!(args.pid, Some(777));
    }

    #[test]
    fn issue_number_must_be_positive() {
        assert!(Cli::try_parse_from(["chadgi", "lock", "acquire", "0"]).is_err());
        assert!(Cli::try_parse_from(["chadgi", "lock", "acquire", "-3"]).is_err());
        assert!(Cli::try_parse_from(["chadgi", "lock", "acquire", "abc"]).is_err());
    }

    #[test]
    fn timeout_must_be_positive() {
        let result = Cli::try_parse_from(["chadgi", "lock", "list", "--timeout", "0"]);
        assert!(result.is_err());
    }

    #[test]
    fn heartbeat_requires_session() {
        assert!(Cli::try_parse_from(["chadgi", "lock", "heartbeat", "42"]).is_err());
    }

    #[test]
    fn parse_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "chadgi", "lock", "list", "--stale", "--json", "-vv", "--dir", "/tmp/x",
        ])
        .unwrap();
        assert!(cli.json);
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.dir, Some(PathBuf::from("/tmp/x")));
        let Command::Lock(lock_cmd) = cli.command;
        let LockAction::List(args) = lock_cmd.action else {
            panic!("Expected List action");
        };
        assert!(args.stale);
    }

    #[test]
    fn parse_clear_with_force() {
        let action = parse_lock(&["clear", "7", "--force"]);
        let LockAction::Clear(args) = action else {
            panic!("Expected Clear action");
        };
        assert_eq!(args.issue, 7);
        assert!(args.force);
    }

    #[test]
    fn parse_cleanup_dry_run() {
        let action = parse_lock(&["cleanup", "--dry-run", "--timeout", "60"]);
        let LockAction::Cleanup(args) = action else {
            panic!("Expected Cleanup action");
        };
        assert!(args.dry_run);
        assert_eq!(args.timeout, Some(60));
    }

    #[test]
    fn parse_release_session() {
        let action = parse_lock(&["release-session", "host-1-abc"]);
        let LockAction::ReleaseSession(args) = action else {
            panic!("Expected ReleaseSession action");
        };
        assert_eq!(args.session, "host-1-abc");
    }

    #[test]
    fn parse_run_collects_trailing_command() {
        let action = parse_lock(&["run", "42", "--force-claim", "--", "make", "test", "-j4"]);
        let LockAction::Run(args) = action else {
            panic!("Expected Run action");
        };
        assert_eq!(args.issue, 42);
        assert!(args.force_claim);
        assert_eq!(args.command, vec!["make", "test", "-j4"]);
    }

    #[test]
    fn run_requires_command() {
        assert!(Cli::try_parse_from(["chadgi", "lock", "run", "42"]).is_err());
    }
}
