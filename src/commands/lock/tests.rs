//! Tests for the `chadgi lock` commands.

use super::*;
use crate::cli::{
    Cli, LockAcquireArgs, LockCheckArgs, LockCleanupArgs, LockClearArgs, LockHeartbeatArgs,
    LockListArgs, LockReleaseArgs, LockReleaseSessionArgs, LockRunArgs, LockShowArgs,
};
use crate::events::{EventAction, read_events};
use crate::exit_codes;
use crate::locks::{FsLockStore, LockStore, TaskLock};
use crate::test_support::{create_test_project, create_test_project_with_config};
use chrono::{Duration, Utc};
use clap::Parser;
use tempfile::TempDir;

fn load_env(temp_dir: &TempDir) -> LockEnv {
    LockEnv::load(Some(temp_dir.path().join(".chadgi").as_path()), false).unwrap()
}

fn store(temp_dir: &TempDir) -> FsLockStore {
    FsLockStore::new(temp_dir.path().join(".chadgi").join("locks"))
}

fn acquire_args(issue: u64, session: &str) -> LockAcquireArgs {
    LockAcquireArgs {
        issue,
        session: Some(session.to_string()),
        force_claim: false,
        timeout: None,
        worker_id: None,
        repo: None,
        pid: None,
    }
}

fn run_args(issue: u64, command: &[&str]) -> LockRunArgs {
    LockRunArgs {
        issue,
        session: Some("runner-session".to_string()),
        force_claim: false,
        timeout: None,
        worker_id: None,
        repo: None,
        command: command.iter().map(|s| s.to_string()).collect(),
    }
}

/// Write a lock held by another machine whose last heartbeat was
/// `minutes_ago` minutes in the past.
fn write_foreign_lock(temp_dir: &TempDir, issue: u64, session: &str, minutes_ago: i64) {
    let heartbeat = Utc::now() - Duration::minutes(minutes_ago);
    let lock = TaskLock {
        issue_number: issue,
        session_id: session.to_string(),
        pid: 4242,
        hostname: "remote-build-host".to_string(),
        locked_at: heartbeat,
        last_heartbeat: heartbeat,
        worker_id: None,
        repo_name: None,
    };
    let store = store(temp_dir);
    store.ensure_ready().unwrap();
    store.replace(&lock).unwrap();
}

fn event_actions(env: &LockEnv) -> Vec<EventAction> {
    read_events(&env.ctx)
        .unwrap()
        .into_iter()
        .map(|e| e.action)
        .collect()
}

// ============================================================================
// Environment
// ============================================================================

#[test]
fn test_missing_chadgi_dir_is_user_error() {
    let temp_dir = TempDir::new().unwrap();
    let result = LockEnv::load(Some(temp_dir.path().join(".chadgi").as_path()), false);

    let err = result.err().unwrap();
    assert_eq!(err.exit_code(), exit_codes::USER_ERROR);
}

#[test]
fn test_invalid_config_is_user_error() {
    let temp_dir = create_test_project_with_config("lock_timeout_minutes: 0\n");
    let result = LockEnv::load(Some(temp_dir.path().join(".chadgi").as_path()), false);

    let err = result.err().unwrap();
    assert!(matches!(err, ChadgiError::ConfigError(_)));
    assert_eq!(err.exit_code(), exit_codes::USER_ERROR);
}

#[test]
fn test_timeout_flag_overrides_config() {
    let temp_dir = create_test_project_with_config("lock_timeout_minutes: 45\n");
    let env = load_env(&temp_dir);

    assert_eq!(env.timeout(None), 45);
    assert_eq!(env.timeout(Some(10)), 10);
}

// ============================================================================
// Acquire / release / heartbeat
// ============================================================================

#[test]
fn test_acquire_writes_lock_file() {
    let temp_dir = create_test_project();
    let env = load_env(&temp_dir);

    acquire::cmd_acquire(&env, acquire_args(42, "worker-a")).unwrap();

    let lock = store(&temp_dir).read(42).unwrap().unwrap();
    assert_eq!(lock.session_id, "worker-a");
    assert_eq!(lock.pid, caller_pid());
    assert_eq!(event_actions(&env), vec![EventAction::Acquire]);
}

#[test]
fn test_acquire_records_config_context_and_pid_flag() {
    let temp_dir =
        create_test_project_with_config("worker_id: worker-7\nrepo_name: acme/widgets\n");
    let env = load_env(&temp_dir);

    let args = LockAcquireArgs {
        pid: Some(31337),
        repo: Some("acme/override".to_string()),
        ..acquire_args(5, "worker-a")
    };
    acquire::cmd_acquire(&env, args).unwrap();

    let lock = store(&temp_dir).read(5).unwrap().unwrap();
    assert_eq!(lock.worker_id.as_deref(), Some("worker-7"));
    assert_eq!(lock.repo_name.as_deref(), Some("acme/override"));
    assert_eq!(lock.pid, 31337);
}

#[test]
fn test_acquire_held_issue_exits_with_lock_held() {
    let temp_dir = create_test_project();
    let env = load_env(&temp_dir);
    acquire::cmd_acquire(&env, acquire_args(42, "worker-a")).unwrap();

    let err = acquire::cmd_acquire(&env, acquire_args(42, "worker-b")).unwrap_err();

    assert_eq!(err.exit_code(), exit_codes::LOCK_HELD);
    assert!(err.to_string().contains("worker-a"));
    assert_eq!(
        store(&temp_dir).read(42).unwrap().unwrap().session_id,
        "worker-a"
    );
}

#[test]
fn test_reacquire_by_same_session_succeeds() {
    let temp_dir = create_test_project();
    let env = load_env(&temp_dir);

    acquire::cmd_acquire(&env, acquire_args(42, "worker-a")).unwrap();
    acquire::cmd_acquire(&env, acquire_args(42, "worker-a")).unwrap();
}

#[test]
fn test_stale_lock_requires_force_claim() {
    let temp_dir = create_test_project();
    let env = load_env(&temp_dir);
    write_foreign_lock(&temp_dir, 42, "crashed-worker", 180);

    let err = acquire::cmd_acquire(&env, acquire_args(42, "worker-a")).unwrap_err();
    assert_eq!(err.exit_code(), exit_codes::LOCK_HELD);
    assert!(err.to_string().contains("force claim"));

    let args = LockAcquireArgs {
        force_claim: true,
        ..acquire_args(42, "worker-a")
    };
    acquire::cmd_acquire(&env, args).unwrap();

    assert_eq!(
        store(&temp_dir).read(42).unwrap().unwrap().session_id,
        "worker-a"
    );
    let events = read_events(&env.ctx).unwrap();
    assert_eq!(events[0].details["previous_session"], "crashed-worker");
}

#[test]
fn test_timeout_flag_changes_staleness() {
    let temp_dir = create_test_project();
    let env = load_env(&temp_dir);
    write_foreign_lock(&temp_dir, 42, "slow-worker", 20);

    let args = LockAcquireArgs {
        force_claim: true,
        ..acquire_args(42, "worker-a")
    };
    assert!(acquire::cmd_acquire(&env, args).is_err());

    let args = LockAcquireArgs {
        force_claim: true,
        timeout: Some(10),
        ..acquire_args(42, "worker-a")
    };
    acquire::cmd_acquire(&env, args).unwrap();
}

#[test]
fn test_release_by_other_session_is_refused() {
    let temp_dir = create_test_project();
    let env = load_env(&temp_dir);
    acquire::cmd_acquire(&env, acquire_args(42, "worker-a")).unwrap();

    let err = acquire::cmd_release(
        &env,
        LockReleaseArgs {
            issue: 42,
            session: Some("worker-b".to_string()),
        },
    )
    .unwrap_err();

    assert_eq!(err.exit_code(), exit_codes::LOCK_HELD);
    assert!(store(&temp_dir).exists(42).unwrap());
}

#[test]
fn test_release_by_owner_removes_lock() {
    let temp_dir = create_test_project();
    let env = load_env(&temp_dir);
    acquire::cmd_acquire(&env, acquire_args(42, "worker-a")).unwrap();

    acquire::cmd_release(
        &env,
        LockReleaseArgs {
            issue: 42,
            session: Some("worker-a".to_string()),
        },
    )
    .unwrap();

    assert!(!store(&temp_dir).exists(42).unwrap());
    assert_eq!(
        event_actions(&env),
        vec![EventAction::Acquire, EventAction::Release]
    );
}

#[test]
fn test_release_unlocked_issue_succeeds() {
    let temp_dir = create_test_project();
    let env = load_env(&temp_dir);

    acquire::cmd_release(
        &env,
        LockReleaseArgs {
            issue: 9,
            session: None,
        },
    )
    .unwrap();

    assert!(event_actions(&env).is_empty());
}

#[test]
fn test_heartbeat_requires_owner() {
    let temp_dir = create_test_project();
    let env = load_env(&temp_dir);
    acquire::cmd_acquire(&env, acquire_args(42, "worker-a")).unwrap();

    acquire::cmd_heartbeat(
        &env,
        LockHeartbeatArgs {
            issue: 42,
            session: "worker-a".to_string(),
        },
    )
    .unwrap();

    let err = acquire::cmd_heartbeat(
        &env,
        LockHeartbeatArgs {
            issue: 42,
            session: "worker-b".to_string(),
        },
    )
    .unwrap_err();
    assert_eq!(err.exit_code(), exit_codes::LOCK_HELD);

    let err = acquire::cmd_heartbeat(
        &env,
        LockHeartbeatArgs {
            issue: 43,
            session: "worker-a".to_string(),
        },
    )
    .unwrap_err();
    assert_eq!(err.exit_code(), exit_codes::LOCK_HELD);
}

#[test]
fn test_acquire_on_unwritable_lock_dir_is_storage_failure() {
    let temp_dir = create_test_project();
    std::fs::write(temp_dir.path().join(".chadgi").join("locks"), "not a dir").unwrap();
    let env = load_env(&temp_dir);

    let err = acquire::cmd_acquire(&env, acquire_args(1, "worker-a")).unwrap_err();

    assert_eq!(err.exit_code(), exit_codes::STORAGE_FAILURE);
}

// ============================================================================
// Queries
// ============================================================================

#[test]
fn test_check_reports_blocked_issue() {
    let temp_dir = create_test_project();
    let env = load_env(&temp_dir);
    acquire::cmd_acquire(&env, acquire_args(42, "worker-a")).unwrap();

    let check = |session: &str| {
        query::cmd_check(
            &env,
            LockCheckArgs {
                issue: 42,
                session: session.to_string(),
                timeout: None,
            },
        )
    };

    assert!(check("worker-a").is_ok());
    assert_eq!(check("worker-b").unwrap_err().exit_code(), exit_codes::LOCK_HELD);
}

#[test]
fn test_check_ignores_stale_lock() {
    let temp_dir = create_test_project();
    let env = load_env(&temp_dir);
    write_foreign_lock(&temp_dir, 42, "crashed-worker", 500);

    query::cmd_check(
        &env,
        LockCheckArgs {
            issue: 42,
            session: "worker-a".to_string(),
            timeout: None,
        },
    )
    .unwrap();
}

#[test]
fn test_list_and_show_succeed() {
    let temp_dir = create_test_project();
    let env = load_env(&temp_dir);
    acquire::cmd_acquire(&env, acquire_args(1, "worker-a")).unwrap();
    write_foreign_lock(&temp_dir, 2, "crashed-worker", 500);

    query::cmd_list(
        &env,
        LockListArgs {
            stale: false,
            timeout: None,
        },
    )
    .unwrap();
    query::cmd_show(
        &env,
        LockShowArgs {
            issue: 2,
            timeout: None,
        },
    )
    .unwrap();
    query::cmd_show(
        &env,
        LockShowArgs {
            issue: 3,
            timeout: None,
        },
    )
    .unwrap();
}

// ============================================================================
// Removal
// ============================================================================

#[test]
fn test_clear_requires_force() {
    let temp_dir = create_test_project();
    let env = load_env(&temp_dir);
    acquire::cmd_acquire(&env, acquire_args(42, "worker-a")).unwrap();

    let err = removal::cmd_clear(
        &env,
        LockClearArgs {
            issue: 42,
            force: false,
        },
    )
    .unwrap_err();

    assert_eq!(err.exit_code(), exit_codes::USER_ERROR);
    assert!(err.to_string().contains("--force"));
    assert!(store(&temp_dir).exists(42).unwrap());
}

#[test]
fn test_clear_with_force_removes_any_lock() {
    let temp_dir = create_test_project();
    let env = load_env(&temp_dir);
    write_foreign_lock(&temp_dir, 42, "busy-worker", 1);

    removal::cmd_clear(
        &env,
        LockClearArgs {
            issue: 42,
            force: true,
        },
    )
    .unwrap();

    assert!(!store(&temp_dir).exists(42).unwrap());
    let events = read_events(&env.ctx).unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].action, EventAction::ForceRelease);
    assert_eq!(events[0].issue, Some(42));
    assert_eq!(events[0].details["session_id"], "busy-worker");
}

#[test]
fn test_cleanup_dry_run_keeps_locks() {
    let temp_dir = create_test_project();
    let env = load_env(&temp_dir);
    write_foreign_lock(&temp_dir, 1, "crashed-worker", 500);

    removal::cmd_cleanup(
        &env,
        LockCleanupArgs {
            timeout: None,
            dry_run: true,
        },
    )
    .unwrap();

    assert!(store(&temp_dir).exists(1).unwrap());
    assert!(event_actions(&env).is_empty());
}

#[test]
fn test_cleanup_removes_only_stale_locks() {
    let temp_dir = create_test_project();
    let env = load_env(&temp_dir);
    write_foreign_lock(&temp_dir, 1, "crashed-worker", 500);
    write_foreign_lock(&temp_dir, 2, "crashed-worker", 300);
    write_foreign_lock(&temp_dir, 3, "busy-worker", 5);

    removal::cmd_cleanup(
        &env,
        LockCleanupArgs {
            timeout: None,
            dry_run: false,
        },
    )
    .unwrap();

    let store = store(&temp_dir);
    assert!(!store.exists(1).unwrap());
    assert!(!store.exists(2).unwrap());
    assert!(store.exists(3).unwrap());

    let events = read_events(&env.ctx).unwrap();
    assert_eq!(events[0].action, EventAction::Cleanup);
    assert_eq!(events[0].details["removed"], 2);
    assert_eq!(events[0].details["issues"], serde_json::json!([1, 2]));
}

#[test]
fn test_release_session_removes_only_that_session() {
    let temp_dir = create_test_project();
    let env = load_env(&temp_dir);
    acquire::cmd_acquire(&env, acquire_args(1, "worker-a")).unwrap();
    acquire::cmd_acquire(&env, acquire_args(2, "worker-a")).unwrap();
    acquire::cmd_acquire(&env, acquire_args(3, "worker-b")).unwrap();

    removal::cmd_release_session(
        &env,
        LockReleaseSessionArgs {
            session: "worker-a".to_string(),
        },
    )
    .unwrap();

    let remaining: Vec<u64> = store(&temp_dir)
        .scan()
        .unwrap()
        .iter()
        .map(|l| l.issue_number)
        .collect();
    assert_eq!(remaining, vec![3]);
}

#[test]
fn test_audit_events_can_be_disabled() {
    let temp_dir = create_test_project_with_config("audit_events: false\n");
    let env = load_env(&temp_dir);

    acquire::cmd_acquire(&env, acquire_args(1, "worker-a")).unwrap();
    removal::cmd_clear(
        &env,
        LockClearArgs {
            issue: 1,
            force: true,
        },
    )
    .unwrap();

    assert!(!env.ctx.events_file().exists());
}

// ============================================================================
// Run
// ============================================================================

#[cfg(unix)]
#[test]
fn test_run_holds_lock_during_command_and_releases_after() {
    let temp_dir = create_test_project();
    let env = load_env(&temp_dir);
    let lock_path = store(&temp_dir).lock_path(42);
    let script = format!(
        "test -f '{}' && test \"${}\" = 42 && test \"${}\" = runner-session",
        lock_path.display(),
        run::ISSUE_ENV_VAR,
        run::SESSION_ENV_VAR
    );

    run::cmd_run(&env, run_args(42, &["sh", "-c", &script])).unwrap();

    assert!(!lock_path.exists());
    assert_eq!(
        event_actions(&env),
        vec![EventAction::Acquire, EventAction::Run]
    );
}

#[cfg(unix)]
#[test]
fn test_run_reports_child_failure_with_own_exit_code() {
    let temp_dir = create_test_project();
    let env = load_env(&temp_dir);

    let err = run::cmd_run(&env, run_args(42, &["sh", "-c", "exit 7"])).unwrap_err();

    assert_eq!(err.exit_code(), exit_codes::COMMAND_FAILED);
    assert!(err.to_string().contains("status 7"));
    assert!(!store(&temp_dir).exists(42).unwrap());
}

#[cfg(unix)]
#[test]
fn test_run_child_exiting_like_lock_held_is_not_contention() {
    let temp_dir = create_test_project();
    let env = load_env(&temp_dir);

    let err = run::cmd_run(&env, run_args(42, &["sh", "-c", "exit 2"])).unwrap_err();

    assert!(matches!(err, ChadgiError::CommandFailed { code: 2, .. }));
    assert_ne!(err.exit_code(), exit_codes::LOCK_HELD);
}

#[cfg(unix)]
#[test]
fn test_run_does_not_start_command_when_locked() {
    let temp_dir = create_test_project();
    let env = load_env(&temp_dir);
    write_foreign_lock(&temp_dir, 42, "busy-worker", 1);
    let marker = temp_dir.path().join("ran");
    let script = format!("touch '{}'", marker.display());

    let err = run::cmd_run(&env, run_args(42, &["sh", "-c", &script])).unwrap_err();

    assert_eq!(err.exit_code(), exit_codes::LOCK_HELD);
    assert!(!marker.exists());
    assert_eq!(
        store(&temp_dir).read(42).unwrap().unwrap().session_id,
        "busy-worker"
    );
}

#[test]
fn test_run_missing_program_is_user_error() {
    let temp_dir = create_test_project();
    let env = load_env(&temp_dir);

    let err = run::cmd_run(&env, run_args(42, &["chadgi-test-missing-program"])).unwrap_err();

    assert_eq!(err.exit_code(), exit_codes::USER_ERROR);
    assert!(!store(&temp_dir).exists(42).unwrap());
}

// ============================================================================
// Dispatch
// ============================================================================

#[test]
fn test_dispatch_routes_lock_commands() {
    let temp_dir = create_test_project();
    let chadgi_dir = temp_dir.path().join(".chadgi");
    let dir = chadgi_dir.to_str().unwrap();

    let cli = Cli::try_parse_from([
        "chadgi", "lock", "acquire", "11", "--session", "worker-a", "--dir", dir, "--json",
    ])
    .unwrap();
    crate::commands::dispatch(cli).unwrap();
    assert!(store(&temp_dir).exists(11).unwrap());

    let cli = Cli::try_parse_from(["chadgi", "lock", "release", "11", "--dir", dir]).unwrap();
    crate::commands::dispatch(cli).unwrap();
    assert!(!store(&temp_dir).exists(11).unwrap());
}

#[test]
fn test_session_id_needs_no_project() {
    let cli = Cli::try_parse_from(["chadgi", "lock", "session-id", "--dir", "/nonexistent"])
        .unwrap();
    crate::commands::dispatch(cli).unwrap();
}
