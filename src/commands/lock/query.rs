//! `lock list`, `lock show` and `lock check`.

use super::{LockEnv, print_json};
use crate::cli::{LockCheckArgs, LockListArgs, LockShowArgs};
use crate::error::{ChadgiError, Result};
use crate::locks::LockStatus;
use serde_json::json;

/// List locks, or only stale ones.
pub(super) fn cmd_list(env: &LockEnv, args: LockListArgs) -> Result<()> {
    let timeout = env.timeout(args.timeout);
    let statuses = if args.stale {
        env.manager.find_stale(timeout)
    } else {
        env.manager.list(timeout)
    };

    if env.json {
        return print_json(&statuses);
    }

    if statuses.is_empty() {
        if args.stale {
            println!("No stale locks.");
        } else {
            println!("No active locks.");
        }
        return Ok(());
    }

    println!("Locks ({}):", statuses.len());
    println!();
    for status in &statuses {
        print_status(status, timeout);
        println!();
    }

    let stale_count = statuses.iter().filter(|s| s.is_stale).count();
    if stale_count > 0 {
        println!(
            "Note: {} lock(s) are stale. Use `chadgi lock cleanup` to remove them.",
            stale_count
        );
    }

    Ok(())
}

/// Show a single issue's lock.
pub(super) fn cmd_show(env: &LockEnv, args: LockShowArgs) -> Result<()> {
    let timeout = env.timeout(args.timeout);
    let status = env.manager.status(args.issue, timeout);

    if env.json {
        return print_json(&json!({
            "issue": args.issue,
            "locked": status.is_some(),
            "lock": status,
        }));
    }

    match status {
        Some(status) => print_status(&status, timeout),
        None => println!("Issue #{} is not locked.", args.issue),
    }
    Ok(())
}

/// Fail with a lock error if another live session holds the issue.
pub(super) fn cmd_check(env: &LockEnv, args: LockCheckArgs) -> Result<()> {
    let timeout = env.timeout(args.timeout);
    let blocked = env
        .manager
        .is_locked_by_other(args.issue, &args.session, timeout);

    if env.json {
        print_json(&json!({
            "issue": args.issue,
            "sessionId": args.session,
            "lockedByOther": blocked,
        }))?;
    }

    if blocked {
        let holder = env
            .manager
            .status(args.issue, timeout)
            .map(|s| s.lock.holder_description())
            .unwrap_or_else(|| "another session".to_string());
        return Err(ChadgiError::LockError(format!(
            "issue #{} is locked by {}",
            args.issue, holder
        )));
    }

    if !env.json {
        println!("Issue #{} is available to session {}", args.issue, args.session);
    }
    Ok(())
}

fn print_status(status: &LockStatus, timeout: u32) {
    let lock = &status.lock;
    println!("  #{}:", lock.issue_number);
    println!("    Session:    {}", lock.session_id);
    println!("    Host:       {}", lock.hostname);
    println!("    PID:        {}", lock.pid);
    if let Some(worker) = &lock.worker_id {
        println!("    Worker:     {}", worker);
    }
    if let Some(repo) = &lock.repo_name {
        println!("    Repo:       {}", repo);
    }
    println!(
        "    Locked:     {}",
        lock.locked_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
    println!(
        "    Heartbeat:  {} ({} ago)",
        lock.last_heartbeat.format("%Y-%m-%d %H:%M:%S UTC"),
        crate::locks::format_age(chrono::Duration::seconds(status.heartbeat_age_seconds))
    );
    if status.is_stale {
        println!("    Status:     STALE (exceeds {} min timeout)", timeout);
    }
}
