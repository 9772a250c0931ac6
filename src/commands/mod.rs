//! Command implementations for chadgi.
//!
//! This module provides the dispatcher that routes CLI commands to their
//! implementations.

mod lock;

use crate::cli::{Cli, Command};
use crate::error::Result;

/// Dispatch a command to its implementation.
///
/// This is the main entry point for command execution. Global flags travel
/// with the command so handlers can resolve the project and pick an output
/// format.
pub fn dispatch(cli: Cli) -> Result<()> {
    let Cli {
        dir, json, command, ..
    } = cli;

    match command {
        Command::Lock(lock_cmd) => lock::dispatch_lock(lock_cmd, dir.as_deref(), json),
    }
}
