//! ChadGI task locks.
//!
//! Per-issue mutual exclusion for autonomous coding workers that share
//! nothing but a lock directory. The [`locks`] module holds the lock manager;
//! the remaining modules carry the project layout, configuration and CLI
//! around it.

pub mod cli;
pub mod commands;
pub mod config;
pub mod context;
pub mod error;
pub mod events;
pub mod exit_codes;
pub mod fs;
pub mod locks;
pub mod logging;

#[cfg(test)]
pub(crate) mod test_support;
