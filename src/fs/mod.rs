//! Filesystem utilities for chadgi.
//!
//! Atomic replace and exclusive create, the two write primitives lock records
//! rely on.

pub mod atomic;

pub use atomic::{CreateOutcome, atomic_write, create_exclusive};
