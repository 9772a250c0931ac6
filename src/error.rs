//! Error types for chadgi.
//!
//! Uses thiserror for derive macros and provides user-actionable error messages.
//! The lock manager itself never surfaces these to its callers; they flow
//! through the storage, config and context layers and out of CLI commands.

use crate::exit_codes;
use thiserror::Error;

/// Main error type for chadgi operations.
#[derive(Error, Debug)]
pub enum ChadgiError {
    /// User provided invalid arguments or the project is in an invalid state.
    #[error("{0}")]
    UserError(String),

    /// The configuration file could not be read or failed validation.
    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    /// A lock could not be acquired, released, or refreshed.
    #[error("Lock operation refused: {0}")]
    LockError(String),

    /// The lock directory could not be read or written.
    #[error("Lock storage failure: {0}")]
    StorageError(String),

    /// A lock file exists but does not contain a valid lock record.
    #[error("Corrupt lock record: {0}")]
    CorruptLock(String),

    /// A command run under a lock exited unsuccessfully.
    #[error("command '{command}' exited with status {code}")]
    CommandFailed { command: String, code: i32 },
}

impl ChadgiError {
    /// Returns the appropriate exit code for this error type.
    pub fn exit_code(&self) -> i32 {
        match self {
            ChadgiError::UserError(_) => exit_codes::USER_ERROR,
            ChadgiError::ConfigError(_) => exit_codes::USER_ERROR,
            ChadgiError::LockError(_) => exit_codes::LOCK_HELD,
            ChadgiError::StorageError(_) => exit_codes::STORAGE_FAILURE,
            ChadgiError::CorruptLock(_) => exit_codes::STORAGE_FAILURE,
            ChadgiError::CommandFailed { .. } => exit_codes::COMMAND_FAILED,
        }
    }
}

/// Result type alias for chadgi operations.
pub type Result<T> = std::result::Result<T, ChadgiError>;
