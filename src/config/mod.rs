//! Configuration model for chadgi task locks.
//!
//! This module defines the Config struct read from `.chadgi/chadgi-config.yaml`.
//! The file is shared with the rest of ChadGI, so unknown keys are ignored;
//! only the lock-related settings are modeled here.

mod model;
mod operations;
pub mod types;


pub use model::Config;
pub use types::CONFIG_FILE_NAME;
