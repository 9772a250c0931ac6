//! Config loading, validation, and path helpers.

use super::model::Config;
use crate::error::{ChadgiError, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;

impl Config {
    /// Load config from a YAML file.
    ///
    /// # Returns
    ///
    /// * `Ok(Config)` - Successfully loaded and validated config
    /// * `Err(ChadgiError::ConfigError)` - Read error, parse error or validation failure
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path).map_err(|e| {
            ChadgiError::ConfigError(format!(
                "failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;

        Self::from_yaml(&content)
    }

    /// Load config if the file exists, otherwise return defaults.
    ///
    /// A file that exists but cannot be parsed is still an error.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Parse config from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        // An empty document deserializes as unit, not as an empty mapping.
        let config: Config = if yaml.trim().is_empty() {
            Config::default()
        } else {
            serde_yaml::from_str(yaml).map_err(|e| {
                ChadgiError::ConfigError(format!("failed to parse config YAML: {}", e))
            })?
        };

        config.validate()?;
        Ok(config)
    }

    /// Serialize config to YAML string.
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(|e| {
            ChadgiError::ConfigError(format!("failed to serialize config to YAML: {}", e))
        })
    }

    /// Validate config values.
    ///
    /// Validation rules:
    /// - `lock_timeout_minutes` must be positive
    /// - `heartbeat_interval_secs` must be positive and shorter than the timeout
    /// - `locks_dir` must be non-empty
    pub fn validate(&self) -> Result<()> {
        if self.lock_timeout_minutes == 0 {
            return Err(ChadgiError::ConfigError(
                "lock_timeout_minutes must be greater than 0".to_string(),
            ));
        }

        if self.heartbeat_interval_secs == 0 {
            return Err(ChadgiError::ConfigError(
                "heartbeat_interval_secs must be greater than 0".to_string(),
            ));
        }

        let timeout_secs = u64::from(self.lock_timeout_minutes) * 60;
        if self.heartbeat_interval_secs >= timeout_secs {
            return Err(ChadgiError::ConfigError(format!(
                "heartbeat_interval_secs ({}) must be shorter than lock_timeout_minutes ({} min), \
                 otherwise live locks look stale between heartbeats",
                self.heartbeat_interval_secs, self.lock_timeout_minutes
            )));
        }

        if self.locks_dir.trim().is_empty() {
            return Err(ChadgiError::ConfigError(
                "locks_dir must not be empty".to_string(),
            ));
        }

        Ok(())
    }

    /// Heartbeat interval as a `Duration`.
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    /// Resolve the lock directory against the `.chadgi/` directory.
    pub fn resolve_locks_dir(&self, chadgi_dir: &Path) -> PathBuf {
        let configured = Path::new(&self.locks_dir);
        if configured.is_absolute() {
            configured.to_path_buf()
        } else {
            chadgi_dir.join(configured)
        }
    }
}
