//! Project context resolution for chadgi.
//!
//! Finds the `.chadgi/` directory that holds the project's configuration,
//! lock directory and event log. Every command goes through this module so
//! that workers started from any subdirectory agree on the same lock files.

use crate::config::{CONFIG_FILE_NAME, Config};
use crate::error::{ChadgiError, Result};
use std::env;
use std::path::{Path, PathBuf};

/// Name of the per-project state directory.
pub const CHADGI_DIR_NAME: &str = ".chadgi";

/// Resolved paths for a ChadGI project.
///
/// All paths are absolute when resolved from an absolute working directory.
#[derive(Debug, Clone)]
pub struct ProjectContext {
    /// Directory containing `.chadgi/` (usually the repository checkout).
    pub project_root: PathBuf,

    /// The `.chadgi/` directory itself.
    pub chadgi_dir: PathBuf,
}

impl ProjectContext {
    /// Resolve the project context from the current working directory.
    pub fn resolve() -> Result<Self> {
        let cwd = env::current_dir().map_err(|e| {
            ChadgiError::UserError(format!("failed to get current working directory: {}", e))
        })?;

        Self::resolve_from(&cwd)
    }

    /// Resolve the project context by walking up from `start`.
    ///
    /// The nearest ancestor (including `start`) that contains a `.chadgi/`
    /// directory wins.
    pub fn resolve_from<P: AsRef<Path>>(start: P) -> Result<Self> {
        let start = start.as_ref();

        for dir in start.ancestors() {
            let candidate = dir.join(CHADGI_DIR_NAME);
            if candidate.is_dir() {
                return Ok(Self {
                    project_root: dir.to_path_buf(),
                    chadgi_dir: candidate,
                });
            }
        }

        Err(ChadgiError::UserError(format!(
            "no {} directory found in '{}' or any parent directory.\n\n\
             Run chadgi from inside a ChadGI project, or pass --dir <path-to-.chadgi>.",
            CHADGI_DIR_NAME,
            start.display()
        )))
    }

    /// Build a context from an explicit `.chadgi/` directory.
    ///
    /// The directory must exist; it is not created.
    pub fn from_chadgi_dir<P: AsRef<Path>>(chadgi_dir: P) -> Result<Self> {
        let chadgi_dir = chadgi_dir.as_ref();
        if !chadgi_dir.is_dir() {
            return Err(ChadgiError::UserError(format!(
                "ChadGI directory '{}' does not exist",
                chadgi_dir.display()
            )));
        }

        let project_root = chadgi_dir
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| chadgi_dir.to_path_buf());

        Ok(Self {
            project_root,
            chadgi_dir: chadgi_dir.to_path_buf(),
        })
    }

    /// Get the path to the config file.
    pub fn config_path(&self) -> PathBuf {
        self.chadgi_dir.join(CONFIG_FILE_NAME)
    }

    /// Load the project config, falling back to defaults when absent.
    pub fn load_config(&self) -> Result<Config> {
        Config::load_or_default(self.config_path())
    }

    /// Get the lock directory for the given config.
    pub fn locks_dir(&self, config: &Config) -> PathBuf {
        config.resolve_locks_dir(&self.chadgi_dir)
    }

    /// Get the path to the events directory.
    pub fn events_dir(&self) -> PathBuf {
        self.chadgi_dir.join("events")
    }

    /// Get the path to the events log file.
    pub fn events_file(&self) -> PathBuf {
        self.events_dir().join("events.ndjson")
    }
}

/// Resolve the context from an explicit `--dir` if given, otherwise from the cwd.
pub fn resolve_context(dir: Option<&Path>) -> Result<ProjectContext> {
    match dir {
        Some(dir) => ProjectContext::from_chadgi_dir(dir),
        None => ProjectContext::resolve(),
    }
}
