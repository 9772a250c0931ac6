//! Atomic filesystem operations for chadgi.
//!
//! Lock files live on directories shared between workers (network volumes,
//! synced checkouts), so no reader may ever observe a half-written record.
//!
//! # Implementation Strategy
//!
//! Both primitives stage content in a uniquely named temporary file in the
//! target's directory and fsync it before publishing:
//! - [`atomic_write`] publishes with `rename()`, replacing any existing file.
//! - [`create_exclusive`] publishes with `hard_link()`, which fails if the
//!   target already exists, so exactly one of several racing creators wins.
//!
//! Temporary files are named `.{filename}.{pid}.{suffix}.tmp`. The per-process
//! suffix keeps concurrent writers on different hosts from clobbering each
//! other's staging files.

use crate::error::{ChadgiError, Result};
use rand::Rng;
use rand::distributions::Alphanumeric;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Outcome of an exclusive create.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    /// The file did not exist and now holds the new content.
    Created,
    /// Another file already occupies the path; nothing was written.
    AlreadyExists,
}

/// Atomically write bytes to a file, replacing it if present.
///
/// The target is never in a partial state: readers see either the previous
/// content or the new content.
pub fn atomic_write<P: AsRef<Path>>(path: P, content: &[u8]) -> Result<()> {
    let path = path.as_ref();
    ensure_parent(path)?;

    let temp_path = generate_temp_path(path)?;
    write_and_sync(&temp_path, content)?;

    fs::rename(&temp_path, path).map_err(|e| {
        let _ = fs::remove_file(&temp_path);
        ChadgiError::StorageError(format!(
            "failed to atomically replace '{}': {}",
            path.display(),
            e
        ))
    })?;

    sync_parent(path);
    Ok(())
}

/// Create a file with the given content only if it does not already exist.
///
/// Returns [`CreateOutcome::AlreadyExists`] instead of an error when the path
/// is taken. Filesystems without hard-link support fall back to an
/// exclusive `create_new` open followed by write and fsync.
pub fn create_exclusive<P: AsRef<Path>>(path: P, content: &[u8]) -> Result<CreateOutcome> {
    let path = path.as_ref();
    ensure_parent(path)?;

    let temp_path = generate_temp_path(path)?;
    write_and_sync(&temp_path, content)?;

    let linked = fs::hard_link(&temp_path, path);
    let _ = fs::remove_file(&temp_path);

    match linked {
        Ok(()) => {
            sync_parent(path);
            Ok(CreateOutcome::Created)
        }
        Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(CreateOutcome::AlreadyExists),
        Err(e) => {
            debug!(path = %path.display(), error = %e, "hard link unavailable, using create_new");
            create_new_direct(path, content)
        }
    }
}

fn create_new_direct(path: &Path, content: &[u8]) -> Result<CreateOutcome> {
    let mut file = match OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {
            return Ok(CreateOutcome::AlreadyExists);
        }
        Err(e) => {
            return Err(ChadgiError::StorageError(format!(
                "failed to create '{}': {}",
                path.display(),
                e
            )));
        }
    };

    file.write_all(content)
        .and_then(|_| file.sync_all())
        .map_err(|e| {
            let _ = fs::remove_file(path);
            ChadgiError::StorageError(format!("failed to write '{}': {}", path.display(), e))
        })?;

    sync_parent(path);
    Ok(CreateOutcome::Created)
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
        && !parent.exists()
    {
        fs::create_dir_all(parent).map_err(|e| {
            ChadgiError::StorageError(format!(
                "failed to create parent directory '{}': {}",
                parent.display(),
                e
            ))
        })?;
    }
    Ok(())
}

/// Generate a unique temporary file path in the same directory as the target.
fn generate_temp_path(target: &Path) -> Result<PathBuf> {
    let parent = target.parent().unwrap_or(Path::new("."));
    let filename = target
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| ChadgiError::StorageError("invalid file path".to_string()))?;

    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(8)
        .map(char::from)
        .collect();

    let temp_name = format!(".{}.{}.{}.tmp", filename, std::process::id(), suffix);
    Ok(parent.join(temp_name))
}

/// Write content to a file and sync to disk.
fn write_and_sync(path: &Path, content: &[u8]) -> Result<()> {
    let mut file = File::create(path).map_err(|e| {
        ChadgiError::StorageError(format!(
            "failed to create temporary file '{}': {}",
            path.display(),
            e
        ))
    })?;

    file.write_all(content).map_err(|e| {
        let _ = fs::remove_file(path);
        ChadgiError::StorageError(format!("failed to write to temporary file: {}", e))
    })?;

    file.sync_all().map_err(|e| {
        let _ = fs::remove_file(path);
        ChadgiError::StorageError(format!("failed to sync temporary file to disk: {}", e))
    })?;

    Ok(())
}

/// Persist the directory entry. Best effort.
#[cfg(unix)]
fn sync_parent(path: &Path) {
    if let Some(parent) = path.parent()
        && let Ok(dir) = File::open(parent)
    {
        let _ = dir.sync_all();
    }
}

/// Directories cannot be opened for syncing on Windows.
#[cfg(not(unix))]
fn sync_parent(_path: &Path) {}
