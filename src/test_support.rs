use std::path::{Path, PathBuf};
use std::sync::{LazyLock, Mutex, MutexGuard};
use tempfile::TempDir;

static CWD_LOCK: LazyLock<Mutex<()>> = LazyLock::new(|| Mutex::new(()));

pub(crate) struct DirGuard {
    original: PathBuf,
    _lock: MutexGuard<'static, ()>,
}

impl DirGuard {
    pub(crate) fn new(new_dir: &Path) -> Self {
        // Changing the process current working directory is global and not thread-safe.
        // Lock it so tests don't race even if a #[serial] annotation is missed.
        let lock = CWD_LOCK.lock().unwrap_or_else(|poison| poison.into_inner());
        let original = std::env::current_dir().unwrap();
        std::env::set_current_dir(new_dir).unwrap();
        Self {
            original,
            _lock: lock,
        }
    }
}

impl Drop for DirGuard {
    fn drop(&mut self) {
        let _ = std::env::set_current_dir(&self.original);
    }
}

/// Create a temporary project with an empty `.chadgi/` directory.
pub(crate) fn create_test_project() -> TempDir {
    let temp_dir = TempDir::new().unwrap();
    std::fs::create_dir_all(temp_dir.path().join(".chadgi")).unwrap();
    temp_dir
}

/// Create a temporary project with the given config file contents.
pub(crate) fn create_test_project_with_config(yaml: &str) -> TempDir {
    let temp_dir = create_test_project();
    std::fs::write(
        temp_dir.path().join(".chadgi").join("chadgi-config.yaml"),
        yaml,
    )
    .unwrap();
    temp_dir
}
