//! Helpers shared by tests across the workspace.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, OnceLock};
use std::time::{SystemTime, UNIX_EPOCH};

static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
static TEST_DIR_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Runs `run` with `key` set (or removed) while holding a process-wide lock, then restores
/// the previous value. Environment mutation in tests must go through here.
pub fn with_env_var<R>(key: &str, value: Option<&str>, run: impl FnOnce() -> R) -> R {
    with_env_vars(&[(key, value)], run)
}

/// Like [`with_env_var`] for several variables at once, all under the same lock.
pub fn with_env_vars<R>(vars: &[(&str, Option<&str>)], run: impl FnOnce() -> R) -> R {
    let lock = ENV_LOCK.get_or_init(|| Mutex::new(()));
    let _guard = lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    let _restore: Vec<EnvRestore> = vars
        .iter()
        .map(|(key, value)| EnvRestore::set(key, *value))
        .collect();
    run()
}

struct EnvRestore {
    key: String,
    original: Option<OsString>,
}

impl EnvRestore {
    fn set(key: &str, value: Option<&str>) -> Self {
        let original = std::env::var_os(key);
        match value {
            Some(value) => unsafe { std::env::set_var(key, value) },
            None => unsafe { std::env::remove_var(key) },
        }
        Self {
            key: key.to_owned(),
            original,
        }
    }
}

impl Drop for EnvRestore {
    fn drop(&mut self) {
        match self.original.take() {
            Some(original) => unsafe { std::env::set_var(&self.key, original) },
            None => unsafe { std::env::remove_var(&self.key) },
        }
    }
}

/// Scratch directory under the system temp dir, removed with everything in it on drop.
/// SQLite leaves `-wal`/`-shm` siblings next to a database, so tests get a directory
/// rather than a single file path.
pub struct TestDir {
    path: PathBuf,
}

impl TestDir {
    pub fn new(tag: &str) -> Self {
        let safe_tag: String = tag
            .chars()
            .map(|ch| if ch.is_ascii_alphanumeric() || ch == '-' { ch } else { '-' })
            .collect();
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        let counter = TEST_DIR_COUNTER.fetch_add(1, Ordering::Relaxed);
        let path = std::env::temp_dir().join(format!(
            "tree-survey-{safe_tag}-{}-{nanos}-{counter}",
            std::process::id()
        ));
        if let Err(err) = std::fs::create_dir_all(&path) {
            panic!("failed to create test directory {}: {err}", path.display());
        }
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn join(&self, name: &str) -> PathBuf {
        self.path.join(name)
    }
}

impl Drop for TestDir {
    fn drop(&mut self) {
        if let Err(err) = std::fs::remove_dir_all(&self.path) {
            if err.kind() != std::io::ErrorKind::NotFound {
                eprintln!(
                    "warning: failed to remove test directory {}: {err}",
                    self.path.display()
                );
            }
        }
    }
}
