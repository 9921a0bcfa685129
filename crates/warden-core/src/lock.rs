//! Cross-platform exclusive file locking.
//!
//! A hook process acquires the lock for a sidecar `.lock` file, does its
//! read-modify-write on the real data file, then drops the guard. `fs2`
//! gives one call site (`lock_exclusive`/`unlock`) that compiles to a
//! POSIX range lock or a Windows mandatory byte-range lock depending on
//! target, so nothing above this module branches on platform.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use fs2::FileExt;

use crate::error::{WardenError, WardenResult};

/// An exclusively held lock on a `.lock` sidecar file.
///
/// Unlocks and removes the sidecar on drop, so a panicking hook never
/// leaves a stale lock behind for the next invocation to block on forever
/// (advisory locks are released by the OS when the fd closes regardless,
/// but the sidecar file itself would otherwise linger).
pub struct LockGuard {
    file: File,
    path: PathBuf,
}

impl LockGuard {
    /// Open (creating if necessary) the `.lock` file beside `data_path` and
    /// block until an exclusive lock on it is granted.
    pub fn acquire(data_path: &Path) -> WardenResult<Self> {
        let lock_path = sidecar_path(data_path);
        if let Some(parent) = lock_path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| WardenError::Io {
                path: parent.display().to_string(),
                source,
            })?;
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)
            .map_err(|source| WardenError::Lock {
                path: lock_path.display().to_string(),
                source,
            })?;
        file.lock_exclusive().map_err(|source| WardenError::Lock {
            path: lock_path.display().to_string(),
            source,
        })?;
        Ok(Self {
            file,
            path: lock_path,
        })
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
        let _ = std::fs::remove_file(&self.path);
    }
}

fn sidecar_path(data_path: &Path) -> PathBuf {
    let mut os_string = data_path.as_os_str().to_owned();
    os_string.push(".lock");
    PathBuf::from(os_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn acquire_creates_and_then_removes_sidecar() {
        let dir = TempDir::new().unwrap();
        let data_path = dir.path().join("session.json");
        let lock_path = sidecar_path(&data_path);
        {
            let _guard = LockGuard::acquire(&data_path).unwrap();
            assert!(lock_path.exists());
        }
        assert!(!lock_path.exists());
    }

    #[test]
    fn sequential_acquisitions_both_succeed() {
        let dir = TempDir::new().unwrap();
        let data_path = dir.path().join("session.json");
        {
            let _first = LockGuard::acquire(&data_path).unwrap();
        }
        let _second = LockGuard::acquire(&data_path).unwrap();
    }
}
