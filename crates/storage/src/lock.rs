//! Single-process ownership of the data root.

use crate::{Result, StorageError};
use fs2::FileExt;
use std::fs::{self, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

/// Advisory exclusive lock on `<root>/recordroute.pid`.
///
/// Held for the process lifetime; released (and the file removed) on drop.
pub struct PidLock {
    file: fs::File,
    path: PathBuf,
}

impl PidLock {
    pub fn acquire(path: &Path) -> Result<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|e| StorageError::io(path, e))?;

        if file.try_lock_exclusive().is_err() {
            let mut holder = String::new();
            let _ = file.read_to_string(&mut holder);
            return Err(StorageError::AlreadyLocked(
                holder.trim().to_string(),
            ));
        }

        file.set_len(0).map_err(|e| StorageError::io(path, e))?;
        write!(file, "{}", std::process::id()).map_err(|e| StorageError::io(path, e))?;
        file.sync_all().map_err(|e| StorageError::io(path, e))?;

        tracing::debug!(path = %path.display(), pid = std::process::id(), "pid lock acquired");
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }
}

impl Drop for PidLock {
    fn drop(&mut self) {
        let _ = fs2::FileExt::unlock(&self.file);
        let _ = fs::remove_file(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_acquire_writes_pid() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("recordroute.pid");
        let _lock = PidLock::acquire(&path).unwrap();
        let contents = fs::read_to_string(&path).unwrap();
        assert_eq!(contents, std::process::id().to_string());
    }

    #[test]
    fn test_second_acquire_fails() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("recordroute.pid");
        let _lock = PidLock::acquire(&path).unwrap();
        assert!(matches!(
            PidLock::acquire(&path),
            Err(StorageError::AlreadyLocked(_))
        ));
    }

    #[test]
    fn test_released_on_drop() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("recordroute.pid");
        {
            let _lock = PidLock::acquire(&path).unwrap();
        }
        assert!(!path.exists());
        let _lock = PidLock::acquire(&path).unwrap();
    }
}
