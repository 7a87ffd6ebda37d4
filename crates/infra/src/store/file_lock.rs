//! Cross-process advisory lock on the data file's sibling lock file

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use mailvault_domain::{MailVaultError, Result};
use tracing::warn;

/// An exclusive advisory lock, held for the duration of one store operation.
///
/// Uses OS-level file locking (`flock` on Unix, `LockFileEx` on Windows),
/// which the kernel releases even if the process crashes. The lock file
/// itself carries no data and is never meaningfully read.
pub(crate) struct FileLockGuard {
    file: File,
    path: PathBuf,
}

impl FileLockGuard {
    /// Block until the exclusive lock on `path` is acquired.
    pub(crate) fn acquire(path: &Path) -> Result<Self> {
        let file = OpenOptions::new().create(true).write(true).open(path).map_err(|e| {
            MailVaultError::Storage(format!(
                "failed to open lock file {}: {e}",
                path.display()
            ))
        })?;

        file.lock_exclusive().map_err(|e| {
            MailVaultError::Storage(format!("failed to lock {}: {e}", path.display()))
        })?;

        Ok(Self { file, path: path.to_path_buf() })
    }
}

impl Drop for FileLockGuard {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            warn!(path = %self.path.display(), error = %e, "failed to release file lock");
        }
    }
}
