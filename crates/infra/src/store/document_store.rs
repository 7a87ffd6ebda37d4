//! Transactional JSON document store

use std::cell::RefCell;
use std::ffi::OsString;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use mailvault_domain::{Document, MailVaultError, Result};
use parking_lot::ReentrantMutex;
use tracing::debug;

use super::file_lock::FileLockGuard;

/// Durable, crash-safe store for the whole application dataset.
///
/// All operations serialize through two locking layers: a process-local
/// re-entrant lock and a blocking advisory lock on the sibling
/// `<file>.lock`. There is no finer-grained locking; a mutation sees the
/// document exactly as the previous lock holder left it.
pub struct DocumentStore {
    path: PathBuf,
    lock_path: PathBuf,
    guard: ReentrantMutex<RefCell<LockState>>,
}

/// Tracks nesting so a re-entrant call does not re-acquire (and deadlock on)
/// the advisory file lock.
struct LockState {
    depth: usize,
    file_lock: Option<FileLockGuard>,
}

struct DepthGuard<'a> {
    state: &'a RefCell<LockState>,
}

impl Drop for DepthGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.state.borrow_mut();
        state.depth -= 1;
        if state.depth == 0 {
            state.file_lock = None;
        }
    }
}

impl DocumentStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let lock_path = lock_path_for(&path);
        Self {
            path,
            lock_path,
            guard: ReentrantMutex::new(RefCell::new(LockState { depth: 0, file_lock: None })),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Guarantee the backing file exists and is well-formed.
    ///
    /// Writes a fresh default document when the file is absent or empty;
    /// normalizes and rewrites when collection keys are missing or mistyped.
    pub fn ensure_initialized(&self) -> Result<()> {
        self.with_locks(|| {
            self.load_or_init_locked()?;
            Ok(())
        })
    }

    /// Current document, with the same repair-on-read as initialization.
    pub fn read(&self) -> Result<Document> {
        self.with_locks(|| self.load_or_init_locked())
    }

    /// Unconditionally replace the persisted document.
    pub fn write(&self, doc: &Document) -> Result<()> {
        self.with_locks(|| self.write_locked(doc))
    }

    /// Run a mutation against the document under exclusive access.
    ///
    /// The document is persisted if and only if the mutation returns `Ok`;
    /// an error leaves the file byte-for-byte as it was and propagates to
    /// the caller unchanged. The locks are released either way.
    pub fn update<T>(&self, mutation: impl FnOnce(&mut Document) -> Result<T>) -> Result<T> {
        self.with_locks(|| {
            let mut doc = self.load_or_init_locked()?;
            let result = mutation(&mut doc)?;
            self.write_locked(&doc)?;
            Ok(result)
        })
    }

    fn with_locks<T>(&self, op: impl FnOnce() -> Result<T>) -> Result<T> {
        let guard = self.guard.lock();

        self.ensure_parent_dir()?;
        {
            let mut state = guard.borrow_mut();
            if state.depth == 0 {
                state.file_lock = Some(FileLockGuard::acquire(&self.lock_path)?);
            }
            state.depth += 1;
        }
        let _depth = DepthGuard { state: &*guard };

        op()
    }

    fn ensure_parent_dir(&self) -> Result<()> {
        let Some(parent) = self.path.parent() else { return Ok(()) };
        if parent.as_os_str().is_empty() {
            return Ok(());
        }
        fs::create_dir_all(parent).map_err(|e| {
            MailVaultError::Storage(format!(
                "failed to create data directory {}: {e}",
                parent.display()
            ))
        })
    }

    fn load_or_init_locked(&self) -> Result<Document> {
        let file_len = match fs::metadata(&self.path) {
            Ok(metadata) => metadata.len(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => 0,
            Err(e) => {
                return Err(MailVaultError::Storage(format!(
                    "failed to stat {}: {e}",
                    self.path.display()
                )))
            }
        };

        if file_len == 0 {
            let doc = Document::fresh();
            self.write_locked(&doc)?;
            debug!(path = %self.path.display(), "initialized fresh document");
            return Ok(doc);
        }

        let contents = fs::read_to_string(&self.path).map_err(|e| {
            MailVaultError::Storage(format!("failed to read {}: {e}", self.path.display()))
        })?;
        let root = serde_json::from_str(&contents).map_err(|e| {
            MailVaultError::Storage(format!("invalid JSON in {}: {e}", self.path.display()))
        })?;

        let (doc, changed) = Document::from_root(root)?;
        if changed {
            // Repairs persist immediately, even on a read-only call.
            self.write_locked(&doc)?;
            debug!(path = %self.path.display(), "normalized document collections");
        }

        Ok(doc)
    }

    /// Serialize deterministically and swap the file in atomically: write to
    /// a temp file in the same directory, flush to stable storage, then
    /// rename over the target.
    fn write_locked(&self, doc: &Document) -> Result<()> {
        let mut payload = serde_json::to_string_pretty(&doc.to_value()).map_err(|e| {
            MailVaultError::Storage(format!("failed to serialize document: {e}"))
        })?;
        payload.push('\n');

        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let file_name = self.path.file_name().and_then(|n| n.to_str()).unwrap_or("data");

        let mut tmp = tempfile::Builder::new()
            .prefix(&format!("{file_name}."))
            .suffix(".tmp")
            .tempfile_in(dir)
            .map_err(|e| {
                MailVaultError::Storage(format!(
                    "failed to create temp file in {}: {e}",
                    dir.display()
                ))
            })?;

        tmp.write_all(payload.as_bytes())
            .and_then(|_| tmp.flush())
            .and_then(|_| tmp.as_file().sync_all())
            .map_err(|e| MailVaultError::Storage(format!("failed to write document: {e}")))?;

        // NamedTempFile removes the temp file on drop if the rename fails.
        tmp.persist(&self.path).map_err(|e| {
            MailVaultError::Storage(format!(
                "failed to replace {}: {}",
                self.path.display(),
                e.error
            ))
        })?;

        Ok(())
    }
}

/// Sibling lock path: `data.json` → `data.json.lock`.
fn lock_path_for(path: &Path) -> PathBuf {
    let mut name: OsString =
        path.file_name().map(|n| n.to_os_string()).unwrap_or_else(|| OsString::from("data"));
    name.push(".lock");
    path.with_file_name(name)
}
