//! Per-key exclusive scopes.
//!
//! Every read-modify-write of a security record runs inside
//! [`KeyLocks::exclusive`] for that record's key. Two failed attempts for
//! the same IP therefore never read the same counter, and two logins of the
//! same user never both see "no session" before writing.
//!
//! Within a process the scope is a mutex per key. When a lock directory is
//! configured, an advisory file lock is taken as well so several processes
//! sharing one data root stay consistent.
//!
//! Lock files are never removed: one `<namespace>_<name>.lock` file stays in
//! the lock directory for every key ever locked. Deleting a lock file while
//! another process waits on it would let a third process lock a new file
//! under the same name. Operators may clear the directory while no engine is
//! running.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use fs2::FileExt;

use crate::error::StoreError;
use crate::security::store::RecordKey;

type Scope = Arc<Mutex<()>>;

/// Lock manager keyed by record key.
///
/// Cheap to clone; clones share the same scopes. All engines working on the
/// same store must share one `KeyLocks`.
#[derive(Debug, Clone, Default)]
pub struct KeyLocks {
    scopes: Arc<Mutex<HashMap<String, Scope>>>,
    lock_dir: Option<PathBuf>,
}

impl KeyLocks {
    /// In-process locking only.
    pub fn new() -> Self {
        Self::default()
    }

    /// Also take an advisory file lock in `dir` for every scope.
    pub fn with_lock_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.lock_dir = Some(dir.into());
        self
    }

    /// Run `operation` while holding the exclusive scope of `key`.
    pub fn exclusive<T>(
        &self,
        key: &RecordKey,
        operation: impl FnOnce() -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let scope_name = key.to_string();
        let scope = {
            let mut scopes = self.scopes.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(scopes.entry(scope_name.clone()).or_default())
        };

        let result = {
            let _guard = scope.lock().unwrap_or_else(PoisonError::into_inner);
            match self.lock_file(key) {
                Ok(file_lock) => {
                    let result = operation();
                    drop(file_lock);
                    result
                }
                Err(e) => Err(e),
            }
        };

        self.release(&scope_name, &scope);
        result
    }

    /// Number of scopes currently tracked.
    pub fn active_scopes(&self) -> usize {
        self.scopes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn lock_file(&self, key: &RecordKey) -> Result<Option<File>, StoreError> {
        let Some(dir) = &self.lock_dir else {
            return Ok(None);
        };
        let io_error = |source| StoreError::Io {
            key: key.to_string(),
            source,
        };

        fs::create_dir_all(dir).map_err(io_error)?;
        let path = dir.join(format!(
            "{}_{}.lock",
            key.namespace().relative_dir().replace('/', "_"),
            key.name()
        ));
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .map_err(io_error)?;
        FileExt::lock_exclusive(&file).map_err(io_error)?;
        Ok(Some(file))
    }

    fn release(&self, scope_name: &str, scope: &Scope) {
        let mut scopes = self.scopes.lock().unwrap_or_else(PoisonError::into_inner);
        // map + caller
        if Arc::strong_count(scope) == 2 {
            scopes.remove(scope_name);
        }
    }
}
