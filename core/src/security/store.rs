//! Key/value persistence for security records.
//!
//! The engine never builds file paths itself. Every record lives under a
//! [`RecordKey`] (a namespace plus a sanitized name) in a [`RecordStore`],
//! so the same engine runs on the file system, in memory, or on any other
//! backend implementing the trait.
//!
//! # Layout of the file backend
//!
//! ```text
//! <root>/users/<login>.json
//! <root>/sessions/<login>_<hash>.json
//! <root>/log/suspect/<ip-or-login>.json
//! <root>/log/activity/<login>_<yyyymmdd>.json
//! <root>/permissions/<application>.json
//! ```

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock, PoisonError};

use rand::Rng;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::StoreError;

const RECORD_EXTENSION: &str = "json";

/// Group of records sharing a storage location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Namespace {
    /// User records, keyed by login
    Users,
    /// Active sessions, keyed by `login_hash`
    Sessions,
    /// Suspect (abuse) records, keyed by IP or login
    Suspects,
    /// Per-user activity log
    Activity,
    /// Route permissions, keyed by application
    Permissions,
}

impl Namespace {
    /// Directory of this namespace relative to the data root.
    pub fn relative_dir(&self) -> &'static str {
        match self {
            Namespace::Users => "users",
            Namespace::Sessions => "sessions",
            Namespace::Suspects => "log/suspect",
            Namespace::Activity => "log/activity",
            Namespace::Permissions => "permissions",
        }
    }
}

/// Address of one record.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RecordKey {
    namespace: Namespace,
    name: String,
}

impl RecordKey {
    pub fn new(namespace: Namespace, name: impl Into<String>) -> Self {
        Self {
            namespace,
            name: name.into(),
        }
    }

    pub fn namespace(&self) -> Namespace {
        self.namespace
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace.relative_dir(), self.name)
    }
}

/// Storage backend for security records.
///
/// Absence is a valid state: `get` returns `Ok(None)` and `delete` returns
/// `Ok(false)` for a missing record. Errors are reserved for real
/// persistence failures.
pub trait RecordStore: Send + Sync {
    /// Read the raw bytes of a record.
    fn get(&self, key: &RecordKey) -> Result<Option<Vec<u8>>, StoreError>;

    /// Create or replace a record.
    fn put(&self, key: &RecordKey, value: &[u8]) -> Result<(), StoreError>;

    /// Remove a record. Returns `true` if a record was removed.
    fn delete(&self, key: &RecordKey) -> Result<bool, StoreError>;

    /// Check whether a record exists.
    fn exists(&self, key: &RecordKey) -> Result<bool, StoreError> {
        Ok(self.get(key)?.is_some())
    }

    /// Names of the records of `namespace` starting with `prefix`.
    fn keys(&self, namespace: Namespace, prefix: &str) -> Result<Vec<String>, StoreError>;
}

/// Read and decode a JSON record.
pub fn load_json<T: DeserializeOwned>(
    store: &dyn RecordStore,
    key: &RecordKey,
) -> Result<Option<T>, StoreError> {
    match store.get(key)? {
        Some(bytes) => serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|source| StoreError::Codec {
                key: key.to_string(),
                source,
            }),
        None => Ok(None),
    }
}

/// Encode and write a JSON record.
pub fn save_json<T: Serialize>(
    store: &dyn RecordStore,
    key: &RecordKey,
    value: &T,
) -> Result<(), StoreError> {
    let bytes = serde_json::to_vec_pretty(value).map_err(|source| StoreError::Codec {
        key: key.to_string(),
        source,
    })?;
    store.put(key, &bytes)
}

/// Record name derived from a client IP: `.` and `:` become `_`.
pub fn ip_record_name(ip: &str) -> String {
    ip.replace(['.', ':'], "_")
}

/// Record name derived from a login: lower-cased, anything outside
/// `[a-z0-9._-]` replaced by `_`.
pub fn login_record_name(login: &str) -> String {
    static INVALID: OnceLock<Option<Regex>> = OnceLock::new();
    let mut name = login.trim().to_lowercase();
    if let Some(invalid) = INVALID.get_or_init(|| Regex::new(r"[^a-z0-9._-]").ok()) {
        name = invalid.replace_all(&name, "_").into_owned();
    }
    match name.as_str() {
        "" | "." | ".." => format!("_{}", name),
        _ => name,
    }
}

// =============================================================================
// File Store
// =============================================================================

/// Records stored as JSON files below a data root.
///
/// Writes go to a temporary file first and are renamed into place, so a
/// reader never sees a half-written record.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn dir_for(&self, namespace: Namespace) -> PathBuf {
        self.root.join(namespace.relative_dir())
    }

    fn path_for(&self, key: &RecordKey) -> Result<PathBuf, StoreError> {
        let name = key.name();
        if name.is_empty()
            || name == "."
            || name == ".."
            || name.contains(['/', '\\', '\0'])
        {
            return Err(StoreError::InvalidKey {
                key: key.to_string(),
            });
        }
        Ok(self
            .dir_for(key.namespace())
            .join(format!("{}.{}", name, RECORD_EXTENSION)))
    }
}

fn io_error(key: &RecordKey, source: std::io::Error) -> StoreError {
    StoreError::Io {
        key: key.to_string(),
        source,
    }
}

impl RecordStore for FileStore {
    fn get(&self, key: &RecordKey) -> Result<Option<Vec<u8>>, StoreError> {
        let path = self.path_for(key)?;
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_error(key, e)),
        }
    }

    fn put(&self, key: &RecordKey, value: &[u8]) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| io_error(key, e))?;
        }

        let nonce: u32 = rand::thread_rng().gen();
        let tmp = path.with_extension(format!("{}.{:08x}.tmp", RECORD_EXTENSION, nonce));
        if let Err(e) = fs::write(&tmp, value) {
            let _ = fs::remove_file(&tmp);
            return Err(io_error(key, e));
        }
        fs::rename(&tmp, &path).map_err(|e| {
            let _ = fs::remove_file(&tmp);
            io_error(key, e)
        })
    }

    fn delete(&self, key: &RecordKey) -> Result<bool, StoreError> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(io_error(key, e)),
        }
    }

    fn exists(&self, key: &RecordKey) -> Result<bool, StoreError> {
        Ok(self.path_for(key)?.is_file())
    }

    fn keys(&self, namespace: Namespace, prefix: &str) -> Result<Vec<String>, StoreError> {
        let dir = self.dir_for(namespace);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_error(&RecordKey::new(namespace, prefix), e)),
        };

        let suffix = format!(".{}", RECORD_EXTENSION);
        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| io_error(&RecordKey::new(namespace, prefix), e))?;
            let file_name = entry.file_name();
            let Some(file_name) = file_name.to_str() else {
                continue;
            };
            if let Some(name) = file_name.strip_suffix(&suffix) {
                if name.starts_with(prefix) {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }
}

// =============================================================================
// Memory Store
// =============================================================================

/// Records kept in process memory. Useful for tests and embedding.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<RecordKey, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl RecordStore for MemoryStore {
    fn get(&self, key: &RecordKey) -> Result<Option<Vec<u8>>, StoreError> {
        let records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(records.get(key).cloned())
    }

    fn put(&self, key: &RecordKey, value: &[u8]) -> Result<(), StoreError> {
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        records.insert(key.clone(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &RecordKey) -> Result<bool, StoreError> {
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(records.remove(key).is_some())
    }

    fn keys(&self, namespace: Namespace, prefix: &str) -> Result<Vec<String>, StoreError> {
        let records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<String> = records
            .keys()
            .filter(|k| k.namespace() == namespace && k.name().starts_with(prefix))
            .map(|k| k.name().to_string())
            .collect();
        names.sort();
        Ok(names)
    }
}
