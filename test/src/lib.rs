//! Fixtures shared by the EnGarde integration suites.
//!
//! A [`DataRoot`] is a temporary security-data directory laid out the way
//! the engine expects it, with helpers to seed users and permissions and to
//! inspect the records the engine writes.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde_json::Value;
use tempfile::TempDir;

use engarde_core::error::StoreError;
use engarde_core::security::{
    FileStore, Namespace, ProfileBinding, RecordStore, RoutePermissions, UserDirectory,
    UserRecord,
};
use engarde_core::security::store::save_json;

/// Temporary data root, removed on drop.
pub struct DataRoot {
    dir: TempDir,
}

impl DataRoot {
    /// Create the root with its `log`, `users` and `sessions` directories.
    pub fn new() -> io::Result<Self> {
        let dir = tempfile::tempdir()?;
        for sub in ["log", "users", "sessions"] {
            fs::create_dir_all(dir.path().join(sub))?;
        }
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Absolute path of a file below the root.
    pub fn file(&self, relative: &str) -> PathBuf {
        self.dir.path().join(relative)
    }

    pub fn store(&self) -> FileStore {
        FileStore::new(self.path())
    }

    pub fn add_user(&self, user: &UserRecord) -> Result<(), StoreError> {
        save_json(&self.store(), &UserDirectory::key_for(&user.login), user)
    }

    pub fn set_permissions(
        &self,
        application: &str,
        permissions: &RoutePermissions,
    ) -> Result<(), StoreError> {
        permissions.save(&self.store(), application)
    }

    /// Decoded JSON of a record file, `None` if it doesn't exist.
    pub fn read_json(&self, relative: &str) -> Option<Value> {
        let bytes = fs::read(self.file(relative)).ok()?;
        serde_json::from_slice(&bytes).ok()
    }

    /// Write raw contents to a file below the root.
    pub fn write_raw(&self, relative: &str, contents: &str) -> io::Result<()> {
        let path = self.file(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, contents)
    }

    /// Names of the session records currently stored.
    pub fn session_files(&self) -> Vec<String> {
        self.store()
            .keys(Namespace::Sessions, "")
            .unwrap_or_default()
    }
}

/// A user bound to one application profile.
pub fn user(login: &str, password: &str, application: &str, profile: &str) -> UserRecord {
    UserRecord::new(login, password).with_profile(binding(application, profile, true, true))
}

pub fn binding(application: &str, profile: &str, active: bool, default: bool) -> ProfileBinding {
    ProfileBinding {
        application: application.to_string(),
        profile: profile.to_string(),
        active,
        default,
    }
}
