//! Persisted authenticated sessions.
//!
//! # Features
//! - One record per session, keyed by `<login>_<hash>`
//! - At most one live session per login: creating a session removes the
//!   previous ones inside the login's exclusive scope
//! - Lookup by the hash carried in the UA's credential
//!
//! # Example
//! ```rust,ignore
//! use engarde_core::security::session::SessionStore;
//!
//! let sessions = SessionStore::new(store, locks);
//! sessions.replace_for_login(&record)?;
//!
//! // later request
//! let restored = sessions.load_by_hash("ana", &hash)?;
//! ```

use std::sync::Arc;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::StoreError;
use crate::security::crypto::is_session_hash;
use crate::security::lock::KeyLocks;
use crate::security::store::{
    load_json, login_record_name, save_json, Namespace, RecordKey, RecordStore,
};

// =============================================================================
// Session Record
// =============================================================================

/// Serializable state of one authenticated session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SessionRecord {
    /// Session hash
    pub hash: String,
    /// Application the session was opened for
    pub application: String,
    /// Time of the successful login
    #[serde(with = "crate::security::datetime")]
    pub login_date: NaiveDateTime,
    /// Expiry time
    #[serde(rename = "TimeOut", with = "crate::security::datetime")]
    pub time_out: NaiveDateTime,
    /// Whether the session is extended on every request
    pub renew: bool,
    pub login: String,
    pub profile: String,
    pub user_agent: String,
    #[serde(rename = "IP")]
    pub ip: String,
}

impl SessionRecord {
    /// Key this record is stored under.
    pub fn key(&self) -> RecordKey {
        SessionStore::key_for(&self.login, &self.hash)
    }

    /// Whether the session expired before `now`.
    pub fn is_expired(&self, now: NaiveDateTime) -> bool {
        self.time_out < now
    }
}

// =============================================================================
// Session Store
// =============================================================================

/// Creates, loads and deletes session records.
#[derive(Clone)]
pub struct SessionStore {
    store: Arc<dyn RecordStore>,
    locks: KeyLocks,
}

impl SessionStore {
    pub fn new(store: Arc<dyn RecordStore>, locks: KeyLocks) -> Self {
        Self { store, locks }
    }

    /// Key of the session `hash` of `login`.
    pub fn key_for(login: &str, hash: &str) -> RecordKey {
        RecordKey::new(
            Namespace::Sessions,
            format!("{}_{}", login_record_name(login), hash),
        )
    }

    fn login_scope(login: &str) -> RecordKey {
        RecordKey::new(Namespace::Sessions, login_record_name(login))
    }

    /// Write a session record.
    pub fn create(&self, record: &SessionRecord) -> Result<(), StoreError> {
        save_json(&*self.store, &record.key(), record)
    }

    /// Load a session by login and hash.
    pub fn load_by_hash(&self, login: &str, hash: &str) -> Result<Option<SessionRecord>, StoreError> {
        if !is_session_hash(hash) {
            return Ok(None);
        }
        let record: Option<SessionRecord> = load_json(&*self.store, &Self::key_for(login, hash))?;
        Ok(record.filter(|record| record.hash == hash))
    }

    /// Hashes of the sessions stored for `login`.
    pub fn hashes_of(&self, login: &str) -> Result<Vec<String>, StoreError> {
        let prefix = format!("{}_", login_record_name(login));
        let hashes = self
            .store
            .keys(Namespace::Sessions, &prefix)?
            .into_iter()
            .filter_map(|name| name.strip_prefix(&prefix).map(str::to_string))
            .filter(|hash| is_session_hash(hash))
            .collect();
        Ok(hashes)
    }

    /// Delete one session record. Returns `true` if a record was removed.
    pub fn delete(&self, key: &RecordKey) -> Result<bool, StoreError> {
        self.store.delete(key)
    }

    /// Delete every session of `login`.
    ///
    /// Succeeds when nothing existed as well.
    pub fn delete_for_login(&self, login: &str) -> Result<bool, StoreError> {
        self.locks
            .exclusive(&Self::login_scope(login), || self.delete_all_unlocked(login))?;
        Ok(true)
    }

    fn delete_all_unlocked(&self, login: &str) -> Result<usize, StoreError> {
        let mut removed = 0;
        for hash in self.hashes_of(login)? {
            if self.store.delete(&Self::key_for(login, &hash))? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Replace every session of the record's login by `record`.
    pub fn replace_for_login(&self, record: &SessionRecord) -> Result<(), StoreError> {
        self.locks.exclusive(&Self::login_scope(&record.login), || {
            let removed = self.delete_all_unlocked(&record.login)?;
            if removed > 0 {
                debug!(login = %record.login, removed, "previous sessions removed");
            }
            self.create(record)
        })
    }

    /// Overwrite a session that is still stored.
    ///
    /// Returns `false` when the session was closed or replaced meanwhile.
    pub fn update(&self, record: &SessionRecord) -> Result<bool, StoreError> {
        self.locks.exclusive(&Self::login_scope(&record.login), || {
            let key = record.key();
            if !self.store.exists(&key)? {
                return Ok(false);
            }
            save_json(&*self.store, &key, record)?;
            Ok(true)
        })
    }
}
