//! User directory: loads user records by login.
//!
//! # Features
//! - Records stored under `users/<login>` in any [`RecordStore`]
//! - Resolution of the profile bound to the current application
//! - Derived state reset on every load
//!
//! # Example
//! ```rust,ignore
//! use engarde_core::security::user_details::UserDirectory;
//!
//! let directory = UserDirectory::new(store, "site");
//! if let Some(user) = directory.load("ana")? {
//!     println!("profile: {:?}", user.profile_in_use());
//! }
//! ```

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::security::session::SessionRecord;
use crate::security::store::{load_json, login_record_name, Namespace, RecordKey, RecordStore};

/// Association of a user with one application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ProfileBinding {
    /// Application name
    pub application: String,
    /// Profile granted in that application
    pub profile: String,
    /// Whether the binding is enabled
    pub active: bool,
    /// Preferred binding when several match the application
    #[serde(default)]
    pub default: bool,
}

/// A user as stored in the directory.
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct UserRecord {
    pub login: String,
    /// Stored credential, compared by a `CredentialMatcher`
    pub password: String,
    /// Domain-level switch; an inactive user can't use any application
    pub active: bool,
    #[serde(default)]
    pub profiles: Vec<ProfileBinding>,

    #[serde(skip)]
    profile_in_use: Option<ProfileBinding>,
    #[serde(skip)]
    session: Option<SessionRecord>,
}

impl UserRecord {
    pub fn new(login: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            login: login.into(),
            password: password.into(),
            active: true,
            profiles: Vec::new(),
            profile_in_use: None,
            session: None,
        }
    }

    /// Add a profile binding.
    pub fn with_profile(mut self, binding: ProfileBinding) -> Self {
        self.profiles.push(binding);
        self
    }

    /// Set the domain-level active flag.
    pub fn active(mut self, active: bool) -> Self {
        self.active = active;
        self
    }

    /// Binding selected for the current application, if any.
    pub fn profile_in_use(&self) -> Option<&ProfileBinding> {
        self.profile_in_use.as_ref()
    }

    /// Session attached to this user during the current request.
    pub fn session(&self) -> Option<&SessionRecord> {
        self.session.as_ref()
    }

    pub(crate) fn set_session(&mut self, session: Option<SessionRecord>) {
        self.session = session;
    }

    /// Recompute derived state for `application`.
    ///
    /// The default binding among the matching ones wins, otherwise the first
    /// match does.
    fn resolve_for(&mut self, application: &str) {
        self.profile_in_use = None;
        self.session = None;

        let matching: Vec<&ProfileBinding> = self
            .profiles
            .iter()
            .filter(|binding| binding.application == application)
            .collect();
        let chosen = matching
            .iter()
            .find(|binding| binding.default)
            .or_else(|| matching.first());
        self.profile_in_use = chosen.map(|binding| (*binding).clone());
    }
}

impl fmt::Debug for UserRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserRecord")
            .field("login", &self.login)
            .field("password", &"[REDACTED]")
            .field("active", &self.active)
            .field("profiles", &self.profiles)
            .field("profile_in_use", &self.profile_in_use)
            .field("session", &self.session)
            .finish()
    }
}

/// Read access to the user records of one application.
#[derive(Clone)]
pub struct UserDirectory {
    store: Arc<dyn RecordStore>,
    application: String,
}

impl UserDirectory {
    pub fn new(store: Arc<dyn RecordStore>, application: impl Into<String>) -> Self {
        Self {
            store,
            application: application.into(),
        }
    }

    /// Key of a user record.
    pub fn key_for(login: &str) -> RecordKey {
        RecordKey::new(Namespace::Users, login_record_name(login))
    }

    /// Load a user by login.
    ///
    /// Returns `Ok(None)` when no record exists, or when the stored record
    /// belongs to another login that happens to sanitize to the same name.
    pub fn load(&self, login: &str) -> Result<Option<UserRecord>, StoreError> {
        let key = Self::key_for(login);
        let Some(mut user) = load_json::<UserRecord>(&*self.store, &key)? else {
            return Ok(None);
        };
        if user.login.trim().to_lowercase() != login.trim().to_lowercase() {
            return Ok(None);
        }
        user.resolve_for(&self.application);
        Ok(Some(user))
    }
}
