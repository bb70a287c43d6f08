//! Credential carried by the user agent between requests.
//!
//! The engine writes one opaque value, `userLogin=..&profileInUse=..&sessionHash=..`
//! (form-urlencoded), with an expiry, and asks the carrier to commit it. How
//! the value reaches the UA is the carrier's business:
//!
//! - [`MemoryCarrier`] keeps it in memory (tests, non-HTTP callers)
//! - [`ActixCookieCarrier`] turns it into an actix-web [`Cookie`]
//!
//! # Example
//!
//! ```rust
//! use engarde_core::security::cookie::Credential;
//!
//! let credential = Credential::new("ana", "admin", "0f".repeat(32));
//! let value = credential.encode();
//! assert_eq!(Credential::parse(&value), Some(credential));
//! ```

use actix_web::cookie::time::OffsetDateTime;
use actix_web::cookie::{Cookie, SameSite};
use chrono::NaiveDateTime;
use tracing::warn;
use url::form_urlencoded;

const LOGIN_FIELD: &str = "userLogin";
const PROFILE_FIELD: &str = "profileInUse";
const HASH_FIELD: &str = "sessionHash";

// =============================================================================
// Credential
// =============================================================================

/// The triple identifying an authenticated session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub login: String,
    pub profile: String,
    pub session_hash: String,
}

impl Credential {
    pub fn new(
        login: impl Into<String>,
        profile: impl Into<String>,
        session_hash: impl Into<String>,
    ) -> Self {
        Self {
            login: login.into(),
            profile: profile.into(),
            session_hash: session_hash.into(),
        }
    }

    /// Form-urlencoded value stored in the carrier.
    pub fn encode(&self) -> String {
        form_urlencoded::Serializer::new(String::new())
            .append_pair(LOGIN_FIELD, &self.login)
            .append_pair(PROFILE_FIELD, &self.profile)
            .append_pair(HASH_FIELD, &self.session_hash)
            .finish()
    }

    /// Parse a carrier value. `None` unless all three fields are present and
    /// non-empty.
    pub fn parse(value: &str) -> Option<Self> {
        let (mut login, mut profile, mut session_hash) = (None, None, None);
        for (name, value) in form_urlencoded::parse(value.as_bytes()) {
            let slot = match name.as_ref() {
                LOGIN_FIELD => &mut login,
                PROFILE_FIELD => &mut profile,
                HASH_FIELD => &mut session_hash,
                _ => continue,
            };
            *slot = Some(value.into_owned());
        }

        let credential = Self {
            login: login.filter(|v| !v.is_empty())?,
            profile: profile.filter(|v| !v.is_empty())?,
            session_hash: session_hash.filter(|v| !v.is_empty())?,
        };
        Some(credential)
    }
}

// =============================================================================
// Carriers
// =============================================================================

/// Get/set an opaque credential value and its expiry, then commit it to the
/// user agent.
pub trait CredentialCarrier: Send {
    fn set_value(&mut self, value: String);

    fn value(&self) -> Option<&str>;

    fn set_expires(&mut self, expires: NaiveDateTime);

    fn expires(&self) -> Option<NaiveDateTime>;

    /// Hand the current value to the user agent. Returns `false` when it
    /// could not be sent.
    fn commit(&mut self) -> bool;
}

/// In-memory carrier.
#[derive(Debug, Clone)]
pub struct MemoryCarrier {
    value: Option<String>,
    expires: Option<NaiveDateTime>,
    accept_commit: bool,
    commits: usize,
}

impl Default for MemoryCarrier {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCarrier {
    pub fn new() -> Self {
        Self {
            value: None,
            expires: None,
            accept_commit: true,
            commits: 0,
        }
    }

    /// A carrier seeded with a value received from the user agent.
    pub fn with_value(value: impl Into<String>) -> Self {
        Self {
            value: Some(value.into()),
            ..Self::new()
        }
    }

    /// A carrier whose commits always fail.
    pub fn failing() -> Self {
        Self {
            accept_commit: false,
            ..Self::new()
        }
    }

    /// Number of successful commits.
    pub fn commits(&self) -> usize {
        self.commits
    }
}

impl CredentialCarrier for MemoryCarrier {
    fn set_value(&mut self, value: String) {
        self.value = Some(value);
    }

    fn value(&self) -> Option<&str> {
        self.value.as_deref()
    }

    fn set_expires(&mut self, expires: NaiveDateTime) {
        self.expires = Some(expires);
    }

    fn expires(&self) -> Option<NaiveDateTime> {
        self.expires
    }

    fn commit(&mut self) -> bool {
        if self.accept_commit && self.value.is_some() {
            self.commits += 1;
            true
        } else {
            false
        }
    }
}

/// Carrier producing an actix-web cookie.
///
/// Expiry timestamps are interpreted as UTC. After a successful commit the
/// cookie is available through [`ActixCookieCarrier::cookie`] for the
/// response builder.
#[derive(Debug, Clone)]
pub struct ActixCookieCarrier {
    name: String,
    path: String,
    domain: Option<String>,
    secure: bool,
    http_only: bool,
    same_site: SameSite,
    value: Option<String>,
    expires: Option<NaiveDateTime>,
    committed: Option<Cookie<'static>>,
}

impl Default for ActixCookieCarrier {
    fn default() -> Self {
        Self::new("engarde")
    }
}

impl ActixCookieCarrier {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: "/".to_string(),
            domain: None,
            secure: true,
            http_only: true,
            same_site: SameSite::Lax,
            value: None,
            expires: None,
            committed: None,
        }
    }

    /// Seed the carrier with the cookie received on the request, if any.
    pub fn from_request_cookie(mut self, cookie: Option<&Cookie<'_>>) -> Self {
        self.value = cookie.map(|cookie| cookie.value().to_string());
        self
    }

    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    pub fn domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    /// Set whether the cookie requires HTTPS (default: true).
    pub fn secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    pub fn http_only(mut self, http_only: bool) -> Self {
        self.http_only = http_only;
        self
    }

    pub fn same_site(mut self, same_site: SameSite) -> Self {
        self.same_site = same_site;
        self
    }

    /// Cookie name to read from requests.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The cookie built by the last successful commit.
    pub fn cookie(&self) -> Option<&Cookie<'static>> {
        self.committed.as_ref()
    }
}

impl CredentialCarrier for ActixCookieCarrier {
    fn set_value(&mut self, value: String) {
        self.value = Some(value);
    }

    fn value(&self) -> Option<&str> {
        self.value.as_deref()
    }

    fn set_expires(&mut self, expires: NaiveDateTime) {
        self.expires = Some(expires);
    }

    fn expires(&self) -> Option<NaiveDateTime> {
        self.expires
    }

    fn commit(&mut self) -> bool {
        let Some(value) = self.value.clone() else {
            return false;
        };

        let mut cookie = Cookie::build(self.name.clone(), value)
            .path(self.path.clone())
            .http_only(self.http_only)
            .same_site(self.same_site)
            .secure(self.secure);

        if let Some(domain) = &self.domain {
            cookie = cookie.domain(domain.clone());
        }

        if let Some(expires) = self.expires {
            match OffsetDateTime::from_unix_timestamp(expires.and_utc().timestamp()) {
                Ok(expires) => cookie = cookie.expires(expires),
                Err(e) => {
                    warn!(cookie = %self.name, error = %e, "cookie expiry out of range");
                    return false;
                }
            }
        }

        self.committed = Some(cookie.finish());
        true
    }
}
