//! Credential comparison and session hash derivation.
//!
//! Password storage policy is not this crate's concern: the engine only asks
//! a [`CredentialMatcher`] whether a candidate matches the stored credential.

use chrono::NaiveDateTime;
use rand::Rng;
use sha2::{Digest, Sha256};

use crate::security::DATE_TIME_FORMAT;

/// Predicate deciding whether a candidate password matches a stored
/// credential.
///
/// # Example
/// ```
/// use engarde_core::security::crypto::{CredentialMatcher, Sha256Matcher};
///
/// let matcher = Sha256Matcher;
/// let stored = Sha256Matcher::digest("secret");
/// assert!(matcher.matches("secret", &stored));
/// assert!(!matcher.matches("guess", &stored));
/// ```
pub trait CredentialMatcher: Send + Sync {
    fn matches(&self, candidate: &str, stored: &str) -> bool;
}

/// Compares the candidate with the stored value as-is.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainTextMatcher;

impl CredentialMatcher for PlainTextMatcher {
    fn matches(&self, candidate: &str, stored: &str) -> bool {
        constant_time_eq(candidate.as_bytes(), stored.as_bytes())
    }
}

/// Stored credentials are lowercase hex SHA-256 digests of the password.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sha256Matcher;

impl Sha256Matcher {
    /// Digest a password the way this matcher expects it stored.
    pub fn digest(password: &str) -> String {
        format!("{:x}", Sha256::digest(password.as_bytes()))
    }
}

impl CredentialMatcher for Sha256Matcher {
    fn matches(&self, candidate: &str, stored: &str) -> bool {
        let digest = Self::digest(candidate);
        constant_time_eq(digest.as_bytes(), stored.trim().to_ascii_lowercase().as_bytes())
    }
}

impl<F> CredentialMatcher for F
where
    F: Fn(&str, &str) -> bool + Send + Sync,
{
    fn matches(&self, candidate: &str, stored: &str) -> bool {
        self(candidate, stored)
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Length of a session hash, in hex characters.
pub const SESSION_HASH_LEN: usize = 64;

/// Derive a fresh session hash from the login, profile and login time.
///
/// A random nonce is mixed in, so two sessions opened in the same second
/// never share a hash.
pub fn session_hash(login: &str, profile: &str, login_date: NaiveDateTime) -> String {
    let nonce: [u8; 16] = rand::thread_rng().gen();
    let mut hasher = Sha256::new();
    hasher.update(login.as_bytes());
    hasher.update(profile.as_bytes());
    hasher.update(login_date.format(DATE_TIME_FORMAT).to_string().as_bytes());
    hasher.update(nonce);
    format!("{:x}", hasher.finalize())
}

/// Whether `value` has the shape of a session hash.
pub fn is_session_hash(value: &str) -> bool {
    value.len() == SESSION_HASH_LEN && value.bytes().all(|b| b.is_ascii_hexdigit())
}
