//! Status values of the login/browse state machine.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Progress of the UA through the login sequence.
///
/// Starts at [`LoginStatus::Anonymous`]; every check moves it forward or
/// parks it on a denial. Denials are never reported as errors, so the
/// caller can answer with one generic "access denied".
#[allow(clippy::upper_case_acronyms)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum LoginStatus {
    /// No check has run yet
    #[default]
    Anonymous,
    /// The login is unknown
    AccountDoesNotExist,
    /// The client IP is blocked
    BlockedIP,
    /// This request tripped the IP block threshold
    YourIPIsBlocked,
    /// The account is disabled for every application
    AccountDisabledForDomain,
    /// The account has no profile for this application
    AccountDoesNotExistInApplication,
    /// The account's profile for this application is disabled
    AccountDisabledForApplication,
    /// Login known, active and bound to this application
    AccountRecognizedAndActive,
    /// The login is blocked
    BlockedUser,
    /// Wrong password
    UnexpectedPassword,
    /// This request tripped the login block threshold
    AccountIsBlocked,
    /// Credentials verified, session not yet created
    WaitingApplicationAuthenticate,
    /// Session creation failed
    LoginFail,
    /// Authenticated session in place
    Authorized,
}

impl LoginStatus {
    /// Whether this status denies the UA.
    pub fn is_denied(&self) -> bool {
        !matches!(
            self,
            LoginStatus::Anonymous
                | LoginStatus::AccountRecognizedAndActive
                | LoginStatus::WaitingApplicationAuthenticate
                | LoginStatus::Authorized
        )
    }
}

impl fmt::Display for LoginStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Whether the UA may browse at all.
#[allow(clippy::upper_case_acronyms)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum BrowseStatus {
    /// Not evaluated yet
    #[default]
    Unchecked,
    /// The client IP is blocked
    BlockedIP,
    /// Authenticated session in place
    Authorized,
}

impl fmt::Display for BrowseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Kind of activity recorded in suspect and activity logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TypeOfActivity {
    /// A login attempt
    MakeLogin,
    /// A request made inside an authenticated session
    Browse,
    /// An explicit logout
    CloseSession,
}
