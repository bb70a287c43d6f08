use std::path::PathBuf;

use derive_more::{Display, Error};

/// Invalid or incomplete security configuration.
///
/// Raised once, when the per-request context or the policy is built. An
/// engine can never be constructed from a context that failed validation.
#[derive(Debug, Display, Error)]
pub enum ConfigError {
    /// A required text field was left empty.
    #[display("{field} must not be empty")]
    Empty {
        /// Name of the offending field
        field: &'static str,
    },

    /// The client address is not a valid IPv4 or IPv6 address.
    #[display("invalid client IP address: {ip}")]
    InvalidIp {
        /// The rejected value
        ip: String,
    },

    /// A numeric threshold or timeout is zero.
    #[display("{field} must be greater than zero")]
    NotPositive {
        /// Name of the offending field
        field: &'static str,
    },

    /// A directory required by the security data layout is missing.
    #[display("required directory does not exist: {}", path.display())]
    MissingDirectory {
        /// The missing directory
        path: PathBuf,
    },

    /// The policy file could not be read.
    #[display("cannot read policy file {}: {source}", path.display())]
    PolicyRead {
        /// Path of the policy file
        path: PathBuf,
        /// Underlying I/O error
        source: std::io::Error,
    },

    /// The policy file is not valid JSON for a policy.
    #[display("malformed policy file {}: {source}", path.display())]
    PolicyFormat {
        /// Path of the policy file
        path: PathBuf,
        /// Underlying decoding error
        source: serde_json::Error,
    },
}
