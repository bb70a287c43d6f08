//! Per-request security context and the policy it carries.
//!
//! The context is supplied once per request, before any check runs, and is
//! immutable afterwards. Building it validates every field, so an engine
//! can only ever see a complete and coherent configuration.
//!
//! # Example
//!
//! ```rust,ignore
//! use engarde_core::security::{SecurityContext, SecurityPolicy};
//!
//! let policy = SecurityPolicy::new()
//!     .session_timeout(30)
//!     .allowed_fault_by_login(5)
//!     .login_block_timeout(15);
//!
//! let context = SecurityContext::builder()
//!     .ip("10.0.0.7")
//!     .data_root("/var/lib/site/security")
//!     .environment("production")
//!     .application("site")
//!     .user_agent("Mozilla/5.0")
//!     .policy(policy)
//!     .build()?;
//! ```

use std::fs;
use std::net::IpAddr;
use std::path::{Path, PathBuf};

use chrono::{Local, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Environment tag of unit-test runs. The credential carrier commit is
/// treated as successful in this environment.
pub const TEST_ENVIRONMENT: &str = "UTEST";

/// Directories that must exist below the data root.
const REQUIRED_DIRS: [&str; 3] = ["log", "users", "sessions"];

// =============================================================================
// Security Policy
// =============================================================================

/// Thresholds and timeouts of the engine. All values are minutes or counts
/// and must be greater than zero.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct SecurityPolicy {
    /// Whether a session is extended on every restored request
    pub session_renew: bool,
    /// Session lifetime, in minutes
    pub session_timeout: u32,
    /// Failed logins allowed from one IP
    #[serde(rename = "AllowedFaultByIP")]
    pub allowed_fault_by_ip: u32,
    /// IP block duration, in minutes
    #[serde(rename = "IPBlockTimeout")]
    pub ip_block_timeout: u32,
    /// Successive wrong passwords allowed for one login
    pub allowed_fault_by_login: u32,
    /// Login block duration, in minutes
    pub login_block_timeout: u32,
}

impl Default for SecurityPolicy {
    fn default() -> Self {
        Self {
            session_renew: false,
            session_timeout: 30,
            allowed_fault_by_ip: 20,
            ip_block_timeout: 60,
            allowed_fault_by_login: 5,
            login_block_timeout: 15,
        }
    }
}

impl SecurityPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set whether sessions renew on every request.
    pub fn session_renew(mut self, renew: bool) -> Self {
        self.session_renew = renew;
        self
    }

    /// Set the session lifetime in minutes.
    pub fn session_timeout(mut self, minutes: u32) -> Self {
        self.session_timeout = minutes;
        self
    }

    /// Set the failed attempts allowed per IP.
    pub fn allowed_fault_by_ip(mut self, faults: u32) -> Self {
        self.allowed_fault_by_ip = faults;
        self
    }

    /// Set the IP block duration in minutes.
    pub fn ip_block_timeout(mut self, minutes: u32) -> Self {
        self.ip_block_timeout = minutes;
        self
    }

    /// Set the wrong passwords allowed per login.
    pub fn allowed_fault_by_login(mut self, faults: u32) -> Self {
        self.allowed_fault_by_login = faults;
        self
    }

    /// Set the login block duration in minutes.
    pub fn login_block_timeout(mut self, minutes: u32) -> Self {
        self.login_block_timeout = minutes;
        self
    }

    /// Reject any zero threshold or timeout.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let fields = [
            ("session_timeout", self.session_timeout),
            ("allowed_fault_by_ip", self.allowed_fault_by_ip),
            ("ip_block_timeout", self.ip_block_timeout),
            ("allowed_fault_by_login", self.allowed_fault_by_login),
            ("login_block_timeout", self.login_block_timeout),
        ];
        for (field, value) in fields {
            if value == 0 {
                return Err(ConfigError::NotPositive { field });
            }
        }
        Ok(())
    }

    /// Load and validate a policy from a JSON file.
    ///
    /// Missing keys take their default value.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::PolicyRead {
            path: path.to_path_buf(),
            source,
        })?;
        let policy: SecurityPolicy =
            serde_json::from_str(&raw).map_err(|source| ConfigError::PolicyFormat {
                path: path.to_path_buf(),
                source,
            })?;
        policy.validate()?;
        Ok(policy)
    }
}

// =============================================================================
// Security Context
// =============================================================================

/// Everything the engine knows about the current request.
#[derive(Debug, Clone)]
pub struct SecurityContext {
    ip: IpAddr,
    data_root: PathBuf,
    now: NaiveDateTime,
    environment: String,
    application: String,
    user_agent: String,
    route: Option<String>,
    policy: SecurityPolicy,
}

impl SecurityContext {
    pub fn builder() -> SecurityContextBuilder {
        SecurityContextBuilder::default()
    }

    pub fn ip(&self) -> &IpAddr {
        &self.ip
    }

    pub fn data_root(&self) -> &Path {
        &self.data_root
    }

    pub fn now(&self) -> NaiveDateTime {
        self.now
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn application(&self) -> &str {
        &self.application
    }

    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    /// Route requested by the UA, if the outer layer resolved one.
    pub fn route(&self) -> Option<&str> {
        self.route.as_deref()
    }

    pub fn policy(&self) -> &SecurityPolicy {
        &self.policy
    }

    /// Whether this request runs in the unit-test environment.
    pub fn is_test_environment(&self) -> bool {
        self.environment == TEST_ENVIRONMENT
    }
}

/// Builder for [`SecurityContext`].
#[derive(Debug, Default)]
pub struct SecurityContextBuilder {
    ip: String,
    data_root: Option<PathBuf>,
    now: Option<NaiveDateTime>,
    environment: String,
    application: String,
    user_agent: String,
    route: Option<String>,
    policy: SecurityPolicy,
}

impl SecurityContextBuilder {
    /// Set the resolved client IP.
    pub fn ip(mut self, ip: impl Into<String>) -> Self {
        self.ip = ip.into();
        self
    }

    /// Set the root directory of the security data.
    pub fn data_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.data_root = Some(path.into());
        self
    }

    /// Set the request time. Defaults to the local clock at build time.
    pub fn now(mut self, now: NaiveDateTime) -> Self {
        self.now = Some(now);
        self
    }

    /// Set the environment tag.
    pub fn environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = environment.into();
        self
    }

    /// Set the application name.
    pub fn application(mut self, application: impl Into<String>) -> Self {
        self.application = application.into();
        self
    }

    /// Set the user agent string.
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Set the requested route.
    pub fn route(mut self, route: impl Into<String>) -> Self {
        self.route = Some(route.into());
        self
    }

    /// Set the thresholds and timeouts.
    pub fn policy(mut self, policy: SecurityPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Validate every field and build the context.
    pub fn build(self) -> Result<SecurityContext, ConfigError> {
        let ip_text = self.ip.trim();
        if ip_text.is_empty() {
            return Err(ConfigError::Empty { field: "ip" });
        }
        let ip: IpAddr = ip_text.parse().map_err(|_| ConfigError::InvalidIp {
            ip: ip_text.to_string(),
        })?;

        let data_root = self
            .data_root
            .ok_or(ConfigError::Empty { field: "data_root" })?;
        if !data_root.is_dir() {
            return Err(ConfigError::MissingDirectory { path: data_root });
        }
        for dir in REQUIRED_DIRS {
            let path = data_root.join(dir);
            if !path.is_dir() {
                return Err(ConfigError::MissingDirectory { path });
            }
        }

        for (field, value) in [
            ("environment", &self.environment),
            ("application", &self.application),
            ("user_agent", &self.user_agent),
        ] {
            if value.trim().is_empty() {
                return Err(ConfigError::Empty { field });
            }
        }

        self.policy.validate()?;

        Ok(SecurityContext {
            ip,
            data_root,
            now: self.now.unwrap_or_else(|| Local::now().naive_local()),
            environment: self.environment,
            application: self.application,
            user_agent: self.user_agent,
            route: self.route,
            policy: self.policy,
        })
    }
}
