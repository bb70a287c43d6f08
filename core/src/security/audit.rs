//! Security audit: event stream and durable activity log.
//!
//! Two outputs are kept apart:
//! - [`AuditLogger`] fans [`SecurityEvent`]s out to handlers (tracing, a
//!   closure, an in-memory buffer). Nothing is persisted.
//! - [`ActivityLog`] appends [`ActivityEntry`]s to one record per login and
//!   day, under `log/activity/<login>_<yyyymmdd>`.
//!
//! # Example
//!
//! ```ignore
//! use engarde_core::security::audit::{AuditLogger, SecurityEvent, SecurityEventType};
//!
//! let audit = AuditLogger::with_tracing().with_handler(|event| {
//!     metrics.count(event.event_type.to_string());
//! });
//!
//! audit.log(SecurityEvent::new(SecurityEventType::IpBlocked, now).ip_address("10.0.0.7"));
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::NaiveDateTime;
use rand::Rng;
use serde::{Deserialize, Serialize, Serializer};
use tracing::{error, info, warn};

use crate::error::StoreError;
use crate::security::lock::KeyLocks;
use crate::security::status::TypeOfActivity;
use crate::security::store::{
    load_json, login_record_name, save_json, Namespace, RecordKey, RecordStore,
};

// =============================================================================
// Security Events
// =============================================================================

/// Security event types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecurityEventType {
    // Authentication
    /// Credentials accepted
    AuthenticationSuccess,
    /// Unknown login or wrong password
    AuthenticationFailure,

    // Abuse ledger
    /// An IP reached its failure threshold
    IpBlocked,
    /// A login reached its failure threshold
    LoginBlocked,
    /// An expired block was lifted
    BlockCleared,

    // Sessions
    SessionCreated,
    SessionRestored,
    SessionRenewed,
    SessionClosed,
    SessionExpired,
    /// A credential did not match its session record
    SessionRejected,

    // Authorization
    AccessGranted,
    AccessDenied,

    /// Application-defined event
    Custom(String),
}

impl fmt::Display for SecurityEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SecurityEventType::AuthenticationSuccess => write!(f, "AUTHENTICATION_SUCCESS"),
            SecurityEventType::AuthenticationFailure => write!(f, "AUTHENTICATION_FAILURE"),
            SecurityEventType::IpBlocked => write!(f, "IP_BLOCKED"),
            SecurityEventType::LoginBlocked => write!(f, "LOGIN_BLOCKED"),
            SecurityEventType::BlockCleared => write!(f, "BLOCK_CLEARED"),
            SecurityEventType::SessionCreated => write!(f, "SESSION_CREATED"),
            SecurityEventType::SessionRestored => write!(f, "SESSION_RESTORED"),
            SecurityEventType::SessionRenewed => write!(f, "SESSION_RENEWED"),
            SecurityEventType::SessionClosed => write!(f, "SESSION_CLOSED"),
            SecurityEventType::SessionExpired => write!(f, "SESSION_EXPIRED"),
            SecurityEventType::SessionRejected => write!(f, "SESSION_REJECTED"),
            SecurityEventType::AccessGranted => write!(f, "ACCESS_GRANTED"),
            SecurityEventType::AccessDenied => write!(f, "ACCESS_DENIED"),
            SecurityEventType::Custom(name) => write!(f, "CUSTOM_{}", name.to_uppercase()),
        }
    }
}

impl SecurityEventType {
    /// Severity used when the event doesn't override it.
    pub fn default_severity(&self) -> SecurityEventSeverity {
        match self {
            SecurityEventType::AuthenticationSuccess
            | SecurityEventType::BlockCleared
            | SecurityEventType::SessionCreated
            | SecurityEventType::SessionRestored
            | SecurityEventType::SessionRenewed
            | SecurityEventType::SessionClosed
            | SecurityEventType::AccessGranted
            | SecurityEventType::Custom(_) => SecurityEventSeverity::Info,

            SecurityEventType::SessionExpired | SecurityEventType::AccessDenied => {
                SecurityEventSeverity::Warning
            }

            SecurityEventType::AuthenticationFailure | SecurityEventType::SessionRejected => {
                SecurityEventSeverity::Error
            }

            SecurityEventType::IpBlocked | SecurityEventType::LoginBlocked => {
                SecurityEventSeverity::Critical
            }
        }
    }
}

/// Severity level of security events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum SecurityEventSeverity {
    #[default]
    Info,
    Warning,
    Error,
    /// Abuse thresholds reached
    Critical,
}

impl fmt::Display for SecurityEventSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SecurityEventSeverity::Info => write!(f, "INFO"),
            SecurityEventSeverity::Warning => write!(f, "WARNING"),
            SecurityEventSeverity::Error => write!(f, "ERROR"),
            SecurityEventSeverity::Critical => write!(f, "CRITICAL"),
        }
    }
}

fn serialize_display<T: fmt::Display, S: Serializer>(
    value: &T,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.collect_str(value)
}

/// A security audit event.
#[derive(Debug, Clone, Serialize)]
pub struct SecurityEvent {
    /// Unique event ID
    pub id: String,
    /// Request time the event belongs to
    #[serde(with = "crate::security::datetime")]
    pub timestamp: NaiveDateTime,
    #[serde(serialize_with = "serialize_display")]
    pub event_type: SecurityEventType,
    #[serde(serialize_with = "serialize_display")]
    pub severity: SecurityEventSeverity,
    pub login: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub application: Option<String>,
    pub route: Option<String>,
    /// Additional details
    pub details: BTreeMap<String, String>,
    /// Failure reason
    pub error: Option<String>,
}

impl SecurityEvent {
    pub fn new(event_type: SecurityEventType, timestamp: NaiveDateTime) -> Self {
        Self {
            id: generate_event_id(timestamp),
            timestamp,
            severity: event_type.default_severity(),
            event_type,
            login: None,
            ip_address: None,
            user_agent: None,
            application: None,
            route: None,
            details: BTreeMap::new(),
            error: None,
        }
    }

    pub fn login(mut self, login: impl Into<String>) -> Self {
        self.login = Some(login.into());
        self
    }

    pub fn ip_address(mut self, ip: impl Into<String>) -> Self {
        self.ip_address = Some(ip.into());
        self
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    pub fn application(mut self, application: impl Into<String>) -> Self {
        self.application = Some(application.into());
        self
    }

    pub fn route(mut self, route: impl Into<String>) -> Self {
        self.route = Some(route.into());
        self
    }

    /// Override the default severity.
    pub fn severity(mut self, severity: SecurityEventSeverity) -> Self {
        self.severity = severity;
        self
    }

    pub fn detail(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.details.insert(key.into(), value.to_string());
        self
    }

    pub fn error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    /// Format the event as a single log line.
    pub fn to_log_line(&self) -> String {
        let mut parts = vec![
            format!("[{}]", self.severity),
            format!("[{}]", self.event_type),
        ];

        if let Some(ref login) = self.login {
            parts.push(format!("login={}", login));
        }
        if let Some(ref ip) = self.ip_address {
            parts.push(format!("ip={}", ip));
        }
        if let Some(ref application) = self.application {
            parts.push(format!("application={}", application));
        }
        if let Some(ref route) = self.route {
            parts.push(format!("route={}", route));
        }
        if let Some(ref error) = self.error {
            parts.push(format!("error=\"{}\"", error));
        }
        for (k, v) in &self.details {
            parts.push(format!("{}={}", k, v));
        }

        parts.join(" ")
    }
}

fn generate_event_id(timestamp: NaiveDateTime) -> String {
    let random: u32 = rand::thread_rng().gen();
    format!("{:x}-{:08x}", timestamp.and_utc().timestamp(), random)
}

// =============================================================================
// Handlers
// =============================================================================

/// Receives every event logged through an [`AuditLogger`].
pub trait SecurityEventHandler: Send + Sync {
    fn handle(&self, event: &SecurityEvent);
}

/// Emits events as `tracing` records, mapping severity to level.
#[derive(Debug, Default)]
pub struct TracingHandler {
    min_severity: SecurityEventSeverity,
}

impl TracingHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set minimum severity to emit.
    pub fn min_severity(mut self, severity: SecurityEventSeverity) -> Self {
        self.min_severity = severity;
        self
    }
}

impl SecurityEventHandler for TracingHandler {
    fn handle(&self, event: &SecurityEvent) {
        if event.severity < self.min_severity {
            return;
        }
        let line = event.to_log_line();
        match event.severity {
            SecurityEventSeverity::Info => info!(target: "engarde::audit", event_id = %event.id, "{}", line),
            SecurityEventSeverity::Warning => warn!(target: "engarde::audit", event_id = %event.id, "{}", line),
            SecurityEventSeverity::Error | SecurityEventSeverity::Critical => {
                error!(target: "engarde::audit", event_id = %event.id, "{}", line)
            }
        }
    }
}

/// Handler that calls a closure.
pub struct ClosureHandler<F>
where
    F: Fn(&SecurityEvent) + Send + Sync,
{
    handler: F,
}

impl<F> ClosureHandler<F>
where
    F: Fn(&SecurityEvent) + Send + Sync,
{
    pub fn new(handler: F) -> Self {
        Self { handler }
    }
}

impl<F> SecurityEventHandler for ClosureHandler<F>
where
    F: Fn(&SecurityEvent) + Send + Sync,
{
    fn handle(&self, event: &SecurityEvent) {
        (self.handler)(event);
    }
}

/// Keeps the last events in memory.
#[derive(Clone)]
pub struct MemoryEventBuffer {
    events: Arc<Mutex<Vec<SecurityEvent>>>,
    max_events: usize,
}

impl Default for MemoryEventBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryEventBuffer {
    pub fn new() -> Self {
        Self {
            events: Arc::new(Mutex::new(Vec::new())),
            max_events: 1000,
        }
    }

    pub fn max_events(mut self, max: usize) -> Self {
        self.max_events = max;
        self
    }

    pub fn events(&self) -> Vec<SecurityEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Types of the buffered events, oldest first.
    pub fn event_types(&self) -> Vec<SecurityEventType> {
        self.events()
            .into_iter()
            .map(|event| event.event_type)
            .collect()
    }

    pub fn clear(&self) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl SecurityEventHandler for MemoryEventBuffer {
    fn handle(&self, event: &SecurityEvent) {
        let mut events = self.events.lock().unwrap_or_else(PoisonError::into_inner);
        events.push(event.clone());
        if events.len() > self.max_events {
            events.remove(0);
        }
    }
}

/// Dispatches security events to its handlers.
#[derive(Clone)]
pub struct AuditLogger {
    handlers: Vec<Arc<dyn SecurityEventHandler>>,
    enabled: bool,
}

impl Default for AuditLogger {
    fn default() -> Self {
        Self::new()
    }
}

impl AuditLogger {
    /// A logger with no handlers.
    pub fn new() -> Self {
        Self {
            handlers: Vec::new(),
            enabled: true,
        }
    }

    /// A logger forwarding to `tracing`.
    pub fn with_tracing() -> Self {
        Self::new().add_handler(TracingHandler::new())
    }

    pub fn add_handler<H: SecurityEventHandler + 'static>(mut self, handler: H) -> Self {
        self.handlers.push(Arc::new(handler));
        self
    }

    /// Add a closure as event handler.
    pub fn with_handler<F>(self, handler: F) -> Self
    where
        F: Fn(&SecurityEvent) + Send + Sync + 'static,
    {
        self.add_handler(ClosureHandler::new(handler))
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn log(&self, event: SecurityEvent) {
        if !self.enabled {
            return;
        }
        for handler in &self.handlers {
            handler.handle(&event);
        }
    }
}

// =============================================================================
// Activity Log
// =============================================================================

/// An activity to append to the current user's log.
///
/// Identity fields (login, profile, IP...) are filled by the engine from the
/// authenticated session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Activity {
    pub activity: TypeOfActivity,
    pub route: Option<String>,
    pub method: Option<String>,
    pub details: BTreeMap<String, String>,
}

impl Activity {
    pub fn new(activity: TypeOfActivity) -> Self {
        Self {
            activity,
            route: None,
            method: None,
            details: BTreeMap::new(),
        }
    }

    /// Browsing a route inside a session.
    pub fn browse() -> Self {
        Self::new(TypeOfActivity::Browse)
    }

    /// Override the route of the request context.
    pub fn route(mut self, route: impl Into<String>) -> Self {
        self.route = Some(route.into());
        self
    }

    pub fn method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    pub fn detail(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }
}

/// One persisted activity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ActivityEntry {
    pub activity: TypeOfActivity,
    #[serde(with = "crate::security::datetime")]
    pub date_time: NaiveDateTime,
    pub login: String,
    pub profile: String,
    pub application: String,
    #[serde(rename = "IP")]
    pub ip: String,
    pub user_agent: String,
    #[serde(default)]
    pub route: Option<String>,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub details: BTreeMap<String, String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ActivityDay {
    entries: Vec<ActivityEntry>,
}

/// Append-only per-login, per-day activity records.
#[derive(Clone)]
pub struct ActivityLog {
    store: Arc<dyn RecordStore>,
    locks: KeyLocks,
}

impl ActivityLog {
    pub fn new(store: Arc<dyn RecordStore>, locks: KeyLocks) -> Self {
        Self { store, locks }
    }

    /// Key of the record holding `login`'s activity on the day of `at`.
    pub fn key_for(login: &str, at: NaiveDateTime) -> RecordKey {
        RecordKey::new(
            Namespace::Activity,
            format!("{}_{}", login_record_name(login), at.format("%Y%m%d")),
        )
    }

    /// Append `entry` to its day record; returns the number of entries
    /// recorded that day.
    pub fn append(&self, entry: ActivityEntry) -> Result<usize, StoreError> {
        let key = Self::key_for(&entry.login, entry.date_time);
        self.locks.exclusive(&key, || {
            let mut day: ActivityDay = load_json(&*self.store, &key)?.unwrap_or_default();
            day.entries.push(entry);
            save_json(&*self.store, &key, &day)?;
            Ok(day.entries.len())
        })
    }

    /// Entries of `login` on the day of `at`, oldest first.
    pub fn entries(&self, login: &str, at: NaiveDateTime) -> Result<Vec<ActivityEntry>, StoreError> {
        let day: Option<ActivityDay> = load_json(&*self.store, &Self::key_for(login, at))?;
        Ok(day.map(|day| day.entries).unwrap_or_default())
    }
}
