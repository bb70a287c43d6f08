//! Session security and brute-force protection.
//!
//! # Module Structure
//!
//! - `context` - Per-request context and policy (SecurityContext, SecurityPolicy)
//! - `status` - Login and browse status values
//! - `store` - Key/value persistence of security records (FileStore, MemoryStore)
//! - `lock` - Per-key exclusive scopes (KeyLocks)
//! - `ledger` - Failed-attempt counters and blocks per IP and login (AbuseLedger)
//! - `user_details` - User records and profile bindings (UserDirectory)
//! - `session` - Authenticated session records (SessionStore)
//! - `permission` - Ant-style route permissions per profile
//! - `audit` - Security events and the per-user activity log
//! - `cookie` - Credential carriers (MemoryCarrier, ActixCookieCarrier)
//! - `crypto` - Credential matchers and session hashes
//! - `engine` - The login/session state machine (SessionSecurityEngine)

pub mod audit;
pub mod context;
pub mod cookie;
pub mod crypto;
mod datetime;
pub mod engine;
pub mod ledger;
pub mod lock;
pub mod permission;
pub mod session;
pub mod status;
pub mod store;
pub mod user_details;

// Re-exports for convenience
pub use audit::{
    Activity, ActivityEntry, ActivityLog, AuditLogger, MemoryEventBuffer, SecurityEvent,
    SecurityEventHandler, SecurityEventSeverity, SecurityEventType, TracingHandler,
};
pub use context::{SecurityContext, SecurityContextBuilder, SecurityPolicy, TEST_ENVIRONMENT};
pub use cookie::{ActixCookieCarrier, Credential, CredentialCarrier, MemoryCarrier};
pub use crypto::{CredentialMatcher, PlainTextMatcher, Sha256Matcher};
pub use datetime::DATE_TIME_FORMAT;
pub use engine::SessionSecurityEngine;
pub use ledger::{AbuseLedger, BlockCheck, SuspectRecord, SuspectSubject};
pub use lock::KeyLocks;
pub use permission::{RouteMatcher, RoutePermissions};
pub use session::{SessionRecord, SessionStore};
pub use status::{BrowseStatus, LoginStatus, TypeOfActivity};
pub use store::{FileStore, MemoryStore, Namespace, RecordKey, RecordStore};
pub use user_details::{ProfileBinding, UserDirectory, UserRecord};
