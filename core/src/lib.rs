//! # EnGarde
//!
//! Session security and brute-force protection for a user agent.
//!
//! The crate checks a client IP and login against a durable abuse ledger,
//! verifies credentials, and manages the authenticated session that follows:
//!
//! ```rust,ignore
//! use engarde_core::security::{MemoryCarrier, SecurityContext, SessionSecurityEngine};
//!
//! let context = SecurityContext::builder()
//!     .ip("192.168.0.10")
//!     .data_root("/var/lib/app/security")
//!     .environment("production")
//!     .application("site")
//!     .user_agent("Mozilla/5.0")
//!     .build()?;
//!
//! let mut engine = SessionSecurityEngine::new(context, MemoryCarrier::new());
//! if engine.check_valid_ip()?
//!     && engine.check_user_name("admin")?
//!     && engine.check_user_password("secret")?
//! {
//!     engine.init_authenticated_session()?;
//! }
//! ```

pub mod error;
pub mod security;
