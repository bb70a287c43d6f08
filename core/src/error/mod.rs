//! Error types raised by the security engine.
//!
//! Policy denials (blocked IP, wrong password, disabled account) are never
//! errors: they are reported through the engine's status values. Only broken
//! configuration and persistence failures end up here.

mod config_error;
mod store_error;

pub use config_error::ConfigError;
pub use store_error::StoreError;
