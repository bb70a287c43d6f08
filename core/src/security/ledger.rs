//! Abuse ledger: failed login attempts per IP and per login.
//!
//! Provides protection against brute-force attacks by counting failed
//! attempts in a sliding window and blocking the offending IP or login for
//! a while once a threshold is reached.
//!
//! Each key owns one [`SuspectRecord`]. The counter restarts at 1 when the
//! previous failure is older than the block window and grows otherwise.
//! Reaching the threshold blocks the key until `now + block_timeout`. A
//! blocked record found past its unblock date is deleted on the next check.
//!
//! # Example
//!
//! ```ignore
//! use engarde_core::security::ledger::{AbuseLedger, SuspectSubject};
//!
//! let key = AbuseLedger::ip_key("10.0.0.7");
//! if ledger.is_blocked(&key, now)?.blocked {
//!     return deny();
//! }
//!
//! let record = ledger.record_failure(&key, &SuspectSubject::ip("10.0.0.7"), now, 5, 15)?;
//! if record.blocked {
//!     // this failure tripped the block
//! }
//! ```

use std::sync::Arc;

use chrono::{Duration, NaiveDateTime};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::StoreError;
use crate::security::lock::KeyLocks;
use crate::security::status::TypeOfActivity;
use crate::security::store::{
    ip_record_name, load_json, login_record_name, save_json, Namespace, RecordKey, RecordStore,
};

/// Persisted failure counter of one IP or login.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SuspectRecord {
    /// Activity that failed
    pub activity: TypeOfActivity,
    /// Client address of the last failure
    #[serde(rename = "IP")]
    pub ip: String,
    /// Subject login, empty for IP records
    pub login: String,
    /// Failures in the current window
    pub counter: u32,
    /// Time of the last failure
    #[serde(with = "crate::security::datetime")]
    pub last_event_date_time: NaiveDateTime,
    /// Whether the key is blocked
    pub blocked: bool,
    /// End of the block window
    #[serde(with = "crate::security::datetime::option", default)]
    pub unblock_date: Option<NaiveDateTime>,
}

impl SuspectRecord {
    fn first(subject: &SuspectSubject, now: NaiveDateTime) -> Self {
        Self {
            activity: TypeOfActivity::MakeLogin,
            ip: subject.ip.clone(),
            login: subject.login.clone(),
            counter: 1,
            last_event_date_time: now,
            blocked: false,
            unblock_date: None,
        }
    }
}

/// Who a failure is recorded against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuspectSubject {
    pub ip: String,
    pub login: String,
}

impl SuspectSubject {
    /// A failure attributed to an IP only.
    pub fn ip(ip: impl Into<String>) -> Self {
        Self {
            ip: ip.into(),
            login: String::new(),
        }
    }

    /// A failure attributed to a login, seen from `ip`.
    pub fn login(ip: impl Into<String>, login: impl Into<String>) -> Self {
        Self {
            ip: ip.into(),
            login: login.into(),
        }
    }
}

/// Result of a block check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BlockCheck {
    /// The key is blocked right now
    pub blocked: bool,
    /// An expired block was found and removed by this check
    pub cleared: bool,
}

/// Durable per-key failure counters.
#[derive(Clone)]
pub struct AbuseLedger {
    store: Arc<dyn RecordStore>,
    locks: KeyLocks,
}

impl AbuseLedger {
    pub fn new(store: Arc<dyn RecordStore>, locks: KeyLocks) -> Self {
        Self { store, locks }
    }

    /// Key of the record tracking a client IP.
    pub fn ip_key(ip: &str) -> RecordKey {
        RecordKey::new(Namespace::Suspects, ip_record_name(ip))
    }

    /// Key of the record tracking a login.
    pub fn login_key(login: &str) -> RecordKey {
        RecordKey::new(Namespace::Suspects, login_record_name(login))
    }

    /// Read a record without touching it.
    pub fn get(&self, key: &RecordKey) -> Result<Option<SuspectRecord>, StoreError> {
        load_json(&*self.store, key)
    }

    /// Check whether `key` is blocked at `now`.
    ///
    /// A block whose unblock date has passed is removed and reported as
    /// `cleared`. A missing record means no prior abuse.
    pub fn is_blocked(&self, key: &RecordKey, now: NaiveDateTime) -> Result<BlockCheck, StoreError> {
        self.locks.exclusive(key, || {
            let Some(record) = load_json::<SuspectRecord>(&*self.store, key)? else {
                return Ok(BlockCheck::default());
            };
            if !record.blocked {
                return Ok(BlockCheck::default());
            }

            match record.unblock_date {
                Some(unblock_date) if unblock_date < now => {
                    self.store.delete(key)?;
                    info!(key = %key, %unblock_date, "block expired, suspect record removed");
                    Ok(BlockCheck {
                        blocked: false,
                        cleared: true,
                    })
                }
                _ => {
                    debug!(key = %key, "key is blocked");
                    Ok(BlockCheck {
                        blocked: true,
                        cleared: false,
                    })
                }
            }
        })
    }

    /// Record one failed attempt for `key` and return the updated record.
    ///
    /// The record is written unconditionally. A record that cannot be
    /// decoded is replaced by a fresh one.
    pub fn record_failure(
        &self,
        key: &RecordKey,
        subject: &SuspectSubject,
        now: NaiveDateTime,
        allowed_fault: u32,
        block_timeout: u32,
    ) -> Result<SuspectRecord, StoreError> {
        self.locks.exclusive(key, || {
            let existing = match load_json::<SuspectRecord>(&*self.store, key) {
                Ok(existing) => existing,
                Err(e) if e.is_malformed() => {
                    warn!(key = %key, error = %e, "discarding malformed suspect record");
                    None
                }
                Err(e) => return Err(e),
            };

            let mut record = match existing {
                None => SuspectRecord::first(subject, now),
                Some(mut record) => {
                    let elapsed = now
                        .signed_duration_since(record.last_event_date_time)
                        .num_minutes();
                    if elapsed > i64::from(block_timeout) {
                        record.counter = 1;
                    } else {
                        record.counter = record.counter.saturating_add(1);
                    }
                    record.ip = subject.ip.clone();
                    record.last_event_date_time = now;
                    record
                }
            };

            if record.counter >= allowed_fault {
                record.blocked = true;
                record.unblock_date = Some(now + Duration::minutes(i64::from(block_timeout)));
                warn!(
                    key = %key,
                    counter = record.counter,
                    unblock_date = ?record.unblock_date,
                    "failure threshold reached, key blocked"
                );
            } else {
                record.blocked = false;
                record.unblock_date = None;
                debug!(key = %key, counter = record.counter, "failure recorded");
            }

            save_json(&*self.store, key, &record)?;
            Ok(record)
        })
    }
}
