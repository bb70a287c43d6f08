//! Session security engine.
//!
//! One [`SessionSecurityEngine`] is built per request. It walks the login
//! state machine against the shared abuse ledger, user directory and session
//! store, and reports every decision through [`LoginStatus`] and
//! [`BrowseStatus`]:
//!
//! ```text
//! Anonymous
//!   check_valid_ip       -> BlockedIP
//!   check_user_name      -> AccountDoesNotExist | YourIPIsBlocked
//!                         | AccountDisabledForDomain
//!                         | AccountDoesNotExistInApplication
//!                         | AccountDisabledForApplication
//!                         | AccountRecognizedAndActive -> BlockedUser
//!   check_user_password  -> UnexpectedPassword | AccountIsBlocked
//!                         | WaitingApplicationAuthenticate
//!   init_authenticated_session -> LoginFail | Authorized
//! ```
//!
//! Operations return `Ok(false)` for a policy denial and `Err` when a
//! security record could not be read or written.
//!
//! # Example
//!
//! ```ignore
//! use engarde_core::security::{MemoryCarrier, SessionSecurityEngine};
//!
//! let mut engine = SessionSecurityEngine::new(context, MemoryCarrier::new());
//! if engine.check_valid_ip()? && engine.check_user_name(login)? && engine.check_user_password(password)? {
//!     engine.init_authenticated_session()?;
//! }
//!
//! // next request
//! let mut engine = SessionSecurityEngine::new(context, carrier);
//! if engine.restore_from_carrier()? && engine.check_permission_for_route()? {
//!     engine.register_log_activity(Activity::browse().method("GET"))?;
//! }
//! ```

use std::sync::Arc;

use chrono::{Duration, NaiveDateTime};
use tracing::{debug, info, warn};

use crate::error::StoreError;
use crate::security::audit::{
    Activity, ActivityEntry, ActivityLog, AuditLogger, SecurityEvent, SecurityEventType,
};
use crate::security::context::SecurityContext;
use crate::security::cookie::{Credential, CredentialCarrier};
use crate::security::crypto::{session_hash, CredentialMatcher, PlainTextMatcher};
use crate::security::ledger::{AbuseLedger, SuspectRecord, SuspectSubject};
use crate::security::lock::KeyLocks;
use crate::security::permission::RoutePermissions;
use crate::security::session::{SessionRecord, SessionStore};
use crate::security::status::{BrowseStatus, LoginStatus};
use crate::security::store::{FileStore, RecordKey, RecordStore};
use crate::security::user_details::{UserDirectory, UserRecord};

/// Directory of the advisory lock files, relative to the data root.
const LOCK_DIR: &str = "log/lock";

/// Authentication and session state machine for one request.
pub struct SessionSecurityEngine<C: CredentialCarrier> {
    context: SecurityContext,
    ip: String,
    store: Arc<dyn RecordStore>,
    ledger: AbuseLedger,
    directory: UserDirectory,
    sessions: SessionStore,
    activity: ActivityLog,
    carrier: C,
    matcher: Box<dyn CredentialMatcher>,
    audit: AuditLogger,
    permissions: Option<RoutePermissions>,
    user: Option<UserRecord>,
    login_status: LoginStatus,
    browse_status: BrowseStatus,
}

impl<C: CredentialCarrier> SessionSecurityEngine<C> {
    /// Engine over the file store rooted at the context's data root.
    ///
    /// Exclusive scopes are backed by advisory lock files, so engines built
    /// independently (in one process or several) still exclude each other.
    pub fn new(context: SecurityContext, carrier: C) -> Self {
        let root = context.data_root().to_path_buf();
        let locks = KeyLocks::new().with_lock_dir(root.join(LOCK_DIR));
        Self::with_store(context, Arc::new(FileStore::new(root)), locks, carrier)
    }

    /// Engine over any store. Engines sharing `store` must share `locks`.
    pub fn with_store(
        context: SecurityContext,
        store: Arc<dyn RecordStore>,
        locks: KeyLocks,
        carrier: C,
    ) -> Self {
        let ip = context.ip().to_string();
        let directory = UserDirectory::new(store.clone(), context.application());
        Self {
            ip,
            ledger: AbuseLedger::new(store.clone(), locks.clone()),
            directory,
            sessions: SessionStore::new(store.clone(), locks.clone()),
            activity: ActivityLog::new(store.clone(), locks),
            store,
            context,
            carrier,
            matcher: Box::new(PlainTextMatcher),
            audit: AuditLogger::with_tracing(),
            permissions: None,
            user: None,
            login_status: LoginStatus::default(),
            browse_status: BrowseStatus::default(),
        }
    }

    /// Replace the credential comparison (plain text by default).
    pub fn with_matcher(mut self, matcher: impl CredentialMatcher + 'static) -> Self {
        self.matcher = Box::new(matcher);
        self
    }

    /// Replace the audit logger (tracing only by default).
    pub fn with_audit_logger(mut self, audit: AuditLogger) -> Self {
        self.audit = audit;
        self
    }

    /// Use these permissions instead of the stored `permissions/<application>`
    /// record.
    pub fn with_route_permissions(mut self, permissions: RoutePermissions) -> Self {
        self.permissions = Some(permissions);
        self
    }

    pub fn context(&self) -> &SecurityContext {
        &self.context
    }

    pub fn login_status(&self) -> LoginStatus {
        self.login_status
    }

    pub fn browse_status(&self) -> BrowseStatus {
        self.browse_status
    }

    /// User loaded by `check_user_name` or `restore_session`.
    pub fn user(&self) -> Option<&UserRecord> {
        self.user.as_ref()
    }

    /// Session of the current user, once authenticated.
    pub fn session(&self) -> Option<&SessionRecord> {
        self.user.as_ref().and_then(UserRecord::session)
    }

    pub fn carrier(&self) -> &C {
        &self.carrier
    }

    pub fn into_carrier(self) -> C {
        self.carrier
    }

    fn now(&self) -> NaiveDateTime {
        self.context.now()
    }

    fn event(&self, event_type: SecurityEventType) -> SecurityEvent {
        let event = SecurityEvent::new(event_type, self.now())
            .ip_address(&self.ip)
            .user_agent(self.context.user_agent())
            .application(self.context.application());
        match self.context.route() {
            Some(route) => event.route(route),
            None => event,
        }
    }

    fn is_authorized(&self) -> bool {
        self.login_status == LoginStatus::Authorized
            && self.browse_status == BrowseStatus::Authorized
            && self.session().is_some()
    }

    fn record_ip_failure(&self) -> Result<SuspectRecord, StoreError> {
        let policy = self.context.policy();
        let record = self.ledger.record_failure(
            &AbuseLedger::ip_key(&self.ip),
            &SuspectSubject::ip(&self.ip),
            self.now(),
            policy.allowed_fault_by_ip,
            policy.ip_block_timeout,
        )?;
        if record.blocked {
            self.audit.log(
                self.event(SecurityEventType::IpBlocked)
                    .detail("counter", record.counter),
            );
        }
        Ok(record)
    }

    fn record_login_failure(&self, login: &str) -> Result<SuspectRecord, StoreError> {
        let policy = self.context.policy();
        let record = self.ledger.record_failure(
            &AbuseLedger::login_key(login),
            &SuspectSubject::login(&self.ip, login),
            self.now(),
            policy.allowed_fault_by_login,
            policy.login_block_timeout,
        )?;
        if record.blocked {
            self.audit.log(
                self.event(SecurityEventType::LoginBlocked)
                    .login(login)
                    .detail("counter", record.counter),
            );
        }
        Ok(record)
    }

    // =========================================================================
    // Login
    // =========================================================================

    /// Reject the request when the client IP is blocked.
    pub fn check_valid_ip(&mut self) -> Result<bool, StoreError> {
        let check = self
            .ledger
            .is_blocked(&AbuseLedger::ip_key(&self.ip), self.now())?;

        if check.cleared {
            self.audit.log(self.event(SecurityEventType::BlockCleared));
        }
        if check.blocked {
            self.login_status = LoginStatus::BlockedIP;
            self.browse_status = BrowseStatus::BlockedIP;
            debug!(ip = %self.ip, "request from blocked IP");
            return Ok(false);
        }
        Ok(true)
    }

    /// Identify the user and check it may use this application.
    ///
    /// An unknown login counts as a failure against the client IP.
    pub fn check_user_name(&mut self, login: &str) -> Result<bool, StoreError> {
        self.user = None;
        let login = login.trim();

        let found = if login.is_empty() {
            None
        } else {
            self.directory.load(login)?
        };
        let Some(user) = found else {
            self.login_status = LoginStatus::AccountDoesNotExist;
            let record = self.record_ip_failure()?;
            if record.blocked {
                self.login_status = LoginStatus::YourIPIsBlocked;
            }
            info!(ip = %self.ip, counter = record.counter, status = %self.login_status, "unknown login");
            self.audit.log(
                self.event(SecurityEventType::AuthenticationFailure)
                    .login(login)
                    .error("unknown login"),
            );
            return Ok(false);
        };

        self.login_status = if !user.active {
            LoginStatus::AccountDisabledForDomain
        } else {
            match user.profile_in_use() {
                None => LoginStatus::AccountDoesNotExistInApplication,
                Some(binding) if !binding.active => LoginStatus::AccountDisabledForApplication,
                Some(_) => LoginStatus::AccountRecognizedAndActive,
            }
        };
        if self.login_status != LoginStatus::AccountRecognizedAndActive {
            debug!(login = %user.login, status = %self.login_status, "login refused");
            return Ok(false);
        }

        let check = self
            .ledger
            .is_blocked(&AbuseLedger::login_key(&user.login), self.now())?;
        if check.cleared {
            self.audit
                .log(self.event(SecurityEventType::BlockCleared).login(&user.login));
        }
        let blocked = check.blocked;
        if blocked {
            self.login_status = LoginStatus::BlockedUser;
            debug!(login = %user.login, "login is blocked");
        }
        self.user = Some(user);
        Ok(!blocked)
    }

    /// Compare `candidate` with the loaded user's credential.
    ///
    /// Only runs right after a successful `check_user_name` or a previous
    /// mismatch. A mismatch counts as a failure against the login.
    pub fn check_user_password(&mut self, candidate: &str) -> Result<bool, StoreError> {
        if !matches!(
            self.login_status,
            LoginStatus::AccountRecognizedAndActive | LoginStatus::UnexpectedPassword
        ) {
            return Ok(false);
        }
        let Some(user) = &self.user else {
            return Ok(false);
        };
        let login = user.login.clone();

        if self.matcher.matches(candidate, &user.password) {
            self.login_status = LoginStatus::WaitingApplicationAuthenticate;
            debug!(login = %login, "credential accepted");
            self.audit
                .log(self.event(SecurityEventType::AuthenticationSuccess).login(&login));
            return Ok(true);
        }

        self.login_status = LoginStatus::UnexpectedPassword;
        let record = self.record_login_failure(&login)?;
        if record.blocked {
            self.login_status = LoginStatus::AccountIsBlocked;
        }
        info!(login = %login, counter = record.counter, status = %self.login_status, "wrong password");
        self.audit.log(
            self.event(SecurityEventType::AuthenticationFailure)
                .login(&login)
                .error("unexpected password"),
        );
        Ok(false)
    }

    /// Open the session of an authenticated user.
    ///
    /// Writes the credential to the carrier, commits it, then replaces any
    /// previous session of the login by the new one.
    pub fn init_authenticated_session(&mut self) -> Result<bool, StoreError> {
        if self.login_status != LoginStatus::WaitingApplicationAuthenticate {
            return Ok(false);
        }
        self.login_status = LoginStatus::LoginFail;

        let Some(user) = &self.user else {
            return Ok(false);
        };
        let Some(binding) = user.profile_in_use() else {
            return Ok(false);
        };

        let now = self.now();
        let policy = self.context.policy();
        let record = SessionRecord {
            hash: session_hash(&user.login, &binding.profile, now),
            application: self.context.application().to_string(),
            login_date: now,
            time_out: now + Duration::minutes(i64::from(policy.session_timeout)),
            renew: policy.session_renew,
            login: user.login.clone(),
            profile: binding.profile.clone(),
            user_agent: self.context.user_agent().to_string(),
            ip: self.ip.clone(),
        };

        let credential = Credential::new(&record.login, &record.profile, &record.hash);
        self.carrier.set_value(credential.encode());
        self.carrier.set_expires(record.time_out);
        if !self.context.is_test_environment() && !self.carrier.commit() {
            warn!(login = %record.login, "credential could not be committed");
            return Ok(false);
        }

        self.sessions.replace_for_login(&record)?;

        info!(login = %record.login, profile = %record.profile, time_out = %record.time_out, "session opened");
        self.audit.log(
            self.event(SecurityEventType::SessionCreated)
                .login(&record.login)
                .detail("profile", &record.profile),
        );
        if let Some(user) = self.user.as_mut() {
            user.set_session(Some(record));
        }
        self.login_status = LoginStatus::Authorized;
        self.browse_status = BrowseStatus::Authorized;
        Ok(true)
    }

    /// Delete the current session record.
    ///
    /// Returns `false` when there was no record to remove.
    pub fn close_authenticated_session(&mut self) -> Result<bool, StoreError> {
        let Some(session) = self.session().cloned() else {
            return Ok(false);
        };

        let removed = self.sessions.delete(&session.key())?;
        if let Some(user) = self.user.as_mut() {
            user.set_session(None);
        }
        self.login_status = LoginStatus::Anonymous;
        self.browse_status = BrowseStatus::Unchecked;

        self.carrier.set_value(String::new());
        self.carrier.set_expires(self.context.now());
        if !self.context.is_test_environment() && !self.carrier.commit() {
            warn!(login = %session.login, "expired credential could not be committed");
        }

        if removed {
            info!(login = %session.login, "session closed");
            self.audit
                .log(self.event(SecurityEventType::SessionClosed).login(&session.login));
        }
        Ok(removed)
    }

    // =========================================================================
    // Authenticated requests
    // =========================================================================

    /// Restore the session named by the carrier's current value.
    pub fn restore_from_carrier(&mut self) -> Result<bool, StoreError> {
        let Some(value) = self.carrier.value().map(str::to_string) else {
            return Ok(false);
        };
        self.restore_session(&value)
    }

    /// Restore an authenticated session from a credential value.
    ///
    /// The stored session must belong to this application, profile, IP and
    /// user agent. An expired session is deleted. When the session asks for
    /// renewal it is extended by the policy timeout.
    pub fn restore_session(&mut self, credential: &str) -> Result<bool, StoreError> {
        let Some(credential) = Credential::parse(credential) else {
            return Ok(false);
        };
        let Some(record) = self
            .sessions
            .load_by_hash(&credential.login, &credential.session_hash)?
        else {
            debug!(login = %credential.login, "no session for credential");
            return Ok(false);
        };

        if record.application != self.context.application()
            || record.profile != credential.profile
            || record.ip != self.ip
            || record.user_agent != self.context.user_agent()
        {
            warn!(login = %record.login, ip = %self.ip, "credential does not match its session");
            self.audit.log(
                self.event(SecurityEventType::SessionRejected)
                    .login(&record.login)
                    .error("session mismatch"),
            );
            return Ok(false);
        }

        if record.is_expired(self.now()) {
            self.sessions.delete(&record.key())?;
            info!(login = %record.login, time_out = %record.time_out, "expired session removed");
            self.audit
                .log(self.event(SecurityEventType::SessionExpired).login(&record.login));
            return Ok(false);
        }

        let Some(mut user) = self.directory.load(&record.login)? else {
            return Ok(false);
        };
        let profile_matches = user
            .profile_in_use()
            .map(|binding| binding.active && binding.profile == record.profile)
            .unwrap_or(false);
        if !user.active || !profile_matches {
            debug!(login = %record.login, "user can no longer use this session");
            return Ok(false);
        }

        let renew = record.renew;
        let login = record.login.clone();
        self.carrier.set_value(credential.encode());
        self.carrier.set_expires(record.time_out);
        user.set_session(Some(record));
        self.user = Some(user);
        self.login_status = LoginStatus::Authorized;
        self.browse_status = BrowseStatus::Authorized;
        self.audit
            .log(self.event(SecurityEventType::SessionRestored).login(&login));

        if renew {
            let timeout = i64::from(self.context.policy().session_timeout);
            self.renew_session(timeout)?;
        }
        Ok(true)
    }

    /// Push the session expiry to `now + timeout` minutes.
    pub fn renew_session(&mut self, timeout: i64) -> Result<bool, StoreError> {
        if !self.is_authorized() || timeout <= 0 {
            return Ok(false);
        }
        let Some(mut record) = self.session().cloned() else {
            return Ok(false);
        };
        let Some(time_out) = Duration::try_minutes(timeout)
            .and_then(|timeout| self.now().checked_add_signed(timeout))
        else {
            return Ok(false);
        };

        record.time_out = time_out;
        if !self.sessions.update(&record)? {
            warn!(login = %record.login, "session vanished before renewal");
            return Ok(false);
        }

        self.carrier.set_expires(time_out);
        if !self.context.is_test_environment() && !self.carrier.commit() {
            warn!(login = %record.login, "renewed credential could not be committed");
        }

        debug!(login = %record.login, %time_out, "session renewed");
        self.audit.log(
            self.event(SecurityEventType::SessionRenewed)
                .login(&record.login)
                .detail("time_out", time_out),
        );
        if let Some(user) = self.user.as_mut() {
            user.set_session(Some(record));
        }
        Ok(true)
    }

    /// Append an activity to the user's log for today.
    pub fn register_log_activity(&mut self, activity: Activity) -> Result<bool, StoreError> {
        if !self.is_authorized() {
            return Ok(false);
        }
        let Some(session) = self.session() else {
            return Ok(false);
        };

        let entry = ActivityEntry {
            activity: activity.activity,
            date_time: self.now(),
            login: session.login.clone(),
            profile: session.profile.clone(),
            application: self.context.application().to_string(),
            ip: self.ip.clone(),
            user_agent: self.context.user_agent().to_string(),
            route: activity
                .route
                .or_else(|| self.context.route().map(str::to_string)),
            method: activity.method,
            details: activity.details,
        };
        let count = self.activity.append(entry)?;
        debug!(login = %session.login, count, "activity recorded");
        Ok(true)
    }

    /// Whether the session's profile may browse the context's route.
    ///
    /// Denied without a route, without a permission record, or when no
    /// pattern of the profile matches.
    pub fn check_permission_for_route(&mut self) -> Result<bool, StoreError> {
        if !self.is_authorized() {
            return Ok(false);
        }
        let (Some(session), Some(route)) = (self.session(), self.context.route()) else {
            return Ok(false);
        };

        let stored;
        let permissions = match &self.permissions {
            Some(permissions) => Some(permissions),
            None => {
                stored = RoutePermissions::load(&*self.store, self.context.application())?;
                stored.as_ref()
            }
        };
        let allowed = permissions
            .map(|permissions| permissions.is_allowed(&session.profile, route))
            .unwrap_or(false);

        let event_type = if allowed {
            SecurityEventType::AccessGranted
        } else {
            SecurityEventType::AccessDenied
        };
        self.audit.log(
            self.event(event_type)
                .login(&session.login)
                .detail("profile", &session.profile),
        );
        Ok(allowed)
    }

    /// Key of the current session record.
    pub fn session_key(&self) -> Option<RecordKey> {
        self.session().map(SessionRecord::key)
    }
}
