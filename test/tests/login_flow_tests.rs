//! Login state machine tests.
//!
//! Tests for user recognition, password checks and session creation.


use std::io;
use std::sync::Arc;

use engarde_core::error::StoreError;
use engarde_core::security::{
    BrowseStatus, CredentialCarrier, KeyLocks, LoginStatus, MemoryCarrier, MemoryStore,
    Namespace, RecordKey, RecordStore, SessionSecurityEngine, Sha256Matcher, UserDirectory,
};
use engarde_test::{user, DataRoot};

use common::{at, context, engine, login, seeded_root, APP};

// =============================================================================
// User Recognition
// =============================================================================

#[test]
fn test_known_active_user() {
    let root = seeded_root();
    let mut engine = engine(&root, at(9, 0));

    assert!(engine.check_user_name("admin").unwrap());
    assert_eq!(engine.login_status(), LoginStatus::AccountRecognizedAndActive);
    let user = engine.user().unwrap();
    assert_eq!(user.profile_in_use().unwrap().profile, "admin");
    assert!(user.session().is_none());
}

#[test]
fn test_login_lookup_ignores_case() {
    let root = seeded_root();
    let mut engine = engine(&root, at(9, 0));
    assert!(engine.check_user_name(" Admin ").unwrap());
}

#[test]
fn test_default_profile_wins() {
    let root = seeded_root();
    let mut engine = engine(&root, at(9, 0));
    assert!(engine.check_user_name("reader").unwrap());
    assert_eq!(
        engine.user().unwrap().profile_in_use().unwrap().profile,
        "reader"
    );
}

#[test]
fn test_refused_accounts() {
    let root = seeded_root();
    let cases = [
        ("disabled", LoginStatus::AccountDisabledForDomain),
        ("outsider", LoginStatus::AccountDoesNotExistInApplication),
        ("suspended", LoginStatus::AccountDisabledForApplication),
    ];

    for (login, expected) in cases {
        let mut engine = engine(&root, at(9, 0));
        assert!(!engine.check_user_name(login).unwrap(), "{} accepted", login);
        assert_eq!(engine.login_status(), expected);
        // refused accounts can't go on with a password
        assert!(!engine.check_user_password(login).unwrap());
        assert_eq!(engine.login_status(), expected);
    }

    // known users never count against the IP
    assert!(!root.file("log/suspect/192_168_10_20.json").exists());
}

// =============================================================================
// Password Checks
// =============================================================================

#[test]
fn test_correct_password() {
    let root = seeded_root();
    let mut engine = engine(&root, at(9, 0));
    engine.check_user_name("admin").unwrap();

    assert!(engine.check_user_password("admin").unwrap());
    assert_eq!(engine.login_status(), LoginStatus::WaitingApplicationAuthenticate);
    assert!(!root.file("log/suspect/admin.json").exists());
}

#[test]
fn test_wrong_password_counts_against_login() {
    let root = seeded_root();
    let mut engine = engine(&root, at(9, 0));
    engine.check_user_name("admin").unwrap();

    assert!(!engine.check_user_password("Admin").unwrap());
    assert_eq!(engine.login_status(), LoginStatus::UnexpectedPassword);

    let record = root.read_json("log/suspect/admin.json").unwrap();
    assert_eq!(record["Counter"], 1);
    assert_eq!(record["Login"], "admin");
    assert_eq!(record["IP"], "192.168.10.20");

    // login threshold is 2, IP threshold is 3
    assert!(!engine.check_user_password("nope").unwrap());
    assert_eq!(engine.login_status(), LoginStatus::AccountIsBlocked);
    assert_eq!(root.read_json("log/suspect/admin.json").unwrap()["Blocked"], true);
}

#[test]
fn test_password_without_user() {
    let root = seeded_root();
    let mut engine = engine(&root, at(9, 0));
    assert!(!engine.check_user_password("admin").unwrap());
    assert_eq!(engine.login_status(), LoginStatus::Anonymous);
}

#[test]
fn test_digest_matcher() {
    let root = DataRoot::new().unwrap();
    root.add_user(&user("ana", &Sha256Matcher::digest("s3cret"), APP, "admin"))
        .unwrap();

    let mut engine = SessionSecurityEngine::new(context(&root, at(9, 0)), MemoryCarrier::new())
        .with_matcher(Sha256Matcher);
    engine.check_user_name("ana").unwrap();
    assert!(engine.check_user_password("s3cret").unwrap());
}

// =============================================================================
// Session Creation
// =============================================================================

#[test]
fn test_init_requires_authenticated_user() {
    let root = seeded_root();
    let mut engine = engine(&root, at(9, 0));
    engine.check_user_name("admin").unwrap();

    assert!(!engine.init_authenticated_session().unwrap());
    assert_eq!(engine.login_status(), LoginStatus::AccountRecognizedAndActive);
    assert_eq!(engine.browse_status(), BrowseStatus::Unchecked);
    assert!(engine.carrier().value().is_none());
    assert!(root.session_files().is_empty());
}

#[test]
fn test_full_login_sequence() {
    let root = seeded_root();
    let mut engine = engine(&root, at(9, 0));

    assert!(engine.check_valid_ip().unwrap());
    assert!(engine.check_user_name("admin").unwrap());
    assert!(engine.check_user_password("admin").unwrap());
    assert!(engine.init_authenticated_session().unwrap());

    assert_eq!(engine.login_status(), LoginStatus::Authorized);
    assert_eq!(engine.browse_status(), BrowseStatus::Authorized);

    let session = engine.session().unwrap().clone();
    assert_eq!(session.hash.len(), 64);
    assert_eq!(session.time_out, at(9, 20));

    let file = format!("sessions/admin_{}.json", session.hash);
    let stored = root.read_json(&file).unwrap();
    assert_eq!(stored["Hash"], session.hash.as_str());
    assert_eq!(stored["Application"], APP);
    assert_eq!(stored["LoginDate"], "2024-04-15 09:00:00");
    assert_eq!(stored["TimeOut"], "2024-04-15 09:20:00");
    assert_eq!(stored["Profile"], "admin");
    assert_eq!(stored["IP"], "192.168.10.20");

    let credential = engine.carrier().value().unwrap();
    assert_eq!(
        credential,
        format!("userLogin=admin&profileInUse=admin&sessionHash={}", session.hash)
    );
    assert_eq!(engine.carrier().expires(), Some(at(9, 20)));

    assert!(engine.close_authenticated_session().unwrap());
    assert!(!root.file(&file).exists());
    assert!(!engine.close_authenticated_session().unwrap());
}

#[test]
fn test_new_login_replaces_previous_session() {
    let root = seeded_root();
    login(&root, "admin", "admin", at(9, 0));
    login(&root, "reader", "reader", at(9, 0));
    let latest = login(&root, "admin", "admin", at(9, 5));

    let sessions = root.session_files();
    assert_eq!(sessions.len(), 2);
    let admin_sessions: Vec<_> = sessions.iter().filter(|s| s.starts_with("admin_")).collect();
    assert_eq!(admin_sessions.len(), 1);
    assert!(latest.ends_with(&admin_sessions[0]["admin_".len()..]));
}

#[test]
fn test_concurrent_logins_keep_one_session() {
    let root = seeded_root();

    for round in 0..5 {
        std::thread::scope(|s| {
            for _ in 0..6 {
                s.spawn(|| login(&root, "admin", "admin", at(10, round)));
            }
        });

        let admin_sessions = root
            .session_files()
            .into_iter()
            .filter(|s| s.starts_with("admin_"))
            .count();
        assert_eq!(admin_sessions, 1, "round {}", round);
    }
}

#[test]
fn test_failed_commit_outside_test_environment() {
    let root = seeded_root();
    let context = engarde_core::security::SecurityContext::builder()
        .ip("10.0.0.1")
        .data_root(root.path())
        .now(at(9, 0))
        .environment("production")
        .application(APP)
        .user_agent("agent")
        .build()
        .unwrap();
    let mut engine = SessionSecurityEngine::new(context, MemoryCarrier::failing());

    engine.check_user_name("admin").unwrap();
    engine.check_user_password("admin").unwrap();
    assert!(!engine.init_authenticated_session().unwrap());
    assert_eq!(engine.login_status(), LoginStatus::LoginFail);
    assert!(root.session_files().is_empty());

    // a second attempt is refused: the status moved on
    assert!(!engine.init_authenticated_session().unwrap());
}

#[test]
fn test_commit_in_production() {
    let root = seeded_root();
    let context = engarde_core::security::SecurityContext::builder()
        .ip("10.0.0.1")
        .data_root(root.path())
        .now(at(9, 0))
        .environment("production")
        .application(APP)
        .user_agent("agent")
        .build()
        .unwrap();
    let mut engine = SessionSecurityEngine::new(context, MemoryCarrier::new());

    engine.check_user_name("admin").unwrap();
    engine.check_user_password("admin").unwrap();
    assert!(engine.init_authenticated_session().unwrap());
    assert_eq!(engine.carrier().commits(), 1);
}

// =============================================================================
// Persistence Failures
// =============================================================================

/// Reads from memory, refuses every write.
struct ReadOnlyStore {
    inner: MemoryStore,
}

impl RecordStore for ReadOnlyStore {
    fn get(&self, key: &RecordKey) -> Result<Option<Vec<u8>>, StoreError> {
        self.inner.get(key)
    }

    fn put(&self, key: &RecordKey, _value: &[u8]) -> Result<(), StoreError> {
        Err(StoreError::Io {
            key: key.to_string(),
            source: io::Error::new(io::ErrorKind::Other, "read-only store"),
        })
    }

    fn delete(&self, key: &RecordKey) -> Result<bool, StoreError> {
        self.inner.delete(key)
    }

    fn keys(&self, namespace: Namespace, prefix: &str) -> Result<Vec<String>, StoreError> {
        self.inner.keys(namespace, prefix)
    }
}

fn read_only_engine(root: &DataRoot) -> SessionSecurityEngine<MemoryCarrier> {
    let inner = MemoryStore::new();
    let admin = serde_json::to_vec(&user("admin", "admin", APP, "admin")).unwrap();
    inner.put(&UserDirectory::key_for("admin"), &admin).unwrap();
    SessionSecurityEngine::with_store(
        context(root, at(9, 0)),
        Arc::new(ReadOnlyStore { inner }),
        KeyLocks::new(),
        MemoryCarrier::new(),
    )
}

#[test]
fn test_failure_write_error_is_propagated() {
    let root = DataRoot::new().unwrap();
    let mut engine = read_only_engine(&root);

    assert!(matches!(
        engine.check_user_name("ghost"),
        Err(StoreError::Io { .. })
    ));
    // the failure could not be recorded, the login is still refused
    assert_eq!(engine.login_status(), LoginStatus::AccountDoesNotExist);
    assert!(engine.login_status().is_denied());
    assert!(engine.user().is_none());
    assert!(!engine.check_user_password("admin").unwrap());

    engine.check_user_name("admin").unwrap();
    assert!(engine.check_user_password("wrong").is_err());
    assert_eq!(engine.login_status(), LoginStatus::UnexpectedPassword);
    assert!(engine.login_status().is_denied());
    assert!(!engine.init_authenticated_session().unwrap());
}

#[test]
fn test_session_write_error_leaves_login_fail() {
    let root = DataRoot::new().unwrap();
    let mut engine = read_only_engine(&root);

    engine.check_user_name("admin").unwrap();
    engine.check_user_password("admin").unwrap();
    assert!(engine.init_authenticated_session().is_err());
    assert_eq!(engine.login_status(), LoginStatus::LoginFail);
    assert!(engine.session().is_none());
}

#[test]
fn test_malformed_user_is_an_error() {
    let root = seeded_root();
    root.write_raw("users/broken.json", "{ not json").unwrap();

    let mut engine = engine(&root, at(9, 0));
    let error = engine.check_user_name("broken").unwrap_err();
    assert!(error.is_malformed());
    assert_eq!(
        RecordKey::new(Namespace::Users, "broken").to_string(),
        "users/broken"
    );
}
