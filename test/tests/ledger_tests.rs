//! Abuse ledger tests.
//!
//! Tests for IP and login blocking, window resets and concurrent failure
//! recording on the file store.


use std::sync::Arc;

use engarde_core::security::{
    AbuseLedger, BrowseStatus, KeyLocks, LoginStatus, MemoryCarrier, SessionSecurityEngine,
    SuspectSubject,
};
use engarde_test::DataRoot;

use common::{at, context, engine, seeded_root, IP};

const IP_RECORD: &str = "log/suspect/192_168_10_20.json";

fn write_ip_record(root: &DataRoot, blocked: bool, unblock_date: &str) {
    root.write_raw(
        IP_RECORD,
        &format!(
            r#"{{
                "Activity": "MakeLogin",
                "IP": "{}",
                "Login": "",
                "Counter": 3,
                "LastEventDateTime": "2024-04-15 08:50:00",
                "Blocked": {},
                "UnblockDate": {}
            }}"#,
            IP, blocked, unblock_date
        ),
    )
    .unwrap();
}

// =============================================================================
// IP Checks
// =============================================================================

#[test]
fn test_ip_without_record_is_valid() {
    let root = seeded_root();
    let mut engine = engine(&root, at(9, 0));

    assert!(engine.check_valid_ip().unwrap());
    assert_eq!(engine.login_status(), LoginStatus::Anonymous);
    assert_eq!(engine.browse_status(), BrowseStatus::Unchecked);
}

#[test]
fn test_expired_ip_block_is_cleared() {
    let root = seeded_root();
    write_ip_record(&root, true, r#""2024-04-15 08:59:59""#);

    let mut engine = engine(&root, at(9, 0));
    assert!(engine.check_valid_ip().unwrap());
    assert!(!root.file(IP_RECORD).exists());
}

#[test]
fn test_active_ip_block_denies() {
    let root = seeded_root();
    write_ip_record(&root, true, r#""2024-04-15 09:00:00""#);

    let mut engine = engine(&root, at(9, 0));
    assert!(!engine.check_valid_ip().unwrap());
    assert_eq!(engine.login_status(), LoginStatus::BlockedIP);
    assert_eq!(engine.browse_status(), BrowseStatus::BlockedIP);
    assert!(root.file(IP_RECORD).exists());
}

#[test]
fn test_block_without_unblock_date_stays() {
    let root = seeded_root();
    write_ip_record(&root, true, "null");

    let mut engine = engine(&root, at(23, 0));
    assert!(!engine.check_valid_ip().unwrap());
}

#[test]
fn test_unblocked_record_is_valid() {
    let root = seeded_root();
    write_ip_record(&root, false, "null");

    let mut engine = engine(&root, at(9, 0));
    assert!(engine.check_valid_ip().unwrap());
    assert!(root.file(IP_RECORD).exists());
}

// =============================================================================
// Unknown Logins
// =============================================================================

#[test]
fn test_unknown_login_counts_once() {
    let root = seeded_root();
    let mut engine = engine(&root, at(9, 0));

    assert!(!engine.check_user_name("ghost").unwrap());
    assert_eq!(engine.login_status(), LoginStatus::AccountDoesNotExist);
    assert!(engine.user().is_none());

    let record = root.read_json(IP_RECORD).unwrap();
    assert_eq!(record["Counter"], 1);
    assert_eq!(record["Blocked"], false);
    assert_eq!(record["Login"], "");
    assert_eq!(record["LastEventDateTime"], "2024-04-15 09:00:00");
}

#[test]
fn test_repeated_unknown_logins_block_ip() {
    let root = seeded_root();

    for minute in 0..2 {
        let mut engine = engine(&root, at(9, minute));
        assert!(!engine.check_user_name("ghost").unwrap());
        assert_eq!(engine.login_status(), LoginStatus::AccountDoesNotExist);
    }

    let mut engine = engine(&root, at(9, 2));
    assert!(!engine.check_user_name("ghost").unwrap());
    assert_eq!(engine.login_status(), LoginStatus::YourIPIsBlocked);

    let record = root.read_json(IP_RECORD).unwrap();
    assert_eq!(record["Counter"], 3);
    assert_eq!(record["Blocked"], true);
    assert_eq!(record["UnblockDate"], "2024-04-15 09:12:00");

    let mut next = engine_at(&root, 9, 11);
    assert!(!next.check_valid_ip().unwrap());

    let mut after_block = engine_at(&root, 9, 13);
    assert!(after_block.check_valid_ip().unwrap());
    assert!(!root.file(IP_RECORD).exists());
}

fn engine_at(root: &DataRoot, hour: u32, minute: u32) -> SessionSecurityEngine<MemoryCarrier> {
    engine(root, at(hour, minute))
}

#[test]
fn test_gap_longer_than_window_resets_counter() {
    let root = seeded_root();

    engine(&root, at(9, 0)).check_user_name("ghost").unwrap();
    engine(&root, at(9, 5)).check_user_name("ghost").unwrap();
    assert_eq!(root.read_json(IP_RECORD).unwrap()["Counter"], 2);

    // 15 minutes later, window is 10
    let mut engine = engine(&root, at(9, 20));
    assert!(!engine.check_user_name("ghost").unwrap());
    assert_eq!(engine.login_status(), LoginStatus::AccountDoesNotExist);

    let record = root.read_json(IP_RECORD).unwrap();
    assert_eq!(record["Counter"], 1);
    assert_eq!(record["Blocked"], false);
}

#[test]
fn test_blocked_login_is_reported() {
    let root = seeded_root();
    for minute in 0..2 {
        let mut engine = engine(&root, at(9, minute));
        assert!(engine.check_user_name("admin").unwrap());
        assert!(!engine.check_user_password("wrong").unwrap());
    }

    let mut engine = engine(&root, at(9, 3));
    assert!(engine.check_valid_ip().unwrap());
    assert!(!engine.check_user_name("admin").unwrap());
    assert_eq!(engine.login_status(), LoginStatus::BlockedUser);

    // login window is 5 minutes
    let mut later = engine_at(&root, 9, 7);
    assert!(later.check_user_name("admin").unwrap());
    assert!(!root.file("log/suspect/admin.json").exists());
}

// =============================================================================
// Concurrency
// =============================================================================

#[test]
fn test_concurrent_failures_share_locks() {
    let root = DataRoot::new().unwrap();
    let ledger = AbuseLedger::new(Arc::new(root.store()), KeyLocks::new());
    let key = AbuseLedger::ip_key(IP);
    let subject = SuspectSubject::ip(IP);

    std::thread::scope(|s| {
        for _ in 0..8 {
            s.spawn(|| {
                for _ in 0..10 {
                    ledger
                        .record_failure(&key, &subject, at(9, 0), 1000, 60)
                        .unwrap();
                }
            });
        }
    });

    let record = ledger.get(&key).unwrap().unwrap();
    assert_eq!(record.counter, 80);
    assert!(!record.blocked);
}

#[test]
fn test_concurrent_engines_use_file_locks() {
    let root = seeded_root();

    // every engine builds its own lock manager; only the lock files are shared
    std::thread::scope(|s| {
        for _ in 0..4 {
            s.spawn(|| {
                for _ in 0..5 {
                    let mut engine = SessionSecurityEngine::new(
                        context(&root, at(9, 0)),
                        MemoryCarrier::new(),
                    );
                    assert!(!engine.check_user_name("ghost").unwrap());
                }
            });
        }
    });

    let record = root.read_json(IP_RECORD).unwrap();
    assert_eq!(record["Counter"], 20);
    assert_eq!(record["Blocked"], true);
    assert!(root.file("log/lock").is_dir());
}
