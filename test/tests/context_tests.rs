//! Security context and policy tests.
//!
//! Construction must fail on any incomplete or incoherent configuration.


use engarde_core::error::ConfigError;
use engarde_core::security::{SecurityContext, SecurityPolicy, TEST_ENVIRONMENT};
use engarde_test::DataRoot;

use common::{at, APP, IP, UA};

fn builder(root: &DataRoot) -> engarde_core::security::SecurityContextBuilder {
    SecurityContext::builder()
        .ip(IP)
        .data_root(root.path())
        .now(at(9, 0))
        .environment(TEST_ENVIRONMENT)
        .application(APP)
        .user_agent(UA)
}

// =============================================================================
// Context Validation
// =============================================================================

#[test]
fn test_valid_context() {
    let root = DataRoot::new().unwrap();
    let context = builder(&root).route("/home").build().unwrap();

    assert_eq!(context.ip().to_string(), IP);
    assert_eq!(context.now(), at(9, 0));
    assert_eq!(context.route(), Some("/home"));
    assert!(context.is_test_environment());
}

#[test]
fn test_ipv6_context() {
    let root = DataRoot::new().unwrap();
    let context = builder(&root).ip("fe80::1").build().unwrap();
    assert!(context.ip().is_ipv6());
}

#[test]
fn test_zero_thresholds_are_rejected() {
    let root = DataRoot::new().unwrap();
    let policies = [
        SecurityPolicy::new().session_timeout(0),
        SecurityPolicy::new().allowed_fault_by_ip(0),
        SecurityPolicy::new().ip_block_timeout(0),
        SecurityPolicy::new().allowed_fault_by_login(0),
        SecurityPolicy::new().login_block_timeout(0),
    ];

    for policy in policies {
        let result = builder(&root).policy(policy.clone()).build();
        assert!(
            matches!(result, Err(ConfigError::NotPositive { .. })),
            "{:?} should be rejected",
            policy
        );
    }
}

#[test]
fn test_invalid_ip_is_rejected() {
    let root = DataRoot::new().unwrap();
    assert!(matches!(
        builder(&root).ip("300.1.1.1").build(),
        Err(ConfigError::InvalidIp { .. })
    ));
    assert!(matches!(
        builder(&root).ip("  ").build(),
        Err(ConfigError::Empty { field: "ip" })
    ));
}

#[test]
fn test_empty_fields_are_rejected() {
    let root = DataRoot::new().unwrap();
    assert!(matches!(
        builder(&root).application("").build(),
        Err(ConfigError::Empty { field: "application" })
    ));
    assert!(matches!(
        builder(&root).user_agent(" ").build(),
        Err(ConfigError::Empty { field: "user_agent" })
    ));
    assert!(matches!(
        builder(&root).environment("").build(),
        Err(ConfigError::Empty { field: "environment" })
    ));
}

#[test]
fn test_missing_directories_are_rejected() {
    let root = DataRoot::new().unwrap();
    std::fs::remove_dir(root.file("sessions")).unwrap();
    assert!(matches!(
        builder(&root).build(),
        Err(ConfigError::MissingDirectory { .. })
    ));

    let missing = SecurityContext::builder()
        .ip(IP)
        .data_root(root.file("nowhere"))
        .environment(TEST_ENVIRONMENT)
        .application(APP)
        .user_agent(UA)
        .build();
    assert!(matches!(missing, Err(ConfigError::MissingDirectory { .. })));
}

// =============================================================================
// Policy Loading
// =============================================================================

#[test]
fn test_policy_from_json() {
    let root = DataRoot::new().unwrap();
    root.write_raw(
        "policy.json",
        r#"{
            "SessionRenew": true,
            "SessionTimeout": 45,
            "AllowedFaultByIP": 10,
            "IPBlockTimeout": 30
        }"#,
    )
    .unwrap();

    let policy = SecurityPolicy::from_file(root.file("policy.json")).unwrap();
    assert!(policy.session_renew);
    assert_eq!(policy.session_timeout, 45);
    assert_eq!(policy.allowed_fault_by_ip, 10);
    assert_eq!(policy.ip_block_timeout, 30);
    // missing keys keep their defaults
    assert_eq!(policy.allowed_fault_by_login, SecurityPolicy::default().allowed_fault_by_login);
}

#[test]
fn test_policy_file_errors() {
    let root = DataRoot::new().unwrap();
    assert!(matches!(
        SecurityPolicy::from_file(root.file("absent.json")),
        Err(ConfigError::PolicyRead { .. })
    ));

    root.write_raw("broken.json", "{ SessionTimeout: ").unwrap();
    assert!(matches!(
        SecurityPolicy::from_file(root.file("broken.json")),
        Err(ConfigError::PolicyFormat { .. })
    ));

    root.write_raw("zero.json", r#"{ "LoginBlockTimeout": 0 }"#).unwrap();
    assert!(matches!(
        SecurityPolicy::from_file(root.file("zero.json")),
        Err(ConfigError::NotPositive { .. })
    ));
}
