use primbridge::logging::{init_logging, LOG_ENV};

#[test]
fn subscriber_installs_once() {
    assert_eq!(LOG_ENV, "PRIMBRIDGE_LOG");
    assert!(init_logging());
    assert!(!init_logging());
    tracing::info!("logging initialized for the test binary");
}
