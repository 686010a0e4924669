use harcap_lib::error::ErrorCategory;
use harcap_lib::{CaptureError, ConfigError, EngineError, NavigationFailureKind, TimeoutKind};
use std::time::Duration;

#[test]
fn config_error_display_includes_message() {
    let err = CaptureError::Config("missing viewport".to_string());

    assert_eq!(format!("{}", err), "Configuration error: missing viewport");
}

#[test]
fn io_error_display_wraps_source() {
    let io_err = std::io::Error::other("disk full");
    let err: CaptureError = io_err.into();
    let rendered = format!("{}", err);

    assert!(rendered.starts_with("IO error: "));
    assert!(rendered.contains("disk full"));
}

#[test]
fn timeout_messages_distinguish_slow_sites_from_hangs() {
    let slow = CaptureError::Timeout {
        kind: TimeoutKind::SlowSite { in_flight: 3 },
        budget: Duration::from_secs(30),
    };
    let hang = CaptureError::Timeout {
        kind: TimeoutKind::Hang,
        budget: Duration::from_secs(30),
    };

    assert!(slow.to_string().contains("took too long to load"));
    assert!(slow.to_string().contains("3 request(s)"));
    assert!(hang.to_string().contains("no response"));
    assert_eq!(slow.to_payload().category, ErrorCategory::Timeout);
}

#[test]
fn engine_navigation_errors_are_classified() {
    let err: CaptureError = EngineError::Navigation("net::ERR_CONNECTION_REFUSED at http://localhost:1/".into()).into();

    match &err {
        CaptureError::Navigation { kind, message } => {
            assert_eq!(*kind, NavigationFailureKind::ConnectionRefused);
            assert!(message.contains("ERR_CONNECTION_REFUSED"));
        }
        other => panic!("unexpected: {other}"),
    }
    assert_eq!(err.to_payload().category, ErrorCategory::Navigation);
}

#[test]
fn engine_launch_errors_keep_their_message() {
    let err: CaptureError = EngineError::Launch("Cannot find module 'playwright'".into()).into();

    assert_eq!(format!("{}", err), "Browser launch failed: Cannot find module 'playwright'");
    let payload = err.to_payload();
    assert_eq!(payload.category, ErrorCategory::Browser);
    assert!(payload.remediation.unwrap_or_default().contains("npm install playwright"));
}

#[test]
fn config_errors_convert_with_context() {
    let err: CaptureError = ConfigError::Invalid("capture.timeout must be greater than zero".into()).into();

    assert_eq!(
        format!("{}", err),
        "Configuration error: capture.timeout must be greater than zero"
    );
}

#[test]
fn invalid_url_helper_renders_input_and_reason() {
    let err = CaptureError::invalid_url("ftp://x", "unsupported scheme 'ftp'");

    assert_eq!(format!("{}", err), "Invalid URL 'ftp://x': unsupported scheme 'ftp'");
    assert_eq!(err.to_payload().category, ErrorCategory::Input);
}
