use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

use crate::engine::EngineError;

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("Invalid URL '{input}': {reason}")]
    InvalidUrl { input: String, reason: String },

    #[error("Browser launch failed: {0}")]
    Launch(String),

    #[error("Navigation failed ({kind}): {message}")]
    Navigation {
        kind: NavigationFailureKind,
        message: String,
    },

    #[error("{}", timeout_message(.kind, .budget))]
    Timeout { kind: TimeoutKind, budget: Duration },

    #[error("Invalid archive upload: {0}")]
    Validation(String),

    #[error("Capture cancelled before navigation settled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Classified cause of a failed page load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NavigationFailureKind {
    Dns,
    ConnectionRefused,
    Certificate,
    Aborted,
    Other,
}

impl NavigationFailureKind {
    /// Classifies a Chromium `net::ERR_*` style message.
    pub fn classify(message: &str) -> Self {
        let upper = message.to_ascii_uppercase();
        if upper.contains("ERR_NAME_NOT_RESOLVED") || upper.contains("ERR_NAME_RESOLUTION_FAILED") {
            NavigationFailureKind::Dns
        } else if upper.contains("ERR_CONNECTION_REFUSED")
            || upper.contains("ERR_CONNECTION_RESET")
            || upper.contains("ERR_CONNECTION_CLOSED")
            || upper.contains("ERR_ADDRESS_UNREACHABLE")
        {
            NavigationFailureKind::ConnectionRefused
        } else if upper.contains("ERR_CERT_") || upper.contains("ERR_SSL_") {
            NavigationFailureKind::Certificate
        } else if upper.contains("ERR_ABORTED") || upper.contains("ERR_BLOCKED_BY_CLIENT") {
            NavigationFailureKind::Aborted
        } else {
            NavigationFailureKind::Other
        }
    }
}

impl fmt::Display for NavigationFailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            NavigationFailureKind::Dns => "dns",
            NavigationFailureKind::ConnectionRefused => "connection refused",
            NavigationFailureKind::Certificate => "certificate",
            NavigationFailureKind::Aborted => "aborted",
            NavigationFailureKind::Other => "other",
        };
        f.write_str(label)
    }
}

/// Why the settle condition was not reached in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "kebab-case")]
pub enum TimeoutKind {
    /// Responses arrived but the network never went quiet.
    SlowSite { in_flight: usize },
    /// Nothing came back from the site at all.
    Hang,
}

fn timeout_message(kind: &TimeoutKind, budget: &Duration) -> String {
    match *kind {
        TimeoutKind::SlowSite { in_flight } => format!(
            "Navigation timeout: the website took too long to load ({} request(s) still in flight after {:?}). Try a different site or a longer timeout.",
            in_flight, budget
        ),
        TimeoutKind::Hang => format!(
            "Navigation timeout: no response from the website within {:?}. Check the URL and your connection.",
            budget
        ),
    }
}

impl CaptureError {
    pub fn invalid_url(input: impl Into<String>, reason: impl Into<String>) -> Self {
        CaptureError::InvalidUrl {
            input: input.into(),
            reason: reason.into(),
        }
    }

    pub fn navigation(message: impl Into<String>) -> Self {
        let message = message.into();
        CaptureError::Navigation {
            kind: NavigationFailureKind::classify(&message),
            message,
        }
    }

    pub fn to_payload(&self) -> ErrorPayload {
        match self {
            CaptureError::InvalidUrl { .. } => ErrorPayload::new(
                ErrorCategory::Input,
                self.to_string(),
                "Verify the URL (e.g., example.com or https://example.com); only http and https are supported.",
            ),
            CaptureError::Launch(msg) => {
                let lower = msg.to_ascii_lowercase();
                let remediation = if lower.contains("cannot find module 'playwright'") {
                    "Install the browser helper with `npm install playwright` and retry."
                } else if lower.contains("executable doesn't exist") || lower.contains("chromium") {
                    "Install a browser for Playwright with `npx playwright install chromium`."
                } else if lower.contains("not found on path") {
                    "Install Node.js (node >= 18) or point browser.node_command at it."
                } else {
                    "Retry the capture; if it keeps failing, check that headless Chromium can start on this host."
                };
                ErrorPayload::new(ErrorCategory::Browser, self.to_string(), remediation)
            }
            CaptureError::Navigation { kind, .. } => {
                let remediation = match kind {
                    NavigationFailureKind::Dns => "Check the hostname spelling and DNS resolution.",
                    NavigationFailureKind::ConnectionRefused => {
                        "The server refused the connection; check the port and that the site is up."
                    }
                    NavigationFailureKind::Certificate => {
                        "The site's TLS certificate was rejected; try http:// or fix the certificate."
                    }
                    NavigationFailureKind::Aborted => "The page aborted its own load; retry or try a different URL.",
                    NavigationFailureKind::Other => "Check connectivity/proxy/VPN and retry.",
                };
                ErrorPayload::new(ErrorCategory::Navigation, self.to_string(), remediation)
            }
            CaptureError::Timeout { .. } => ErrorPayload::new(
                ErrorCategory::Timeout,
                self.to_string(),
                "Increase --timeout or capture a lighter page.",
            ),
            CaptureError::Validation(_) => ErrorPayload::new(
                ErrorCategory::Validation,
                self.to_string(),
                "Upload a .har file produced by a browser or by `harcap capture`.",
            ),
            CaptureError::Cancelled => ErrorPayload::new(
                ErrorCategory::Navigation,
                self.to_string(),
                "The capture was cancelled; start a new one.",
            ),
            CaptureError::Io(e) => ErrorPayload::new(
                ErrorCategory::Config,
                e.to_string(),
                "Check file paths/permissions.",
            ),
            CaptureError::Serialization(e) => ErrorPayload::new(
                ErrorCategory::Unknown,
                e.to_string(),
                "Re-run with --verbose; file an issue if persistent.",
            ),
            CaptureError::Config(msg) => ErrorPayload::new(
                ErrorCategory::Config,
                msg.to_string(),
                "Check flags and the config file (e.g., timeout = \"30s\", viewport = { width = 1280, height = 800 }).",
            ),
        }
    }
}

impl From<EngineError> for CaptureError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Launch(msg) => CaptureError::Launch(msg),
            EngineError::Navigation(msg) => CaptureError::navigation(msg),
            EngineError::Protocol(msg) => CaptureError::Launch(format!("browser helper protocol error: {msg}")),
            EngineError::Closed => CaptureError::Launch("browser helper exited unexpectedly".to_string()),
            EngineError::Io(e) => CaptureError::Io(e),
        }
    }
}

impl From<crate::config::ConfigError> for CaptureError {
    fn from(err: crate::config::ConfigError) -> Self {
        CaptureError::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CaptureError>;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ErrorCategory {
    Input,
    Browser,
    Navigation,
    Timeout,
    Validation,
    Config,
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPayload {
    pub category: ErrorCategory,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remediation: Option<String>,
}

impl ErrorPayload {
    pub fn new(category: ErrorCategory, message: String, remediation: impl Into<String>) -> Self {
        Self {
            category,
            message,
            remediation: Some(remediation.into()),
        }
    }
}
