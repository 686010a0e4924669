//! Session control: validates targets, bounds concurrency, and drives one
//! isolated browser session per capture from launch to teardown.

mod request;
mod service;
mod session;

pub use request::{normalize_target_url, BlockPolicy, CaptureRequest};
pub use service::{
    CaptureOptions, CaptureOutcome, CaptureService, CaptureStats, PageSummary, DEFAULT_CAPTURE_TIMEOUT,
    DEFAULT_MAX_CONCURRENT_SESSIONS, DEFAULT_MAX_POST_DATA_BYTES,
};
pub use session::{CaptureSession, SessionGauge};
