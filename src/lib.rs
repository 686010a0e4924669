//! HAR Capture (harcap) Library
//!
//! Loads a URL in an isolated headless browser session, records every
//! network exchange of the page load, and normalizes the trace into an
//! HTTP Archive (HAR 1.2). Externally produced archives can be ingested
//! and retained for a bounded period.
//!
//! # Module Overview
//!
//! - [`capture`] - Session control: URL validation, concurrency cap, timeouts, teardown
//! - [`recorder`] - Interception decisions and request/response correlation
//! - [`har`] - HAR model, normalizer, serializer and upload store
//! - [`engine`] - Rendering engine seam (Playwright helper and a scripted engine)
//! - [`config`] - Configuration file support
//! - [`output`] - JSON output schemas
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use harcap_lib::{CaptureOptions, CaptureService, PlaywrightEngine};
//!
//! # async fn example() -> harcap_lib::Result<()> {
//! let engine = Arc::new(PlaywrightEngine::default());
//! let service = CaptureService::new(engine, CaptureOptions::default());
//!
//! let outcome = service.capture(service.request("example.com")?).await?;
//! println!("{} entries for {}", outcome.har.log.entries.len(), outcome.page.title);
//! harcap_lib::har::write_to(&outcome.har, "example.har".as_ref()).await?;
//! # Ok(())
//! # }
//! ```

pub mod capture;
pub mod config;
pub mod engine;
pub mod error;
pub mod har;
pub mod logging;
pub mod output;
pub mod recorder;
pub mod viewport;

pub use capture::{
    normalize_target_url, BlockPolicy, CaptureOptions, CaptureOutcome, CaptureRequest, CaptureService,
    CaptureStats, PageSummary,
};
pub use config::{Config, ConfigError};
pub use engine::{
    EngineError, LaunchOptions, PlaywrightEngine, PlaywrightOptions, ProcessLedger, RenderingEngine,
    ResourceKind, ScriptedEngine, ScriptedResource, SitePlan,
};
pub use error::{CaptureError, NavigationFailureKind, Result, TimeoutKind};
pub use har::{Har, IngestReceipt, UploadStore, ACKNOWLEDGEMENT};
pub use output::{HarcapOutput, HARCAP_OUTPUT_VERSION};
pub use recorder::{NetworkEvent, SettleCondition, TraceRecorder};
pub use viewport::Viewport;
