use crate::capture::{CaptureOutcome, CaptureStats, PageSummary};
use crate::error::ErrorPayload;
use crate::har::{Har, IngestReceipt};
use crate::Viewport;
use serde::Serialize;
use std::path::PathBuf;

/// Schema version for output payloads.
pub const HARCAP_OUTPUT_VERSION: &str = "0.1.0";

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "mode", rename_all = "kebab-case")]
pub enum HarcapOutput {
    Capture(CaptureOutput),
    Ingest(IngestOutput),
    Error(ErrorOutput),
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureOutput {
    pub version: String,
    pub url: String,
    pub page: PageSummary,
    pub viewport: Viewport,
    /// Resource kinds that were aborted at interception.
    pub blocked: Vec<String>,
    pub stats: CaptureStats,
    /// Where the archive was written, when `--har` was given.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub har_path: Option<PathBuf>,
    /// The archive itself, inlined when it was not written to a file.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub har: Option<Har>,
}

impl CaptureOutput {
    pub fn new(
        url: String,
        viewport: Viewport,
        blocked: Vec<String>,
        outcome: CaptureOutcome,
        har_path: Option<PathBuf>,
    ) -> Self {
        let har = if har_path.is_some() { None } else { Some(outcome.har) };
        Self {
            version: HARCAP_OUTPUT_VERSION.to_string(),
            url,
            page: outcome.page,
            viewport,
            blocked,
            stats: outcome.stats,
            har_path,
            har,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestOutput {
    pub version: String,
    pub source: PathBuf,
    #[serde(flatten)]
    pub receipt: IngestReceipt,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorOutput {
    pub version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub error: ErrorPayload,
}
