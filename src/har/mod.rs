//! HTTP Archive (HAR 1.2) model, normalizer, serializer and upload store.

pub mod cookies;
pub mod ingest;
mod model;
mod normalize;

pub use ingest::{IngestReceipt, UploadStore, ACKNOWLEDGEMENT};
pub use model::*;
pub use normalize::{iso_timestamp, normalize, PageMetadata};

use std::path::Path;

use crate::error::Result;

/// Pretty-printed JSON, two-space indent, keys in declaration order.
pub fn to_pretty_json(har: &Har) -> Result<String> {
    Ok(serde_json::to_string_pretty(har)?)
}

pub fn parse(text: &str) -> Result<Har> {
    Ok(serde_json::from_str(text)?)
}

/// Writes the archive to `path`, creating parent directories.
pub async fn write_to(har: &Har, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut text = to_pretty_json(har)?;
    text.push('\n');
    tokio::fs::write(path, text).await?;
    Ok(())
}
