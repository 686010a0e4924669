//! Intake for archives produced elsewhere.
//!
//! Validation is syntactic only: the upload must be a JSON object with a
//! `log` object. Accepted files are kept for a bounded retention period.

use serde::Serialize;
use serde_json::Value;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::fs;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

use crate::error::{CaptureError, Result};

pub const ACKNOWLEDGEMENT: &str = "HAR data received successfully";

const FALLBACK_NAME: &str = "upload.har";
const MAX_NAME_LEN: usize = 128;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestReceipt {
    pub message: String,
    pub stored_path: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entries: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub har_version: Option<String>,
    /// Expired uploads removed while storing this one.
    pub purged: usize,
}

#[derive(Debug, Clone)]
pub struct UploadStore {
    dir: PathBuf,
    retention: Duration,
}

impl UploadStore {
    pub fn new(dir: impl Into<PathBuf>, retention: Duration) -> Self {
        Self {
            dir: dir.into(),
            retention,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub async fn ingest(&self, original_name: &str, bytes: &[u8]) -> Result<IngestReceipt> {
        let (entries, har_version) = validate(bytes)?;

        fs::create_dir_all(&self.dir).await?;
        let purged = self.purge_expired().await?;

        let name = format!("{}-{}", unix_millis(), sanitize_file_name(original_name));
        let stored_path = self.write_new(&name, bytes).await?;
        info!(path = %stored_path.display(), entries = ?entries, "stored uploaded archive");

        Ok(IngestReceipt {
            message: ACKNOWLEDGEMENT.to_string(),
            stored_path,
            entries,
            har_version,
            purged,
        })
    }

    /// Removes retained files older than the retention period.
    pub async fn purge_expired(&self) -> Result<usize> {
        let mut dir = match fs::read_dir(&self.dir).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };
        let now = SystemTime::now();
        let mut purged = 0;
        while let Some(entry) = dir.next_entry().await? {
            let meta = entry.metadata().await?;
            if !meta.is_file() {
                continue;
            }
            let age = meta
                .modified()
                .ok()
                .and_then(|modified| now.duration_since(modified).ok())
                .unwrap_or_default();
            if age < self.retention {
                continue;
            }
            match fs::remove_file(entry.path()).await {
                Ok(()) => {
                    purged += 1;
                    debug!(path = %entry.path().display(), ?age, "purged expired upload");
                }
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => warn!(path = %entry.path().display(), "failed to purge upload: {e}"),
            }
        }
        Ok(purged)
    }

    async fn write_new(&self, name: &str, bytes: &[u8]) -> Result<PathBuf> {
        let mut attempt = 0u32;
        loop {
            let candidate = if attempt == 0 {
                self.dir.join(name)
            } else {
                self.dir.join(format!("{attempt}-{name}"))
            };
            match fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&candidate)
                .await
            {
                Ok(file) => {
                    fill_or_remove(file, &candidate, bytes).await?;
                    return Ok(candidate);
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists && attempt < 100 => attempt += 1,
                Err(e) => return Err(e.into()),
            }
        }
    }
}

/// Writes `bytes` to a freshly created upload; a failed write removes the
/// partial file at `path`.
async fn fill_or_remove<W>(mut writer: W, path: &Path, bytes: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let written = async {
        writer.write_all(bytes).await?;
        writer.flush().await
    }
    .await;
    drop(writer);
    if let Err(err) = written {
        if let Err(remove_err) = fs::remove_file(path).await {
            if remove_err.kind() != ErrorKind::NotFound {
                warn!(path = %path.display(), "failed to remove partial upload: {remove_err}");
            }
        }
        return Err(err.into());
    }
    Ok(())
}

/// Returns the entry count (when `log.entries` is an array) and `log.version`.
fn validate(bytes: &[u8]) -> Result<(Option<usize>, Option<String>)> {
    let value: Value = serde_json::from_slice(bytes)
        .map_err(|e| CaptureError::Validation(format!("not valid JSON: {e}")))?;
    let root = value
        .as_object()
        .ok_or_else(|| CaptureError::Validation("top level must be a JSON object".to_string()))?;
    let log = root
        .get("log")
        .and_then(Value::as_object)
        .ok_or_else(|| CaptureError::Validation("missing `log` object".to_string()))?;

    let entries = log.get("entries").and_then(Value::as_array).map(Vec::len);
    let version = log.get("version").and_then(Value::as_str).map(str::to_string);
    Ok((entries, version))
}

/// Keeps the final path component and maps anything outside
/// `[A-Za-z0-9._-]` to `_`.
fn sanitize_file_name(original: &str) -> String {
    let base = original
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim();
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .take(MAX_NAME_LEN)
        .collect();
    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        FALLBACK_NAME.to_string()
    } else {
        cleaned.to_string()
    }
}

fn unix_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default()
}
