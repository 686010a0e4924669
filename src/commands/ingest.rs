use std::path::PathBuf;
use std::process::ExitCode;

use harcap_lib::output::{HarcapOutput, IngestOutput, HARCAP_OUTPUT_VERSION};
use harcap_lib::{CaptureError, UploadStore};
use tracing::debug;

use crate::cli::OutputFormat;
use crate::formatting::{render_error, write_output};
use crate::settings::load_config;

/// Run the ingest command.
pub async fn run_ingest(
    config_path: Option<PathBuf>,
    file: PathBuf,
    uploads_dir: Option<PathBuf>,
    format: OutputFormat,
    output: Option<PathBuf>,
) -> ExitCode {
    let config = match load_config(config_path.as_deref()) {
        Ok(cfg) => cfg,
        Err(err) => return render_error(err, format, output),
    };
    let dir = uploads_dir.unwrap_or_else(|| config.uploads.dir.clone());
    let store = UploadStore::new(dir, config.uploads.retention);
    debug!(dir = %store.dir().display(), retention = ?config.uploads.retention, "ingesting upload");

    let bytes = match tokio::fs::read(&file).await {
        Ok(bytes) => bytes,
        Err(err) => {
            let err = CaptureError::Config(format!("failed to read {}: {err}", file.display()));
            return render_error(err, format, output);
        }
    };
    let name = file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let receipt = match store.ingest(&name, &bytes).await {
        Ok(receipt) => receipt,
        Err(err) => return render_error(err, format, output),
    };

    let body = HarcapOutput::Ingest(IngestOutput {
        version: HARCAP_OUTPUT_VERSION.to_string(),
        source: file,
        receipt,
    });
    if let Err(err) = write_output(&body, format, output.clone()) {
        return render_error(CaptureError::Config(err.to_string()), format, output);
    }
    ExitCode::SUCCESS
}
