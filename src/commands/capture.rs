use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use harcap_lib::har;
use harcap_lib::output::{CaptureOutput, HarcapOutput};
use harcap_lib::{
    CaptureError, CaptureRequest, CaptureService, Config, PlaywrightEngine, RenderingEngine,
    ScriptedEngine,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cli::OutputFormat;
use crate::formatting::{render_error, write_output};
use crate::settings::{format_effective_config, load_config, resolve_capture_settings, CaptureOverrides};

/// Setting this to `1` swaps the Playwright engine for the scripted demo engine.
pub const MOCK_ENGINE_ENV: &str = "HARCAP_MOCK_ENGINE";

/// Run the capture command.
pub async fn run_capture(
    config_path: Option<PathBuf>,
    url: String,
    overrides: CaptureOverrides,
    har_path: Option<PathBuf>,
    format: OutputFormat,
    output: Option<PathBuf>,
) -> ExitCode {
    let config = match load_config(config_path.as_deref()) {
        Ok(cfg) => cfg,
        Err(err) => return render_error(err, format, output),
    };
    let settings = match resolve_capture_settings(&config, &overrides) {
        Ok(settings) => settings,
        Err(err) => return render_error(err, format, output),
    };
    debug!("{}", format_effective_config(&settings, config_path.as_deref()));

    let request = match CaptureRequest::new(&url, settings.timeout, settings.block.clone()) {
        Ok(request) => request,
        Err(err) => return render_error(err, format, output),
    };
    let target = request.url().to_string();
    let blocked: Vec<String> = settings.block.kinds().map(|k| k.as_str().to_string()).collect();
    let viewport = settings.options.viewport;

    let service = CaptureService::new(select_engine(&config), settings.options);
    let cancel = CancellationToken::new();
    let interrupt = tokio::spawn(cancel_on_ctrl_c(cancel.clone()));
    let result = service.capture_with_cancel(request, cancel).await;
    interrupt.abort();

    let outcome = match result {
        Ok(outcome) => outcome,
        Err(err) => return render_error(err, format, output),
    };

    if let Some(path) = &har_path {
        if let Err(err) = har::write_to(&outcome.har, path).await {
            return render_error(err, format, output);
        }
        info!(path = %path.display(), entries = outcome.stats.entries, "wrote HAR file");
    }

    let body = HarcapOutput::Capture(CaptureOutput::new(target, viewport, blocked, outcome, har_path));
    if let Err(err) = write_output(&body, format, output.clone()) {
        return render_error(CaptureError::Config(err.to_string()), format, output);
    }
    ExitCode::SUCCESS
}

fn select_engine(config: &Config) -> Arc<dyn RenderingEngine> {
    if std::env::var(MOCK_ENGINE_ENV).is_ok_and(|v| v == "1") {
        warn!("{MOCK_ENGINE_ENV}=1: using the scripted engine; no real browser is launched");
        return Arc::new(ScriptedEngine::demo());
    }
    Arc::new(PlaywrightEngine::new(config.playwright_options()))
}

async fn cancel_on_ctrl_c(cancel: CancellationToken) {
    if tokio::signal::ctrl_c().await.is_ok() {
        warn!("interrupted; tearing down the capture session");
        cancel.cancel();
    }
}
