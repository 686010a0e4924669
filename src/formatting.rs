use std::fmt::Write as FmtWrite;
use std::io::{self, IsTerminal};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use harcap_lib::output::{ErrorOutput, HarcapOutput, HARCAP_OUTPUT_VERSION};
use harcap_lib::CaptureError;

use crate::cli::OutputFormat;

/// Write output in the requested format.
pub fn write_output(
    body: &HarcapOutput,
    format: OutputFormat,
    output: Option<PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    match format {
        OutputFormat::Json => write_json_output(body, output.as_deref())?,
        OutputFormat::Pretty => write_pretty_output(body, output.as_deref())?,
    };
    Ok(())
}

/// Render an error and return the fatal exit code.
pub fn render_error(err: CaptureError, format: OutputFormat, output: Option<PathBuf>) -> ExitCode {
    let error_payload = err.to_payload();
    let payload = HarcapOutput::Error(ErrorOutput {
        version: HARCAP_OUTPUT_VERSION.to_string(),
        message: Some(error_payload.message.clone()),
        error: error_payload,
    });

    match format {
        OutputFormat::Json => {
            let content =
                serde_json::to_string(&payload).unwrap_or_else(|_| "{\"mode\":\"error\"}".into());
            if let Some(path) = output {
                if let Err(write_err) = std::fs::write(&path, &content) {
                    eprintln!("Failed to write error output: {}", write_err);
                    println!("{content}");
                }
            } else {
                println!("{content}");
            }
        }
        OutputFormat::Pretty => {
            if let Err(write_err) = write_pretty_output(&payload, output.as_deref()) {
                eprintln!("Failed to write error output: {}", write_err);
            }
        }
    };

    ExitCode::from(2)
}

/// Write JSON output to file or stdout.
fn write_json_output(body: &HarcapOutput, output: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let content = serde_json::to_string(body)?;
    if let Some(path) = output {
        std::fs::write(path, content)?;
    } else {
        println!("{content}");
    }
    Ok(())
}

/// Write pretty output to file or stdout.
fn write_pretty_output(body: &HarcapOutput, output: Option<&Path>) -> io::Result<()> {
    let stdout_is_tty = std::io::stdout().is_terminal();
    let use_human = output.is_none() && stdout_is_tty;

    if use_human {
        let content = format_pretty(body, true);
        println!("{content}");
        return Ok(());
    }

    // Non-tty or file output: keep JSON shape for pipelines/files.
    let content =
        serde_json::to_string_pretty(body).unwrap_or_else(|_| "{\"mode\":\"error\"}".to_string());
    if let Some(path) = output {
        std::fs::write(path, &content)?;
    } else {
        println!("{content}");
    }
    Ok(())
}

/// Format output for human consumption in a terminal.
pub fn format_pretty(body: &HarcapOutput, colorize: bool) -> String {
    let mut buf = String::new();
    match body {
        HarcapOutput::Capture(out) => {
            let header = color("[CAPTURE]", "32", colorize);
            writeln!(buf, "{} {}", header, out.page.title).ok();
            writeln!(buf, "URL: {} (host {})", out.page.final_url, out.page.hostname).ok();
            writeln!(
                buf,
                "Entries: {} recorded, {} aborted, {} incomplete in {:.1}s",
                out.stats.entries,
                out.stats.aborted,
                out.stats.incomplete,
                out.stats.elapsed.as_secs_f64()
            )
            .ok();
            let blocked = if out.blocked.is_empty() {
                "none".to_string()
            } else {
                out.blocked.join(", ")
            };
            writeln!(buf, "Blocked: {blocked}").ok();
            writeln!(buf, "Viewport: {}", out.viewport).ok();
            if let Some(path) = &out.har_path {
                writeln!(buf, "HAR: {}", path.display()).ok();
            } else if out.har.is_some() {
                writeln!(buf, "HAR: inline (use --har PATH to write a file)").ok();
            }
        }
        HarcapOutput::Ingest(out) => {
            let header = color("[INGEST]", "36", colorize);
            writeln!(buf, "{} {}", header, out.receipt.message).ok();
            writeln!(buf, "Source: {}", out.source.display()).ok();
            writeln!(buf, "Stored: {}", out.receipt.stored_path.display()).ok();
            if let Some(entries) = out.receipt.entries {
                writeln!(buf, "Entries: {entries}").ok();
            }
            if out.receipt.purged > 0 {
                writeln!(buf, "Purged {} expired upload(s)", out.receipt.purged).ok();
            }
        }
        HarcapOutput::Error(out) => {
            let header = color("[ERROR]", "31", colorize);
            let message = out
                .message
                .as_deref()
                .unwrap_or_else(|| out.error.message.as_str());
            writeln!(buf, "{} {}", header, message).ok();
            if let Some(remediation) = &out.error.remediation {
                writeln!(buf, "Hint: {}", remediation).ok();
            }
        }
    }
    buf
}

/// Apply ANSI color codes when enabled.
fn color(text: &str, code: &str, colorize: bool) -> String {
    if colorize {
        format!("\x1b[{}m{}\x1b[0m", code, text)
    } else {
        text.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use harcap_lib::error::{ErrorCategory, ErrorPayload};
    use harcap_lib::output::{CaptureOutput, IngestOutput};
    use harcap_lib::{CaptureStats, IngestReceipt, PageSummary, Viewport, ACKNOWLEDGEMENT};
    use std::time::Duration;

    #[test]
    fn render_error_always_returns_fatal_exit_code() {
        let code = render_error(
            CaptureError::Config("boom".to_string()),
            OutputFormat::Json,
            None,
        );
        assert_eq!(code, ExitCode::from(2));
    }

    #[test]
    fn format_pretty_summarizes_capture() {
        let output = HarcapOutput::Capture(CaptureOutput {
            version: HARCAP_OUTPUT_VERSION.to_string(),
            url: "https://example.com/".into(),
            page: PageSummary {
                title: "Example Domain".into(),
                hostname: "example.com".into(),
                final_url: "https://example.com/".into(),
            },
            viewport: Viewport::default(),
            blocked: vec!["image".into(), "font".into()],
            stats: CaptureStats {
                entries: 12,
                aborted: 4,
                incomplete: 1,
                elapsed: Duration::from_millis(2300),
            },
            har_path: Some(PathBuf::from("out.har")),
            har: None,
        });

        let pretty = format_pretty(&output, false);
        assert!(pretty.contains("[CAPTURE] Example Domain"));
        assert!(pretty.contains("Entries: 12 recorded, 4 aborted, 1 incomplete in 2.3s"));
        assert!(pretty.contains("Blocked: image, font"));
        assert!(pretty.contains("Viewport: 1280x800"));
        assert!(pretty.contains("HAR: out.har"));
    }

    #[test]
    fn format_pretty_summarizes_ingest() {
        let output = HarcapOutput::Ingest(IngestOutput {
            version: HARCAP_OUTPUT_VERSION.to_string(),
            source: PathBuf::from("trace.har"),
            receipt: IngestReceipt {
                message: ACKNOWLEDGEMENT.to_string(),
                stored_path: PathBuf::from("/tmp/up/1-trace.har"),
                entries: Some(2),
                har_version: Some("1.2".into()),
                purged: 3,
            },
        });

        let pretty = format_pretty(&output, false);
        assert!(pretty.contains("[INGEST] HAR data received successfully"));
        assert!(pretty.contains("Entries: 2"));
        assert!(pretty.contains("Purged 3 expired upload(s)"));
    }

    #[test]
    fn format_pretty_handles_errors() {
        let output = HarcapOutput::Error(ErrorOutput {
            version: HARCAP_OUTPUT_VERSION.to_string(),
            message: Some("bad input".to_string()),
            error: ErrorPayload {
                category: ErrorCategory::Config,
                message: "bad input".to_string(),
                remediation: Some("check flags".to_string()),
            },
        });

        let pretty = format_pretty(&output, false);
        assert!(pretty.contains("[ERROR] bad input"));
        assert!(pretty.contains("Hint: check flags"));
    }
}
