use serde_json::Value;
use std::process::{Command, Output};
use tempfile::TempDir;

fn harcap(args: &[&str], mock_engine: bool) -> Output {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_harcap"));
    cmd.args(args).env_remove("HARCAP_CONFIG").env("RUST_LOG", "off");
    if mock_engine {
        cmd.env("HARCAP_MOCK_ENGINE", "1");
    } else {
        cmd.env_remove("HARCAP_MOCK_ENGINE");
    }
    cmd.output().expect("run harcap")
}

fn stdout_json(output: &Output) -> Value {
    serde_json::from_slice(&output.stdout).expect("stdout is JSON")
}

#[test]
fn capture_with_mock_engine_succeeds_and_inlines_har() {
    let output = harcap(&["capture", "demo.example", "--timeout", "10"], true);
    assert_eq!(output.status.code(), Some(0));

    let body = stdout_json(&output);
    assert_eq!(body["mode"], "capture");
    assert_eq!(body["url"], "https://demo.example/");
    assert_eq!(body["page"]["title"], "Demo page");
    assert_eq!(body["har"]["log"]["version"], "1.2");
    assert!(body["stats"]["entries"].as_u64().unwrap_or(0) > 0);
}

#[test]
fn capture_writes_har_file_when_asked() {
    let dir = TempDir::new().expect("tempdir");
    let har_path = dir.path().join("demo.har");
    let output = harcap(
        &["capture", "demo.example", "--no-block", "--har", har_path.to_str().unwrap()],
        true,
    );
    assert_eq!(output.status.code(), Some(0));

    let body = stdout_json(&output);
    assert!(body.get("har").is_none());
    assert_eq!(body["blocked"].as_array().map(Vec::len), Some(0));

    let text = std::fs::read_to_string(&har_path).expect("har written");
    let har: Value = serde_json::from_str(&text).expect("har is JSON");
    assert!(har["log"]["entries"]
        .as_array()
        .expect("entries")
        .iter()
        .any(|e| e["request"]["url"].as_str().is_some_and(|u| u.ends_with(".png"))));
}

#[test]
fn capture_timeout_exits_with_error_payload() {
    let output = harcap(&["capture", "hang.test", "--timeout", "1"], true);
    assert_eq!(output.status.code(), Some(2));

    let body = stdout_json(&output);
    assert_eq!(body["mode"], "error");
    assert_eq!(body["error"]["category"], "timeout");
}

#[test]
fn invalid_url_exits_with_input_error() {
    let output = harcap(&["capture", "ftp://example.com"], true);
    assert_eq!(output.status.code(), Some(2));
    assert_eq!(stdout_json(&output)["error"]["category"], "input");
}

#[test]
fn invalid_config_exits_with_config_error() {
    let dir = TempDir::new().expect("tempdir");
    let cfg_path = dir.path().join("harcap.toml");
    std::fs::write(&cfg_path, "[capture]\nblock = [\"document\"]\n").expect("write config");

    let output = harcap(
        &["--config", cfg_path.to_str().unwrap(), "capture", "example.com"],
        true,
    );
    assert_eq!(output.status.code(), Some(2));
    assert_eq!(stdout_json(&output)["error"]["category"], "config");
}

#[test]
fn config_file_overrides_defaults() {
    let dir = TempDir::new().expect("tempdir");
    let cfg_path = dir.path().join("harcap.toml");
    std::fs::write(
        &cfg_path,
        "[browser]\nviewport = { width = 640, height = 480 }\n\n[capture]\nblock = [\"font\"]\nsettle_window = \"50ms\"\n",
    )
    .expect("write config");

    let output = harcap(
        &["--config", cfg_path.to_str().unwrap(), "capture", "demo.example"],
        true,
    );
    assert_eq!(output.status.code(), Some(0));
    let body = stdout_json(&output);
    assert_eq!(body["viewport"]["width"], 640);
    assert_eq!(body["blocked"], serde_json::json!(["font"]));
}

#[test]
fn ingest_accepts_har_and_rejects_garbage() {
    let dir = TempDir::new().expect("tempdir");
    let uploads = dir.path().join("uploads");
    let good = dir.path().join("good.har");
    let bad = dir.path().join("bad.har");
    std::fs::write(&good, r#"{"log": {"version": "1.2", "entries": []}}"#).expect("write good");
    std::fs::write(&bad, "this is not json").expect("write bad");

    let output = harcap(
        &["ingest", good.to_str().unwrap(), "--uploads-dir", uploads.to_str().unwrap()],
        false,
    );
    assert_eq!(output.status.code(), Some(0));
    let body = stdout_json(&output);
    assert_eq!(body["mode"], "ingest");
    assert_eq!(body["message"], "HAR data received successfully");
    assert_eq!(body["entries"], 0);

    let output = harcap(
        &["ingest", bad.to_str().unwrap(), "--uploads-dir", uploads.to_str().unwrap()],
        false,
    );
    assert_eq!(output.status.code(), Some(2));
    assert_eq!(stdout_json(&output)["error"]["category"], "validation");
    assert_eq!(std::fs::read_dir(&uploads).expect("uploads").count(), 1);
}
