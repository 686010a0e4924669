use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::capture::{
    BlockPolicy, CaptureOptions, DEFAULT_CAPTURE_TIMEOUT, DEFAULT_MAX_CONCURRENT_SESSIONS,
    DEFAULT_MAX_POST_DATA_BYTES,
};
use crate::engine::{LaunchOptions, PlaywrightOptions};
use crate::recorder::SettleCondition;
use crate::Viewport;

/// Environment variable naming a config file when `--config` is absent.
pub const CONFIG_ENV: &str = "HARCAP_CONFIG";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("{0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub browser: BrowserConfig,
    pub capture: CaptureConfig,
    pub uploads: UploadsConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BrowserConfig {
    /// Node.js executable used to run the Playwright helper.
    pub node_command: String,
    pub headless: bool,
    pub viewport: Viewport,
    pub max_concurrent_sessions: usize,
    #[serde(with = "humantime_serde")]
    pub launch_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub teardown_timeout: Duration,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        let launch = LaunchOptions::default();
        Self {
            node_command: "node".to_string(),
            headless: launch.headless,
            viewport: Viewport::default(),
            max_concurrent_sessions: DEFAULT_MAX_CONCURRENT_SESSIONS,
            launch_timeout: launch.launch_timeout,
            teardown_timeout: launch.teardown_timeout,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CaptureConfig {
    /// Budget for navigation plus network settle.
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub settle_window: Duration,
    pub max_inflight: usize,
    /// Resource kinds aborted at interception, e.g. `["image", "font"]`.
    pub block: Vec<String>,
    pub max_post_data_bytes: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        let settle = SettleCondition::default();
        Self {
            timeout: DEFAULT_CAPTURE_TIMEOUT,
            settle_window: settle.quiet_window,
            max_inflight: settle.max_inflight,
            block: BlockPolicy::default()
                .kinds()
                .map(|kind| kind.as_str().to_string())
                .collect(),
            max_post_data_bytes: DEFAULT_MAX_POST_DATA_BYTES,
        }
    }
}

impl CaptureConfig {
    pub fn block_policy(&self) -> Result<BlockPolicy, ConfigError> {
        BlockPolicy::parse_list(&self.block.join(","))
            .map_err(|e| ConfigError::Invalid(format!("capture.block: {e}")))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct UploadsConfig {
    pub dir: PathBuf,
    /// How long an ingested archive is kept before it is purged.
    #[serde(with = "humantime_serde")]
    pub retention: Duration,
}

impl Default for UploadsConfig {
    fn default() -> Self {
        Self {
            dir: std::env::temp_dir().join("harcap-uploads"),
            retention: Duration::from_secs(60 * 60),
        }
    }
}

impl Config {
    /// Loads config from an explicit path, then `HARCAP_CONFIG`, then the
    /// central location (`~/.config/harcap/config.toml`). Falls back to
    /// defaults when none of them exist.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = path {
            return Self::from_file(path);
        }
        if let Some(path) = std::env::var_os(CONFIG_ENV).filter(|v| !v.is_empty()) {
            return Self::from_file(Path::new(&path));
        }
        match Self::central_config_path() {
            Some(path) if path.is_file() => Self::from_file(&path),
            _ => Ok(Self::default()),
        }
    }

    pub fn central_config_path() -> Option<PathBuf> {
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".config")))?;
        Some(base.join("harcap").join("config.toml"))
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let durations = [
            ("browser.launch_timeout", self.browser.launch_timeout),
            ("browser.teardown_timeout", self.browser.teardown_timeout),
            ("capture.timeout", self.capture.timeout),
            ("capture.settle_window", self.capture.settle_window),
            ("uploads.retention", self.uploads.retention),
        ];
        for (name, value) in durations {
            if value.is_zero() {
                return Err(ConfigError::Invalid(format!("{name} must be greater than zero")));
            }
        }
        if self.browser.viewport.width == 0 || self.browser.viewport.height == 0 {
            return Err(ConfigError::Invalid("browser.viewport dimensions must be positive".to_string()));
        }
        if self.browser.max_concurrent_sessions == 0 {
            return Err(ConfigError::Invalid(
                "browser.max_concurrent_sessions must be at least 1".to_string(),
            ));
        }
        if self.browser.node_command.trim().is_empty() {
            return Err(ConfigError::Invalid("browser.node_command must not be empty".to_string()));
        }
        self.capture.block_policy()?;
        Ok(())
    }

    /// Engine-independent capture options. Call [`validate`](Self::validate) first.
    pub fn capture_options(&self) -> Result<CaptureOptions, ConfigError> {
        Ok(CaptureOptions {
            viewport: self.browser.viewport,
            launch: LaunchOptions {
                headless: self.browser.headless,
                launch_timeout: self.browser.launch_timeout,
                teardown_timeout: self.browser.teardown_timeout,
            },
            settle: SettleCondition {
                max_inflight: self.capture.max_inflight,
                quiet_window: self.capture.settle_window,
            },
            default_timeout: self.capture.timeout,
            default_block_policy: self.capture.block_policy()?,
            max_concurrent_sessions: self.browser.max_concurrent_sessions,
            max_post_data_bytes: self.capture.max_post_data_bytes,
        })
    }

    pub fn playwright_options(&self) -> PlaywrightOptions {
        PlaywrightOptions {
            node_command: self.browser.node_command.clone(),
            ..PlaywrightOptions::default()
        }
    }
}
