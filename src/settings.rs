use std::path::Path;
use std::time::Duration;

use harcap_lib::{BlockPolicy, CaptureError, CaptureOptions, Config, Viewport};

/// Capture flags as given on the command line; `None` defers to config.
#[derive(Debug, Default, Clone)]
pub struct CaptureOverrides {
    pub timeout_secs: Option<u64>,
    pub block: Option<BlockPolicy>,
    pub no_block: bool,
    pub viewport: Option<Viewport>,
}

/// Resolved settings after merging CLI args and config file.
#[derive(Debug, Clone)]
pub struct ResolvedCaptureSettings {
    pub options: CaptureOptions,
    pub timeout: Duration,
    pub block: BlockPolicy,
}

/// Merge CLI arguments with config, preferring CLI when flags are present.
pub fn resolve_capture_settings(
    config: &Config,
    overrides: &CaptureOverrides,
) -> Result<ResolvedCaptureSettings, CaptureError> {
    let mut options = config.capture_options()?;
    if let Some(viewport) = overrides.viewport {
        options.viewport = viewport;
    }
    let timeout = match overrides.timeout_secs {
        Some(0) => return Err(CaptureError::Config("--timeout must be greater than zero".to_string())),
        Some(secs) => Duration::from_secs(secs),
        None => options.default_timeout,
    };
    let block = if overrides.no_block {
        BlockPolicy::none()
    } else {
        overrides
            .block
            .clone()
            .unwrap_or_else(|| options.default_block_policy.clone())
    };
    Ok(ResolvedCaptureSettings {
        options,
        timeout,
        block,
    })
}

/// Load config from a TOML file, `HARCAP_CONFIG`, central config, or defaults,
/// then validate it.
pub fn load_config(path: Option<&Path>) -> Result<Config, CaptureError> {
    let cfg = Config::load(path)?;
    cfg.validate().map_err(|e| {
        let prefix = path
            .map(|p| format!("Invalid config ({}): {}", p.display(), e))
            .unwrap_or_else(|| format!("Invalid config: {}", e));
        CaptureError::Config(prefix)
    })?;
    Ok(cfg)
}

/// Format effective capture settings as a single-line string.
pub fn format_effective_config(settings: &ResolvedCaptureSettings, config_source: Option<&Path>) -> String {
    let source = config_source
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "defaults".to_string());
    let options = &settings.options;
    format!(
        "Effective config [{source}]: viewport={}, timeout={}s, block={}, settle: max-inflight={} window={}ms, sessions={}, launch={}s, teardown={}s",
        options.viewport,
        settings.timeout.as_secs(),
        settings.block,
        options.settle.max_inflight,
        options.settle.quiet_window.as_millis(),
        options.max_concurrent_sessions,
        options.launch.launch_timeout.as_secs(),
        options.launch.teardown_timeout.as_secs(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use harcap_lib::ResourceKind;

    #[test]
    fn resolve_prefers_config_when_flags_absent() {
        let mut cfg = Config::default();
        cfg.capture.timeout = Duration::from_secs(7);
        cfg.capture.block = vec!["font".to_string()];
        cfg.browser.viewport = Viewport {
            width: 111,
            height: 222,
        };

        let resolved = resolve_capture_settings(&cfg, &CaptureOverrides::default()).unwrap();
        assert_eq!(resolved.timeout, Duration::from_secs(7));
        assert_eq!(resolved.options.viewport.width, 111);
        assert!(resolved.block.blocks(ResourceKind::Font));
        assert!(!resolved.block.blocks(ResourceKind::Image));
    }

    #[test]
    fn resolve_prefers_cli_when_flags_present() {
        let overrides = CaptureOverrides {
            timeout_secs: Some(3),
            block: Some(BlockPolicy::new([ResourceKind::Media])),
            no_block: false,
            viewport: Some(Viewport {
                width: 10,
                height: 20,
            }),
        };
        let resolved = resolve_capture_settings(&Config::default(), &overrides).unwrap();
        assert_eq!(resolved.timeout, Duration::from_secs(3));
        assert_eq!(resolved.options.viewport.height, 20);
        assert!(resolved.block.blocks(ResourceKind::Media));
        assert!(!resolved.block.blocks(ResourceKind::Image));
    }

    #[test]
    fn no_block_and_zero_timeout() {
        let overrides = CaptureOverrides {
            no_block: true,
            ..CaptureOverrides::default()
        };
        let resolved = resolve_capture_settings(&Config::default(), &overrides).unwrap();
        assert!(resolved.block.is_empty());

        let overrides = CaptureOverrides {
            timeout_secs: Some(0),
            ..CaptureOverrides::default()
        };
        assert!(resolve_capture_settings(&Config::default(), &overrides).is_err());
    }

    #[test]
    fn format_effective_config_includes_all_fields() {
        let resolved = resolve_capture_settings(&Config::default(), &CaptureOverrides::default()).unwrap();
        let summary = format_effective_config(&resolved, Some(Path::new("harcap.toml")));
        assert!(summary.contains("viewport=1280x800"));
        assert!(summary.contains("timeout=30s"));
        assert!(summary.contains("block=stylesheet,image,media,font"));
        assert!(summary.contains("max-inflight=2"));
        assert!(summary.contains("window=500ms"));
        assert!(summary.contains("harcap.toml"));
    }
}
