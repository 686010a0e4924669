//! Logging init: compact `tracing` output on stderr so stdout stays
//! machine readable.

use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "warn,harcap=info,harcap_lib=info";
const VERBOSE_FILTER: &str = "warn,harcap=debug,harcap_lib=debug";

/// Filter used when `RUST_LOG` is unset or unparsable.
pub fn default_filter(verbose: bool) -> &'static str {
    if verbose {
        VERBOSE_FILTER
    } else {
        DEFAULT_FILTER
    }
}

/// Installs the global subscriber. `RUST_LOG` wins over `verbose`.
/// Calling it twice is harmless; the second call is ignored.
pub fn init(verbose: bool) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter(verbose)));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbose_switches_crate_targets_to_debug() {
        assert!(default_filter(false).contains("harcap_lib=info"));
        assert!(default_filter(true).contains("harcap_lib=debug"));
        assert!(EnvFilter::try_new(default_filter(true)).is_ok());
    }

    #[test]
    fn init_is_idempotent() {
        init(false);
        init(true);
    }
}
