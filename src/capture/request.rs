use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;
use url::Url;

use crate::engine::ResourceKind;
use crate::error::{CaptureError, Result};

/// Resource kinds aborted at the interception layer.
///
/// The default blocks images, stylesheets, fonts and media. Documents can
/// never be blocked; asking for it is silently ignored here and rejected by
/// config validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockPolicy {
    kinds: BTreeSet<ResourceKind>,
}

impl Default for BlockPolicy {
    fn default() -> Self {
        Self::new([
            ResourceKind::Image,
            ResourceKind::Stylesheet,
            ResourceKind::Font,
            ResourceKind::Media,
        ])
    }
}

impl BlockPolicy {
    pub fn new(kinds: impl IntoIterator<Item = ResourceKind>) -> Self {
        Self {
            kinds: kinds
                .into_iter()
                .filter(|kind| *kind != ResourceKind::Document)
                .collect(),
        }
    }

    /// Allows everything.
    pub fn none() -> Self {
        Self {
            kinds: BTreeSet::new(),
        }
    }

    pub fn blocks(&self, kind: ResourceKind) -> bool {
        self.kinds.contains(&kind)
    }

    pub fn kinds(&self) -> impl Iterator<Item = ResourceKind> + '_ {
        self.kinds.iter().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }

    /// Parses a comma separated list such as `images,fonts`.
    pub fn parse_list(list: &str) -> std::result::Result<Self, String> {
        let kinds = list
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::parse::<ResourceKind>)
            .collect::<std::result::Result<Vec<_>, _>>()?;
        if kinds.contains(&ResourceKind::Document) {
            return Err("the document request cannot be blocked".to_string());
        }
        Ok(Self::new(kinds))
    }
}

impl fmt::Display for BlockPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.kinds.is_empty() {
            return f.write_str("none");
        }
        let names: Vec<&str> = self.kinds.iter().map(ResourceKind::as_str).collect();
        f.write_str(&names.join(","))
    }
}

/// Trims the input and injects `https://` when no scheme is given.
/// The result must be an absolute http(s) URL with a host.
pub fn normalize_target_url(input: &str) -> Result<Url> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(CaptureError::invalid_url(input, "URL is empty"));
    }

    let candidate = if has_scheme_prefix(trimmed) {
        trimmed.to_string()
    } else {
        format!("https://{trimmed}")
    };

    let url = Url::parse(&candidate).map_err(|e| CaptureError::invalid_url(input, e.to_string()))?;
    match url.scheme() {
        "http" | "https" => {}
        other => {
            return Err(CaptureError::invalid_url(
                input,
                format!("unsupported scheme '{other}'"),
            ))
        }
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(CaptureError::invalid_url(input, "URL has no host"));
    }
    Ok(url)
}

/// True when the input starts with `scheme://`. A `://` that only shows up
/// after the first `/`, `?` or `#` belongs to the path or query.
fn has_scheme_prefix(input: &str) -> bool {
    let Some((scheme, _)) = input.split_once("://") else {
        return false;
    };
    let mut chars = scheme.chars();
    chars.next().is_some_and(|c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
}

/// One capture job. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureRequest {
    url: Url,
    timeout: Duration,
    block_policy: BlockPolicy,
}

impl CaptureRequest {
    pub fn new(input: &str, timeout: Duration, block_policy: BlockPolicy) -> Result<Self> {
        if timeout.is_zero() {
            return Err(CaptureError::Config("capture timeout must be positive".to_string()));
        }
        Ok(Self {
            url: normalize_target_url(input)?,
            timeout,
            block_policy,
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn block_policy(&self) -> &BlockPolicy {
        &self.block_policy
    }

    /// Host name of the requested URL; used as the page title fallback.
    pub fn hostname(&self) -> &str {
        self.url.host_str().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scheme_is_injected_when_missing() {
        let bare = normalize_target_url("  example.com ").unwrap();
        let full = normalize_target_url("https://example.com").unwrap();
        assert_eq!(bare, full);
        assert_eq!(bare.as_str(), "https://example.com/");

        let nested = normalize_target_url("example.com/login?next=https://example.com/home").unwrap();
        assert_eq!(nested.as_str(), "https://example.com/login?next=https://example.com/home");
        assert_eq!(nested.host_str(), Some("example.com"));

        let fragment = normalize_target_url("example.com#ref=http://other.example").unwrap();
        assert_eq!(fragment.host_str(), Some("example.com"));
    }

    #[test]
    fn explicit_http_is_kept() {
        let url = normalize_target_url("http://localhost:8080/path?q=1").unwrap();
        assert_eq!(url.scheme(), "http");
        assert_eq!(url.port(), Some(8080));
    }

    #[test]
    fn rejects_empty_unsupported_and_hostless_input() {
        for input in ["", "   ", "ftp://example.com", "file:///etc/passwd", "https://", "exa mple.com"] {
            assert!(
                matches!(normalize_target_url(input), Err(CaptureError::InvalidUrl { .. })),
                "expected InvalidUrl for {input:?}"
            );
        }
    }

    #[test]
    fn default_policy_blocks_heavy_assets_only() {
        let policy = BlockPolicy::default();
        for kind in [
            ResourceKind::Image,
            ResourceKind::Stylesheet,
            ResourceKind::Font,
            ResourceKind::Media,
        ] {
            assert!(policy.blocks(kind));
        }
        assert!(!policy.blocks(ResourceKind::Document));
        assert!(!policy.blocks(ResourceKind::Script));
        assert!(!policy.blocks(ResourceKind::Xhr));
        assert_eq!(policy.to_string(), "stylesheet,image,media,font");
    }

    #[test]
    fn document_can_never_be_blocked() {
        let policy = BlockPolicy::new([ResourceKind::Document, ResourceKind::Script]);
        assert!(!policy.blocks(ResourceKind::Document));
        assert!(policy.blocks(ResourceKind::Script));
        assert!(BlockPolicy::parse_list("images,document").is_err());
    }

    #[test]
    fn parse_list_accepts_plural_names() {
        let policy = BlockPolicy::parse_list("images, fonts").unwrap();
        assert!(policy.blocks(ResourceKind::Image));
        assert!(policy.blocks(ResourceKind::Font));
        assert!(!policy.blocks(ResourceKind::Stylesheet));
        assert!(BlockPolicy::parse_list("pictures").is_err());
        assert!(BlockPolicy::parse_list("").unwrap().is_empty());
    }

    #[test]
    fn zero_timeout_is_rejected() {
        assert!(CaptureRequest::new("example.com", Duration::ZERO, BlockPolicy::default()).is_err());
        let req = CaptureRequest::new("example.com", Duration::from_secs(5), BlockPolicy::none()).unwrap();
        assert_eq!(req.hostname(), "example.com");
    }
}
