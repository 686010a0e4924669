use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;

/// Fixed browser viewport applied before navigation.
///
/// Layout-dependent requests (responsive images, media queries that pull in
/// extra stylesheets) depend on it, so every capture pins the same size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 800,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ViewportParseError {
    #[error("Invalid viewport '{0}': expected WIDTHxHEIGHT (e.g., 1280x800)")]
    InvalidFormat(String),
    #[error("Invalid viewport dimension '{0}'")]
    InvalidDimension(String),
    #[error("Viewport dimensions must be positive")]
    Zero,
}

impl FromStr for Viewport {
    type Err = ViewportParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (w, h) = s
            .trim()
            .split_once(['x', 'X'])
            .ok_or_else(|| ViewportParseError::InvalidFormat(s.to_string()))?;

        let parse = |part: &str| {
            part.trim()
                .parse::<u32>()
                .map_err(|_| ViewportParseError::InvalidDimension(part.trim().to_string()))
        };
        let width = parse(w)?;
        let height = parse(h)?;

        if width == 0 || height == 0 {
            return Err(ViewportParseError::Zero);
        }
        Ok(Viewport { width, height })
    }
}

impl std::fmt::Display for Viewport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}
