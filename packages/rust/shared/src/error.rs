//! Error types for linkenrich.
//!
//! Library crates use [`LinkEnrichError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.
//!
//! Enrichment itself is best-effort: these errors travel up to the point where
//! a lookup or cache operation is abandoned, get logged there, and stop.

use std::path::PathBuf;

/// Top-level error type for all linkenrich operations.
#[derive(Debug, thiserror::Error)]
pub enum LinkEnrichError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Transport-level failure talking to the remote API.
    #[error("network error: {0}")]
    Network(String),

    /// The remote API answered with a non-success status.
    #[error("API error: {endpoint}: HTTP {status}")]
    Api { endpoint: String, status: u16 },

    /// Malformed payload (remote response, cache file, or input tree).
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error (bad slug, bad identifier, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, LinkEnrichError>;

impl LinkEnrichError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Non-success HTTP status from `endpoint`.
    pub fn api(endpoint: impl Into<String>, status: u16) -> Self {
        Self::Api {
            endpoint: endpoint.into(),
            status,
        }
    }

    /// Whether this error means "the file was not there", which callers
    /// loading optional files treat as an empty result.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Io { source, .. } if source.kind() == std::io::ErrorKind::NotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let err = LinkEnrichError::config("bad batch size");
        assert_eq!(err.to_string(), "config error: bad batch size");

        let err = LinkEnrichError::api("/graphql", 502);
        assert_eq!(err.to_string(), "API error: /graphql: HTTP 502");
    }

    #[test]
    fn not_found_detection() {
        let missing = LinkEnrichError::io(
            "/nope",
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        );
        assert!(missing.is_not_found());

        let denied = LinkEnrichError::io(
            "/nope",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "no"),
        );
        assert!(!denied.is_not_found());
        assert!(!LinkEnrichError::parse("x").is_not_found());
    }
}
