//! Custom error types for scholar-citations.
//!
//! Library functions return `Result<T, CitationError>`. Only the binary
//! reaches for `anyhow`.

use thiserror::Error;

/// Main error type for scholar-citations operations.
#[derive(Debug, Error)]
pub enum CitationError {
    /// Network/HTTP request error
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// HTML parsing error
    #[error("Parse error: {0}")]
    Parse(String),

    /// Rate limited by Google Scholar
    #[error("Rate limited, retry after {0}s")]
    RateLimited(u64),

    /// Non-success HTTP status
    #[error("HTTP error: {status} - {message}")]
    Http {
        /// Status code returned by the server
        status: u16,
        /// Short description
        message: String,
    },

    /// CAPTCHA or automated-traffic block page
    #[error("CAPTCHA detected, requests are being blocked")]
    Captcha,

    /// File I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Configuration error
    #[error("Config error: {0}")]
    Config(String),

    /// Another run holds the snapshot lock
    #[error("Snapshot is locked by another run: {0}")]
    Locked(String),

    /// No HTTP session could be constructed at all
    #[error("Scraping client unavailable: {0}")]
    Unavailable(String),
}

/// Result type alias using `CitationError`
pub type Result<T> = std::result::Result<T, CitationError>;

/// Extension trait for adding context to Option types
pub trait OptionExt<T> {
    /// Convert Option to Result with a parse error message
    fn ok_or_parse(self, msg: &str) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_parse(self, msg: &str) -> Result<T> {
        self.ok_or_else(|| CitationError::Parse(msg.to_string()))
    }
}
