//! Error types for zerotesting-publisher

use thiserror::Error;

/// Errors that can occur while addressing or messaging a peer node
#[derive(Error, Debug)]
pub enum InjectError {
    /// Target carries neither a service nor a name template
    #[error("Target {0} has neither a service nor a name template")]
    NoAddressing(String),

    /// DNS resolution failed
    #[error("Failed to resolve {host}: {reason}")]
    Resolution { host: String, reason: String },

    /// Request URL could not be built
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Transport failure (connect, timeout, reset)
    #[error("HTTP error: {0}")]
    Http(String),

    /// JSON encoding error
    #[error("JSON encoding error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<reqwest::Error> for InjectError {
    fn from(err: reqwest::Error) -> Self {
        InjectError::Http(err.to_string())
    }
}

/// Result type for injector operations
pub type Result<T> = std::result::Result<T, InjectError>;
