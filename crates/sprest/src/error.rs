//! Error types for the sprest crate.

use thiserror::Error;

/// Result type for sprest operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while setting up the REST store.
///
/// Errors of individual store calls are classified into
/// [`StoreError`](smartsite_provisioner::StoreError) instead.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error.
    #[error("configuration error: {reason}")]
    ConfigError { reason: String },

    /// HTTP client could not be built.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// URL parse error.
    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Create a config error.
    pub fn config_error(reason: impl Into<String>) -> Self {
        Self::ConfigError {
            reason: reason.into(),
        }
    }
}
