//! Error types for the provisioner crate.

use thiserror::Error;

use crate::store::StoreError;

/// Result type alias for provisioner operations.
pub type Result<T> = std::result::Result<T, ProvisionError>;

/// Errors that escape a provisioning run.
///
/// Per-resource failures never surface here; they are logged and recorded in
/// the [`ConvergenceReport`](crate::report::ConvergenceReport). A run only
/// fails when something breaks outside the per-resource boundaries.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProvisionError {
    /// Store error that could not be attributed to a single resource.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// The run stopped before finishing (panicked or was cancelled).
    #[error("provisioning run aborted: {reason}")]
    Aborted { reason: String },

    /// Embedded seed data could not be parsed.
    #[error("invalid seed data: {reason}")]
    InvalidSeed { reason: String },

    /// Invalid configuration.
    #[error("invalid configuration: {reason}")]
    InvalidConfig { reason: String },
}

impl ProvisionError {
    /// Create an aborted error.
    pub fn aborted(reason: impl Into<String>) -> Self {
        Self::Aborted {
            reason: reason.into(),
        }
    }

    /// Create an invalid seed error.
    pub fn invalid_seed(reason: impl Into<String>) -> Self {
        Self::InvalidSeed {
            reason: reason.into(),
        }
    }

    /// Create an invalid config error.
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }
}
