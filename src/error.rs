//! Error types for the CSI manifest generator
//!
//! Every failure inside a generation run is fatal: the run is aborted and
//! no partial bundle is handed back. The classification in [`Error::action`]
//! is meant for the reconciliation loop that drives the generator.

use thiserror::Error;

/// Unified error type for the generator
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Patch {patch_name} targets {source_name}, which is not in the bundle")]
    PatchTargetNotFound {
        source_name: String,
        patch_name: String,
    },

    // =========================================================================
    // Template Store Errors
    // =========================================================================
    #[error("Asset not found: {name}")]
    AssetNotFound { name: String },

    // =========================================================================
    // Document Errors
    // =========================================================================
    #[error("Failed to parse {name}: {reason}")]
    Parse { name: String, reason: String },

    #[error("Failed to apply patch to {name}: {reason}")]
    PatchFailed { name: String, reason: String },

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // =========================================================================
    // IO Errors
    // =========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Action the caller should take when a generation run fails
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorAction {
    /// Requeue with exponential backoff
    RequeueWithBackoff,
    /// Don't requeue, wait for the configuration or templates to change
    NoRequeue,
}

impl Error {
    /// Determine what action to take for this error
    pub fn action(&self) -> ErrorAction {
        match self {
            // Reading templates or writing bundles can fail transiently
            Error::Io(_) => ErrorAction::RequeueWithBackoff,

            // Same inputs produce the same failure
            Error::Configuration(_)
            | Error::PatchTargetNotFound { .. }
            | Error::AssetNotFound { .. }
            | Error::Parse { .. }
            | Error::PatchFailed { .. }
            | Error::Yaml(_)
            | Error::Json(_) => ErrorAction::NoRequeue,
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        !matches!(self.action(), ErrorAction::NoRequeue)
    }

    pub(crate) fn parse(name: impl Into<String>, reason: impl ToString) -> Self {
        Error::Parse {
            name: name.into(),
            reason: reason.to_string(),
        }
    }
}

/// Result type alias for the generator
pub type Result<T> = std::result::Result<T, Error>;
