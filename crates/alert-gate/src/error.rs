//! Error types for the admission gate.

use thiserror::Error;

/// Errors that can occur while admitting an occurrence or tracking its alert.
///
/// A denial is never an error: callers receive `Ok` with `allowed == false`
/// for suppressed or below-threshold occurrences. Any `Err` means the
/// outcome is unknown and the occurrence must be retried or surfaced.
#[derive(Debug, Error)]
pub enum GateError {
    /// Source or fingerprint was empty after trimming
    #[error("invalid gate key: {field} must not be empty")]
    InvalidKey {
        /// Name of the offending field
        field: &'static str,
    },

    /// Fingerprint was empty after trimming
    #[error("invalid fingerprint: must not be empty")]
    InvalidFingerprint,

    /// Lifecycle status was not one of the known values
    #[error("invalid alert status: {0:?}")]
    InvalidStatus(String),

    /// Backing store failed or the caller's deadline expired
    #[error("state store unavailable: {0}")]
    StoreUnavailable(String),

    /// No store handle was configured
    #[error("state store not initialized")]
    NotInitialized,

    /// Configuration could not be loaded
    #[error("configuration error: {0}")]
    Config(String),
}

impl GateError {
    /// Build a `StoreUnavailable` error from any displayable cause.
    pub fn unavailable(cause: impl std::fmt::Display) -> Self {
        Self::StoreUnavailable(cause.to_string())
    }

    /// Whether retrying the same call may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::StoreUnavailable(_))
    }
}

/// Result alias used throughout the crate.
pub type Result<T, E = GateError> = std::result::Result<T, E>;
