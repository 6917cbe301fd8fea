//! Shared error type for the coordination core.

use thiserror::Error;

/// Result type alias used across the coordination core crates.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Unified error type for coordination-core operations.
///
/// Variants mirror the closed error-kind set in the coordination design:
/// each kind has a single well-defined propagation rule (see the crate
/// docs of `bot-lock`, `bot-buffer`, and `bot-coordinator` for where each
/// variant is raised and how it is handled).
#[derive(Error, Debug, Clone)]
pub enum CoreError {
    /// A message has already been processed; re-delivery is a no-op.
    #[error("duplicate: {0}")]
    Duplicate(String),

    /// A named lock is currently held by another owner.
    #[error("lock held by {current_owner}")]
    LockHeld {
        current_owner: String,
        expires_at: Option<chrono::DateTime<chrono::Utc>>,
    },

    /// A compare-and-set attempt lost the race against a concurrent writer.
    #[error("CAS conflict on key {0}")]
    CasConflict(String),

    /// A transient transport failure (network, timeout, quota). Callers
    /// that see this after retries are exhausted should treat it as
    /// recoverable by retrying later, not as a permanent failure.
    #[error("transient transport error: {0}")]
    Transient(String),

    /// Both the primary and fallback KV providers are unreachable.
    #[error("no KV provider reachable: {0}")]
    ProviderFatal(String),

    /// A buffered batch failed validation (e.g. missing media payload).
    #[error("validation failed: {0}")]
    ValidationFailed(String),

    /// An external collaborator (identity store, task engine) reported
    /// an expired or invalid credential. The core does not attempt to
    /// refresh it; this propagates to the caller unchanged.
    #[error("auth expired: {0}")]
    AuthExpired(String),

    /// A condition the supervisor cannot recover from; triggers shutdown.
    #[error("unrecoverable: {0}")]
    Unrecoverable(String),

    /// Key absent where presence was required (delete/get of a missing key).
    #[error("not found: {0}")]
    NotFound(String),

    /// Malformed configuration (bad env var, unknown provider tag, ...).
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Catch-all for invariants that should never trip in practice.
    #[error("internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Whether this error represents a condition worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CoreError::Transient(_) | CoreError::CasConflict(_))
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::Internal(format!("serialization error: {err}"))
    }
}
