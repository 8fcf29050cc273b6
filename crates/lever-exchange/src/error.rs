//! Adapter error taxonomy.
//!
//! Every adapter call is classified transient-or-fatal: the core retries
//! transient failures with backoff and surfaces fatal ones immediately.

use thiserror::Error;

/// Errors returned by exchange adapter calls.
#[derive(Debug, Clone, Error)]
pub enum AdapterError {
    /// Transient network/availability failure; safe to retry with backoff.
    #[error("Transient adapter failure: {0}")]
    Transient(String),

    /// The exchange understood and refused the request (bad size,
    /// insufficient funds on the venue, etc.). Retrying the same request
    /// is pointless, but the call site may rephrase and resubmit.
    #[error("Exchange rejection: {0}")]
    Rejected(String),

    /// Unrecoverable failure for this call (protocol violation, auth,
    /// unknown order).
    #[error("Fatal adapter failure: {0}")]
    Fatal(String),
}

impl AdapterError {
    /// True when the same request may be retried after backoff.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Result type alias for adapter operations.
pub type AdapterResult<T> = std::result::Result<T, AdapterError>;
