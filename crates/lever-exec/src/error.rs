//! Error types for lever-exec.

use lever_core::InstrumentId;
use lever_exchange::AdapterError;
use thiserror::Error;

/// Execution engine errors.
#[derive(Debug, Error)]
pub enum ExecError {
    /// No fresh price or book was available; the caller must skip, not
    /// act on a guess.
    #[error("No fresh market data for {0}")]
    MissingMarketData(InstrumentId),

    /// Zero relevant depth on the contra side. Retryable, distinct from
    /// adapter/connectivity failure.
    #[error("Insufficient liquidity for {0}")]
    InsufficientLiquidity(InstrumentId),

    /// Bounded submission retries exhausted; order is FAILED.
    #[error("Submission retries exhausted after {attempts} attempts")]
    RetriesExhausted { attempts: u32 },

    /// Execution was cancelled (shutdown) with nothing filled.
    #[error("Execution cancelled before any fill")]
    Cancelled,

    /// Adapter failure fatal to this call.
    #[error("Adapter error: {0}")]
    Adapter(#[from] AdapterError),

    #[error(transparent)]
    Core(#[from] lever_core::CoreError),
}

impl ExecError {
    /// True for conditions the caller may retry later (liquidity), as
    /// opposed to adapter failures fatal to this call.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::InsufficientLiquidity(_))
    }
}

/// Result type alias for execution operations.
pub type ExecResult<T> = std::result::Result<T, ExecError>;
