//! Error types for lever-cycle.

use lever_core::InstrumentId;
use lever_exchange::AdapterError;
use lever_exec::ExecError;
use lever_ledger::LedgerError;
use thiserror::Error;

/// Orchestrator errors.
#[derive(Debug, Error)]
pub enum CycleError {
    /// A flagged close did not reach CLOSED within the bounded wait.
    /// Hard failure for that instrument; never silently ignored.
    #[error("Close not confirmed for {0} within the bounded wait")]
    CloseUnconfirmed(InstrumentId),

    /// Shutdown was requested mid-cycle.
    #[error("Cycle cancelled by shutdown")]
    Cancelled,

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Execution error: {0}")]
    Exec(#[from] ExecError),

    #[error("Adapter error: {0}")]
    Adapter(#[from] AdapterError),
}

/// Result type alias for cycle operations.
pub type CycleResult<T> = std::result::Result<T, CycleError>;
