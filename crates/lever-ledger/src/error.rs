//! Error types for lever-ledger.

use lever_core::InstrumentId;
use lever_core::Size;
use rust_decimal::Decimal;
use thiserror::Error;

/// Ledger errors.
///
/// Invariant breaches reject the operation outright; the ledger never
/// silently clamps a request into compliance.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// Aggregate margin invariant would be violated by the new position.
    #[error(
        "Margin invariant violated for {instrument}: committed {committed} + new {required} \
         exceeds equity {equity} less reserves"
    )]
    MarginExceeded {
        instrument: InstrumentId,
        committed: Decimal,
        required: Decimal,
        equity: Decimal,
    },

    /// The cash-reserve floor would be breached by the new position.
    #[error("Cash reserve floor breached for {instrument}: free cash {free} below floor {floor}")]
    CashFloorBreached {
        instrument: InstrumentId,
        free: Decimal,
        floor: Decimal,
    },

    /// A non-closed position already exists for this instrument. This is
    /// an inconsistency signal, not a normal rejection.
    #[error("Position already exists for {0}")]
    PositionExists(InstrumentId),

    /// No position is known for this instrument.
    #[error("No position for {0}")]
    UnknownPosition(InstrumentId),

    /// An exit fill covered less than the full position. The position
    /// is shrunk to the residual and stays under risk monitoring.
    #[error("Incomplete close for {instrument}: filled {filled}, {remaining} remains open")]
    IncompleteClose {
        instrument: InstrumentId,
        filled: Size,
        remaining: Size,
    },

    /// The sizing reference price was zero or negative. Stale or absent
    /// prices skip the instrument; they are never defaulted.
    #[error("Non-positive reference price for {0}")]
    InvalidReferencePrice(InstrumentId),

    /// New entries are halted by the entry-halt latch.
    #[error("New entries halted: {reason}")]
    EntriesHalted { reason: String },

    /// Kill-switch liquidation left residual exposure after the bounded
    /// attempt count. Fatal: trips the entry-halt latch.
    #[error("Kill switch failed for {instrument}: residual exposure {residual} after {attempts} attempts")]
    KillSwitchFailure {
        instrument: InstrumentId,
        residual: Size,
        attempts: u32,
    },

    /// Persistence failure.
    #[error("Position store error: {0}")]
    Store(#[from] std::io::Error),

    #[error("Position store encoding error: {0}")]
    StoreEncoding(#[from] serde_json::Error),
}

/// Result type alias for ledger operations.
pub type LedgerResult<T> = std::result::Result<T, LedgerError>;
