//! Entry-halt latch.
//!
//! Once triggered, the latch stays triggered until an operator resets
//! it. New sizings are rejected while halted; exit evaluation and
//! monitoring of existing positions continue untouched.

use lever_core::{InstrumentId, Size};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{error, info, warn};

/// Reason the latch was tripped.
#[derive(Debug, Clone, PartialEq)]
pub enum HaltReason {
    /// Kill-switch liquidation left residual exposure.
    KillSwitchFailure {
        instrument: InstrumentId,
        residual: Size,
    },
    /// Manual trigger by an operator.
    Manual { message: String },
}

impl std::fmt::Display for HaltReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::KillSwitchFailure {
                instrument,
                residual,
            } => write!(
                f,
                "Kill switch failure on {instrument}, residual exposure {residual}"
            ),
            Self::Manual { message } => write!(f, "Manual: {message}"),
        }
    }
}

/// Latch halting new entries. Thread-safe behind `Arc`.
pub struct EntryHaltLatch {
    halted: AtomicBool,
    reason: RwLock<Option<HaltReason>>,
}

impl Default for EntryHaltLatch {
    fn default() -> Self {
        Self::new()
    }
}

impl EntryHaltLatch {
    #[must_use]
    pub fn new() -> Self {
        Self {
            halted: AtomicBool::new(false),
            reason: RwLock::new(None),
        }
    }

    #[must_use]
    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::SeqCst)
    }

    /// Trip the latch. A second trigger keeps the original reason.
    pub fn trigger(&self, reason: HaltReason) {
        if self
            .halted
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            *self.reason.write() = Some(reason.clone());
            error!(%reason, "ENTRY HALT TRIGGERED");
        } else {
            warn!(new_reason = %reason, "Entry halt already triggered, keeping original reason");
        }
    }

    #[must_use]
    pub fn reason(&self) -> Option<HaltReason> {
        if self.is_halted() {
            self.reason.read().clone()
        } else {
            None
        }
    }

    /// Manual operator reset after the underlying condition is resolved.
    pub fn reset(&self) {
        if self.is_halted() {
            let previous = self.reason.read().clone();
            info!(previous_reason = ?previous, "Entry halt manually reset");
            self.halted.store(false, Ordering::SeqCst);
            *self.reason.write() = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn starts_clear() {
        let latch = EntryHaltLatch::new();
        assert!(!latch.is_halted());
        assert!(latch.reason().is_none());
    }

    #[test]
    fn trigger_latches_and_keeps_first_reason() {
        let latch = EntryHaltLatch::new();
        latch.trigger(HaltReason::KillSwitchFailure {
            instrument: InstrumentId::from("BTC-PERP"),
            residual: Size::new(dec!(0.5)),
        });
        latch.trigger(HaltReason::Manual {
            message: "second".to_string(),
        });

        assert!(latch.is_halted());
        assert!(matches!(
            latch.reason(),
            Some(HaltReason::KillSwitchFailure { .. })
        ));
    }

    #[test]
    fn reset_is_manual_only() {
        let latch = EntryHaltLatch::new();
        latch.trigger(HaltReason::Manual {
            message: "drill".to_string(),
        });
        latch.reset();
        assert!(!latch.is_halted());
        assert!(latch.reason().is_none());
    }
}
