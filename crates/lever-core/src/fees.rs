//! Maker/taker fee schedule.

use crate::order::OrderKind;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Default maker fee: 2 bps.
pub const DEFAULT_MAKER_RATE: Decimal = Decimal::from_parts(2, 0, 0, false, 4);

/// Default taker fee: 4 bps.
pub const DEFAULT_TAKER_RATE: Decimal = Decimal::from_parts(4, 0, 0, false, 4);

/// Fee schedule rewarding resting limit orders (maker) over
/// liquidity-consuming orders (taker).
///
/// Rates are fractions of notional, not bps.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeeSchedule {
    /// Fee rate for resting limit fills.
    pub maker_rate: Decimal,
    /// Fee rate for market / escalated fills.
    pub taker_rate: Decimal,
}

impl Default for FeeSchedule {
    fn default() -> Self {
        Self {
            maker_rate: DEFAULT_MAKER_RATE,
            taker_rate: DEFAULT_TAKER_RATE,
        }
    }
}

impl FeeSchedule {
    pub fn new(maker_rate: Decimal, taker_rate: Decimal) -> Self {
        Self {
            maker_rate,
            taker_rate,
        }
    }

    /// Rate for the realized order kind.
    pub fn rate_for(&self, kind: OrderKind) -> Decimal {
        match kind {
            OrderKind::Limit => self.maker_rate,
            OrderKind::Market => self.taker_rate,
        }
    }

    /// Fee in quote currency for a fill of `notional` at the realized kind.
    pub fn fee_for(&self, kind: OrderKind, notional: Decimal) -> Decimal {
        self.rate_for(kind) * notional
    }
}
