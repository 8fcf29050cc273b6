//! Position and allocation types.
//!
//! A `Position` is owned exclusively by the ledger and mutated only via
//! ledger operations. At most one non-closed position exists per
//! instrument at any time.

use crate::instrument::InstrumentId;
use crate::order::OrderSide;
use crate::{Price, Size};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Position direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    /// The order side that opens a position in this direction.
    pub fn entry_side(&self) -> OrderSide {
        match self {
            Self::Long => OrderSide::Buy,
            Self::Short => OrderSide::Sell,
        }
    }

    /// The order side that closes a position in this direction.
    pub fn exit_side(&self) -> OrderSide {
        self.entry_side().opposite()
    }

    /// 1 for long, -1 for short.
    pub fn sign(&self) -> i8 {
        match self {
            Self::Long => 1,
            Self::Short => -1,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Long => write!(f, "LONG"),
            Self::Short => write!(f, "SHORT"),
        }
    }
}

/// Position lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PositionStatus {
    Open,
    Closing,
    Closed,
}

impl PositionStatus {
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }
}

/// Unique position identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PositionId(String);

impl PositionId {
    pub fn new() -> Self {
        let ts = Utc::now().timestamp_millis();
        let uuid_short = &Uuid::new_v4().to_string()[..8];
        Self(format!("pos_{ts}_{uuid_short}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for PositionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PositionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An open leveraged position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub id: PositionId,
    pub instrument: InstrumentId,
    pub direction: Direction,
    /// Position size, always positive.
    pub size: Size,
    /// Average entry price net of nothing (gross fill price).
    pub entry_price: Price,
    pub leverage: Decimal,
    /// Stop-loss price level.
    pub stop_loss: Price,
    /// Take-profit price level.
    pub take_profit: Price,
    /// Best price seen in the profit-favorable direction since entry.
    /// Drives the trailing stop; moves monotonically.
    pub trailing_high_water: Price,
    pub status: PositionStatus,
    /// Fee paid on entry, quote currency.
    pub entry_fee: Decimal,
    /// Slippage cost on entry, quote currency.
    pub entry_slippage_cost: Decimal,
    pub opened_at: DateTime<Utc>,
}

impl Position {
    /// Margin committed to this position: notional / leverage.
    pub fn margin(&self) -> Decimal {
        if self.leverage.is_zero() {
            return Decimal::ZERO;
        }
        self.size.notional(self.entry_price) / self.leverage
    }

    /// Notional at entry, quote currency.
    pub fn notional(&self) -> Decimal {
        self.size.notional(self.entry_price)
    }

    /// Signed gross price movement fraction at `price`:
    /// positive when the position is in profit.
    pub fn gross_move(&self, price: Price) -> Decimal {
        let change = price
            .change_from(self.entry_price)
            .unwrap_or(Decimal::ZERO);
        change * Decimal::from(self.direction.sign())
    }
}

/// A request from the decision layer to allocate exposure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocationRequest {
    pub instrument: InstrumentId,
    pub direction: Direction,
    /// Requested notional, quote currency.
    pub notional: Decimal,
    /// Decision confidence in [0, 1].
    pub confidence: Decimal,
    /// Optional leverage hint; the ledger caps it by its own sizing.
    pub leverage_hint: Option<Decimal>,
}

/// A sized, risk-approved order ready for execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SizedOrder {
    pub instrument: InstrumentId,
    pub direction: Direction,
    /// Approved notional, quote currency.
    pub notional: Decimal,
    /// Base-asset size at the reference price used for sizing.
    pub size: Size,
    pub leverage: Decimal,
    /// Margin this order will commit.
    pub margin: Decimal,
    /// Stop-loss distance as a positive fraction of entry price.
    pub stop_loss_pct: Decimal,
    /// Take-profit distance as a positive fraction of entry price.
    pub take_profit_pct: Decimal,
}
