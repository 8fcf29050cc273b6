//! Order lifecycle types.
//!
//! An order is owned by the execution engine until it reaches a terminal
//! status, then handed to the ledger as a fill record. Status transitions
//! are monotonic: exactly one terminal state, and no transition ever
//! leaves a terminal state.

use crate::error::CoreError;
use crate::instrument::InstrumentId;
use crate::{Price, Size};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Order side: buy or sell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    /// Returns the opposite side.
    pub fn opposite(&self) -> Self {
        match self {
            Self::Buy => Self::Sell,
            Self::Sell => Self::Buy,
        }
    }

    /// Returns 1 for buy, -1 for sell (for signed PnL/slippage math).
    pub fn sign(&self) -> i8 {
        match self {
            Self::Buy => 1,
            Self::Sell => -1,
        }
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Buy => write!(f, "buy"),
            Self::Sell => write!(f, "sell"),
        }
    }
}

/// Order kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderKind {
    /// Resting limit order (maker if it rests).
    Limit,
    /// Liquidity-consuming market order (taker).
    Market,
}

impl fmt::Display for OrderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Limit => write!(f, "limit"),
            Self::Market => write!(f, "market"),
        }
    }
}

/// How urgently an execution must complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Urgency {
    /// Try a limit order first, escalate on timeout.
    Normal,
    /// Submit a market order immediately.
    High,
}

/// Order status. `Filled`, `Cancelled` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Pending,
    PartiallyFilled,
    Filled,
    Cancelled,
    Failed,
}

impl OrderStatus {
    /// Returns true if the status is terminal.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Filled | Self::Cancelled | Self::Failed)
    }

    /// Whether a transition from `self` to `next` is legal.
    ///
    /// Legal transitions form a monotonic lattice:
    /// Pending -> PartiallyFilled -> {Filled, Cancelled, Failed}
    /// Pending -> {Filled, Cancelled, Failed}
    /// A status may also be re-asserted (self-transition) by status polls.
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        if *self == next {
            return true;
        }
        match self {
            Self::Pending => true,
            Self::PartiallyFilled => next.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "PENDING"),
            Self::PartiallyFilled => write!(f, "PARTIALLY_FILLED"),
            Self::Filled => write!(f, "FILLED"),
            Self::Cancelled => write!(f, "CANCELLED"),
            Self::Failed => write!(f, "FAILED"),
        }
    }
}

/// Client-side order ID.
///
/// Every order gets a unique id before submission so retries can never
/// create duplicate orders. Format: `lev_{timestamp_ms}_{uuid_short}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrderId(String);

impl OrderId {
    pub fn new() -> Self {
        let ts = Utc::now().timestamp_millis();
        let uuid_short = &Uuid::new_v4().to_string()[..8];
        Self(format!("lev_{ts}_{uuid_short}"))
    }

    pub fn from_string(s: String) -> Self {
        Self(s)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for OrderId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An order as tracked by the execution engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub instrument: InstrumentId,
    pub side: OrderSide,
    /// Requested size in base asset.
    pub size: Size,
    pub kind: OrderKind,
    /// Limit price; `None` for market orders.
    pub limit_price: Option<Price>,
    pub status: OrderStatus,
    /// Cumulative filled size.
    pub filled_size: Size,
    /// Average fill price over the filled portion.
    pub avg_fill_price: Price,
    /// Fee paid so far, quote currency.
    pub fee: Decimal,
    /// True once the order has been escalated from limit to market.
    pub escalated: bool,
    /// When the order was submitted.
    pub submitted_at: DateTime<Utc>,
}

impl Order {
    /// Create a new limit order in `Pending` state.
    pub fn limit(instrument: InstrumentId, side: OrderSide, size: Size, price: Price) -> Self {
        Self {
            id: OrderId::new(),
            instrument,
            side,
            size,
            kind: OrderKind::Limit,
            limit_price: Some(price),
            status: OrderStatus::Pending,
            filled_size: Size::ZERO,
            avg_fill_price: Price::ZERO,
            fee: Decimal::ZERO,
            escalated: false,
            submitted_at: Utc::now(),
        }
    }

    /// Create a new market order in `Pending` state.
    pub fn market(instrument: InstrumentId, side: OrderSide, size: Size) -> Self {
        Self {
            id: OrderId::new(),
            instrument,
            side,
            size,
            kind: OrderKind::Market,
            limit_price: None,
            status: OrderStatus::Pending,
            filled_size: Size::ZERO,
            avg_fill_price: Price::ZERO,
            fee: Decimal::ZERO,
            escalated: false,
            submitted_at: Utc::now(),
        }
    }

    /// Apply a status transition, enforcing monotonicity.
    ///
    /// Rejects any transition out of a terminal state.
    pub fn transition(&mut self, next: OrderStatus) -> Result<(), CoreError> {
        if !self.status.can_transition_to(next) {
            return Err(CoreError::IllegalOrderTransition {
                order: self.id.to_string(),
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        self.status = next;
        Ok(())
    }

    /// Remaining unfilled size.
    pub fn remaining_size(&self) -> Size {
        self.size.saturating_sub(self.filled_size)
    }

    /// True if every requested unit has been filled.
    pub fn is_fully_filled(&self) -> bool {
        self.filled_size >= self.size
    }
}

/// Outcome of a completed `execute()` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Total filled size across all child orders.
    pub filled_size: Size,
    /// Size-weighted average fill price.
    pub avg_fill_price: Price,
    /// Total fee paid, quote currency.
    pub total_fee: Decimal,
    /// Signed fractional slippage versus the reference price at
    /// submission. Positive is always adverse regardless of side.
    pub slippage: Decimal,
    /// True if the limit order was escalated to market.
    pub escalated: bool,
}

impl ExecutionResult {
    /// Slippage cost in quote currency over the filled notional.
    pub fn slippage_cost(&self) -> Decimal {
        self.slippage * self.filled_size.notional(self.avg_fill_price)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn order() -> Order {
        Order::limit(
            InstrumentId::from("BTC-PERP"),
            OrderSide::Buy,
            Size::new(dec!(1)),
            Price::new(dec!(100)),
        )
    }

    #[test]
    fn status_lattice() {
        assert!(OrderStatus::Pending.can_transition_to(OrderStatus::PartiallyFilled));
        assert!(OrderStatus::Pending.can_transition_to(OrderStatus::Failed));
        assert!(OrderStatus::PartiallyFilled.can_transition_to(OrderStatus::Cancelled));
        assert!(!OrderStatus::Filled.can_transition_to(OrderStatus::Cancelled));
        assert!(!OrderStatus::Cancelled.can_transition_to(OrderStatus::Pending));
        // Self-transition (poll re-asserting status) is fine.
        assert!(OrderStatus::PartiallyFilled.can_transition_to(OrderStatus::PartiallyFilled));
    }

    #[test]
    fn terminal_states_are_sticky() {
        let mut o = order();
        o.transition(OrderStatus::Filled).unwrap();
        let err = o.transition(OrderStatus::Cancelled).unwrap_err();
        assert!(err.to_string().contains("FILLED"));
        assert_eq!(o.status, OrderStatus::Filled);
    }

    #[test]
    fn remaining_size_tracks_fills() {
        let mut o = order();
        o.filled_size = Size::new(dec!(0.4));
        assert_eq!(o.remaining_size(), Size::new(dec!(0.6)));
        assert!(!o.is_fully_filled());
        o.filled_size = Size::new(dec!(1));
        assert!(o.is_fully_filled());
    }

    #[test]
    fn order_ids_are_unique() {
        assert_ne!(OrderId::new(), OrderId::new());
        assert!(OrderId::new().as_str().starts_with("lev_"));
    }
}
