//! Market data snapshots.
//!
//! Tickers and order books are replaced wholesale by the feed on every
//! message and are read-only to consumers. They are never patched
//! incrementally across the crate boundary, which keeps reads consistent
//! without locking.

use crate::instrument::InstrumentId;
use crate::order::OrderSide;
use crate::{Price, Size};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Latest ticker for one instrument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentTicker {
    /// Instrument this ticker belongs to.
    pub instrument: InstrumentId,
    /// Last traded price.
    pub last_price: Price,
    /// 24h traded volume in quote currency.
    pub volume_24h: Decimal,
    /// 24h fractional price change.
    pub change_24h: Decimal,
    /// Exchange timestamp of the update.
    pub timestamp: DateTime<Utc>,
}

/// One price level of an order book side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookLevel {
    pub price: Price,
    pub size: Size,
}

impl BookLevel {
    pub fn new(price: Price, size: Size) -> Self {
        Self { price, size }
    }
}

/// Top-N order book snapshot for one instrument.
///
/// Bids are ordered descending by price, asks ascending. The constructor
/// enforces the ordering so consumers can index level 0 as best.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderBookSnapshot {
    pub instrument: InstrumentId,
    /// Bid levels, best (highest) first.
    pub bids: Vec<BookLevel>,
    /// Ask levels, best (lowest) first.
    pub asks: Vec<BookLevel>,
    /// Exchange timestamp of the update.
    pub timestamp: DateTime<Utc>,
}

impl OrderBookSnapshot {
    /// Build a snapshot, sorting both sides into canonical order.
    pub fn new(
        instrument: InstrumentId,
        mut bids: Vec<BookLevel>,
        mut asks: Vec<BookLevel>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        bids.sort_by(|a, b| b.price.cmp(&a.price));
        asks.sort_by(|a, b| a.price.cmp(&b.price));
        Self {
            instrument,
            bids,
            asks,
            timestamp,
        }
    }

    pub fn best_bid(&self) -> Option<Price> {
        self.bids.first().map(|l| l.price)
    }

    pub fn best_ask(&self) -> Option<Price> {
        self.asks.first().map(|l| l.price)
    }

    /// Mid price `(best_bid + best_ask) / 2`.
    ///
    /// `None` when either side is empty or the book is crossed.
    pub fn mid_price(&self) -> Option<Price> {
        let bid = self.best_bid()?;
        let ask = self.best_ask()?;
        if bid >= ask {
            return None;
        }
        Some(Price::new((bid.inner() + ask.inner()) / Decimal::TWO))
    }

    /// Relative spread `(best_ask - best_bid) / mid`.
    pub fn spread_fraction(&self) -> Option<Decimal> {
        let bid = self.best_bid()?;
        let ask = self.best_ask()?;
        let mid = self.mid_price()?;
        if mid.is_zero() {
            return None;
        }
        Some((ask.inner() - bid.inner()) / mid.inner())
    }

    /// Total size available in the top `levels` levels that an order on
    /// `side` would consume (asks for a buy, bids for a sell).
    pub fn depth_for(&self, side: OrderSide, levels: usize) -> Size {
        let book = match side {
            OrderSide::Buy => &self.asks,
            OrderSide::Sell => &self.bids,
        };
        book.iter()
            .take(levels)
            .fold(Size::ZERO, |acc, l| acc + l.size)
    }

    /// The best price on the side the order joins (bid for a buy,
    /// ask for a sell). Used for limit placement one tick inside.
    pub fn best_for_join(&self, side: OrderSide) -> Option<Price> {
        match side {
            OrderSide::Buy => self.best_bid(),
            OrderSide::Sell => self.best_ask(),
        }
    }
}
