//! Exchange adapter capability trait.

use crate::error::AdapterResult;
use async_trait::async_trait;
use lever_core::{
    Direction, InstrumentId, InstrumentTicker, OrderBookSnapshot, OrderId, OrderKind, OrderSide,
    OrderStatus, Price, Size,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A new-order request submitted to the exchange.
///
/// Carries the client-assigned `OrderId` so retries after a transient
/// failure can never create duplicate orders.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub id: OrderId,
    pub instrument: InstrumentId,
    pub side: OrderSide,
    pub size: Size,
    pub kind: OrderKind,
    /// Required for limit orders, ignored for market orders.
    pub limit_price: Option<Price>,
}

/// Acknowledgement that the exchange accepted an order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderAck {
    pub id: OrderId,
}

/// Order status as reported by the exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderStatusReport {
    pub id: OrderId,
    pub status: OrderStatus,
    /// Cumulative filled size.
    pub filled_size: Size,
    /// Size-weighted average fill price over the filled portion.
    pub avg_fill_price: Price,
    /// Cumulative fee charged, quote currency.
    pub fee: Decimal,
}

/// Account balances, quote currency.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AccountBalances {
    /// Total account equity.
    pub equity: Decimal,
    /// Cash available for new margin.
    pub available: Decimal,
}

/// An open position as reported by the exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangePosition {
    pub instrument: InstrumentId,
    pub direction: Direction,
    pub size: Size,
    pub entry_price: Price,
}

/// Capability set consumed from the exchange.
///
/// Each call is transient-or-fatal classified via `AdapterError`; callers
/// retry transient failures with bounded backoff and surface the rest.
#[async_trait]
pub trait ExchangeAdapter: Send + Sync {
    async fn get_ticker(&self, instrument: &InstrumentId) -> AdapterResult<InstrumentTicker>;

    async fn get_order_book(
        &self,
        instrument: &InstrumentId,
        depth: usize,
    ) -> AdapterResult<OrderBookSnapshot>;

    async fn place_order(&self, request: &OrderRequest) -> AdapterResult<OrderAck>;

    async fn cancel_order(&self, id: &OrderId) -> AdapterResult<()>;

    async fn get_order_status(&self, id: &OrderId) -> AdapterResult<OrderStatusReport>;

    async fn get_balances(&self) -> AdapterResult<AccountBalances>;

    async fn get_open_positions(&self) -> AdapterResult<Vec<ExchangePosition>>;
}
