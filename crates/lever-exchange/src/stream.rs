//! Abstract market data stream.
//!
//! The feed drives reconnection, backoff and resubscription over these
//! traits; the concrete transport (websocket framing, auth, venue message
//! shapes) lives behind them and is out of scope for the core.

use crate::error::AdapterResult;
use async_trait::async_trait;
use lever_core::{InstrumentId, InstrumentTicker, OrderBookSnapshot};

/// One event read from a live market data stream.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Full ticker replacement for one instrument.
    Ticker(InstrumentTicker),
    /// Full order book replacement for one instrument.
    OrderBook(OrderBookSnapshot),
    /// A message the transport could not decode. Dropped and logged by
    /// the feed, never fatal.
    Malformed {
        reason: String,
    },
}

/// A live, connected market data stream.
#[async_trait]
pub trait MarketStream: Send {
    /// Subscribe to ticker and order book channels for `instruments`.
    /// Must be idempotent: re-subscribing an already-subscribed
    /// instrument is a no-op on the venue side.
    async fn subscribe(&mut self, instruments: &[InstrumentId]) -> AdapterResult<()>;

    /// Read the next event. `Ok(None)` means the stream disconnected;
    /// `Err` means a read failure (also treated as disconnection).
    async fn next_event(&mut self) -> AdapterResult<Option<StreamEvent>>;
}

/// Factory for market streams; called on every (re)connect attempt.
#[async_trait]
pub trait MarketStreamConnector: Send + Sync {
    async fn connect(&self) -> AdapterResult<Box<dyn MarketStream>>;
}
