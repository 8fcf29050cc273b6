//! Exchange adapter boundary.
//!
//! The exchange's wire protocol is external to this system. This crate
//! defines the capability set the core consumes (`ExchangeAdapter`), the
//! transient-or-fatal error classification for each call, an abstract
//! market data stream (`MarketStream`), and a deterministic paper
//! implementation used by tests and the binary's paper mode.

pub mod adapter;
pub mod error;
pub mod paper;
pub mod stream;

pub use adapter::{
    AccountBalances, ExchangeAdapter, ExchangePosition, OrderAck, OrderRequest, OrderStatusReport,
};
pub use error::{AdapterError, AdapterResult};
pub use paper::{
    FillMode, PaperExchange, PaperMarketConnector, PaperMarketStream, ScriptItem,
    ScriptedConnector, ScriptedStream,
};
pub use stream::{MarketStream, MarketStreamConnector, StreamEvent};
