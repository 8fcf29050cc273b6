//! Core domain types for the lever trading system.
//!
//! This crate provides the fundamental types used throughout the system:
//! - `Price`, `Size`: precision-safe numeric types
//! - `InstrumentId`: instrument identifier
//! - `InstrumentTicker`, `OrderBookSnapshot`: market data snapshots
//! - `Order`, `ExecutionResult`: order lifecycle types
//! - `Position`, `AllocationRequest`, `SizedOrder`: position/risk types
//! - `FeeSchedule`: maker/taker fee rates

pub mod decimal;
pub mod error;
pub mod fees;
pub mod instrument;
pub mod market;
pub mod order;
pub mod position;

pub use decimal::{Price, Size};
pub use error::{CoreError, Result};
pub use fees::FeeSchedule;
pub use instrument::InstrumentId;
pub use market::{BookLevel, InstrumentTicker, OrderBookSnapshot};
pub use order::{
    ExecutionResult, Order, OrderId, OrderKind, OrderSide, OrderStatus, Urgency,
};
pub use position::{
    AllocationRequest, Direction, Position, PositionId, PositionStatus, SizedOrder,
};
