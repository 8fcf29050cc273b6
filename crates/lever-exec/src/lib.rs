//! Order execution engine.
//!
//! Converts one trade intent into exchange orders. Normal-urgency
//! executions start as a limit order one tick inside the book and
//! escalate the unfilled remainder to a market order after a fixed
//! timeout; high urgency goes straight to market. Submission failures
//! retry a bounded count with backoff and never loop unboundedly.

pub mod config;
pub mod engine;
pub mod error;

pub use config::ExecConfig;
pub use engine::ExecutionEngine;
pub use error::{ExecError, ExecResult};
