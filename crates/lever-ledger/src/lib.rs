//! Position and risk ledger.
//!
//! Authoritative store of open positions. Approves or denies new
//! exposure under the aggregate-margin and cash-floor invariants,
//! evaluates stop-loss/take-profit/trailing-stop/kill-switch exits on
//! post-cost price movement, computes net PnL, and persists open
//! positions across restarts.

pub mod config;
pub mod error;
pub mod halt;
pub mod kill_switch;
pub mod ledger;
pub mod sizing;
pub mod store;

pub use config::RiskConfig;
pub use error::{LedgerError, LedgerResult};
pub use halt::{EntryHaltLatch, HaltReason};
pub use ledger::{ClosedPosition, ExitSignal, PositionLedger};
pub use sizing::{AccountState, ExitBand};
pub use store::PositionStore;
