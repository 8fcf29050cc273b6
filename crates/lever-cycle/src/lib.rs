//! Cycle orchestrator.
//!
//! Sequences one decision cycle: evaluate and close flagged positions,
//! confirm every close within a bounded wait, refresh balances, then
//! size and submit new entries. Close-before-open ordering per
//! instrument is a hard invariant.

pub mod context;
pub mod error;
pub mod orchestrator;

pub use context::CycleContext;
pub use error::{CycleError, CycleResult};
pub use orchestrator::{
    CycleConfig, CycleOrchestrator, CycleReport, Decision, DecisionAction,
};
