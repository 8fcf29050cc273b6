//! Leveraged trading core application.
//!
//! Ties the workspace together:
//! - Market data feed over the paper exchange's stream
//! - Limit-then-escalate execution engine
//! - Position ledger with confidence-based sizing and persistence
//! - Close-before-open cycle orchestration

pub mod app;
pub mod config;
pub mod error;
pub mod logging;

pub use app::Application;
pub use config::{AppConfig, PaperConfig};
pub use error::{AppError, AppResult};
pub use logging::init_logging;
