//! Application error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Feed error: {0}")]
    Feed(#[from] lever_feed::FeedError),

    #[error("Execution error: {0}")]
    Exec(#[from] lever_exec::ExecError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] lever_ledger::LedgerError),

    #[error("Cycle error: {0}")]
    Cycle(#[from] lever_cycle::CycleError),

    #[error("Exchange error: {0}")]
    Adapter(#[from] lever_exchange::AdapterError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Shutdown requested")]
    Shutdown,
}

pub type AppResult<T> = Result<T, AppError>;
