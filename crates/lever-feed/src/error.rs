//! Error types for lever-feed.

use thiserror::Error;

/// Feed error types.
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Maximum reconnection attempts reached after {attempts} tries")]
    ReconnectExhausted { attempts: u32 },

    #[error("Adapter error: {0}")]
    Adapter(#[from] lever_exchange::AdapterError),
}

/// Result type alias for feed operations.
pub type FeedResult<T> = std::result::Result<T, FeedError>;
