//! Market data feed.
//!
//! Maintains one logical connection per exchange, publishes the latest
//! ticker and order book snapshot per instrument, and reconnects with
//! exponential backoff. The feed is a latest-value cache, not an event
//! log: reads never block on network state and there is no backlog
//! replay across reconnects.

pub mod cache;
pub mod error;
pub mod feed;

pub use cache::MarketCache;
pub use error::{FeedError, FeedResult};
pub use feed::{ConnectionState, FeedConfig, MarketFeed};
