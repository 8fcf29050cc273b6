//! Feed connection task.
//!
//! Owns the market stream lifecycle: connect, subscribe, read, and on
//! disconnection reconnect with exponential backoff plus jitter, then
//! replay the exact prior subscription set. Malformed messages are
//! dropped and logged, never fatal.

use crate::cache::MarketCache;
use crate::error::{FeedError, FeedResult};
use lever_core::InstrumentId;
use lever_exchange::{MarketStream, MarketStreamConnector, StreamEvent};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Connection state of the feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    Reconnecting,
    Disconnected,
}

/// Feed configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    /// Staleness window: reads older than this return absent.
    #[serde(default = "default_staleness_ms")]
    pub staleness_ms: u64,
    /// Base delay for exponential reconnect backoff.
    #[serde(default = "default_reconnect_base_delay_ms")]
    pub reconnect_base_delay_ms: u64,
    /// Maximum reconnect backoff delay.
    #[serde(default = "default_reconnect_max_delay_ms")]
    pub reconnect_max_delay_ms: u64,
    /// Maximum reconnection attempts (0 = infinite).
    #[serde(default)]
    pub max_reconnect_attempts: u32,
}

fn default_staleness_ms() -> u64 {
    5_000
}

fn default_reconnect_base_delay_ms() -> u64 {
    1_000
}

fn default_reconnect_max_delay_ms() -> u64 {
    60_000
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            staleness_ms: default_staleness_ms(),
            reconnect_base_delay_ms: default_reconnect_base_delay_ms(),
            reconnect_max_delay_ms: default_reconnect_max_delay_ms(),
            max_reconnect_attempts: 0,
        }
    }
}

/// Market data feed for one exchange.
///
/// Cloneable handle; all clones share the same cache, subscription set
/// and connection state. `run()` drives the connection loop until the
/// shutdown token fires.
#[derive(Clone)]
pub struct MarketFeed {
    connector: Arc<dyn MarketStreamConnector>,
    cache: Arc<MarketCache>,
    /// Ordered so the replayed subscription request is deterministic.
    subscriptions: Arc<RwLock<BTreeSet<InstrumentId>>>,
    state: Arc<RwLock<ConnectionState>>,
    malformed_count: Arc<AtomicU64>,
    config: FeedConfig,
    shutdown: CancellationToken,
}

impl MarketFeed {
    pub fn new(
        connector: Arc<dyn MarketStreamConnector>,
        config: FeedConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            connector,
            cache: Arc::new(MarketCache::new()),
            subscriptions: Arc::new(RwLock::new(BTreeSet::new())),
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            malformed_count: Arc::new(AtomicU64::new(0)),
            config,
            shutdown,
        }
    }

    /// Add instruments to the subscription set. Idempotent; the full set
    /// is replayed on every (re)connect.
    pub fn subscribe(&self, instruments: &[InstrumentId]) {
        let mut subs = self.subscriptions.write();
        for instrument in instruments {
            subs.insert(instrument.clone());
        }
    }

    /// The current subscription set, in deterministic order.
    pub fn subscription_set(&self) -> Vec<InstrumentId> {
        self.subscriptions.read().iter().cloned().collect()
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.state.read()
    }

    /// Shared handle to the latest-value cache, for consumers that read
    /// pricing context directly (e.g. the execution engine).
    pub fn cache(&self) -> Arc<MarketCache> {
        self.cache.clone()
    }

    /// Number of malformed messages dropped so far.
    pub fn malformed_count(&self) -> u64 {
        self.malformed_count.load(Ordering::Relaxed)
    }

    fn staleness(&self) -> Duration {
        Duration::from_millis(self.config.staleness_ms)
    }

    /// Latest ticker, or `None` when absent or stale. Never blocks on
    /// network state.
    pub fn latest_ticker(
        &self,
        instrument: &InstrumentId,
    ) -> Option<lever_core::InstrumentTicker> {
        self.cache.latest_ticker(instrument, self.staleness())
    }

    /// Latest order book, or `None` when absent or stale.
    pub fn latest_order_book(
        &self,
        instrument: &InstrumentId,
    ) -> Option<lever_core::OrderBookSnapshot> {
        self.cache.latest_book(instrument, self.staleness())
    }

    /// Run the connection loop until shutdown.
    pub async fn run(self) -> FeedResult<()> {
        let mut attempt = 0u32;

        loop {
            if self.shutdown.is_cancelled() {
                info!("Shutdown requested, exiting feed loop");
                *self.state.write() = ConnectionState::Disconnected;
                return Ok(());
            }

            match self.connect_once().await {
                Ok(()) => {
                    // Stream closed without error.
                    info!("Market stream closed");
                }
                Err(e) => {
                    error!(%e, "Market stream error");
                }
            }

            if self.shutdown.is_cancelled() {
                *self.state.write() = ConnectionState::Disconnected;
                return Ok(());
            }

            attempt += 1;
            if self.config.max_reconnect_attempts > 0
                && attempt >= self.config.max_reconnect_attempts
            {
                error!(attempt, "Max reconnection attempts reached");
                *self.state.write() = ConnectionState::Disconnected;
                return Err(FeedError::ReconnectExhausted { attempts: attempt });
            }

            *self.state.write() = ConnectionState::Reconnecting;
            let delay = calculate_backoff_delay(
                self.config.reconnect_base_delay_ms,
                self.config.reconnect_max_delay_ms,
                attempt,
            );
            warn!(attempt, delay_ms = delay.as_millis() as u64, "Reconnecting");

            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                () = self.shutdown.cancelled() => {
                    info!("Shutdown requested during backoff, exiting");
                    *self.state.write() = ConnectionState::Disconnected;
                    return Ok(());
                }
            }
        }
    }

    async fn connect_once(&self) -> FeedResult<()> {
        let mut stream = self.connector.connect().await?;
        *self.state.write() = ConnectionState::Connected;
        info!("Market stream connected");

        // Replay the exact current subscription set.
        let subs = self.subscription_set();
        if !subs.is_empty() {
            stream.subscribe(&subs).await?;
            info!(count = subs.len(), "Subscriptions replayed");
        }

        self.read_loop(stream.as_mut()).await
    }

    async fn read_loop(&self, stream: &mut dyn MarketStream) -> FeedResult<()> {
        loop {
            tokio::select! {
                () = self.shutdown.cancelled() => {
                    info!("Shutdown signal received in read loop");
                    *self.state.write() = ConnectionState::Disconnected;
                    return Ok(());
                }
                event = stream.next_event() => {
                    match event? {
                        Some(StreamEvent::Ticker(ticker)) => {
                            debug!(instrument = %ticker.instrument, price = %ticker.last_price, "Ticker update");
                            self.cache.update_ticker(ticker);
                        }
                        Some(StreamEvent::OrderBook(book)) => {
                            debug!(instrument = %book.instrument, "Order book update");
                            self.cache.update_book(book);
                        }
                        Some(StreamEvent::Malformed { reason }) => {
                            self.malformed_count.fetch_add(1, Ordering::Relaxed);
                            warn!(%reason, "Dropping malformed message");
                        }
                        None => {
                            warn!("Market stream ended");
                            return Ok(());
                        }
                    }
                }
            }
        }
    }
}

/// Exponential backoff: `base * 2^(attempt-1)` capped at `max`, plus up
/// to one base delay of jitter derived from the clock's subsecond nanos.
/// Scaling jitter with the base keeps tightly-configured delays tight.
fn calculate_backoff_delay(base_ms: u64, max_ms: u64, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(10);
    let delay = base_ms.saturating_mul(1u64 << exponent).min(max_ms);
    Duration::from_millis(delay + rand_jitter(base_ms))
}

/// Generate random jitter in `0..cap_ms`.
fn rand_jitter(cap_ms: u64) -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    (nanos as u64) % cap_ms.max(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use lever_core::{InstrumentTicker, Price};
    use lever_exchange::{ScriptItem, ScriptedConnector, ScriptedStream};
    use rust_decimal_macros::dec;

    fn ticker(symbol: &str, price: rust_decimal::Decimal) -> InstrumentTicker {
        InstrumentTicker {
            instrument: InstrumentId::from(symbol),
            last_price: Price::new(price),
            volume_24h: dec!(0),
            change_24h: dec!(0),
            timestamp: Utc::now(),
        }
    }

    fn fast_config() -> FeedConfig {
        FeedConfig {
            staleness_ms: 5_000,
            reconnect_base_delay_ms: 1,
            reconnect_max_delay_ms: 5,
            max_reconnect_attempts: 0,
        }
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let d1 = calculate_backoff_delay(1000, 60_000, 1).as_millis() as u64;
        let d2 = calculate_backoff_delay(1000, 60_000, 2).as_millis() as u64;
        let d4 = calculate_backoff_delay(1000, 60_000, 20).as_millis() as u64;

        // Jitter adds at most one base delay on top of the exponential.
        assert!((1000..2000).contains(&d1));
        assert!((2000..3000).contains(&d2));
        assert!((60_000..61_000).contains(&d4));
    }

    #[test]
    fn backoff_jitter_scales_with_the_base_delay() {
        // A 1 ms base must never produce a near-second delay, or tests
        // that wait tens of milliseconds across reconnects would flake.
        for attempt in 1..=5 {
            let delay = calculate_backoff_delay(1, 5, attempt).as_millis() as u64;
            assert!(delay <= 5, "attempt {attempt} delayed {delay} ms");
        }
    }

    #[test]
    fn subscribe_is_idempotent() {
        let connector = Arc::new(ScriptedConnector::new(vec![]));
        let feed = MarketFeed::new(connector, FeedConfig::default(), CancellationToken::new());

        feed.subscribe(&[InstrumentId::from("BTC-PERP"), InstrumentId::from("ETH-PERP")]);
        feed.subscribe(&[InstrumentId::from("BTC-PERP")]);

        assert_eq!(
            feed.subscription_set(),
            vec![InstrumentId::from("BTC-PERP"), InstrumentId::from("ETH-PERP")]
        );
    }

    #[tokio::test]
    async fn events_populate_cache_and_malformed_is_dropped() {
        let connector = Arc::new(ScriptedConnector::new(vec![vec![
            ScriptItem::Event(StreamEvent::Ticker(ticker("BTC-PERP", dec!(100)))),
            ScriptItem::Event(StreamEvent::Malformed {
                reason: "bad frame".into(),
            }),
            ScriptItem::Event(StreamEvent::Ticker(ticker("BTC-PERP", dec!(101)))),
        ]]));
        let shutdown = CancellationToken::new();
        let feed = MarketFeed::new(connector, fast_config(), shutdown.clone());
        feed.subscribe(&[InstrumentId::from("BTC-PERP")]);

        let runner = tokio::spawn(feed.clone().run());
        tokio::time::sleep(Duration::from_millis(50)).await;

        let latest = feed.latest_ticker(&InstrumentId::from("BTC-PERP")).unwrap();
        assert_eq!(latest.last_price, Price::new(dec!(101)));
        assert_eq!(feed.malformed_count(), 1);
        assert_eq!(feed.connection_state(), ConnectionState::Connected);

        shutdown.cancel();
        runner.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn reconnect_replays_exact_subscription_set() {
        // First stream disconnects immediately; second stays up.
        let connector = Arc::new(ScriptedConnector::new(vec![
            vec![ScriptItem::Disconnect],
            vec![],
        ]));
        let log = connector.subscription_log();
        let shutdown = CancellationToken::new();
        let feed = MarketFeed::new(connector, fast_config(), shutdown.clone());
        feed.subscribe(&[InstrumentId::from("ETH-PERP"), InstrumentId::from("BTC-PERP")]);

        let runner = tokio::spawn(feed.clone().run());
        tokio::time::sleep(Duration::from_millis(100)).await;

        let sets = log.lock().clone();
        assert_eq!(sets.len(), 2, "one subscribe per connect");
        assert_eq!(sets[0], sets[1], "reconnect must replay the exact set");
        assert_eq!(
            sets[1],
            vec![InstrumentId::from("BTC-PERP"), InstrumentId::from("ETH-PERP")]
        );

        shutdown.cancel();
        runner.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn bounded_reconnects_surface_exhaustion() {
        // No streams at all: every connect fails.
        let connector = Arc::new(ScriptedConnector::new(vec![]));
        let shutdown = CancellationToken::new();
        let mut config = fast_config();
        config.max_reconnect_attempts = 3;
        let feed = MarketFeed::new(connector, config, shutdown);

        let err = feed.run().await.unwrap_err();
        assert!(matches!(err, FeedError::ReconnectExhausted { attempts: 3 }));
    }

    #[tokio::test]
    async fn scripted_stream_standalone_pends_when_exhausted() {
        use lever_exchange::MarketStream;

        let mut stream = ScriptedStream::new(vec![ScriptItem::Event(StreamEvent::Ticker(
            ticker("BTC-PERP", dec!(1)),
        ))]);
        assert!(stream.next_event().await.unwrap().is_some());

        // An exhausted script keeps the stream open without events.
        let pending = tokio::time::timeout(Duration::from_millis(20), stream.next_event()).await;
        assert!(pending.is_err());
    }
}
