//! Per-instrument latest-value cache.
//!
//! Each instrument's ticker and order book are stored as owned,
//! atomically-replaced snapshots behind a short read lock. Ages are
//! measured on a monotonic clock so wall-clock jumps cannot unstale data.

use dashmap::DashMap;
use lever_core::{InstrumentId, InstrumentTicker, OrderBookSnapshot};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
struct CacheEntry {
    ticker: Option<InstrumentTicker>,
    ticker_recv_mono: Option<Instant>,
    book: Option<OrderBookSnapshot>,
    book_recv_mono: Option<Instant>,
}

impl CacheEntry {
    fn update_ticker(&mut self, ticker: InstrumentTicker) {
        self.ticker = Some(ticker);
        self.ticker_recv_mono = Some(Instant::now());
    }

    fn update_book(&mut self, book: OrderBookSnapshot) {
        self.book = Some(book);
        self.book_recv_mono = Some(Instant::now());
    }

    fn fresh_ticker(&self, staleness: Duration) -> Option<InstrumentTicker> {
        let received = self.ticker_recv_mono?;
        if received.elapsed() > staleness {
            return None;
        }
        self.ticker.clone()
    }

    fn fresh_book(&self, staleness: Duration) -> Option<OrderBookSnapshot> {
        let received = self.book_recv_mono?;
        if received.elapsed() > staleness {
            return None;
        }
        self.book.clone()
    }
}

type Entry = Arc<RwLock<CacheEntry>>;

/// Latest-value market data cache, shared between the feed task and all
/// consumers. Reads never touch network state.
#[derive(Default)]
pub struct MarketCache {
    entries: DashMap<InstrumentId, Entry>,
}

impl MarketCache {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    fn get_or_create(&self, instrument: &InstrumentId) -> Entry {
        self.entries
            .entry(instrument.clone())
            .or_insert_with(|| Arc::new(RwLock::new(CacheEntry::default())))
            .clone()
    }

    /// Replace the ticker for an instrument wholesale.
    pub fn update_ticker(&self, ticker: InstrumentTicker) {
        let entry = self.get_or_create(&ticker.instrument);
        entry.write().update_ticker(ticker);
    }

    /// Replace the order book for an instrument wholesale.
    pub fn update_book(&self, book: OrderBookSnapshot) {
        let entry = self.get_or_create(&book.instrument);
        entry.write().update_book(book);
    }

    /// Latest ticker, or `None` when absent or older than `staleness`.
    pub fn latest_ticker(
        &self,
        instrument: &InstrumentId,
        staleness: Duration,
    ) -> Option<InstrumentTicker> {
        self.entries
            .get(instrument)
            .and_then(|e| e.read().fresh_ticker(staleness))
    }

    /// Latest order book, or `None` when absent or older than `staleness`.
    pub fn latest_book(
        &self,
        instrument: &InstrumentId,
        staleness: Duration,
    ) -> Option<OrderBookSnapshot> {
        self.entries
            .get(instrument)
            .and_then(|e| e.read().fresh_book(staleness))
    }

    /// Age of the cached ticker in milliseconds, if any was ever received.
    pub fn ticker_age_ms(&self, instrument: &InstrumentId) -> Option<u128> {
        self.entries.get(instrument).and_then(|e| {
            e.read()
                .ticker_recv_mono
                .map(|t| t.elapsed().as_millis())
        })
    }

    /// Instruments the cache has seen data for.
    pub fn instruments(&self) -> Vec<InstrumentId> {
        self.entries.iter().map(|e| e.key().clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use lever_core::{BookLevel, Price, Size};
    use rust_decimal_macros::dec;

    fn ticker(symbol: &str, price: Price) -> InstrumentTicker {
        InstrumentTicker {
            instrument: InstrumentId::from(symbol),
            last_price: price,
            volume_24h: dec!(0),
            change_24h: dec!(0),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn absent_instrument_reads_none() {
        let cache = MarketCache::new();
        assert!(cache
            .latest_ticker(&InstrumentId::from("BTC-PERP"), Duration::from_secs(5))
            .is_none());
    }

    #[test]
    fn fresh_value_is_returned_and_replaced_wholesale() {
        let cache = MarketCache::new();
        let id = InstrumentId::from("BTC-PERP");
        cache.update_ticker(ticker("BTC-PERP", Price::new(dec!(100))));
        cache.update_ticker(ticker("BTC-PERP", Price::new(dec!(101))));

        let latest = cache.latest_ticker(&id, Duration::from_secs(5)).unwrap();
        assert_eq!(latest.last_price, Price::new(dec!(101)));
    }

    #[test]
    fn zero_staleness_window_reads_stale() {
        let cache = MarketCache::new();
        let id = InstrumentId::from("BTC-PERP");
        cache.update_ticker(ticker("BTC-PERP", Price::new(dec!(100))));

        // A zero window marks everything stale immediately.
        std::thread::sleep(Duration::from_millis(2));
        assert!(cache.latest_ticker(&id, Duration::ZERO).is_none());
        // But the value itself was retained.
        assert!(cache.ticker_age_ms(&id).is_some());
    }

    #[test]
    fn book_reads_are_independent_of_ticker() {
        let cache = MarketCache::new();
        let id = InstrumentId::from("ETH-PERP");
        cache.update_book(OrderBookSnapshot::new(
            id.clone(),
            vec![BookLevel::new(Price::new(dec!(99)), Size::new(dec!(1)))],
            vec![BookLevel::new(Price::new(dec!(101)), Size::new(dec!(1)))],
            Utc::now(),
        ));

        assert!(cache.latest_book(&id, Duration::from_secs(5)).is_some());
        assert!(cache.latest_ticker(&id, Duration::from_secs(5)).is_none());
    }
}
