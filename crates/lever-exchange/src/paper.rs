//! Paper (simulated) exchange.
//!
//! A deterministic in-memory adapter with configurable fill behavior,
//! used by the binary's paper mode and by tests across the workspace.
//! Also provides a scripted market stream for feed reconnection tests.

use crate::adapter::{
    AccountBalances, ExchangeAdapter, ExchangePosition, OrderAck, OrderRequest, OrderStatusReport,
};
use crate::error::{AdapterError, AdapterResult};
use crate::stream::{MarketStream, MarketStreamConnector, StreamEvent};
use async_trait::async_trait;
use lever_core::{
    InstrumentId, InstrumentTicker, OrderBookSnapshot, OrderId, OrderKind, OrderStatus, Price,
    Size,
};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// How the paper exchange fills limit orders.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FillMode {
    /// Fill completely on the first status poll.
    Immediate,
    /// Fill completely after this many status polls.
    AfterPolls(u32),
    /// Fill this fraction of the size on the first poll, then rest.
    Partial(Decimal),
    /// Never fill; the order rests until cancelled.
    NoFill,
}

#[derive(Debug, Clone)]
struct PaperOrder {
    request: OrderRequest,
    status: OrderStatus,
    filled_size: Size,
    avg_fill_price: Price,
    fee: Decimal,
    polls_seen: u32,
}

#[derive(Debug)]
struct PaperState {
    marks: HashMap<InstrumentId, Price>,
    books: HashMap<InstrumentId, OrderBookSnapshot>,
    orders: HashMap<OrderId, PaperOrder>,
    balances: AccountBalances,
    positions: Vec<ExchangePosition>,
    fill_mode: FillMode,
    /// Fractional price penalty applied to market fills versus the mark.
    market_slippage: Decimal,
    maker_rate: Decimal,
    taker_rate: Decimal,
    /// Next N place_order calls fail with a transient error.
    failing_places: u32,
    /// Total place_order calls, accepted or not.
    place_attempts: u64,
    /// Accepted requests in arrival order.
    accepted_log: Vec<OrderRequest>,
}

/// Deterministic in-memory exchange adapter.
#[derive(Clone)]
pub struct PaperExchange {
    state: Arc<Mutex<PaperState>>,
}

impl PaperExchange {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(PaperState {
                marks: HashMap::new(),
                books: HashMap::new(),
                orders: HashMap::new(),
                balances: AccountBalances {
                    equity: Decimal::from(10_000),
                    available: Decimal::from(10_000),
                },
                positions: Vec::new(),
                fill_mode: FillMode::Immediate,
                market_slippage: Decimal::ZERO,
                maker_rate: Decimal::ZERO,
                taker_rate: Decimal::ZERO,
                failing_places: 0,
                place_attempts: 0,
                accepted_log: Vec::new(),
            })),
        }
    }

    pub fn set_mark(&self, instrument: InstrumentId, price: Price) {
        self.state.lock().marks.insert(instrument, price);
    }

    pub fn set_book(&self, book: OrderBookSnapshot) {
        self.state.lock().books.insert(book.instrument.clone(), book);
    }

    pub fn set_balances(&self, balances: AccountBalances) {
        self.state.lock().balances = balances;
    }

    pub fn set_positions(&self, positions: Vec<ExchangePosition>) {
        self.state.lock().positions = positions;
    }

    pub fn set_fill_mode(&self, mode: FillMode) {
        self.state.lock().fill_mode = mode;
    }

    pub fn set_market_slippage(&self, slippage: Decimal) {
        self.state.lock().market_slippage = slippage;
    }

    pub fn set_fee_rates(&self, maker: Decimal, taker: Decimal) {
        let mut st = self.state.lock();
        st.maker_rate = maker;
        st.taker_rate = taker;
    }

    /// Make the next `n` place_order calls fail transiently.
    pub fn fail_next_places(&self, n: u32) {
        self.state.lock().failing_places = n;
    }

    /// Number of orders this exchange has ever accepted.
    pub fn accepted_order_count(&self) -> usize {
        self.state.lock().orders.len()
    }

    /// Total place_order calls seen, including failed ones.
    pub fn place_attempt_count(&self) -> u64 {
        self.state.lock().place_attempts
    }

    /// Accepted order requests in arrival order.
    pub fn accepted_orders(&self) -> Vec<OrderRequest> {
        self.state.lock().accepted_log.clone()
    }

    fn fill_market(state: &mut PaperState, order: &mut PaperOrder) -> AdapterResult<()> {
        let mark = state
            .marks
            .get(&order.request.instrument)
            .copied()
            .ok_or_else(|| {
                AdapterError::Rejected(format!(
                    "no mark price for {}",
                    order.request.instrument
                ))
            })?;
        // Taker fills pay the configured penalty against them.
        let slip = state.market_slippage * Decimal::from(order.request.side.sign());
        let fill_price = Price::new(mark.inner() * (Decimal::ONE + slip));
        order.filled_size = order.request.size;
        order.avg_fill_price = fill_price;
        order.fee = state.taker_rate * order.filled_size.notional(fill_price);
        order.status = OrderStatus::Filled;
        Ok(())
    }
}

impl Default for PaperExchange {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ExchangeAdapter for PaperExchange {
    async fn get_ticker(&self, instrument: &InstrumentId) -> AdapterResult<InstrumentTicker> {
        let st = self.state.lock();
        let mark = st
            .marks
            .get(instrument)
            .copied()
            .ok_or_else(|| AdapterError::Transient(format!("no ticker for {instrument}")))?;
        Ok(InstrumentTicker {
            instrument: instrument.clone(),
            last_price: mark,
            volume_24h: Decimal::ZERO,
            change_24h: Decimal::ZERO,
            timestamp: chrono::Utc::now(),
        })
    }

    async fn get_order_book(
        &self,
        instrument: &InstrumentId,
        depth: usize,
    ) -> AdapterResult<OrderBookSnapshot> {
        let st = self.state.lock();
        let book = st
            .books
            .get(instrument)
            .cloned()
            .ok_or_else(|| AdapterError::Transient(format!("no book for {instrument}")))?;
        let mut book = book;
        book.bids.truncate(depth);
        book.asks.truncate(depth);
        Ok(book)
    }

    async fn place_order(&self, request: &OrderRequest) -> AdapterResult<OrderAck> {
        let mut st = self.state.lock();
        st.place_attempts += 1;
        if st.failing_places > 0 {
            st.failing_places -= 1;
            return Err(AdapterError::Transient("simulated submit failure".into()));
        }
        if st.orders.contains_key(&request.id) {
            // Idempotent resubmission of the same client id.
            return Ok(OrderAck {
                id: request.id.clone(),
            });
        }
        let mut order = PaperOrder {
            request: request.clone(),
            status: OrderStatus::Pending,
            filled_size: Size::ZERO,
            avg_fill_price: Price::ZERO,
            fee: Decimal::ZERO,
            polls_seen: 0,
        };
        if request.kind == OrderKind::Market {
            PaperExchange::fill_market(&mut st, &mut order)?;
        }
        debug!(id = %request.id, kind = %request.kind, "paper order accepted");
        st.orders.insert(request.id.clone(), order);
        st.accepted_log.push(request.clone());
        Ok(OrderAck {
            id: request.id.clone(),
        })
    }

    async fn cancel_order(&self, id: &OrderId) -> AdapterResult<()> {
        let mut st = self.state.lock();
        let order = st
            .orders
            .get_mut(id)
            .ok_or_else(|| AdapterError::Fatal(format!("unknown order {id}")))?;
        if order.status.is_terminal() {
            return Err(AdapterError::Rejected(format!(
                "order {id} already {}",
                order.status
            )));
        }
        order.status = OrderStatus::Cancelled;
        Ok(())
    }

    async fn get_order_status(&self, id: &OrderId) -> AdapterResult<OrderStatusReport> {
        let mut st = self.state.lock();
        let fill_mode = st.fill_mode;
        let maker_rate = st.maker_rate;
        let order = st
            .orders
            .get_mut(id)
            .ok_or_else(|| AdapterError::Fatal(format!("unknown order {id}")))?;
        order.polls_seen += 1;

        if order.request.kind == OrderKind::Limit && !order.status.is_terminal() {
            let limit_price = order.request.limit_price.unwrap_or(Price::ZERO);
            match fill_mode {
                FillMode::Immediate => {
                    order.filled_size = order.request.size;
                    order.avg_fill_price = limit_price;
                    order.status = OrderStatus::Filled;
                }
                FillMode::AfterPolls(n) => {
                    if order.polls_seen > n {
                        order.filled_size = order.request.size;
                        order.avg_fill_price = limit_price;
                        order.status = OrderStatus::Filled;
                    }
                }
                FillMode::Partial(fraction) => {
                    if order.filled_size.is_zero() {
                        order.filled_size = order.request.size * fraction;
                        order.avg_fill_price = limit_price;
                        order.status = OrderStatus::PartiallyFilled;
                    }
                }
                FillMode::NoFill => {}
            }
            order.fee = maker_rate * order.filled_size.notional(order.avg_fill_price);
        }

        Ok(OrderStatusReport {
            id: id.clone(),
            status: order.status,
            filled_size: order.filled_size,
            avg_fill_price: order.avg_fill_price,
            fee: order.fee,
        })
    }

    async fn get_balances(&self) -> AdapterResult<AccountBalances> {
        Ok(self.state.lock().balances)
    }

    async fn get_open_positions(&self) -> AdapterResult<Vec<ExchangePosition>> {
        Ok(self.state.lock().positions.clone())
    }
}

// ============================================================================
// Paper market stream
// ============================================================================

/// Connector that publishes the paper exchange's own marks and books on
/// a fixed interval, closing the market data loop for paper-mode runs.
pub struct PaperMarketConnector {
    exchange: PaperExchange,
    tick_interval: Duration,
}

impl PaperMarketConnector {
    pub fn new(exchange: PaperExchange, tick_interval: Duration) -> Self {
        Self {
            exchange,
            tick_interval,
        }
    }
}

#[async_trait]
impl MarketStreamConnector for PaperMarketConnector {
    async fn connect(&self) -> AdapterResult<Box<dyn MarketStream>> {
        Ok(Box::new(PaperMarketStream {
            exchange: self.exchange.clone(),
            interval: tokio::time::interval(self.tick_interval),
            instruments: Vec::new(),
            queue: VecDeque::new(),
        }))
    }
}

/// Stream side of [`PaperMarketConnector`]. Emits a ticker and, when a
/// book is configured, an order book snapshot per subscribed instrument
/// on every interval tick. Never disconnects on its own.
pub struct PaperMarketStream {
    exchange: PaperExchange,
    interval: tokio::time::Interval,
    instruments: Vec<InstrumentId>,
    queue: VecDeque<StreamEvent>,
}

#[async_trait]
impl MarketStream for PaperMarketStream {
    async fn subscribe(&mut self, instruments: &[InstrumentId]) -> AdapterResult<()> {
        self.instruments = instruments.to_vec();
        Ok(())
    }

    async fn next_event(&mut self) -> AdapterResult<Option<StreamEvent>> {
        loop {
            if let Some(event) = self.queue.pop_front() {
                return Ok(Some(event));
            }
            self.interval.tick().await;
            let st = self.exchange.state.lock();
            for instrument in &self.instruments {
                if let Some(mark) = st.marks.get(instrument) {
                    self.queue.push_back(StreamEvent::Ticker(InstrumentTicker {
                        instrument: instrument.clone(),
                        last_price: *mark,
                        volume_24h: Decimal::ZERO,
                        change_24h: Decimal::ZERO,
                        timestamp: chrono::Utc::now(),
                    }));
                }
                if let Some(book) = st.books.get(instrument) {
                    self.queue.push_back(StreamEvent::OrderBook(book.clone()));
                }
            }
        }
    }
}

// ============================================================================
// Scripted market stream
// ============================================================================

/// One scripted item in a `ScriptedStream`.
#[derive(Debug, Clone)]
pub enum ScriptItem {
    Event(StreamEvent),
    /// Stream ends cleanly (server closed).
    Disconnect,
    /// Read error.
    ReadError(String),
}

/// A market stream that replays a fixed script, recording every
/// subscription call it receives.
pub struct ScriptedStream {
    script: VecDeque<ScriptItem>,
    subscription_log: Arc<Mutex<Vec<Vec<InstrumentId>>>>,
}

impl ScriptedStream {
    pub fn new(script: Vec<ScriptItem>) -> Self {
        Self {
            script: script.into(),
            subscription_log: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn with_log(
        script: Vec<ScriptItem>,
        subscription_log: Arc<Mutex<Vec<Vec<InstrumentId>>>>,
    ) -> Self {
        Self {
            script: script.into(),
            subscription_log,
        }
    }
}

#[async_trait]
impl MarketStream for ScriptedStream {
    async fn subscribe(&mut self, instruments: &[InstrumentId]) -> AdapterResult<()> {
        self.subscription_log.lock().push(instruments.to_vec());
        Ok(())
    }

    async fn next_event(&mut self) -> AdapterResult<Option<StreamEvent>> {
        match self.script.pop_front() {
            Some(ScriptItem::Event(ev)) => Ok(Some(ev)),
            Some(ScriptItem::Disconnect) => Ok(None),
            Some(ScriptItem::ReadError(reason)) => Err(AdapterError::Transient(reason)),
            // Script exhausted: stay connected, deliver nothing further.
            None => {
                std::future::pending::<()>().await;
                unreachable!()
            }
        }
    }
}

/// Connector that hands out scripted streams in sequence, one per
/// (re)connect attempt. Shares a subscription log across all streams so
/// reconnection tests can assert the replayed set.
pub struct ScriptedConnector {
    streams: Mutex<VecDeque<Vec<ScriptItem>>>,
    subscription_log: Arc<Mutex<Vec<Vec<InstrumentId>>>>,
}

impl ScriptedConnector {
    pub fn new(streams: Vec<Vec<ScriptItem>>) -> Self {
        Self {
            streams: Mutex::new(streams.into()),
            subscription_log: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Subscription sets received so far, one entry per subscribe call.
    pub fn subscription_log(&self) -> Arc<Mutex<Vec<Vec<InstrumentId>>>> {
        self.subscription_log.clone()
    }
}

#[async_trait]
impl MarketStreamConnector for ScriptedConnector {
    async fn connect(&self) -> AdapterResult<Box<dyn MarketStream>> {
        let next = self.streams.lock().pop_front();
        match next {
            Some(script) => Ok(Box::new(ScriptedStream::with_log(
                script,
                self.subscription_log.clone(),
            ))),
            None => Err(AdapterError::Transient("no more scripted streams".into())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lever_core::OrderSide;
    use rust_decimal_macros::dec;

    fn buy_request(size: Decimal) -> OrderRequest {
        OrderRequest {
            id: OrderId::new(),
            instrument: InstrumentId::from("BTC-PERP"),
            side: OrderSide::Buy,
            size: Size::new(size),
            kind: OrderKind::Market,
            limit_price: None,
        }
    }

    #[tokio::test]
    async fn market_order_fills_at_mark_with_slippage() {
        let ex = PaperExchange::new();
        ex.set_mark(InstrumentId::from("BTC-PERP"), Price::new(dec!(100)));
        ex.set_market_slippage(dec!(0.001));

        let req = buy_request(dec!(1));
        ex.place_order(&req).await.unwrap();
        let report = ex.get_order_status(&req.id).await.unwrap();

        assert_eq!(report.status, OrderStatus::Filled);
        // Buys fill above the mark.
        assert_eq!(report.avg_fill_price, Price::new(dec!(100.1)));
    }

    #[tokio::test]
    async fn limit_order_fills_after_configured_polls() {
        let ex = PaperExchange::new();
        ex.set_fill_mode(FillMode::AfterPolls(2));

        let req = OrderRequest {
            kind: OrderKind::Limit,
            limit_price: Some(Price::new(dec!(99))),
            ..buy_request(dec!(1))
        };
        ex.place_order(&req).await.unwrap();

        assert_eq!(
            ex.get_order_status(&req.id).await.unwrap().status,
            OrderStatus::Pending
        );
        assert_eq!(
            ex.get_order_status(&req.id).await.unwrap().status,
            OrderStatus::Pending
        );
        assert_eq!(
            ex.get_order_status(&req.id).await.unwrap().status,
            OrderStatus::Filled
        );
    }

    #[tokio::test]
    async fn failing_places_decrement_then_succeed() {
        let ex = PaperExchange::new();
        ex.set_mark(InstrumentId::from("BTC-PERP"), Price::new(dec!(100)));
        ex.fail_next_places(2);

        let req = buy_request(dec!(1));
        assert!(ex.place_order(&req).await.unwrap_err().is_transient());
        assert!(ex.place_order(&req).await.unwrap_err().is_transient());
        assert!(ex.place_order(&req).await.is_ok());
    }

    #[tokio::test]
    async fn cancel_of_terminal_order_is_rejected() {
        let ex = PaperExchange::new();
        ex.set_mark(InstrumentId::from("BTC-PERP"), Price::new(dec!(100)));

        let req = buy_request(dec!(1));
        ex.place_order(&req).await.unwrap();
        let err = ex.cancel_order(&req.id).await.unwrap_err();
        assert!(matches!(err, AdapterError::Rejected(_)));
    }

    #[tokio::test]
    async fn paper_stream_publishes_current_marks() {
        let ex = PaperExchange::new();
        ex.set_mark(InstrumentId::from("BTC-PERP"), Price::new(dec!(100)));

        let connector = PaperMarketConnector::new(ex.clone(), Duration::from_millis(1));
        let mut stream = connector.connect().await.unwrap();
        stream
            .subscribe(&[InstrumentId::from("BTC-PERP")])
            .await
            .unwrap();

        match stream.next_event().await.unwrap() {
            Some(StreamEvent::Ticker(t)) => {
                assert_eq!(t.last_price, Price::new(dec!(100)));
            }
            other => panic!("expected ticker, got {other:?}"),
        }

        // Mark moves are visible on the next tick.
        ex.set_mark(InstrumentId::from("BTC-PERP"), Price::new(dec!(101)));
        match stream.next_event().await.unwrap() {
            Some(StreamEvent::Ticker(t)) => {
                assert_eq!(t.last_price, Price::new(dec!(101)));
            }
            other => panic!("expected ticker, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn scripted_connector_hands_out_streams_in_order() {
        let connector = ScriptedConnector::new(vec![
            vec![ScriptItem::Disconnect],
            vec![],
        ]);
        let mut first = connector.connect().await.unwrap();
        first
            .subscribe(&[InstrumentId::from("BTC-PERP")])
            .await
            .unwrap();
        assert_eq!(first.next_event().await.unwrap(), None);

        let _second = connector.connect().await.unwrap();
        assert_eq!(connector.subscription_log().lock().len(), 1);
    }
}
