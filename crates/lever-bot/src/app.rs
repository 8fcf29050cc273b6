//! Main application orchestration.
//!
//! Wires the components together:
//! - Paper exchange and its market stream
//! - Market data feed task
//! - Execution engine
//! - Position ledger with snapshot persistence
//! - Cycle orchestrator driven on a fixed interval

use crate::config::AppConfig;
use crate::error::AppResult;
use lever_core::{BookLevel, InstrumentId, OrderBookSnapshot, Price, Size};
use lever_cycle::{CycleError, CycleOrchestrator, Decision};
use lever_exchange::{
    AccountBalances, ExchangeAdapter, PaperExchange, PaperMarketConnector,
};
use lever_exec::ExecutionEngine;
use lever_feed::MarketFeed;
use lever_ledger::{PositionLedger, PositionStore};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Decision layer handoff, read once per cycle.
#[derive(Debug, Default, Deserialize)]
struct DecisionBatch {
    /// Realized volatility estimate for leverage scaling.
    #[serde(default)]
    realized_volatility: Option<Decimal>,
    #[serde(default)]
    decisions: Vec<Decision>,
}

/// Main application.
pub struct Application {
    config: AppConfig,
    shutdown: CancellationToken,
}

impl Application {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            shutdown: CancellationToken::new(),
        }
    }

    /// Token that cancels the whole application when fired.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Run until the shutdown token fires.
    pub async fn run(&self) -> AppResult<()> {
        let instruments = self.config.instrument_ids();
        let staleness = Duration::from_millis(self.config.feed.staleness_ms);

        let exchange = self.seed_paper_exchange(&instruments);
        let adapter: Arc<dyn ExchangeAdapter> = Arc::new(exchange.clone());

        let connector = Arc::new(PaperMarketConnector::new(
            exchange,
            Duration::from_millis(self.config.paper.tick_interval_ms),
        ));
        let feed = MarketFeed::new(
            connector,
            self.config.feed.clone(),
            self.shutdown.child_token(),
        );
        feed.subscribe(&instruments);
        let feed_task = tokio::spawn(feed.clone().run());

        let engine = ExecutionEngine::new(
            adapter.clone(),
            feed.cache(),
            self.config.fees,
            self.config.exec.clone(),
            staleness,
            self.shutdown.child_token(),
        );

        let store = PositionStore::new(self.config.store_path.as_str());
        let ledger = Arc::new(PositionLedger::with_store(
            self.config.risk.clone(),
            self.config.fees,
            store,
        )?);
        info!(
            restored = ledger.open_positions().len(),
            store = %self.config.store_path,
            "Position ledger ready"
        );

        let orchestrator = CycleOrchestrator::new(
            adapter,
            engine,
            ledger,
            feed.cache(),
            self.config.cycle.clone(),
            staleness,
            self.shutdown.child_token(),
        );

        // Let the feed publish an initial snapshot before the first cycle.
        tokio::time::sleep(Duration::from_millis(self.config.paper.tick_interval_ms * 2)).await;

        let mut interval =
            tokio::time::interval(Duration::from_millis(self.config.cycle.cycle_duration_ms));

        loop {
            tokio::select! {
                () = self.shutdown.cancelled() => break,
                _ = interval.tick() => {}
            }

            let batch = self.load_decision_batch();
            if let Some(vol) = batch.realized_volatility {
                orchestrator.set_realized_volatility(vol);
            }

            match orchestrator.run_cycle(&batch.decisions).await {
                Ok(report) => {
                    info!(
                        cycle = report.cycle_id,
                        closed = report.closed.len(),
                        opened = report.opened.len(),
                        failed_closes = report.failed_closes.len(),
                        skipped = report.skipped.len(),
                        "Cycle complete"
                    );
                }
                Err(CycleError::Cancelled) => break,
                Err(e) => error!(%e, "Cycle failed"),
            }
        }

        info!("Shutting down");
        self.shutdown.cancel();
        match feed_task.await {
            Ok(result) => result?,
            Err(e) => warn!(%e, "Feed task join failed"),
        }
        Ok(())
    }

    /// Read the decision file, if configured. Unreadable or malformed
    /// input degrades to an empty batch; exits never depend on it.
    fn load_decision_batch(&self) -> DecisionBatch {
        let Some(path) = self.config.decision_file.as_deref() else {
            return DecisionBatch::default();
        };
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) => {
                warn!(path, %e, "Decision file unreadable, no entries this cycle");
                return DecisionBatch::default();
            }
        };
        match serde_json::from_str(&content) {
            Ok(batch) => batch,
            Err(e) => {
                warn!(path, %e, "Decision file malformed, no entries this cycle");
                DecisionBatch::default()
            }
        }
    }

    fn seed_paper_exchange(&self, instruments: &[InstrumentId]) -> PaperExchange {
        let paper = &self.config.paper;
        let exchange = PaperExchange::new();
        exchange.set_balances(AccountBalances {
            equity: paper.initial_equity,
            available: paper.initial_equity,
        });
        exchange.set_fee_rates(self.config.fees.maker_rate, self.config.fees.taker_rate);
        exchange.set_market_slippage(paper.market_slippage);

        for instrument in instruments {
            let Some(mark) = paper.initial_marks.get(instrument.as_str()) else {
                warn!(%instrument, "No initial mark configured, instrument starts dark");
                continue;
            };
            exchange.set_mark(instrument.clone(), Price::new(*mark));
            exchange.set_book(synthesize_book(
                instrument.clone(),
                *mark,
                paper.half_spread_fraction,
                paper.level_size,
            ));
        }
        exchange
    }
}

/// Build a symmetric synthetic book around the mark: three levels per
/// side, each a further half-spread away from the previous.
fn synthesize_book(
    instrument: InstrumentId,
    mark: Decimal,
    half_spread: Decimal,
    level_size: Decimal,
) -> OrderBookSnapshot {
    let mut bids = Vec::new();
    let mut asks = Vec::new();
    for i in 1..=3 {
        let offset = mark * half_spread * Decimal::from(i);
        bids.push(BookLevel::new(
            Price::new(mark - offset),
            Size::new(level_size),
        ));
        asks.push(BookLevel::new(
            Price::new(mark + offset),
            Size::new(level_size),
        ));
    }
    OrderBookSnapshot::new(instrument, bids, asks, chrono::Utc::now())
}
