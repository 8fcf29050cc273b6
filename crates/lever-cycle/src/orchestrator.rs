//! Decision cycle orchestrator.
//!
//! One cycle runs four phases in strict order: gather exit decisions,
//! close flagged positions with a bounded confirmation wait, refresh
//! balances and sizings, then submit opens. No open for instrument X is
//! ever submitted in the same cycle as an unconfirmed close for X.

use crate::context::CycleContext;
use crate::error::{CycleError, CycleResult};
use futures_util::future::join_all;
use lever_core::{
    AllocationRequest, Direction, InstrumentId, Position, Price, Urgency,
};
use lever_exchange::ExchangeAdapter;
use lever_exec::ExecutionEngine;
use lever_feed::MarketCache;
use lever_ledger::{AccountState, ClosedPosition, ExitSignal, PositionLedger};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Decision layer action for one instrument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DecisionAction {
    Open,
    Close,
    Hold,
}

/// One decision-layer input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub instrument: InstrumentId,
    pub direction: Direction,
    /// Confidence in [0, 1]; drives sizing for opens.
    pub confidence: Decimal,
    pub action: DecisionAction,
}

/// Cycle orchestrator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleConfig {
    /// Cycle duration (ms). Default: 300,000.
    #[serde(default = "default_cycle_duration_ms")]
    pub cycle_duration_ms: u64,
    /// Entries are suppressed within this window of cycle end (ms).
    /// Default: 60,000.
    #[serde(default = "default_entry_suppression_ms")]
    pub entry_suppression_ms: u64,
    /// Bounded wait for a flagged close to be confirmed CLOSED (ms).
    /// Default: 90,000.
    #[serde(default = "default_close_confirm_timeout_ms")]
    pub close_confirm_timeout_ms: u64,
}

fn default_cycle_duration_ms() -> u64 {
    300_000
}

fn default_entry_suppression_ms() -> u64 {
    60_000
}

fn default_close_confirm_timeout_ms() -> u64 {
    90_000
}

impl Default for CycleConfig {
    fn default() -> Self {
        Self {
            cycle_duration_ms: default_cycle_duration_ms(),
            entry_suppression_ms: default_entry_suppression_ms(),
            close_confirm_timeout_ms: default_close_confirm_timeout_ms(),
        }
    }
}

/// Outcome of one cycle.
#[derive(Debug, Default)]
pub struct CycleReport {
    pub cycle_id: u64,
    pub closed: Vec<ClosedPosition>,
    pub opened: Vec<Position>,
    /// Instruments whose close was not confirmed this cycle.
    pub failed_closes: Vec<InstrumentId>,
    /// Instruments skipped with the reason.
    pub skipped: Vec<(InstrumentId, String)>,
}

/// Why a position was flagged for closing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CloseCause {
    Signal(ExitSignal),
    Decision,
}

/// Drives decision cycles against the ledger and execution engine.
pub struct CycleOrchestrator {
    adapter: Arc<dyn ExchangeAdapter>,
    engine: ExecutionEngine,
    ledger: Arc<PositionLedger>,
    cache: Arc<MarketCache>,
    config: CycleConfig,
    staleness: Duration,
    shutdown: CancellationToken,
    cycles_run: AtomicU64,
    equity_high_water: Mutex<Decimal>,
    realized_volatility: Mutex<Decimal>,
}

impl CycleOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        adapter: Arc<dyn ExchangeAdapter>,
        engine: ExecutionEngine,
        ledger: Arc<PositionLedger>,
        cache: Arc<MarketCache>,
        config: CycleConfig,
        staleness: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            adapter,
            engine,
            ledger,
            cache,
            config,
            staleness,
            shutdown,
            cycles_run: AtomicU64::new(0),
            equity_high_water: Mutex::new(Decimal::ZERO),
            realized_volatility: Mutex::new(Decimal::ZERO),
        }
    }

    /// Feed the current realized-volatility estimate into sizing.
    pub fn set_realized_volatility(&self, vol: Decimal) {
        *self.realized_volatility.lock() = vol;
    }

    /// Run one full decision cycle.
    pub async fn run_cycle(&self, decisions: &[Decision]) -> CycleResult<CycleReport> {
        if self.shutdown.is_cancelled() {
            return Err(CycleError::Cancelled);
        }
        let ctx = CycleContext::new(
            self.cycles_run.fetch_add(1, Ordering::SeqCst) + 1,
            Duration::from_millis(self.config.cycle_duration_ms),
            Duration::from_millis(self.config.entry_suppression_ms),
        );
        let mut report = CycleReport {
            cycle_id: ctx.cycle_id,
            ..CycleReport::default()
        };
        info!(cycle = ctx.cycle_id, decisions = decisions.len(), "Cycle started");

        // Phase 1: exit decisions for every open position, unioned with
        // CLOSE decisions from the decision layer.
        let account = self.account_state().await?;
        let flagged = self.gather_closes(decisions, &account, &mut report)?;

        // Phase 2: close concurrently across distinct instruments, each
        // with a bounded confirmation wait.
        let confirm = Duration::from_millis(self.config.close_confirm_timeout_ms);
        let close_futures = flagged.iter().map(|(instrument, cause)| async move {
            (
                instrument.clone(),
                self.close_one(instrument, *cause, confirm).await,
            )
        });
        for (instrument, result) in join_all(close_futures).await {
            match result {
                Ok(closed) => {
                    info!(%instrument, net_pnl = %closed.net_pnl, "Close confirmed");
                    report.closed.push(closed);
                }
                Err(e) => {
                    warn!(%instrument, %e, "Close not confirmed this cycle");
                    report.failed_closes.push(instrument);
                }
            }
        }

        // Phase 3: every flagged close is now confirmed or explicitly
        // failed; refresh balances before sizing.
        let account = self.account_state().await?;

        // Phase 4: submit opens concurrently.
        self.submit_opens(decisions, &ctx, &account, &mut report).await;

        info!(
            cycle = ctx.cycle_id,
            closed = report.closed.len(),
            opened = report.opened.len(),
            failed_closes = report.failed_closes.len(),
            skipped = report.skipped.len(),
            "Cycle complete"
        );
        Ok(report)
    }

    fn gather_closes(
        &self,
        decisions: &[Decision],
        account: &AccountState,
        report: &mut CycleReport,
    ) -> CycleResult<Vec<(InstrumentId, CloseCause)>> {
        let mut flagged: Vec<(InstrumentId, CloseCause)> = Vec::new();

        for position in self.ledger.open_positions() {
            let Some(price) = self.fresh_price(&position.instrument) else {
                warn!(instrument = %position.instrument, "No fresh price, skipping exit evaluation");
                report.skipped.push((
                    position.instrument.clone(),
                    "stale price at exit evaluation".to_string(),
                ));
                continue;
            };
            self.ledger
                .update_trailing_stop(&position.instrument, price)?;
            match self
                .ledger
                .evaluate_exit(&position.instrument, price, account)?
            {
                ExitSignal::Hold => {}
                signal => {
                    info!(instrument = %position.instrument, ?signal, "Exit flagged");
                    flagged.push((position.instrument.clone(), CloseCause::Signal(signal)));
                }
            }
        }

        for decision in decisions {
            if decision.action != DecisionAction::Close {
                continue;
            }
            if flagged.iter().any(|(i, _)| i == &decision.instrument) {
                continue;
            }
            if self.ledger.position(&decision.instrument).is_some() {
                flagged.push((decision.instrument.clone(), CloseCause::Decision));
            } else {
                warn!(instrument = %decision.instrument, "CLOSE decision for unknown position ignored");
            }
        }
        Ok(flagged)
    }

    /// Close one position within the confirmation window.
    ///
    /// The window is imposed by cancelling a per-close engine token, not
    /// by dropping the future: on expiry the engine resolves any resting
    /// exit order (cancel plus a final status query) instead of leaving
    /// it working at the exchange unobserved.
    async fn close_one(
        &self,
        instrument: &InstrumentId,
        cause: CloseCause,
        confirm: Duration,
    ) -> CycleResult<ClosedPosition> {
        let deadline = self.shutdown.child_token();
        let engine = self.engine.with_shutdown(deadline.clone());
        let timer = {
            let deadline = deadline.clone();
            tokio::spawn(async move {
                tokio::time::sleep(confirm).await;
                deadline.cancel();
            })
        };
        let result = self.run_close(&engine, instrument, cause).await;
        timer.abort();

        match result {
            // Nothing filled before the deadline; the resting order has
            // already been cancelled by the engine.
            Err(CycleError::Exec(lever_exec::ExecError::Cancelled))
                if !self.shutdown.is_cancelled() =>
            {
                Err(CycleError::CloseUnconfirmed(instrument.clone()))
            }
            other => other,
        }
    }

    async fn run_close(
        &self,
        engine: &ExecutionEngine,
        instrument: &InstrumentId,
        cause: CloseCause,
    ) -> CycleResult<ClosedPosition> {
        let price = self
            .fresh_price(instrument)
            .ok_or_else(|| CycleError::Exec(lever_exec::ExecError::MissingMarketData(instrument.clone())))?;

        if cause == CloseCause::Signal(ExitSignal::KillSwitch) {
            return Ok(self.ledger.kill_switch(engine, instrument, price).await?);
        }

        let position = self
            .ledger
            .position(instrument)
            .ok_or_else(|| CycleError::Ledger(lever_ledger::LedgerError::UnknownPosition(instrument.clone())))?;
        self.ledger.mark_closing(instrument)?;

        // Stops are urgent; targets and decision closes can work the book.
        let urgency = match cause {
            CloseCause::Signal(ExitSignal::StopLoss) => Urgency::High,
            _ => Urgency::Normal,
        };
        let result = engine
            .execute(
                instrument,
                position.direction.exit_side(),
                position.size.notional(price),
                urgency,
            )
            .await?;
        Ok(self.ledger.close_position(instrument, &result)?)
    }

    async fn submit_opens(
        &self,
        decisions: &[Decision],
        ctx: &CycleContext,
        account: &AccountState,
        report: &mut CycleReport,
    ) {
        let opens: Vec<&Decision> = decisions
            .iter()
            .filter(|d| d.action == DecisionAction::Open)
            .collect();

        if ctx.entries_suppressed() {
            for decision in opens {
                report.skipped.push((
                    decision.instrument.clone(),
                    "entries suppressed near cycle end".to_string(),
                ));
            }
            return;
        }

        let mut runnable = Vec::new();
        for decision in opens {
            if report.failed_closes.contains(&decision.instrument) {
                warn!(
                    instrument = %decision.instrument,
                    "Skipping open: close not confirmed this cycle"
                );
                report.skipped.push((
                    decision.instrument.clone(),
                    "close not confirmed this cycle".to_string(),
                ));
                continue;
            }
            runnable.push(decision);
        }

        let open_futures = runnable.iter().map(|decision| async move {
            let result = self.open_one(decision, account).await;
            (decision.instrument.clone(), result)
        });
        for (instrument, result) in join_all(open_futures).await {
            match result {
                Ok(position) => report.opened.push(position),
                Err(e) => {
                    warn!(%instrument, %e, "Open skipped");
                    report.skipped.push((instrument, e.to_string()));
                }
            }
        }
    }

    async fn open_one(&self, decision: &Decision, account: &AccountState) -> CycleResult<Position> {
        let price = self
            .fresh_price(&decision.instrument)
            .ok_or_else(|| CycleError::Exec(lever_exec::ExecError::MissingMarketData(decision.instrument.clone())))?;

        let request = AllocationRequest {
            instrument: decision.instrument.clone(),
            direction: decision.direction,
            notional: account.equity * self.ledger.config().target_allocation,
            confidence: decision.confidence,
            leverage_hint: None,
        };
        let sized = self.ledger.size_position(&request, account, price)?;

        let result = match self
            .engine
            .execute(
                &decision.instrument,
                decision.direction.entry_side(),
                sized.notional,
                Urgency::Normal,
            )
            .await
        {
            Ok(result) => result,
            Err(e) => {
                self.ledger.release_sizing(&decision.instrument);
                return Err(e.into());
            }
        };
        Ok(self.ledger.open_position(&sized, &result)?)
    }

    /// Account state from live balances. Drawdown is measured from the
    /// equity high-water mark this orchestrator has observed.
    async fn account_state(&self) -> CycleResult<AccountState> {
        let balances = self.adapter.get_balances().await?;
        let drawdown = {
            let mut high_water = self.equity_high_water.lock();
            if balances.equity > *high_water {
                *high_water = balances.equity;
            }
            if high_water.is_zero() {
                Decimal::ZERO
            } else {
                (*high_water - balances.equity) / *high_water
            }
        };
        Ok(AccountState {
            equity: balances.equity,
            reserved_cash: Decimal::ZERO,
            realized_volatility: *self.realized_volatility.lock(),
            drawdown,
        })
    }

    fn fresh_price(&self, instrument: &InstrumentId) -> Option<Price> {
        self.cache
            .latest_ticker(instrument, self.staleness)
            .map(|t| t.last_price)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use lever_core::{
        BookLevel, ExecutionResult, FeeSchedule, InstrumentTicker, OrderBookSnapshot, OrderSide,
        OrderStatus, Size,
    };
    use lever_exchange::{FillMode, PaperExchange};
    use lever_exec::ExecConfig;
    use lever_ledger::RiskConfig;
    use rust_decimal_macros::dec;

    const BTC: &str = "BTC-PERP";
    const ETH: &str = "ETH-PERP";

    struct Fixture {
        exchange: PaperExchange,
        ledger: Arc<PositionLedger>,
        orchestrator: CycleOrchestrator,
    }

    fn fixture(fill_timeout_ms: u64, confirm_timeout_ms: u64) -> Fixture {
        let exchange = PaperExchange::new();
        let cache = Arc::new(MarketCache::new());
        seed_market(&exchange, &cache, BTC, dec!(100));
        seed_market(&exchange, &cache, ETH, dec!(50));

        let ledger = Arc::new(PositionLedger::new(
            RiskConfig::default(),
            FeeSchedule::default(),
        ));
        let engine = ExecutionEngine::new(
            Arc::new(exchange.clone()),
            cache.clone(),
            FeeSchedule::default(),
            ExecConfig {
                poll_interval_ms: 5,
                fill_timeout_ms,
                submit_backoff_ms: 1,
                ..ExecConfig::default()
            },
            Duration::from_secs(5),
            CancellationToken::new(),
        );
        let orchestrator = CycleOrchestrator::new(
            Arc::new(exchange.clone()),
            engine,
            ledger.clone(),
            cache,
            CycleConfig {
                cycle_duration_ms: 60_000,
                entry_suppression_ms: 1_000,
                close_confirm_timeout_ms: confirm_timeout_ms,
            },
            Duration::from_secs(5),
            CancellationToken::new(),
        );
        Fixture {
            exchange,
            ledger,
            orchestrator,
        }
    }

    fn seed_market(exchange: &PaperExchange, cache: &MarketCache, symbol: &str, mid: Decimal) {
        let id = InstrumentId::from(symbol);
        exchange.set_mark(id.clone(), Price::new(mid));
        cache.update_ticker(InstrumentTicker {
            instrument: id.clone(),
            last_price: Price::new(mid),
            volume_24h: dec!(0),
            change_24h: dec!(0),
            timestamp: Utc::now(),
        });
        let half_spread = mid * dec!(0.0002);
        cache.update_book(OrderBookSnapshot::new(
            id,
            vec![BookLevel::new(
                Price::new(mid - half_spread),
                Size::new(dec!(500)),
            )],
            vec![BookLevel::new(
                Price::new(mid + half_spread),
                Size::new(dec!(500)),
            )],
            Utc::now(),
        ));
    }

    fn seed_long(ledger: &PositionLedger, symbol: &str, size: Decimal, entry: Decimal) {
        let account = AccountState {
            equity: dec!(100000),
            reserved_cash: dec!(0),
            realized_volatility: dec!(0),
            drawdown: dec!(0),
        };
        let sized = ledger
            .size_position(
                &AllocationRequest {
                    instrument: InstrumentId::from(symbol),
                    direction: Direction::Long,
                    notional: size * entry,
                    confidence: dec!(0.7),
                    leverage_hint: None,
                },
                &account,
                Price::new(entry),
            )
            .unwrap();
        ledger
            .open_position(
                &sized,
                &ExecutionResult {
                    filled_size: Size::new(size),
                    avg_fill_price: Price::new(entry),
                    total_fee: dec!(0),
                    slippage: dec!(0),
                    escalated: false,
                },
            )
            .unwrap();
    }

    fn decision(symbol: &str, action: DecisionAction) -> Decision {
        Decision {
            instrument: InstrumentId::from(symbol),
            direction: Direction::Long,
            confidence: dec!(0.7),
            action,
        }
    }

    #[tokio::test]
    async fn eth_open_waits_for_btc_close_confirmation() {
        let f = fixture(60_000, 30_000);
        seed_long(&f.ledger, BTC, dec!(2), dec!(100));
        // Delay every limit fill so the BTC close confirmation arrives
        // well after the cycle reaches the close phase.
        f.exchange.set_fill_mode(FillMode::AfterPolls(3));

        let report = f
            .orchestrator
            .run_cycle(&[
                decision(BTC, DecisionAction::Close),
                decision(ETH, DecisionAction::Open),
            ])
            .await
            .unwrap();

        assert_eq!(report.closed.len(), 1);
        assert_eq!(report.opened.len(), 1);
        assert!(report.failed_closes.is_empty());

        // Orders hit the exchange strictly close-first.
        let orders = f.exchange.accepted_orders();
        assert_eq!(orders.len(), 2);
        assert_eq!(orders[0].instrument, InstrumentId::from(BTC));
        assert_eq!(orders[0].side, OrderSide::Sell);
        assert_eq!(orders[1].instrument, InstrumentId::from(ETH));
        assert_eq!(orders[1].side, OrderSide::Buy);

        assert!(f.ledger.position(&InstrumentId::from(BTC)).is_none());
        assert!(f.ledger.position(&InstrumentId::from(ETH)).is_some());
    }

    #[tokio::test]
    async fn unconfirmed_close_blocks_open_for_that_instrument() {
        // Close never fills and the confirm window expires long before
        // the engine would escalate.
        let f = fixture(60_000, 80);
        seed_long(&f.ledger, BTC, dec!(2), dec!(100));
        f.exchange.set_fill_mode(FillMode::NoFill);

        let report = f
            .orchestrator
            .run_cycle(&[
                decision(BTC, DecisionAction::Close),
                decision(BTC, DecisionAction::Open),
            ])
            .await
            .unwrap();

        assert!(report.closed.is_empty());
        assert_eq!(report.failed_closes, vec![InstrumentId::from(BTC)]);
        assert!(report.opened.is_empty());
        assert!(report
            .skipped
            .iter()
            .any(|(i, reason)| i == &InstrumentId::from(BTC) && reason.contains("not confirmed")));

        // Only the close order ever reached the exchange, and it was
        // cancelled at the deadline rather than left working.
        let orders = f.exchange.accepted_orders();
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].side, OrderSide::Sell);
        let status = f.exchange.get_order_status(&orders[0].id).await.unwrap();
        assert_eq!(status.status, OrderStatus::Cancelled);
        // The position survives for the next cycle.
        assert!(f.ledger.position(&InstrumentId::from(BTC)).is_some());
    }

    #[tokio::test]
    async fn take_profit_signal_closes_without_a_close_decision() {
        let f = fixture(60_000, 30_000);
        seed_long(&f.ledger, BTC, dec!(2), dec!(100));
        // Price well through the 5% take-profit band.
        seed_market(&f.exchange, &f.orchestrator.cache, BTC, dec!(110));

        let report = f.orchestrator.run_cycle(&[]).await.unwrap();

        assert_eq!(report.closed.len(), 1);
        assert!(report.closed[0].net_pnl > dec!(0));
        assert!(f.ledger.position(&InstrumentId::from(BTC)).is_none());
    }

    #[tokio::test]
    async fn stale_price_skips_the_instrument() {
        let f = fixture(60_000, 30_000);
        let report = f
            .orchestrator
            .run_cycle(&[decision("SOL-PERP", DecisionAction::Open)])
            .await
            .unwrap();

        assert!(report.opened.is_empty());
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(f.exchange.accepted_order_count(), 0);
    }

    #[tokio::test]
    async fn entries_suppressed_near_cycle_end() {
        let exchange = PaperExchange::new();
        let cache = Arc::new(MarketCache::new());
        seed_market(&exchange, &cache, ETH, dec!(50));
        let ledger = Arc::new(PositionLedger::new(
            RiskConfig::default(),
            FeeSchedule::default(),
        ));
        let engine = ExecutionEngine::new(
            Arc::new(exchange.clone()),
            cache.clone(),
            FeeSchedule::default(),
            ExecConfig::default(),
            Duration::from_secs(5),
            CancellationToken::new(),
        );
        // Suppression window covers the whole cycle.
        let orchestrator = CycleOrchestrator::new(
            Arc::new(exchange.clone()),
            engine,
            ledger,
            cache,
            CycleConfig {
                cycle_duration_ms: 1_000,
                entry_suppression_ms: 1_000,
                close_confirm_timeout_ms: 30_000,
            },
            Duration::from_secs(5),
            CancellationToken::new(),
        );

        let report = orchestrator
            .run_cycle(&[decision(ETH, DecisionAction::Open)])
            .await
            .unwrap();

        assert!(report.opened.is_empty());
        assert!(report
            .skipped
            .iter()
            .any(|(_, reason)| reason.contains("suppressed")));
        assert_eq!(exchange.accepted_order_count(), 0);
    }

    #[tokio::test]
    async fn cancelled_orchestrator_refuses_new_cycles() {
        let f = fixture(60_000, 30_000);
        f.orchestrator.shutdown.cancel();
        let err = f.orchestrator.run_cycle(&[]).await.unwrap_err();
        assert!(matches!(err, CycleError::Cancelled));
    }
}
