//! Execution engine.
//!
//! One `execute()` call owns its orders from submission to terminal
//! state, then hands the aggregate back as an `ExecutionResult`. The
//! call is bounded: submission retries are counted, status polling runs
//! on a fixed interval against a deadline, and the whole wait is
//! cancellable via the shutdown token.

use crate::config::{ExecConfig, DEPTH_LEVELS};
use crate::error::{ExecError, ExecResult};
use lever_core::{
    ExecutionResult, FeeSchedule, InstrumentId, Order, OrderBookSnapshot, OrderSide, OrderStatus,
    Price, Size, Urgency,
};
use lever_exchange::{AdapterError, ExchangeAdapter, OrderRequest, OrderStatusReport};
use lever_feed::MarketCache;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Outcome of a poll loop.
enum PollOutcome {
    /// The order reached a terminal state.
    Terminal,
    /// The fill timeout elapsed with the order still working.
    TimedOut,
    /// Shutdown was requested mid-wait.
    Shutdown,
}

/// Order execution engine.
///
/// Cheap to clone; all clones share the adapter, pricing cache and
/// shutdown token.
#[derive(Clone)]
pub struct ExecutionEngine {
    adapter: Arc<dyn ExchangeAdapter>,
    cache: Arc<MarketCache>,
    fees: FeeSchedule,
    config: ExecConfig,
    staleness: Duration,
    shutdown: CancellationToken,
}

impl ExecutionEngine {
    pub fn new(
        adapter: Arc<dyn ExchangeAdapter>,
        cache: Arc<MarketCache>,
        fees: FeeSchedule,
        config: ExecConfig,
        staleness: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            adapter,
            cache,
            fees,
            config,
            staleness,
            shutdown,
        }
    }

    /// The same engine bound to a different shutdown token. Cancelling
    /// the token resolves any working order (cancel plus a final status
    /// query) instead of abandoning it, so a caller can impose a
    /// deadline on one call without touching the shared engine.
    pub fn with_shutdown(&self, shutdown: CancellationToken) -> Self {
        Self {
            shutdown,
            ..self.clone()
        }
    }

    /// Execute a trade intent for `notional` quote currency.
    ///
    /// Normal urgency tries a limit order one tick inside the book when
    /// the spread is tight and top-5 depth is sufficient, escalating the
    /// unfilled remainder to market after the fill timeout. High urgency
    /// submits market immediately.
    pub async fn execute(
        &self,
        instrument: &InstrumentId,
        side: OrderSide,
        notional: Decimal,
        urgency: Urgency,
    ) -> ExecResult<ExecutionResult> {
        let book = self.cache.latest_book(instrument, self.staleness);
        let reference = self.reference_price(instrument, book.as_ref())?;
        let size = Size::new(notional / reference.inner());

        // Zero contra-side depth is retryable, distinct from adapter
        // failure.
        if let Some(ref book) = book {
            if book.depth_for(side, DEPTH_LEVELS).is_zero() {
                return Err(ExecError::InsufficientLiquidity(instrument.clone()));
            }
        }

        match urgency {
            Urgency::High => {
                let order = self.run_market(instrument, side, size, false).await?;
                self.finish(reference, side, &[order])
            }
            Urgency::Normal => {
                // Limit placement needs a fresh book to judge spread and
                // depth; without one the caller must skip, not guess.
                let book = book.ok_or_else(|| ExecError::MissingMarketData(instrument.clone()))?;
                if self.limit_entry_viable(&book, side, size) {
                    self.run_limit_then_escalate(instrument, side, size, &book, reference)
                        .await
                } else {
                    debug!(%instrument, "Limit entry conditions not met, going market");
                    let order = self.run_market(instrument, side, size, false).await?;
                    self.finish(reference, side, &[order])
                }
            }
        }
    }

    /// Reference price at submission: book mid when available, last
    /// trade otherwise. The slippage sign convention hangs off this.
    fn reference_price(
        &self,
        instrument: &InstrumentId,
        book: Option<&OrderBookSnapshot>,
    ) -> ExecResult<Price> {
        if let Some(mid) = book.and_then(|b| b.mid_price()) {
            return Ok(mid);
        }
        self.cache
            .latest_ticker(instrument, self.staleness)
            .map(|t| t.last_price)
            .ok_or_else(|| ExecError::MissingMarketData(instrument.clone()))
    }

    fn limit_entry_viable(&self, book: &OrderBookSnapshot, side: OrderSide, size: Size) -> bool {
        let spread_ok = book
            .spread_fraction()
            .map(|s| s < self.config.max_spread_fraction)
            .unwrap_or(false);
        let depth = book.depth_for(side, DEPTH_LEVELS);
        let depth_ok = depth.inner() >= size.inner() * self.config.min_depth_multiple;
        spread_ok && depth_ok
    }

    async fn run_limit_then_escalate(
        &self,
        instrument: &InstrumentId,
        side: OrderSide,
        size: Size,
        book: &OrderBookSnapshot,
        reference: Price,
    ) -> ExecResult<ExecutionResult> {
        let tick = self.config.tick_size(instrument);
        let join = book
            .best_for_join(side)
            .ok_or_else(|| ExecError::InsufficientLiquidity(instrument.clone()))?;
        // One tick inside the relevant best price.
        let price = match side {
            OrderSide::Buy => join + tick,
            OrderSide::Sell => join - tick,
        }
        .round_to_tick(tick);

        let mut limit = Order::limit(instrument.clone(), side, size, price);
        info!(%instrument, %side, %size, %price, id = %limit.id, "Submitting limit order");
        self.submit_with_retry(&limit).await?;

        let deadline = Instant::now() + Duration::from_millis(self.config.fill_timeout_ms);
        let outcome = self.poll_until(&mut limit, deadline).await?;

        match outcome {
            PollOutcome::Terminal => self.finish(reference, side, &[limit]),
            PollOutcome::TimedOut => {
                warn!(id = %limit.id, filled = %limit.filled_size, "Limit unfilled at timeout, escalating");
                self.resolve_working_order(&mut limit).await?;

                let remainder = limit.remaining_size();
                if remainder.is_zero() {
                    return self.finish(reference, side, &[limit]);
                }
                let market = self.run_market(instrument, side, remainder, true).await?;
                self.finish(reference, side, &[limit, market])
            }
            PollOutcome::Shutdown => {
                info!(id = %limit.id, "Shutdown during limit wait, resolving in-flight order");
                self.resolve_working_order(&mut limit).await?;
                if limit.filled_size.is_positive() {
                    self.finish(reference, side, &[limit])
                } else {
                    Err(ExecError::Cancelled)
                }
            }
        }
    }

    /// Submit a market order and poll it to a terminal state.
    async fn run_market(
        &self,
        instrument: &InstrumentId,
        side: OrderSide,
        size: Size,
        escalated: bool,
    ) -> ExecResult<Order> {
        let mut order = Order::market(instrument.clone(), side, size);
        order.escalated = escalated;
        info!(%instrument, %side, %size, escalated, id = %order.id, "Submitting market order");
        self.submit_with_retry(&order).await?;

        let deadline = Instant::now() + Duration::from_millis(self.config.fill_timeout_ms);
        match self.poll_until(&mut order, deadline).await? {
            PollOutcome::Terminal => {}
            PollOutcome::TimedOut | PollOutcome::Shutdown => {
                self.resolve_working_order(&mut order).await?;
            }
        }

        if order.filled_size.is_zero() {
            return Err(ExecError::Adapter(AdapterError::Rejected(format!(
                "market order {} ended {} with no fill",
                order.id, order.status
            ))));
        }
        Ok(order)
    }

    /// Submit with bounded retries on transient failures.
    async fn submit_with_retry(&self, order: &Order) -> ExecResult<()> {
        let request = OrderRequest {
            id: order.id.clone(),
            instrument: order.instrument.clone(),
            side: order.side,
            size: order.size,
            kind: order.kind,
            limit_price: order.limit_price,
        };

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.adapter.place_order(&request).await {
                Ok(_) => return Ok(()),
                Err(e) if e.is_transient() && attempt < self.config.max_submit_retries => {
                    let backoff =
                        Duration::from_millis(self.config.submit_backoff_ms * u64::from(attempt));
                    warn!(id = %request.id, attempt, %e, "Transient submission failure, backing off");
                    tokio::select! {
                        () = tokio::time::sleep(backoff) => {}
                        () = self.shutdown.cancelled() => return Err(ExecError::Cancelled),
                    }
                }
                Err(e) if e.is_transient() => {
                    return Err(ExecError::RetriesExhausted { attempts: attempt });
                }
                Err(e) => return Err(ExecError::Adapter(e)),
            }
        }
    }

    /// Poll order status on the fixed interval until terminal, timeout,
    /// or shutdown. Transient poll failures are logged and retried on
    /// the next tick; the deadline bounds them.
    async fn poll_until(&self, order: &mut Order, deadline: Instant) -> ExecResult<PollOutcome> {
        let interval = Duration::from_millis(self.config.poll_interval_ms);
        loop {
            if order.status.is_terminal() {
                return Ok(PollOutcome::Terminal);
            }
            if Instant::now() >= deadline {
                return Ok(PollOutcome::TimedOut);
            }

            tokio::select! {
                () = self.shutdown.cancelled() => return Ok(PollOutcome::Shutdown),
                () = tokio::time::sleep(interval.min(deadline - Instant::now())) => {}
            }

            match self.adapter.get_order_status(&order.id).await {
                Ok(report) => self.apply_report(order, &report)?,
                Err(e) if e.is_transient() => {
                    warn!(id = %order.id, %e, "Transient status poll failure");
                }
                Err(e) => return Err(ExecError::Adapter(e)),
            }
        }
    }

    /// Cancel a still-working order and query it to resolution so it is
    /// never abandoned in-flight. A cancel rejection from a racing fill
    /// is tolerated; the final status query decides.
    async fn resolve_working_order(&self, order: &mut Order) -> ExecResult<()> {
        if order.status.is_terminal() {
            return Ok(());
        }
        match self.adapter.cancel_order(&order.id).await {
            Ok(()) => {}
            Err(AdapterError::Rejected(reason)) => {
                debug!(id = %order.id, %reason, "Cancel rejected, re-querying");
            }
            Err(e) if e.is_transient() => {
                warn!(id = %order.id, %e, "Transient cancel failure, re-querying");
            }
            Err(e) => return Err(ExecError::Adapter(e)),
        }
        let report = self.adapter.get_order_status(&order.id).await?;
        self.apply_report(order, &report)?;
        if !order.status.is_terminal() {
            order.transition(OrderStatus::Cancelled)?;
        }
        Ok(())
    }

    fn apply_report(&self, order: &mut Order, report: &OrderStatusReport) -> ExecResult<()> {
        order.filled_size = report.filled_size;
        if report.avg_fill_price.is_positive() {
            order.avg_fill_price = report.avg_fill_price;
        }
        if report.status != order.status {
            order.transition(report.status)?;
        }
        Ok(())
    }

    /// Aggregate terminal legs into an `ExecutionResult`.
    ///
    /// Fees come from the realized kind of each leg: a resting limit
    /// fill pays maker, a market (escalated or not) fill pays taker.
    /// Slippage is signed so positive is always adverse.
    fn finish(
        &self,
        reference: Price,
        side: OrderSide,
        legs: &[Order],
    ) -> ExecResult<ExecutionResult> {
        let mut filled = Size::ZERO;
        let mut cost = Decimal::ZERO;
        let mut total_fee = Decimal::ZERO;
        let mut escalated = false;

        for leg in legs {
            let leg_notional = leg.filled_size.notional(leg.avg_fill_price);
            filled += leg.filled_size;
            cost += leg_notional;
            total_fee += self.fees.fee_for(leg.kind, leg_notional);
            escalated |= leg.escalated;
        }

        if filled.is_zero() {
            return Err(ExecError::Cancelled);
        }

        let avg_fill_price = Price::new(cost / filled.inner());
        let slippage = avg_fill_price
            .change_from(reference)
            .unwrap_or(Decimal::ZERO)
            * Decimal::from(side.sign());

        let result = ExecutionResult {
            filled_size: filled,
            avg_fill_price,
            total_fee,
            slippage,
            escalated,
        };
        info!(
            filled = %result.filled_size,
            avg = %result.avg_fill_price,
            fee = %result.total_fee,
            slippage = %result.slippage,
            escalated = result.escalated,
            "Execution complete"
        );
        Ok(result)
    }
}
