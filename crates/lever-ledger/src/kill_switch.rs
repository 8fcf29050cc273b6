//! Bounded-retry emergency liquidation.
//!
//! The kill switch liquidates one position through the execution engine
//! with high urgency, retrying until the filled size covers the full
//! exposure or the attempts are used up. Exhaustion is fatal: the
//! entry-halt latch trips, new sizings reject, and monitoring of the
//! remaining positions continues.

use crate::error::{LedgerError, LedgerResult};
use crate::halt::HaltReason;
use crate::ledger::{ClosedPosition, PositionLedger};
use lever_core::{ExecutionResult, InstrumentId, Price, Size};
use lever_exec::ExecutionEngine;
use rust_decimal::Decimal;
use tracing::{error, info, warn};

impl PositionLedger {
    /// Liquidate the position for `instrument` completely.
    ///
    /// Fills accumulate across attempts; each retry liquidates only the
    /// remainder. Residual exposure after the bounded attempt count is a
    /// `KillSwitchFailure` and halts new entries. On failure the
    /// position record is shrunk to the residual so risk monitoring
    /// stays accurate.
    pub async fn kill_switch(
        &self,
        engine: &ExecutionEngine,
        instrument: &InstrumentId,
        current_price: Price,
    ) -> LedgerResult<ClosedPosition> {
        let position = self
            .position(instrument)
            .ok_or_else(|| LedgerError::UnknownPosition(instrument.clone()))?;
        self.mark_closing(instrument)?;

        let exit_side = position.direction.exit_side();
        let max_attempts = self.config().kill_switch_max_attempts;
        let mut remaining = position.size;
        let mut legs: Vec<ExecutionResult> = Vec::new();

        warn!(
            %instrument,
            size = %position.size,
            attempts = max_attempts,
            "Kill switch engaged"
        );

        for attempt in 1..=max_attempts {
            let notional = remaining.notional(current_price);
            match engine
                .execute(instrument, exit_side, notional, lever_core::Urgency::High)
                .await
            {
                Ok(result) => {
                    remaining = remaining.saturating_sub(result.filled_size);
                    info!(
                        %instrument,
                        attempt,
                        filled = %result.filled_size,
                        %remaining,
                        "Kill switch liquidation fill"
                    );
                    legs.push(result);
                    if remaining.is_zero() {
                        break;
                    }
                }
                Err(e) => {
                    warn!(%instrument, attempt, %e, "Kill switch liquidation attempt failed");
                }
            }
        }

        if !remaining.is_zero() {
            let filled: Size = position.size.saturating_sub(remaining);
            if filled.is_positive() {
                self.reduce_size(instrument, filled)?;
            }
            self.halt_latch().trigger(HaltReason::KillSwitchFailure {
                instrument: instrument.clone(),
                residual: remaining,
            });
            error!(%instrument, residual = %remaining, "Kill switch exhausted with residual exposure");
            return Err(LedgerError::KillSwitchFailure {
                instrument: instrument.clone(),
                residual: remaining,
                attempts: max_attempts,
            });
        }

        let (combined, slippage_cost) = combine_legs(&legs);
        self.close_position_with_slippage_cost(instrument, &combined, slippage_cost)
    }
}

/// Merge liquidation legs into one size-weighted execution result, plus
/// the exact summed slippage cost. The blended fraction on the result is
/// informational; PnL uses the exact cost, which a fraction round-trip
/// through Decimal division would not preserve.
fn combine_legs(legs: &[ExecutionResult]) -> (ExecutionResult, Decimal) {
    let mut filled = Size::ZERO;
    let mut cost = Decimal::ZERO;
    let mut total_fee = Decimal::ZERO;
    let mut slippage_cost = Decimal::ZERO;
    let mut escalated = false;

    for leg in legs {
        filled += leg.filled_size;
        cost += leg.filled_size.notional(leg.avg_fill_price);
        total_fee += leg.total_fee;
        slippage_cost += leg.slippage_cost();
        escalated |= leg.escalated;
    }

    let avg_fill_price = if filled.is_zero() {
        Price::ZERO
    } else {
        Price::new(cost / filled.inner())
    };
    let slippage = if cost.is_zero() {
        Decimal::ZERO
    } else {
        slippage_cost / cost
    };

    (
        ExecutionResult {
            filled_size: filled,
            avg_fill_price,
            total_fee,
            slippage,
            escalated,
        },
        slippage_cost,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RiskConfig;
    use crate::ledger::ExitSignal;
    use crate::sizing::AccountState;
    use lever_core::{
        AllocationRequest, Direction, FeeSchedule, InstrumentTicker, Urgency,
    };
    use lever_exchange::PaperExchange;
    use lever_exec::ExecConfig;
    use lever_feed::MarketCache;
    use rust_decimal_macros::dec;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    const BTC: &str = "BTC-PERP";

    fn engine(exchange: &PaperExchange, submit_retries: u32) -> ExecutionEngine {
        let cache = Arc::new(MarketCache::new());
        cache.update_ticker(InstrumentTicker {
            instrument: InstrumentId::from(BTC),
            last_price: Price::new(dec!(100)),
            volume_24h: dec!(0),
            change_24h: dec!(0),
            timestamp: chrono::Utc::now(),
        });
        ExecutionEngine::new(
            Arc::new(exchange.clone()),
            cache,
            FeeSchedule::default(),
            ExecConfig {
                poll_interval_ms: 5,
                fill_timeout_ms: 100,
                submit_backoff_ms: 1,
                max_submit_retries: submit_retries,
                ..ExecConfig::default()
            },
            Duration::from_secs(5),
            CancellationToken::new(),
        )
    }

    fn ledger_with_long(size: Decimal) -> PositionLedger {
        let ledger = PositionLedger::new(RiskConfig::default(), FeeSchedule::default());
        let account = AccountState {
            equity: dec!(100000),
            reserved_cash: dec!(0),
            realized_volatility: dec!(0),
            drawdown: dec!(0),
        };
        let sized = ledger
            .size_position(
                &AllocationRequest {
                    instrument: InstrumentId::from(BTC),
                    direction: Direction::Long,
                    notional: size * dec!(100),
                    confidence: dec!(0.7),
                    leverage_hint: None,
                },
                &account,
                Price::new(dec!(100)),
            )
            .unwrap();
        ledger
            .open_position(
                &sized,
                &ExecutionResult {
                    filled_size: Size::new(size),
                    avg_fill_price: Price::new(dec!(100)),
                    total_fee: dec!(0),
                    slippage: dec!(0),
                    escalated: false,
                },
            )
            .unwrap();
        ledger
    }

    #[tokio::test]
    async fn full_liquidation_closes_the_position() {
        let exchange = PaperExchange::new();
        exchange.set_mark(InstrumentId::from(BTC), Price::new(dec!(98)));
        let engine = engine(&exchange, 3);
        let ledger = ledger_with_long(dec!(2));

        let closed = ledger
            .kill_switch(&engine, &InstrumentId::from(BTC), Price::new(dec!(100)))
            .await
            .unwrap();

        assert_eq!(closed.position.size, Size::new(dec!(2)));
        // Sold at 98 against a 100 entry.
        assert_eq!(closed.price_pnl, dec!(-4));
        assert!(ledger.position(&InstrumentId::from(BTC)).is_none());
        assert!(!ledger.halt_latch().is_halted());
    }

    #[tokio::test]
    async fn consecutive_failures_stop_at_the_configured_bound() {
        let exchange = PaperExchange::new();
        exchange.set_mark(InstrumentId::from(BTC), Price::new(dec!(98)));
        // Every submission fails; with one submit attempt per execute
        // call, place attempts count kill-switch attempts exactly.
        exchange.fail_next_places(1000);
        let engine = engine(&exchange, 1);
        let ledger = ledger_with_long(dec!(2));

        let err = ledger
            .kill_switch(&engine, &InstrumentId::from(BTC), Price::new(dec!(100)))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            LedgerError::KillSwitchFailure {
                residual,
                attempts: 3,
                ..
            } if residual == Size::new(dec!(2))
        ));
        assert_eq!(exchange.place_attempt_count(), 3);
        assert!(ledger.halt_latch().is_halted());

        // New entries reject while halted.
        let account = AccountState {
            equity: dec!(100000),
            reserved_cash: dec!(0),
            realized_volatility: dec!(0),
            drawdown: dec!(0),
        };
        let err = ledger
            .size_position(
                &AllocationRequest {
                    instrument: InstrumentId::from("ETH-PERP"),
                    direction: Direction::Long,
                    notional: dec!(100),
                    confidence: dec!(0.5),
                    leverage_hint: None,
                },
                &account,
                Price::new(dec!(100)),
            )
            .unwrap_err();
        assert!(matches!(err, LedgerError::EntriesHalted { .. }));

        // Monitoring of the residual position continues.
        assert_eq!(
            ledger
                .evaluate_exit(&InstrumentId::from(BTC), Price::new(dec!(100)), &account)
                .unwrap(),
            ExitSignal::Hold
        );
    }

    #[tokio::test]
    async fn partial_fills_accumulate_across_attempts() {
        let exchange = PaperExchange::new();
        exchange.set_mark(InstrumentId::from(BTC), Price::new(dec!(98)));
        // First execute call fails outright, the next succeeds; fills
        // from distinct attempts must sum to the full exposure.
        exchange.fail_next_places(1);
        let engine = engine(&exchange, 1);
        let ledger = ledger_with_long(dec!(2));

        let closed = ledger
            .kill_switch(&engine, &InstrumentId::from(BTC), Price::new(dec!(100)))
            .await
            .unwrap();

        assert_eq!(closed.position.size, Size::new(dec!(2)));
        assert_eq!(exchange.place_attempt_count(), 2);
    }

    #[test]
    fn combine_legs_blends_prices_and_sums_costs() {
        let legs = [
            ExecutionResult {
                filled_size: Size::new(dec!(1)),
                avg_fill_price: Price::new(dec!(100)),
                total_fee: dec!(0.04),
                slippage: dec!(0.001),
                escalated: false,
            },
            ExecutionResult {
                filled_size: Size::new(dec!(1)),
                avg_fill_price: Price::new(dec!(98)),
                total_fee: dec!(0.04),
                slippage: dec!(0.002),
                escalated: true,
            },
        ];
        let (combined, slippage_cost) = combine_legs(&legs);

        assert_eq!(combined.filled_size, Size::new(dec!(2)));
        assert_eq!(combined.avg_fill_price, Price::new(dec!(99)));
        assert_eq!(combined.total_fee, dec!(0.08));
        assert!(combined.escalated);
        // The summed cost is exact; the blended fraction only
        // approximates it after division.
        let expected_cost = dec!(0.001) * dec!(100) + dec!(0.002) * dec!(98);
        assert_eq!(slippage_cost, expected_cost);
        assert!((combined.slippage_cost() - expected_cost).abs() < dec!(0.000000000000000001));
    }

    #[test]
    fn combine_legs_handles_empty_input() {
        let (combined, slippage_cost) = combine_legs(&[]);
        assert!(combined.filled_size.is_zero());
        assert_eq!(combined.avg_fill_price, Price::ZERO);
        assert_eq!(slippage_cost, Decimal::ZERO);
    }

    #[test]
    fn close_after_legs_carries_exact_slippage_cost() {
        let ledger = ledger_with_long(dec!(2));
        let legs = [
            ExecutionResult {
                filled_size: Size::new(dec!(1)),
                avg_fill_price: Price::new(dec!(100)),
                total_fee: dec!(0.04),
                slippage: dec!(0.001),
                escalated: false,
            },
            ExecutionResult {
                filled_size: Size::new(dec!(1)),
                avg_fill_price: Price::new(dec!(98)),
                total_fee: dec!(0.04),
                slippage: dec!(0.002),
                escalated: true,
            },
        ];
        let (combined, slippage_cost) = combine_legs(&legs);

        ledger.mark_closing(&InstrumentId::from(BTC)).unwrap();
        let closed = ledger
            .close_position_with_slippage_cost(&InstrumentId::from(BTC), &combined, slippage_cost)
            .unwrap();

        // 0.001 * 100 + 0.002 * 98, to the digit.
        assert_eq!(closed.total_slippage_cost, dec!(0.296));
        // Entry was costless: net = price_pnl - slippage - fees.
        assert_eq!(closed.net_pnl, dec!(-2) - dec!(0.296) - dec!(0.08));
    }

    #[tokio::test]
    async fn kill_switch_uses_high_urgency() {
        // High urgency must not depend on an order book being present;
        // the ticker alone prices the liquidation.
        let exchange = PaperExchange::new();
        exchange.set_mark(InstrumentId::from(BTC), Price::new(dec!(100)));
        let engine = engine(&exchange, 3);

        let result = engine
            .execute(
                &InstrumentId::from(BTC),
                lever_core::OrderSide::Sell,
                dec!(200),
                Urgency::High,
            )
            .await
            .unwrap();
        assert_eq!(result.filled_size, Size::new(dec!(2)));
    }
}
