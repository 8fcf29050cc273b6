//! Position and risk ledger.
//!
//! The authoritative store of open positions. Sizing approval, margin
//! reservation and position mutation all run under one mutex so two
//! concurrent sizing calls can never jointly over-commit margin. Every
//! threshold comparison uses post-fee, post-slippage price movement,
//! never gross movement.

use crate::config::RiskConfig;
use crate::error::{LedgerError, LedgerResult};
use crate::halt::EntryHaltLatch;
use crate::sizing::{self, AccountState};
use crate::store::PositionStore;
use chrono::{DateTime, Utc};
use lever_core::{
    AllocationRequest, Direction, ExecutionResult, FeeSchedule, InstrumentId, Position, PositionId,
    PositionStatus, Price, SizedOrder,
};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Exit decision for one position at one price.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitSignal {
    Hold,
    StopLoss,
    TakeProfit,
    /// Account-level hard loss limit breached. Evaluated before every
    /// other signal and never suppressed by upstream decisions.
    KillSwitch,
}

/// Record of a closed position with its full cost breakdown.
#[derive(Debug, Clone, PartialEq)]
pub struct ClosedPosition {
    pub position: Position,
    pub exit_price: Price,
    /// Gross price PnL, quote currency.
    pub price_pnl: Decimal,
    /// Entry plus exit fees.
    pub total_fees: Decimal,
    /// Entry plus exit slippage cost.
    pub total_slippage_cost: Decimal,
    /// `price_pnl - total_slippage_cost - total_fees`.
    pub net_pnl: Decimal,
    /// Net PnL as a fraction of entry notional.
    pub net_pnl_pct: Decimal,
    pub closed_at: DateTime<Utc>,
}

#[derive(Default)]
struct LedgerState {
    /// Non-closed positions, at most one per instrument.
    positions: HashMap<InstrumentId, Position>,
    /// Margin approved by sizing but not yet committed by an open.
    reserved: HashMap<InstrumentId, Decimal>,
}

impl LedgerState {
    fn committed_margin(&self) -> Decimal {
        let open: Decimal = self.positions.values().map(Position::margin).sum();
        let reserved: Decimal = self.reserved.values().copied().sum();
        open + reserved
    }
}

/// Position and risk ledger. Shared behind `Arc`.
pub struct PositionLedger {
    config: RiskConfig,
    fees: FeeSchedule,
    state: Mutex<LedgerState>,
    halt: Arc<EntryHaltLatch>,
    store: Option<PositionStore>,
}

impl PositionLedger {
    pub fn new(config: RiskConfig, fees: FeeSchedule) -> Self {
        Self {
            config,
            fees,
            state: Mutex::new(LedgerState::default()),
            halt: Arc::new(EntryHaltLatch::new()),
            store: None,
        }
    }

    /// Build a ledger backed by a snapshot file, reloading any positions
    /// persisted by a previous run.
    pub fn with_store(
        config: RiskConfig,
        fees: FeeSchedule,
        store: PositionStore,
    ) -> LedgerResult<Self> {
        let restored = store.load()?;
        let mut state = LedgerState::default();
        for position in restored {
            if !position.status.is_closed() {
                state.positions.insert(position.instrument.clone(), position);
            }
        }
        Ok(Self {
            config,
            fees,
            state: Mutex::new(state),
            halt: Arc::new(EntryHaltLatch::new()),
            store: Some(store),
        })
    }

    pub fn config(&self) -> &RiskConfig {
        &self.config
    }

    pub fn halt_latch(&self) -> Arc<EntryHaltLatch> {
        self.halt.clone()
    }

    /// Total margin committed across open positions plus pending
    /// reservations.
    pub fn committed_margin(&self) -> Decimal {
        self.state.lock().committed_margin()
    }

    pub fn position(&self, instrument: &InstrumentId) -> Option<Position> {
        self.state.lock().positions.get(instrument).cloned()
    }

    pub fn open_positions(&self) -> Vec<Position> {
        self.state.lock().positions.values().cloned().collect()
    }

    /// Approve or reject new exposure.
    ///
    /// Leverage scales with confidence, clamped to `[1, max_leverage]`,
    /// then down for elevated volatility and drawdown. The margin check
    /// and reservation happen inside one critical section; a rejection
    /// never clamps the request into compliance.
    pub fn size_position(
        &self,
        request: &AllocationRequest,
        account: &AccountState,
        reference_price: Price,
    ) -> LedgerResult<SizedOrder> {
        if let Some(reason) = self.halt.reason() {
            return Err(LedgerError::EntriesHalted {
                reason: reason.to_string(),
            });
        }
        if !reference_price.is_positive() {
            return Err(LedgerError::InvalidReferencePrice(request.instrument.clone()));
        }

        let mut state = self.state.lock();
        if state.positions.contains_key(&request.instrument)
            || state.reserved.contains_key(&request.instrument)
        {
            return Err(LedgerError::PositionExists(request.instrument.clone()));
        }

        let mut leverage = sizing::scaled_leverage(
            sizing::base_leverage(request.confidence, self.config.max_leverage),
            account,
            &self.config,
        );
        if let Some(hint) = request.leverage_hint {
            leverage = leverage.min(hint.max(Decimal::ONE));
        }

        let notional = request
            .notional
            .min(account.equity * self.config.target_allocation);
        let margin = notional / leverage;

        let committed = state.committed_margin();
        if committed + margin + account.reserved_cash > account.equity {
            return Err(LedgerError::MarginExceeded {
                instrument: request.instrument.clone(),
                committed,
                required: margin,
                equity: account.equity,
            });
        }
        let free = account.equity - committed - margin - account.reserved_cash;
        let floor = account.equity * self.config.cash_reserve_floor;
        if free < floor {
            return Err(LedgerError::CashFloorBreached {
                instrument: request.instrument.clone(),
                free,
                floor,
            });
        }

        let band = sizing::exit_band(request.confidence);
        state.reserved.insert(request.instrument.clone(), margin);

        info!(
            instrument = %request.instrument,
            %notional,
            %leverage,
            %margin,
            confidence = %request.confidence,
            "Sizing approved"
        );
        Ok(SizedOrder {
            instrument: request.instrument.clone(),
            direction: request.direction,
            notional,
            size: lever_core::Size::new(notional / reference_price.inner()),
            leverage,
            margin,
            stop_loss_pct: band.stop_loss_pct,
            take_profit_pct: band.take_profit_pct,
        })
    }

    /// Release a sizing reservation whose execution never completed.
    pub fn release_sizing(&self, instrument: &InstrumentId) {
        if self.state.lock().reserved.remove(instrument).is_some() {
            info!(%instrument, "Sizing reservation released");
        }
    }

    /// Record a filled entry atomically, converting the sizing
    /// reservation into a committed position.
    pub fn open_position(
        &self,
        sized: &SizedOrder,
        exec: &ExecutionResult,
    ) -> LedgerResult<Position> {
        let entry = exec.avg_fill_price;
        let (stop_loss, take_profit) = self.exit_levels(sized, entry);

        let position = {
            let mut state = self.state.lock();
            if state.positions.contains_key(&sized.instrument) {
                return Err(LedgerError::PositionExists(sized.instrument.clone()));
            }
            let position = Position {
                id: PositionId::new(),
                instrument: sized.instrument.clone(),
                direction: sized.direction,
                size: exec.filled_size,
                entry_price: entry,
                leverage: sized.leverage,
                stop_loss,
                take_profit,
                trailing_high_water: entry,
                status: PositionStatus::Open,
                entry_fee: exec.total_fee,
                entry_slippage_cost: exec.slippage_cost(),
                opened_at: Utc::now(),
            };
            state.reserved.remove(&sized.instrument);
            state
                .positions
                .insert(sized.instrument.clone(), position.clone());
            position
        };

        info!(
            instrument = %position.instrument,
            id = %position.id,
            direction = %position.direction,
            size = %position.size,
            entry = %position.entry_price,
            stop = %position.stop_loss,
            target = %position.take_profit,
            "Position opened"
        );
        self.persist()?;
        Ok(position)
    }

    /// Stop and target levels for an entry price. A configured fixed
    /// distance wins over the confidence-band percentage.
    fn exit_levels(&self, sized: &SizedOrder, entry: Price) -> (Price, Price) {
        let stop = match self.config.fixed_stop_distance {
            Some(distance) => match sized.direction {
                Direction::Long => Price::new(entry.inner() - distance),
                Direction::Short => Price::new(entry.inner() + distance),
            },
            None => match sized.direction {
                Direction::Long => entry * (Decimal::ONE - sized.stop_loss_pct),
                Direction::Short => entry * (Decimal::ONE + sized.stop_loss_pct),
            },
        };
        let target = match self.config.fixed_take_profit_distance {
            Some(distance) => match sized.direction {
                Direction::Long => Price::new(entry.inner() + distance),
                Direction::Short => Price::new(entry.inner() - distance),
            },
            None => match sized.direction {
                Direction::Long => entry * (Decimal::ONE + sized.take_profit_pct),
                Direction::Short => entry * (Decimal::ONE - sized.take_profit_pct),
            },
        };
        (stop, target)
    }

    /// Price movement net of realized entry costs and an exit-fee
    /// allowance at the taker rate.
    fn net_move(&self, position: &Position, price: Price) -> Decimal {
        let notional = position.notional();
        let entry_cost_fraction = if notional.is_zero() {
            Decimal::ZERO
        } else {
            (position.entry_fee + position.entry_slippage_cost) / notional
        };
        position.gross_move(price) - entry_cost_fraction - self.fees.taker_rate
    }

    /// Evaluate the exit signal for one position at the current price.
    pub fn evaluate_exit(
        &self,
        instrument: &InstrumentId,
        current_price: Price,
        account: &AccountState,
    ) -> LedgerResult<ExitSignal> {
        // The hard loss limit is independent of any position state and
        // is checked before everything else.
        if account.drawdown >= self.config.account_loss_limit {
            warn!(
                drawdown = %account.drawdown,
                limit = %self.config.account_loss_limit,
                "Account loss limit breached"
            );
            return Ok(ExitSignal::KillSwitch);
        }

        let state = self.state.lock();
        let position = state
            .positions
            .get(instrument)
            .ok_or_else(|| LedgerError::UnknownPosition(instrument.clone()))?;

        let net = self.net_move(position, current_price);
        let sign = Decimal::from(position.direction.sign());
        let stop_move = position
            .stop_loss
            .change_from(position.entry_price)
            .unwrap_or(Decimal::ZERO)
            * sign;
        let target_move = position
            .take_profit
            .change_from(position.entry_price)
            .unwrap_or(Decimal::ZERO)
            * sign;

        if net <= stop_move {
            return Ok(ExitSignal::StopLoss);
        }
        if net >= target_move {
            return Ok(ExitSignal::TakeProfit);
        }
        Ok(ExitSignal::Hold)
    }

    /// Advance the trailing stop toward the current price.
    ///
    /// Moves only while the position is profitable post-cost, and only in
    /// the profit-favorable direction. Returns the new stop when it
    /// advanced.
    pub fn update_trailing_stop(
        &self,
        instrument: &InstrumentId,
        current_price: Price,
    ) -> LedgerResult<Option<Price>> {
        let advanced = {
            let mut state = self.state.lock();
            let position = state
                .positions
                .get_mut(instrument)
                .ok_or_else(|| LedgerError::UnknownPosition(instrument.clone()))?;

            let notional = position.notional();
            let entry_cost_fraction = if notional.is_zero() {
                Decimal::ZERO
            } else {
                (position.entry_fee + position.entry_slippage_cost) / notional
            };
            let net = position.gross_move(current_price)
                - entry_cost_fraction
                - self.fees.taker_rate;
            if !net.is_sign_positive() || net.is_zero() {
                return Ok(None);
            }

            match position.direction {
                Direction::Long => {
                    if current_price > position.trailing_high_water {
                        position.trailing_high_water = current_price;
                    }
                    let candidate = position.trailing_high_water
                        * (Decimal::ONE - self.config.trailing_distance);
                    if candidate > position.stop_loss {
                        position.stop_loss = candidate;
                        Some(candidate)
                    } else {
                        None
                    }
                }
                Direction::Short => {
                    if current_price < position.trailing_high_water {
                        position.trailing_high_water = current_price;
                    }
                    let candidate = position.trailing_high_water
                        * (Decimal::ONE + self.config.trailing_distance);
                    if candidate < position.stop_loss {
                        position.stop_loss = candidate;
                        Some(candidate)
                    } else {
                        None
                    }
                }
            }
        };

        if let Some(new_stop) = advanced {
            info!(%instrument, stop = %new_stop, "Trailing stop advanced");
            self.persist()?;
        }
        Ok(advanced)
    }

    /// Mark a position as closing before its exit order is submitted.
    pub fn mark_closing(&self, instrument: &InstrumentId) -> LedgerResult<()> {
        {
            let mut state = self.state.lock();
            let position = state
                .positions
                .get_mut(instrument)
                .ok_or_else(|| LedgerError::UnknownPosition(instrument.clone()))?;
            position.status = PositionStatus::Closing;
        }
        self.persist()
    }

    /// Record a filled exit and compute net PnL:
    /// `net = price_pnl - slippage_cost - entry_fee - exit_fee`.
    ///
    /// A fill covering less than the position shrinks it to the residual
    /// and fails with `IncompleteClose`; the residual stays under risk
    /// monitoring.
    pub fn close_position(
        &self,
        instrument: &InstrumentId,
        exec: &ExecutionResult,
    ) -> LedgerResult<ClosedPosition> {
        self.close_position_with_slippage_cost(instrument, exec, exec.slippage_cost())
    }

    /// As `close_position`, with the exit slippage cost supplied
    /// directly. Summed per-leg costs stay exact where re-deriving them
    /// from a blended fraction would not.
    pub(crate) fn close_position_with_slippage_cost(
        &self,
        instrument: &InstrumentId,
        exec: &ExecutionResult,
        exit_slippage_cost: Decimal,
    ) -> LedgerResult<ClosedPosition> {
        let mut position = {
            let mut state = self.state.lock();
            let current_size = state
                .positions
                .get(instrument)
                .map(|p| p.size)
                .ok_or_else(|| LedgerError::UnknownPosition(instrument.clone()))?;
            if exec.filled_size < current_size {
                let remaining = current_size.saturating_sub(exec.filled_size);
                if let Some(open) = state.positions.get_mut(instrument) {
                    open.size = remaining;
                    open.status = PositionStatus::Open;
                }
                drop(state);
                warn!(
                    %instrument,
                    filled = %exec.filled_size,
                    %remaining,
                    "Exit fill incomplete, residual stays under monitoring"
                );
                self.persist()?;
                return Err(LedgerError::IncompleteClose {
                    instrument: instrument.clone(),
                    filled: exec.filled_size,
                    remaining,
                });
            }
            state
                .positions
                .remove(instrument)
                .ok_or_else(|| LedgerError::UnknownPosition(instrument.clone()))?
        };

        let exit_price = exec.avg_fill_price;
        let notional = position.notional();
        let price_pnl = position.gross_move(exit_price) * notional;
        let total_fees = position.entry_fee + exec.total_fee;
        let total_slippage_cost = position.entry_slippage_cost + exit_slippage_cost;
        let net_pnl = price_pnl - total_slippage_cost - total_fees;
        let net_pnl_pct = if notional.is_zero() {
            Decimal::ZERO
        } else {
            net_pnl / notional
        };

        position.status = PositionStatus::Closed;
        info!(
            %instrument,
            id = %position.id,
            exit = %exit_price,
            %price_pnl,
            %net_pnl,
            %net_pnl_pct,
            "Position closed"
        );
        self.persist()?;
        Ok(ClosedPosition {
            position,
            exit_price,
            price_pnl,
            total_fees,
            total_slippage_cost,
            net_pnl,
            net_pnl_pct,
            closed_at: Utc::now(),
        })
    }

    /// Shrink a position after a partial liquidation.
    pub(crate) fn reduce_size(
        &self,
        instrument: &InstrumentId,
        filled: lever_core::Size,
    ) -> LedgerResult<()> {
        {
            let mut state = self.state.lock();
            let position = state
                .positions
                .get_mut(instrument)
                .ok_or_else(|| LedgerError::UnknownPosition(instrument.clone()))?;
            position.size = position.size.saturating_sub(filled);
        }
        self.persist()
    }

    fn persist(&self) -> LedgerResult<()> {
        if let Some(store) = &self.store {
            let snapshot = self.open_positions();
            store.save(&snapshot)?;
        }
        Ok(())
    }
}
