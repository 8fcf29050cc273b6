//! Confidence-based sizing math.
//!
//! Pure functions; the critical-section bookkeeping lives in the ledger.

use crate::config::RiskConfig;
use rust_decimal::Decimal;

/// Account snapshot supplied by the caller per sizing decision.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AccountState {
    /// Total account equity, quote currency.
    pub equity: Decimal,
    /// Cash reserved outside the ledger's control.
    pub reserved_cash: Decimal,
    /// Realized volatility of the account's market exposure.
    pub realized_volatility: Decimal,
    /// Current drawdown from the equity high-water mark, as a fraction.
    pub drawdown: Decimal,
}

/// Take-profit and stop-loss distances, both positive fractions.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExitBand {
    pub take_profit_pct: Decimal,
    pub stop_loss_pct: Decimal,
}

/// Unscaled leverage: `clamp(1 + confidence * (max - 1), 1, max)`.
pub fn base_leverage(confidence: Decimal, max_leverage: Decimal) -> Decimal {
    let lev = Decimal::ONE + confidence * (max_leverage - Decimal::ONE);
    lev.clamp(Decimal::ONE, max_leverage)
}

/// Scale leverage down for adverse account conditions. Never scales up
/// and never drops below 1.
pub fn scaled_leverage(leverage: Decimal, account: &AccountState, config: &RiskConfig) -> Decimal {
    let mut lev = leverage;
    if account.realized_volatility > config.vol_threshold {
        lev *= config.vol_scale;
    }
    if account.drawdown > config.drawdown_threshold {
        lev *= config.drawdown_scale;
    }
    lev.max(Decimal::ONE)
}

/// Exit band for a confidence level.
///
/// Above 0.8 the band tightens linearly with confidence: take-profit
/// stretches 7% -> 8% while the stop narrows 1% -> 1.4%.
pub fn exit_band(confidence: Decimal) -> ExitBand {
    let high = Decimal::new(8, 1); // 0.8
    let mid = Decimal::new(6, 1); // 0.6
    if confidence > high {
        // t in [0, 1] across the 0.8..=1.0 range.
        let t = ((confidence - high) / Decimal::new(2, 1)).clamp(Decimal::ZERO, Decimal::ONE);
        ExitBand {
            take_profit_pct: Decimal::new(7, 2) + t * Decimal::new(1, 2),
            stop_loss_pct: Decimal::new(1, 2) + t * Decimal::new(4, 3),
        }
    } else if confidence >= mid {
        ExitBand {
            take_profit_pct: Decimal::new(5, 2),
            stop_loss_pct: Decimal::new(2, 2),
        }
    } else {
        ExitBand {
            take_profit_pct: Decimal::new(3, 2),
            stop_loss_pct: Decimal::new(3, 2),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn calm_account() -> AccountState {
        AccountState {
            equity: dec!(10000),
            reserved_cash: dec!(0),
            realized_volatility: dec!(0.01),
            drawdown: dec!(0),
        }
    }

    #[test]
    fn base_leverage_is_clamped_across_confidence_range() {
        let max = dec!(5);
        let mut confidence = dec!(0);
        while confidence <= dec!(1) {
            let lev = base_leverage(confidence, max);
            assert_eq!(lev, (dec!(1) + confidence * dec!(4)).clamp(dec!(1), max));
            assert!(lev >= dec!(1) && lev <= max);
            confidence += dec!(0.05);
        }
        // Out-of-range inputs still clamp.
        assert_eq!(base_leverage(dec!(1.5), max), dec!(5));
        assert_eq!(base_leverage(dec!(-0.2), max), dec!(1));
    }

    #[test]
    fn scaled_never_exceeds_unscaled() {
        let config = RiskConfig::default();
        let stressed = AccountState {
            realized_volatility: dec!(0.08),
            drawdown: dec!(0.2),
            ..calm_account()
        };
        let mut confidence = dec!(0);
        while confidence <= dec!(1) {
            let unscaled = base_leverage(confidence, config.max_leverage);
            let scaled = scaled_leverage(unscaled, &stressed, &config);
            assert!(scaled <= unscaled);
            assert!(scaled >= dec!(1));
            confidence += dec!(0.1);
        }
    }

    #[test]
    fn vol_and_drawdown_scales_compound() {
        let config = RiskConfig::default();
        let vol_only = AccountState {
            realized_volatility: dec!(0.08),
            ..calm_account()
        };
        let both = AccountState {
            realized_volatility: dec!(0.08),
            drawdown: dec!(0.2),
            ..calm_account()
        };

        assert_eq!(scaled_leverage(dec!(4), &calm_account(), &config), dec!(4));
        assert_eq!(scaled_leverage(dec!(4), &vol_only, &config), dec!(2.8));
        assert_eq!(scaled_leverage(dec!(4), &both, &config), dec!(1.4));
    }

    #[test]
    fn exit_bands_by_confidence() {
        // Low confidence: symmetric 3%.
        let low = exit_band(dec!(0.4));
        assert_eq!(low.take_profit_pct, dec!(0.03));
        assert_eq!(low.stop_loss_pct, dec!(0.03));

        // Mid band: 5% / 2%.
        let mid = exit_band(dec!(0.7));
        assert_eq!(mid.take_profit_pct, dec!(0.05));
        assert_eq!(mid.stop_loss_pct, dec!(0.02));

        // High band scales linearly: 0.9 is halfway through.
        let high = exit_band(dec!(0.9));
        assert_eq!(high.take_profit_pct, dec!(0.075));
        assert_eq!(high.stop_loss_pct, dec!(0.012));

        // Band edges.
        let full = exit_band(dec!(1.0));
        assert_eq!(full.take_profit_pct, dec!(0.08));
        assert_eq!(full.stop_loss_pct, dec!(0.014));
    }
}
