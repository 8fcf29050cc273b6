//! Risk ledger configuration.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Risk and sizing configuration.
///
/// Built once at startup and never mutated; there is no second place a
/// risk threshold can be redefined.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    /// Maximum leverage at full confidence. Default: 5.
    #[serde(default = "default_max_leverage")]
    pub max_leverage: Decimal,
    /// Fraction of equity one position may take as notional.
    /// Default: 0.2.
    #[serde(default = "default_target_allocation")]
    pub target_allocation: Decimal,
    /// Realized-volatility threshold above which leverage is scaled by
    /// `vol_scale`. Default: 0.05.
    #[serde(default = "default_vol_threshold")]
    pub vol_threshold: Decimal,
    /// Leverage multiplier under elevated volatility. Default: 0.7.
    #[serde(default = "default_vol_scale")]
    pub vol_scale: Decimal,
    /// Drawdown threshold above which leverage is additionally scaled by
    /// `drawdown_scale`. Default: 0.10.
    #[serde(default = "default_drawdown_threshold")]
    pub drawdown_threshold: Decimal,
    /// Leverage multiplier under elevated drawdown. Default: 0.5.
    #[serde(default = "default_drawdown_scale")]
    pub drawdown_scale: Decimal,
    /// Fraction of equity that must stay free as cash. Default: 0.1.
    #[serde(default = "default_cash_reserve_floor")]
    pub cash_reserve_floor: Decimal,
    /// Account-level drawdown that trips the kill switch. Evaluated
    /// before any other exit signal and never suppressed. Default: 0.15.
    #[serde(default = "default_account_loss_limit")]
    pub account_loss_limit: Decimal,
    /// Trailing-stop distance below the high-water price. Default: 0.01.
    #[serde(default = "default_trailing_distance")]
    pub trailing_distance: Decimal,
    /// Bounded kill-switch liquidation attempts. Default: 3.
    #[serde(default = "default_kill_switch_max_attempts")]
    pub kill_switch_max_attempts: u32,
    /// Fixed stop-loss distance from entry, in price units. When set it
    /// takes precedence over the confidence-band percentage.
    #[serde(default)]
    pub fixed_stop_distance: Option<Decimal>,
    /// Fixed take-profit distance from entry, in price units. When set
    /// it takes precedence over the confidence-band percentage.
    #[serde(default)]
    pub fixed_take_profit_distance: Option<Decimal>,
}

fn default_max_leverage() -> Decimal {
    Decimal::from(5)
}

fn default_target_allocation() -> Decimal {
    Decimal::new(2, 1) // 0.2
}

fn default_vol_threshold() -> Decimal {
    Decimal::new(5, 2) // 0.05
}

fn default_vol_scale() -> Decimal {
    Decimal::new(7, 1) // 0.7
}

fn default_drawdown_threshold() -> Decimal {
    Decimal::new(1, 1) // 0.10
}

fn default_drawdown_scale() -> Decimal {
    Decimal::new(5, 1) // 0.5
}

fn default_cash_reserve_floor() -> Decimal {
    Decimal::new(1, 1) // 0.1
}

fn default_account_loss_limit() -> Decimal {
    Decimal::new(15, 2) // 0.15
}

fn default_trailing_distance() -> Decimal {
    Decimal::new(1, 2) // 0.01
}

fn default_kill_switch_max_attempts() -> u32 {
    3
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            max_leverage: default_max_leverage(),
            target_allocation: default_target_allocation(),
            vol_threshold: default_vol_threshold(),
            vol_scale: default_vol_scale(),
            drawdown_threshold: default_drawdown_threshold(),
            drawdown_scale: default_drawdown_scale(),
            cash_reserve_floor: default_cash_reserve_floor(),
            account_loss_limit: default_account_loss_limit(),
            trailing_distance: default_trailing_distance(),
            kill_switch_max_attempts: default_kill_switch_max_attempts(),
            fixed_stop_distance: None,
            fixed_take_profit_distance: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn defaults() {
        let config = RiskConfig::default();
        assert_eq!(config.max_leverage, dec!(5));
        assert_eq!(config.target_allocation, dec!(0.2));
        assert_eq!(config.account_loss_limit, dec!(0.15));
        assert_eq!(config.kill_switch_max_attempts, 3);
        assert!(config.fixed_stop_distance.is_none());
    }
}
