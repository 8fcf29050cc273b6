//! Execution engine configuration.

use lever_core::{InstrumentId, Price};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Book levels considered when judging depth for a limit entry.
pub const DEPTH_LEVELS: usize = 5;

/// Execution engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecConfig {
    /// Order status poll interval (ms). Default: 2,000.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Unfilled-limit timeout before escalation to market (ms).
    /// Default: 60,000.
    #[serde(default = "default_fill_timeout_ms")]
    pub fill_timeout_ms: u64,
    /// Maximum order submission attempts. Default: 3.
    #[serde(default = "default_max_submit_retries")]
    pub max_submit_retries: u32,
    /// Base backoff between submission retries (ms). Default: 500.
    #[serde(default = "default_submit_backoff_ms")]
    pub submit_backoff_ms: u64,
    /// Maximum relative spread for a limit entry. Default: 0.002 (20 bps).
    #[serde(default = "default_max_spread_fraction")]
    pub max_spread_fraction: Decimal,
    /// Top-5 depth must cover this multiple of the order size for a
    /// limit entry. Default: 3.
    #[serde(default = "default_min_depth_multiple")]
    pub min_depth_multiple: Decimal,
    /// Tick size used when an instrument has no explicit entry.
    /// Default: 0.01.
    #[serde(default = "default_tick_size")]
    pub default_tick_size: Decimal,
    /// Per-instrument tick size overrides.
    #[serde(default)]
    pub tick_sizes: HashMap<String, Decimal>,
}

fn default_poll_interval_ms() -> u64 {
    2_000
}

fn default_fill_timeout_ms() -> u64 {
    60_000
}

fn default_max_submit_retries() -> u32 {
    3
}

fn default_submit_backoff_ms() -> u64 {
    500
}

fn default_max_spread_fraction() -> Decimal {
    Decimal::new(2, 3) // 0.002
}

fn default_min_depth_multiple() -> Decimal {
    Decimal::from(3)
}

fn default_tick_size() -> Decimal {
    Decimal::new(1, 2) // 0.01
}

impl Default for ExecConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            fill_timeout_ms: default_fill_timeout_ms(),
            max_submit_retries: default_max_submit_retries(),
            submit_backoff_ms: default_submit_backoff_ms(),
            max_spread_fraction: default_max_spread_fraction(),
            min_depth_multiple: default_min_depth_multiple(),
            default_tick_size: default_tick_size(),
            tick_sizes: HashMap::new(),
        }
    }
}

impl ExecConfig {
    /// Tick size for an instrument.
    pub fn tick_size(&self, instrument: &InstrumentId) -> Price {
        Price::new(
            self.tick_sizes
                .get(instrument.as_str())
                .copied()
                .unwrap_or(self.default_tick_size),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn defaults() {
        let config = ExecConfig::default();
        assert_eq!(config.fill_timeout_ms, 60_000);
        assert_eq!(config.max_spread_fraction, dec!(0.002));
        assert_eq!(config.default_tick_size, dec!(0.01));
    }

    #[test]
    fn per_instrument_tick_override() {
        let mut config = ExecConfig::default();
        config
            .tick_sizes
            .insert("BTC-PERP".to_string(), dec!(0.5));

        assert_eq!(
            config.tick_size(&InstrumentId::from("BTC-PERP")),
            Price::new(dec!(0.5))
        );
        assert_eq!(
            config.tick_size(&InstrumentId::from("ETH-PERP")),
            Price::new(dec!(0.01))
        );
    }
}
