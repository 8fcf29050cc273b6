//! Application configuration.

use crate::error::{AppError, AppResult};
use lever_core::{FeeSchedule, InstrumentId};
use lever_cycle::CycleConfig;
use lever_exec::ExecConfig;
use lever_feed::FeedConfig;
use lever_ledger::RiskConfig;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Paper market seed: initial marks, synthetic book shape and the
/// simulated account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaperConfig {
    /// Initial mark price per instrument.
    #[serde(default)]
    pub initial_marks: HashMap<String, Decimal>,
    /// Starting account equity (quote currency).
    #[serde(default = "default_initial_equity")]
    pub initial_equity: Decimal,
    /// Half-spread applied around the mark when synthesizing books.
    /// Default: 0.0002 (2 bps).
    #[serde(default = "default_half_spread_fraction")]
    pub half_spread_fraction: Decimal,
    /// Size quoted at each synthetic book level. Default: 100.
    #[serde(default = "default_level_size")]
    pub level_size: Decimal,
    /// Fractional price penalty on simulated market fills.
    #[serde(default)]
    pub market_slippage: Decimal,
    /// Market data publish interval (ms). Default: 1,000.
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
}

fn default_initial_equity() -> Decimal {
    Decimal::from(10_000)
}

fn default_half_spread_fraction() -> Decimal {
    Decimal::new(2, 4) // 0.0002
}

fn default_level_size() -> Decimal {
    Decimal::from(100)
}

fn default_tick_interval_ms() -> u64 {
    1_000
}

impl Default for PaperConfig {
    fn default() -> Self {
        Self {
            initial_marks: HashMap::new(),
            initial_equity: default_initial_equity(),
            half_spread_fraction: default_half_spread_fraction(),
            level_size: default_level_size(),
            market_slippage: Decimal::ZERO,
            tick_interval_ms: default_tick_interval_ms(),
        }
    }
}

/// Application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Instruments to trade.
    #[serde(default = "default_instruments")]
    pub instruments: Vec<String>,
    /// Decision file read at the start of each cycle (JSON array).
    /// Absent or unreadable means no new entries this cycle; exits are
    /// still evaluated from market data.
    #[serde(default)]
    pub decision_file: Option<String>,
    /// Position snapshot path.
    #[serde(default = "default_store_path")]
    pub store_path: String,
    /// Market data feed configuration.
    #[serde(default)]
    pub feed: FeedConfig,
    /// Execution engine configuration.
    #[serde(default)]
    pub exec: ExecConfig,
    /// Risk and sizing configuration.
    #[serde(default)]
    pub risk: RiskConfig,
    /// Cycle orchestration configuration.
    #[serde(default)]
    pub cycle: CycleConfig,
    /// Maker/taker fee schedule.
    #[serde(default)]
    pub fees: FeeSchedule,
    /// Paper exchange seed.
    #[serde(default)]
    pub paper: PaperConfig,
}

fn default_instruments() -> Vec<String> {
    vec!["BTC-PERP".to_string(), "ETH-PERP".to_string()]
}

fn default_store_path() -> String {
    "./data/positions.json".to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            instruments: default_instruments(),
            decision_file: None,
            store_path: default_store_path(),
            feed: FeedConfig::default(),
            exec: ExecConfig::default(),
            risk: RiskConfig::default(),
            cycle: CycleConfig::default(),
            fees: FeeSchedule::default(),
            paper: PaperConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from file.
    pub fn load() -> AppResult<Self> {
        let config_path =
            std::env::var("LEVER_CONFIG").unwrap_or_else(|_| "config/default.toml".to_string());

        if std::path::Path::new(&config_path).exists() {
            Self::from_file(&config_path)
        } else {
            tracing::warn!(path = %config_path, "Config file not found, using defaults");
            Ok(Self::default())
        }
    }

    /// Load from a specific file.
    pub fn from_file(path: &str) -> AppResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| AppError::Config(format!("Failed to read config: {e}")))?;

        toml::from_str(&content)
            .map_err(|e| AppError::Config(format!("Failed to parse config: {e}")))
    }

    /// Instruments as typed identifiers.
    pub fn instrument_ids(&self) -> Vec<InstrumentId> {
        self.instruments
            .iter()
            .map(|s| InstrumentId::from(s.as_str()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn default_config_roundtrips_through_toml() {
        let config = AppConfig::default();
        let toml_str = toml::to_string(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();

        assert_eq!(parsed.instruments, config.instruments);
        assert_eq!(parsed.risk.max_leverage, config.risk.max_leverage);
        assert_eq!(parsed.fees, config.fees);
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let config: AppConfig = toml::from_str(
            r#"
            instruments = ["SOL-PERP"]

            [risk]
            max_leverage = 3

            [paper.initial_marks]
            "SOL-PERP" = 150.0
            "#,
        )
        .unwrap();

        assert_eq!(config.instruments, vec!["SOL-PERP".to_string()]);
        assert_eq!(config.risk.max_leverage, Decimal::from(3));
        assert_eq!(config.cycle.cycle_duration_ms, 300_000);
        assert_eq!(
            config.paper.initial_marks.get("SOL-PERP"),
            Some(&dec!(150.0))
        );
    }
}
