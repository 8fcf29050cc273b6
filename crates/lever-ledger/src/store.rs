//! Position snapshot persistence.
//!
//! Open positions, including their stop and trailing levels, are written
//! to a JSON file after every mutation and reloaded at startup so risk
//! monitoring resumes after a restart without relying solely on
//! re-derivation from the exchange.

use crate::error::LedgerResult;
use lever_core::Position;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// File-backed store for open-position snapshots.
#[derive(Debug, Clone)]
pub struct PositionStore {
    path: PathBuf,
}

impl PositionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Persist the full snapshot. Writes to a sibling temp file then
    /// renames, so a crash mid-write never truncates the previous
    /// snapshot.
    pub fn save(&self, positions: &[Position]) -> LedgerResult<()> {
        let json = serde_json::to_string_pretty(positions)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.path)?;
        debug!(path = %self.path.display(), count = positions.len(), "Position snapshot saved");
        Ok(())
    }

    /// Load the last snapshot. A missing file is an empty ledger, not an
    /// error.
    pub fn load(&self) -> LedgerResult<Vec<Position>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let json = fs::read_to_string(&self.path)?;
        let positions: Vec<Position> = serde_json::from_str(&json)?;
        info!(path = %self.path.display(), count = positions.len(), "Position snapshot loaded");
        Ok(positions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use lever_core::{Direction, InstrumentId, PositionId, PositionStatus, Price, Size};
    use rust_decimal_macros::dec;

    fn position(symbol: &str) -> Position {
        Position {
            id: PositionId::new(),
            instrument: InstrumentId::from(symbol),
            direction: Direction::Long,
            size: Size::new(dec!(1)),
            entry_price: Price::new(dec!(100)),
            leverage: dec!(3),
            stop_loss: Price::new(dec!(98)),
            take_profit: Price::new(dec!(105)),
            trailing_high_water: Price::new(dec!(101)),
            status: PositionStatus::Open,
            entry_fee: dec!(0.04),
            entry_slippage_cost: dec!(0.04),
            opened_at: Utc::now(),
        }
    }

    #[test]
    fn save_and_reload_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = PositionStore::new(dir.path().join("positions.json"));

        store
            .save(&[position("BTC-PERP"), position("ETH-PERP")])
            .unwrap();
        let loaded = store.load().unwrap();

        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].stop_loss, Price::new(dec!(98)));
        assert_eq!(loaded[0].trailing_high_water, Price::new(dec!(101)));
    }

    #[test]
    fn missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = PositionStore::new(dir.path().join("absent.json"));
        assert!(store.load().unwrap().is_empty());
    }
}
