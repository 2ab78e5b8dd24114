//! Durable state: held positions, price history, and entry thresholds.
//!
//! Three JSON files under one state directory, each written after every
//! state transition so a restart reconstructs the exact pre-crash state:
//!
//! - `positions.json`  — held positions with buy/highest prices
//! - `price_history.json` — per-instrument price lists, oldest first
//! - `thresholds.json` — momentum start/profit prices
//!
//! Loading tolerates missing or corrupt files by starting fresh with a
//! warning; a cold start is a valid low-information state, not an error.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use spikebot_core::position::{EntryThresholds, HeldPosition};
use spikebot_core::types::Instrument;
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::history::PriceHistoryStore;

/// Errors from state persistence operations.
#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

// =============================================================================
// Persisted shapes
// =============================================================================

/// One held position as written to disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedHold {
    pub instrument: Instrument,
    pub buy_price: Decimal,
    pub highest_price: Decimal,
    pub entered_at: DateTime<Utc>,
    /// Whether the trailing take-profit was already armed.
    pub armed: bool,
}

impl PersistedHold {
    #[must_use]
    pub fn from_position(position: &HeldPosition, armed: bool) -> Self {
        Self {
            instrument: position.instrument.clone(),
            buy_price: position.buy_price,
            highest_price: position.highest_price_seen,
            entered_at: position.entered_at,
            armed,
        }
    }

    #[must_use]
    pub fn into_position(self) -> (HeldPosition, bool) {
        (
            HeldPosition {
                instrument: self.instrument,
                buy_price: self.buy_price,
                highest_price_seen: self.highest_price,
                entered_at: self.entered_at,
            },
            self.armed,
        )
    }
}

/// The durable projection of the engine's position set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PersistedState {
    /// Held positions keyed by `symbol@venue`.
    pub held: HashMap<String, PersistedHold>,
    pub saved_at: Option<DateTime<Utc>>,
}

impl PersistedState {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.held.is_empty()
    }
}

/// Momentum-mode threshold pair. Zeros mean neutral.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PersistedThresholds {
    pub start_price: Decimal,
    pub profit_price: Decimal,
}

impl From<EntryThresholds> for PersistedThresholds {
    fn from(t: EntryThresholds) -> Self {
        Self {
            start_price: t.start_price,
            profit_price: t.profit_price,
        }
    }
}

impl From<PersistedThresholds> for EntryThresholds {
    fn from(t: PersistedThresholds) -> Self {
        Self::new(t.start_price, t.profit_price)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PersistedSeries {
    instrument: Instrument,
    prices: Vec<Decimal>,
}

// =============================================================================
// State Store
// =============================================================================

/// Single-writer file store for the engine's durable state.
#[derive(Debug, Clone)]
pub struct StateStore {
    dir: PathBuf,
}

impl StateStore {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn positions_path(&self) -> PathBuf {
        self.dir.join("positions.json")
    }

    fn history_path(&self) -> PathBuf {
        self.dir.join("price_history.json")
    }

    fn thresholds_path(&self) -> PathBuf {
        self.dir.join("thresholds.json")
    }

    // ==================== positions ====================

    /// Persists the held-position set.
    ///
    /// # Errors
    ///
    /// Returns an error when the file cannot be created or written; the
    /// caller treats this as fatal for the tick's state change.
    pub fn save_positions(&self, state: &PersistedState) -> Result<(), PersistenceError> {
        let stamped = PersistedState {
            held: state.held.clone(),
            saved_at: Some(Utc::now()),
        };
        self.write_json(&self.positions_path(), &stamped)?;
        debug!(
            path = %self.positions_path().display(),
            held = stamped.held.len(),
            "Saved positions"
        );
        Ok(())
    }

    /// Loads the held-position set, starting fresh on a missing or
    /// unreadable file.
    #[must_use]
    pub fn load_positions(&self) -> PersistedState {
        match self.read_json::<PersistedState>(&self.positions_path()) {
            Some(state) => {
                info!(held = state.held.len(), "Loaded persisted positions");
                state
            }
            None => PersistedState::default(),
        }
    }

    // ==================== price history ====================

    /// Persists every retained price series.
    ///
    /// # Errors
    ///
    /// Returns an error when the file cannot be created or written.
    pub fn save_history(&self, store: &PriceHistoryStore) -> Result<(), PersistenceError> {
        let map: HashMap<String, PersistedSeries> = store
            .instruments()
            .map(|instrument| {
                (
                    instrument.key(),
                    PersistedSeries {
                        instrument: instrument.clone(),
                        prices: store.prices(instrument),
                    },
                )
            })
            .collect();
        self.write_json(&self.history_path(), &map)
    }

    /// Restores price history into a fresh store with the given retention.
    #[must_use]
    pub fn load_history(&self, retention: usize) -> PriceHistoryStore {
        let mut store = PriceHistoryStore::new(retention);
        if let Some(map) = self.read_json::<HashMap<String, PersistedSeries>>(&self.history_path())
        {
            let as_of = Utc::now();
            for series in map.into_values() {
                store.restore(&series.instrument, series.prices, as_of);
            }
        }
        store
    }

    // ==================== thresholds ====================

    /// Persists the momentum threshold pair.
    ///
    /// # Errors
    ///
    /// Returns an error when the file cannot be created or written.
    pub fn save_thresholds(&self, thresholds: PersistedThresholds) -> Result<(), PersistenceError> {
        self.write_json(&self.thresholds_path(), &thresholds)
    }

    /// Loads thresholds, neutral when absent.
    #[must_use]
    pub fn load_thresholds(&self) -> PersistedThresholds {
        self.read_json(&self.thresholds_path()).unwrap_or_default()
    }

    /// Removes all persisted files. Used by tests and manual resets.
    ///
    /// # Errors
    ///
    /// Returns an error when an existing file cannot be removed.
    pub fn clear(&self) -> Result<(), PersistenceError> {
        for path in [
            self.positions_path(),
            self.history_path(),
            self.thresholds_path(),
        ] {
            if path.exists() {
                fs::remove_file(&path)?;
            }
        }
        Ok(())
    }

    // ==================== helpers ====================

    fn write_json<T: Serialize>(&self, path: &Path, value: &T) -> Result<(), PersistenceError> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }
        let file = File::create(path)?;
        let writer = BufWriter::new(file);
        serde_json::to_writer_pretty(writer, value)?;
        Ok(())
    }

    fn read_json<T: for<'de> Deserialize<'de>>(&self, path: &Path) -> Option<T> {
        if !path.exists() {
            info!(path = %path.display(), "No persisted file, starting fresh");
            return None;
        }
        let attempt = || -> Result<T, PersistenceError> {
            let file = File::open(path)?;
            let reader = BufReader::new(file);
            Ok(serde_json::from_reader(reader)?)
        };
        match attempt() {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to load persisted file, starting fresh");
                None
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::io::Write;
    use tempfile::TempDir;

    fn store() -> (TempDir, StateStore) {
        let dir = TempDir::new().unwrap();
        let store = StateStore::new(dir.path().join("state"));
        (dir, store)
    }

    fn hold(symbol: &str, armed: bool) -> PersistedHold {
        PersistedHold {
            instrument: Instrument::new(symbol, "bybit"),
            buy_price: dec!(10),
            highest_price: dec!(12),
            entered_at: Utc::now(),
            armed,
        }
    }

    // ==================== round trips ====================

    #[test]
    fn positions_round_trip() {
        let (_dir, store) = store();
        let mut state = PersistedState::default();
        state
            .held
            .insert("GRASSUSDT@bybit".to_string(), hold("GRASSUSDT", true));

        store.save_positions(&state).unwrap();
        let loaded = store.load_positions();

        assert_eq!(loaded.held.len(), 1);
        let entry = &loaded.held["GRASSUSDT@bybit"];
        assert_eq!(entry.buy_price, dec!(10));
        assert_eq!(entry.highest_price, dec!(12));
        assert!(entry.armed);
        assert!(loaded.saved_at.is_some());
    }

    #[test]
    fn hold_converts_to_position_and_back() {
        let original = hold("GRASSUSDT", false);
        let (position, armed) = original.clone().into_position();
        assert_eq!(position.buy_price, dec!(10));
        assert_eq!(position.highest_price_seen, dec!(12));
        assert!(!armed);

        let back = PersistedHold::from_position(&position, armed);
        assert_eq!(back, original);
    }

    #[test]
    fn thresholds_round_trip() {
        let (_dir, store) = store();
        let thresholds = PersistedThresholds {
            start_price: dec!(9.7),
            profit_price: dec!(10.27),
        };
        store.save_thresholds(thresholds).unwrap();
        assert_eq!(store.load_thresholds(), thresholds);
    }

    #[test]
    fn history_round_trip_preserves_order() {
        let (_dir, store) = store();
        let inst = Instrument::new("LUNAUSDT", "binance");
        let mut history = PriceHistoryStore::new(100);
        for price in [dec!(1.0), dec!(1.1), dec!(1.2)] {
            history.append(&inst, price, Utc::now());
        }

        store.save_history(&history).unwrap();
        let loaded = store.load_history(100);
        assert_eq!(loaded.prices(&inst), vec![dec!(1.0), dec!(1.1), dec!(1.2)]);
    }

    // ==================== cold start ====================

    #[test]
    fn missing_files_start_fresh() {
        let (_dir, store) = store();
        assert!(store.load_positions().is_empty());
        assert_eq!(store.load_thresholds(), PersistedThresholds::default());
        let history = store.load_history(50);
        assert!(history.is_empty(&Instrument::new("X", "v")));
    }

    #[test]
    fn corrupt_positions_file_starts_fresh() {
        let (_dir, store) = store();
        fs::create_dir_all(store.dir()).unwrap();
        let mut file = File::create(store.dir().join("positions.json")).unwrap();
        file.write_all(b"not valid json {{{").unwrap();

        assert!(store.load_positions().is_empty());
    }

    #[test]
    fn wrong_structure_starts_fresh() {
        let (_dir, store) = store();
        fs::create_dir_all(store.dir()).unwrap();
        let mut file = File::create(store.dir().join("thresholds.json")).unwrap();
        file.write_all(b"{\"foo\": \"bar\"}").unwrap();

        assert_eq!(store.load_thresholds(), PersistedThresholds::default());
    }

    // ==================== clear / dirs ====================

    #[test]
    fn save_creates_state_dir() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("a").join("b");
        let store = StateStore::new(&nested);
        store.save_positions(&PersistedState::default()).unwrap();
        assert!(nested.join("positions.json").exists());
    }

    #[test]
    fn clear_removes_files() {
        let (_dir, store) = store();
        store.save_positions(&PersistedState::default()).unwrap();
        store
            .save_thresholds(PersistedThresholds::default())
            .unwrap();
        store.clear().unwrap();
        assert!(!store.dir().join("positions.json").exists());
        assert!(!store.dir().join("thresholds.json").exists());
    }
}
