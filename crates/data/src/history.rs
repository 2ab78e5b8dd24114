//! Rolling per-instrument price history.
//!
//! Append-only within a window: new observations push out the oldest once
//! the retention limit is reached. Detection quality depends on the
//! retained window covering the longest look-back distance in use; a
//! shorter history simply yields fewer events, never an error.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use spikebot_core::types::{Instrument, PriceObservation};
use std::collections::{HashMap, VecDeque};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct PriceHistoryStore {
    retention: usize,
    series: HashMap<Instrument, VecDeque<PriceObservation>>,
}

impl PriceHistoryStore {
    /// Creates a store keeping at most `retention` observations per
    /// instrument.
    #[must_use]
    pub fn new(retention: usize) -> Self {
        Self {
            retention: retention.max(1),
            series: HashMap::new(),
        }
    }

    #[must_use]
    pub fn retention(&self) -> usize {
        self.retention
    }

    /// Appends one observation, evicting the oldest entry on overflow.
    pub fn append(&mut self, instrument: &Instrument, price: Decimal, timestamp: DateTime<Utc>) {
        let series = self.series.entry(instrument.clone()).or_default();
        series.push_back(PriceObservation::new(price, timestamp));
        while series.len() > self.retention {
            series.pop_front();
        }
    }

    /// The last `count` observations, oldest first. Returns fewer when the
    /// history is still young; never an error.
    #[must_use]
    pub fn window(&self, instrument: &Instrument, count: usize) -> Vec<PriceObservation> {
        self.series.get(instrument).map_or_else(Vec::new, |series| {
            let skip = series.len().saturating_sub(count);
            series.iter().skip(skip).copied().collect()
        })
    }

    /// All retained prices for an instrument, oldest first.
    #[must_use]
    pub fn prices(&self, instrument: &Instrument) -> Vec<Decimal> {
        self.series.get(instrument).map_or_else(Vec::new, |series| {
            series.iter().map(|obs| obs.price).collect()
        })
    }

    #[must_use]
    pub fn latest(&self, instrument: &Instrument) -> Option<PriceObservation> {
        self.series.get(instrument).and_then(|s| s.back().copied())
    }

    #[must_use]
    pub fn len(&self, instrument: &Instrument) -> usize {
        self.series.get(instrument).map_or(0, VecDeque::len)
    }

    #[must_use]
    pub fn is_empty(&self, instrument: &Instrument) -> bool {
        self.len(instrument) == 0
    }

    /// Drops all but the newest `count` observations. Used after an exit so
    /// the pre-trade run-up cannot immediately re-trigger an entry.
    pub fn truncate_to(&mut self, instrument: &Instrument, count: usize) {
        if let Some(series) = self.series.get_mut(instrument) {
            while series.len() > count {
                series.pop_front();
            }
            debug!(instrument = %instrument, kept = series.len(), "Truncated price history");
        }
    }

    pub fn instruments(&self) -> impl Iterator<Item = &Instrument> {
        self.series.keys()
    }

    /// Replaces the series for an instrument, trimming to retention.
    /// Timestamps are synthesized for restored bare price lists.
    pub fn restore(&mut self, instrument: &Instrument, prices: Vec<Decimal>, as_of: DateTime<Utc>) {
        let skip = prices.len().saturating_sub(self.retention);
        let series = prices
            .into_iter()
            .skip(skip)
            .map(|price| PriceObservation::new(price, as_of))
            .collect();
        self.series.insert(instrument.clone(), series);
    }
}
