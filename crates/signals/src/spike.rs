//! Multi-look-back spike detection.
//!
//! Market speed is unpredictable, so a single fixed window either misses
//! fast micro-spikes or drowns slow drifts. The detector scans every
//! look-back distance in a strided set in one pass over the history, so a
//! two-tick jolt and a multi-hour slide both register.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use spikebot_core::config::{FluctuationBand, SpikeBasis, SpikeSettings};
use spikebot_core::position::EntryThresholds;
use std::collections::BTreeMap;
use tracing::debug;

// =============================================================================
// Events
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpikeDirection {
    Up,
    Down,
    /// An up move that regained at least the recovery threshold after the
    /// last down move at the same look-back distance.
    Recovery,
}

/// A qualifying move at one index and look-back distance.
///
/// Derived, not persisted; consumed within the tick that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpikeEvent {
    /// Index into the scanned price sequence.
    pub index: usize,
    pub look_back: usize,
    pub direction: SpikeDirection,
    /// Signed change for up/down, regained amount for recovery.
    pub magnitude: Decimal,
}

/// Reduces an event list to the freshest event per look-back distance,
/// ordered by distance.
#[must_use]
pub fn last_per_look_back(events: &[SpikeEvent]) -> Vec<SpikeEvent> {
    let mut last: BTreeMap<usize, SpikeEvent> = BTreeMap::new();
    for event in events {
        last.insert(event.look_back, *event);
    }
    last.into_values().collect()
}

// =============================================================================
// Detector
// =============================================================================

#[derive(Debug, Clone)]
pub struct SpikeDetector {
    settings: SpikeSettings,
}

impl SpikeDetector {
    #[must_use]
    pub fn new(settings: SpikeSettings) -> Self {
        Self { settings }
    }

    #[must_use]
    pub fn settings(&self) -> &SpikeSettings {
        &self.settings
    }

    /// Look-back distances scanned: `1, 1 + stride, 1 + 2*stride, ...` up
    /// to the configured maximum.
    #[must_use]
    pub fn look_back_distances(&self) -> Vec<usize> {
        (1..=self.settings.max_look_back)
            .step_by(self.settings.stride.max(1))
            .collect()
    }

    /// Scans `prices` (oldest first) and returns every qualifying event in
    /// scan order. Pure function of its input: identical input yields an
    /// identical event list.
    ///
    /// Distances longer than the available history contribute no events;
    /// a history shorter than the smallest distance yields an empty list.
    #[must_use]
    pub fn detect(&self, prices: &[Decimal]) -> Vec<SpikeEvent> {
        let distances: Vec<usize> = self
            .look_back_distances()
            .into_iter()
            .filter(|d| *d < prices.len())
            .collect();
        let Some(&max_distance) = distances.iter().max() else {
            return Vec::new();
        };

        let mut events = Vec::new();
        let mut last_down_price: BTreeMap<usize, Decimal> = BTreeMap::new();

        for idx in max_distance..prices.len() {
            for &distance in &distances {
                let current = prices[idx];
                let change = self.change(current, prices[idx - distance]);
                let magnitude = change.abs();
                if magnitude < self.settings.min_spike || magnitude > self.settings.max_spike {
                    continue;
                }

                let direction = if change > Decimal::ZERO {
                    SpikeDirection::Up
                } else {
                    SpikeDirection::Down
                };
                events.push(SpikeEvent {
                    index: idx,
                    look_back: distance,
                    direction,
                    magnitude: change,
                });

                match direction {
                    SpikeDirection::Down => {
                        last_down_price.insert(distance, current);
                    }
                    SpikeDirection::Up => {
                        if let Some(&down_price) = last_down_price.get(&distance) {
                            let regained = self.change(current, down_price);
                            if regained >= self.settings.recovery_threshold {
                                events.push(SpikeEvent {
                                    index: idx,
                                    look_back: distance,
                                    direction: SpikeDirection::Recovery,
                                    magnitude: regained,
                                });
                            }
                        }
                    }
                    SpikeDirection::Recovery => unreachable!(),
                }
            }
        }

        debug!(
            scanned = prices.len(),
            distances = distances.len(),
            events = events.len(),
            "Spike scan complete"
        );
        events
    }

    fn change(&self, current: Decimal, past: Decimal) -> Decimal {
        match self.settings.basis {
            SpikeBasis::Absolute => current - past,
            SpikeBasis::Ratio => {
                if past.is_zero() {
                    Decimal::ZERO
                } else {
                    (current - past) / past
                }
            }
        }
    }
}

// =============================================================================
// Entry Plan
// =============================================================================

/// Entry parameters derived from a detected recovery: thresholds for the
/// state machine plus the trailing giveback matched to how hard the price
/// fell before recovering.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EntryPlan {
    pub thresholds: EntryThresholds,
    pub trailing_giveback: Decimal,
}

impl EntryPlan {
    /// Builds a plan when the event list contains a recovery and the most
    /// recent down-spike magnitude falls into a configured band.
    ///
    /// `price` is the current price; the band picks the profit multiplier
    /// and giveback, the discount sets the start threshold below price.
    #[must_use]
    pub fn from_events(
        events: &[SpikeEvent],
        price: Decimal,
        entry_discount: Decimal,
        bands: &[FluctuationBand],
    ) -> Option<Self> {
        if !events
            .iter()
            .any(|e| e.direction == SpikeDirection::Recovery)
        {
            return None;
        }
        let fluctuation = events
            .iter()
            .rev()
            .find(|e| e.direction == SpikeDirection::Down)
            .map(|e| e.magnitude.abs())?;

        let band = bands
            .iter()
            .find(|b| fluctuation >= b.min_magnitude && fluctuation <= b.max_magnitude)?;

        let plan = Self {
            thresholds: EntryThresholds::new(
                price * (Decimal::ONE - entry_discount),
                price * band.profit_multiplier,
            ),
            trailing_giveback: band.trailing_giveback,
        };
        debug!(
            %fluctuation,
            start_price = %plan.thresholds.start_price,
            profit_price = %plan.thresholds.profit_price,
            giveback = %plan.trailing_giveback,
            "Recovery matched fluctuation band"
        );
        Some(plan)
    }
}

// =============================================================================
// Tests
// =============================================================================
