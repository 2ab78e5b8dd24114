//! The engine's owned, explicit state: price history plus the position
//! book. Loaded once at startup, saved at tick boundaries; nothing lives
//! in module-level globals.

use spikebot_core::position::{EntryThresholds, PositionBook, PositionPolicy, PositionState};
use spikebot_core::types::Instrument;
use spikebot_data::history::PriceHistoryStore;
use spikebot_data::persistence::{PersistedHold, PersistedState, PersistenceError, StateStore};
use tracing::info;

#[derive(Debug)]
pub struct EngineState {
    pub history: PriceHistoryStore,
    pub book: PositionBook,
}

impl EngineState {
    /// Reconstructs pre-crash state from the store, or starts cold.
    ///
    /// `threshold_instrument` names the momentum instrument whose
    /// start/profit thresholds are kept in their own file.
    #[must_use]
    pub fn load(
        store: &StateStore,
        retention: usize,
        policy: PositionPolicy,
        threshold_instrument: Option<&Instrument>,
    ) -> Self {
        let history = store.load_history(retention);
        let mut book = PositionBook::new(policy);

        let thresholds: EntryThresholds = threshold_instrument
            .map(|_| store.load_thresholds().into())
            .unwrap_or_default();

        let persisted = store.load_positions();
        for hold in persisted.held.into_values() {
            let (position, armed) = hold.into_position();
            let instrument = position.instrument.clone();
            let restored = if Some(&instrument) == threshold_instrument {
                thresholds
            } else {
                EntryThresholds::neutral()
            };
            book.machine(&instrument).restore(position, armed, restored);
        }

        if let Some(instrument) = threshold_instrument {
            let machine = book.machine(instrument);
            if machine.position().is_none() {
                machine.set_thresholds(thresholds);
            }
        }

        let held = book.held().count();
        if held > 0 {
            info!(held, "Restored held positions");
        }
        Self { history, book }
    }

    /// Persists positions and history. Threshold persistence is separate
    /// because only momentum mode carries thresholds.
    ///
    /// # Errors
    ///
    /// Propagates persistence failures; the caller must not continue the
    /// tick as if the transition were durable.
    pub fn save(&self, store: &StateStore) -> Result<(), PersistenceError> {
        let mut persisted = PersistedState::default();
        for machine in self.book.held() {
            if let Some(position) = machine.position() {
                let armed = machine.state() == PositionState::Armed;
                persisted.held.insert(
                    position.instrument.key(),
                    PersistedHold::from_position(position, armed),
                );
            }
        }
        store.save_positions(&persisted)?;
        store.save_history(&self.history)?;
        Ok(())
    }
}
