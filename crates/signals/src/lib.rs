pub mod momentum;
pub mod spike;

pub use momentum::rise_from_low;
pub use spike::{last_per_look_back, EntryPlan, SpikeDetector, SpikeDirection, SpikeEvent};
