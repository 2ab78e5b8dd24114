pub mod engine;
pub mod state;

pub use engine::{DecisionEngine, EngineError, TickReport};
pub use state::EngineState;
