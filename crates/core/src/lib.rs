pub mod config;
pub mod config_loader;
pub mod position;
pub mod traits;
pub mod types;

pub use config::{
    AppConfig, ArbitrageSettings, EngineSettings, FluctuationBand, MomentumSettings,
    PersistenceSettings, ScanSettings, SpikeBasis, SpikeSettings, TradingMode,
};
pub use config_loader::ConfigLoader;
pub use position::{
    EntryThresholds, HeldPosition, PositionBook, PositionPolicy, PositionState,
    PositionStateMachine, TickContext, Transition,
};
pub use traits::{BalanceSource, OrderSink, QuoteSource};
pub use types::{Instrument, OrderFill, OrderIntent, PriceObservation, Quote, Side, TradeReason};
