pub mod history;
pub mod persistence;
pub mod trade_log;

pub use history::PriceHistoryStore;
pub use persistence::{
    PersistedHold, PersistedState, PersistedThresholds, PersistenceError, StateStore,
};
pub use trade_log::{OpportunityLog, OpportunityRecord, TradeLog, TradeRecord, TradeSummary};
