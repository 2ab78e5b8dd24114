pub mod scanner;

pub use scanner::{
    ArbitrageOpportunity, ArbitrageScanner, ScanSummary, SkipReason, VenueQuote,
};
