//! Shared market and order types used across the workspace.
//!
//! Every record that crossed the wire as an untyped blob in earlier
//! iterations of this system gets an explicit struct here.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

// =============================================================================
// Instrument
// =============================================================================

/// A tradeable instrument: a symbol plus the venue it trades on.
///
/// Immutable once created; used as the key for price history and positions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Instrument {
    /// Symbol or token address, e.g. `GRASSUSDT`.
    pub symbol: String,
    /// Venue identifier, e.g. `bybit`.
    pub venue: String,
}

impl Instrument {
    #[must_use]
    pub fn new(symbol: impl Into<String>, venue: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            venue: venue.into(),
        }
    }

    /// Stable string key used in persisted maps and log fields.
    #[must_use]
    pub fn key(&self) -> String {
        format!("{}@{}", self.symbol, self.venue)
    }
}

impl std::fmt::Display for Instrument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.symbol, self.venue)
    }
}

// =============================================================================
// Order Side
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    #[must_use]
    pub fn opposite(self) -> Self {
        match self {
            Self::Buy => Self::Sell,
            Self::Sell => Self::Buy,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Buy => "buy",
            Self::Sell => "sell",
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// Market Data
// =============================================================================

/// Best bid/ask snapshot from one venue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quote {
    pub bid: Decimal,
    pub bid_qty: Decimal,
    pub ask: Decimal,
    pub ask_qty: Decimal,
    pub timestamp: DateTime<Utc>,
}

impl Quote {
    /// Midpoint of bid and ask.
    #[must_use]
    pub fn mid(&self) -> Decimal {
        (self.bid + self.ask) / Decimal::TWO
    }
}

/// A single appended price point. Appended, never mutated.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceObservation {
    pub price: Decimal,
    pub timestamp: DateTime<Utc>,
}

impl PriceObservation {
    #[must_use]
    pub const fn new(price: Decimal, timestamp: DateTime<Utc>) -> Self {
        Self { price, timestamp }
    }
}

// =============================================================================
// Orders
// =============================================================================

/// Why an order was emitted. Carried through to the trade log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeReason {
    /// Entry on a spike/recovery or arbitrage buy leg.
    Entry,
    /// Price fell below the stop threshold while held.
    StopLoss,
    /// Trailing take-profit fired after the post-arming peak retraced.
    TakeProfit,
}

impl TradeReason {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Entry => "Entry",
            Self::StopLoss => "Stop Loss",
            Self::TakeProfit => "Take Profit",
        }
    }
}

impl std::fmt::Display for TradeReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An order the engine intends to submit this tick.
///
/// At most one of these exists per instrument per tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderIntent {
    pub instrument: Instrument,
    pub side: Side,
    pub quantity: Decimal,
    /// Reference price at decision time; the sink fills at market.
    pub price: Decimal,
    pub reason: TradeReason,
    pub timestamp: DateTime<Utc>,
}

/// Acknowledged execution of an [`OrderIntent`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderFill {
    pub instrument: Instrument,
    pub side: Side,
    pub quantity: Decimal,
    pub average_price: Decimal,
    pub timestamp: DateTime<Utc>,
}
