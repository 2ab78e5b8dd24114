//! Paper-trading adapters.
//!
//! A seeded random-walk quote source, a shared in-memory account, and an
//! order sink that always fills at the decision price. Lets the engine
//! run a full tick loop end to end with no venue credentials.

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use spikebot_core::traits::{BalanceSource, OrderSink, QuoteSource};
use spikebot_core::types::{Instrument, OrderFill, OrderIntent, Quote, Side};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::info;

// =============================================================================
// Quote source
// =============================================================================

struct Walk {
    rng: ChaCha8Rng,
    price: Decimal,
}

/// Seeded random walk per symbol. Steps are ±1% at most, quoted with a
/// 5 bps half-spread, so runs are reproducible for a given seed.
pub struct PaperQuoteSource {
    venue: String,
    base_price: Decimal,
    seed: u64,
    walks: Mutex<HashMap<String, Walk>>,
}

impl PaperQuoteSource {
    #[must_use]
    pub fn new(venue: impl Into<String>, base_price: Decimal, seed: u64) -> Self {
        Self {
            venue: venue.into(),
            base_price,
            seed,
            walks: Mutex::new(HashMap::new()),
        }
    }

    fn next_price(&self, symbol: &str) -> Decimal {
        let mut walks = self.walks.lock().unwrap();
        let walk = walks.entry(symbol.to_string()).or_insert_with(|| {
            let mut hash = self.seed;
            for byte in symbol.bytes() {
                hash = hash.wrapping_mul(31).wrapping_add(u64::from(byte));
            }
            Walk {
                rng: ChaCha8Rng::seed_from_u64(hash),
                price: self.base_price,
            }
        });
        let basis_points: i64 = walk.rng.gen_range(-100..=100);
        let next = walk.price * (Decimal::ONE + Decimal::new(basis_points, 4));
        if next > Decimal::ZERO {
            walk.price = next;
        }
        walk.price
    }
}

#[async_trait]
impl QuoteSource for PaperQuoteSource {
    async fn fetch_best_quote(&self, instrument: &Instrument) -> Result<Option<Quote>> {
        let mid = self.next_price(&instrument.symbol);
        let half_spread = mid * dec!(0.0005);
        Ok(Some(Quote {
            bid: mid - half_spread,
            bid_qty: dec!(100000),
            ask: mid + half_spread,
            ask_qty: dec!(100000),
            timestamp: Utc::now(),
        }))
    }

    fn venue(&self) -> &str {
        &self.venue
    }
}

// =============================================================================
// Account, balances, and order sink
// =============================================================================

/// Shared in-memory balance sheet. The balance source reads it and the
/// order sink settles fills against it.
#[derive(Debug, Clone)]
pub struct PaperAccount {
    balances: Arc<Mutex<HashMap<String, Decimal>>>,
}

impl PaperAccount {
    #[must_use]
    pub fn new(initial: &[(&str, Decimal)]) -> Self {
        Self {
            balances: Arc::new(Mutex::new(
                initial
                    .iter()
                    .map(|(asset, amount)| ((*asset).to_string(), *amount))
                    .collect(),
            )),
        }
    }

    #[must_use]
    pub fn balance(&self, asset: &str) -> Decimal {
        self.balances
            .lock()
            .unwrap()
            .get(asset)
            .copied()
            .unwrap_or_default()
    }

    fn settle(&self, base: &str, quote: &str, side: Side, quantity: Decimal, price: Decimal) {
        let mut balances = self.balances.lock().unwrap();
        let notional = quantity * price;
        match side {
            Side::Buy => {
                *balances.entry(quote.to_string()).or_default() -= notional;
                *balances.entry(base.to_string()).or_default() += quantity;
            }
            Side::Sell => {
                *balances.entry(base.to_string()).or_default() -= quantity;
                *balances.entry(quote.to_string()).or_default() += notional;
            }
        }
    }
}

pub struct PaperBalances {
    account: PaperAccount,
}

impl PaperBalances {
    #[must_use]
    pub fn new(account: &PaperAccount) -> Self {
        Self {
            account: account.clone(),
        }
    }
}

#[async_trait]
impl BalanceSource for PaperBalances {
    async fn balance(&self, asset: &str) -> Result<Decimal> {
        Ok(self.account.balance(asset))
    }
}

/// Fills every order at its decision price and settles the account.
pub struct PaperOrderSink {
    account: PaperAccount,
    quote_asset: String,
}

impl PaperOrderSink {
    #[must_use]
    pub fn new(account: &PaperAccount, quote_asset: impl Into<String>) -> Self {
        Self {
            account: account.clone(),
            quote_asset: quote_asset.into(),
        }
    }

    /// `GRASSUSDT` settles as base `GRASS` against quote `USDT`; symbols
    /// without the quote suffix settle as themselves.
    fn base_asset<'a>(&self, symbol: &'a str) -> &'a str {
        symbol.strip_suffix(self.quote_asset.as_str()).unwrap_or(symbol)
    }
}

#[async_trait]
impl OrderSink for PaperOrderSink {
    async fn submit(&self, intent: &OrderIntent) -> Result<OrderFill> {
        let base = self.base_asset(&intent.instrument.symbol);
        self.account.settle(
            base,
            &self.quote_asset,
            intent.side,
            intent.quantity,
            intent.price,
        );
        info!(
            instrument = %intent.instrument,
            side = %intent.side,
            quantity = %intent.quantity,
            price = %intent.price,
            reason = %intent.reason,
            "Paper fill"
        );
        Ok(OrderFill {
            instrument: intent.instrument.clone(),
            side: intent.side,
            quantity: intent.quantity,
            average_price: intent.price,
            timestamp: Utc::now(),
        })
    }
}
