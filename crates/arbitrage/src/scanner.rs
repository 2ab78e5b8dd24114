//! Cross-venue arbitrage scanning over best bid/ask snapshots.
//!
//! Given the top-of-book quote for one instrument on several venues, the
//! scanner walks every ordered venue pair and keeps the pairs whose
//! buy-low/sell-high spread survives trading fees, withdrawal fees, and a
//! best-level liquidity check. Deeper book levels are out of scope.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use spikebot_core::config::ArbitrageSettings;
use std::collections::HashMap;
use thiserror::Error;
use tracing::{debug, info, trace};

// =============================================================================
// Inputs
// =============================================================================

/// One venue's view of the instrument this tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VenueQuote {
    pub bid: Decimal,
    /// Quantity available at the best bid.
    pub bid_qty: Decimal,
    pub ask: Decimal,
    /// Quantity available at the best ask.
    pub ask_qty: Decimal,
    /// Taker fee applied to both legs on this venue.
    pub fee_rate: Decimal,
    /// Withdrawal fee in base units when this is the buy venue.
    pub base_withdraw_fee: Decimal,
    /// Withdrawal fee in quote units when this is the sell venue.
    pub quote_withdraw_fee: Decimal,
}

impl VenueQuote {
    /// Quote with the flat-fee model: trading fee only, no withdrawals.
    #[must_use]
    pub fn flat_fee(
        bid: Decimal,
        bid_qty: Decimal,
        ask: Decimal,
        ask_qty: Decimal,
        fee_rate: Decimal,
    ) -> Self {
        Self {
            bid,
            bid_qty,
            ask,
            ask_qty,
            fee_rate,
            base_withdraw_fee: Decimal::ZERO,
            quote_withdraw_fee: Decimal::ZERO,
        }
    }
}

// =============================================================================
// Outputs
// =============================================================================

/// A profitable buy-low/sell-high pair, fields rounded for reporting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArbitrageOpportunity {
    pub buy_venue: String,
    pub sell_venue: String,
    pub buy_price: Decimal,
    pub sell_price: Decimal,
    /// Base quantity the trade size buys at the ask.
    pub quantity: Decimal,
    /// Fee-adjusted profit in quote units.
    pub net_profit: Decimal,
    pub detected_at: DateTime<Utc>,
}

/// Why a venue pair was skipped. Normal outcomes, not errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SkipReason {
    #[error("missing or zero price on one side")]
    MissingPrice,
    #[error("required quantity exceeds best-level liquidity")]
    InsufficientLiquidity,
    #[error("net profit below threshold")]
    BelowMinProfit,
}

/// Per-tick scan counters for monitoring.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ScanSummary {
    pub pairs_checked: usize,
    pub skipped_missing_price: usize,
    pub skipped_liquidity: usize,
    pub below_min_profit: usize,
    pub opportunities: usize,
}

// =============================================================================
// Scanner
// =============================================================================

/// Pure function of its inputs: no shared state is touched, so scans for
/// independent instruments can run concurrently.
#[derive(Debug, Clone)]
pub struct ArbitrageScanner {
    settings: ArbitrageSettings,
}

impl ArbitrageScanner {
    #[must_use]
    pub fn new(settings: ArbitrageSettings) -> Self {
        Self { settings }
    }

    #[must_use]
    pub fn settings(&self) -> &ArbitrageSettings {
        &self.settings
    }

    /// Scans every ordered venue pair and returns the profitable ones.
    #[must_use]
    pub fn scan(&self, quotes: &HashMap<String, VenueQuote>) -> Vec<ArbitrageOpportunity> {
        self.scan_with_summary(quotes).0
    }

    /// Like [`Self::scan`], also reporting skip counters.
    #[must_use]
    pub fn scan_with_summary(
        &self,
        quotes: &HashMap<String, VenueQuote>,
    ) -> (Vec<ArbitrageOpportunity>, ScanSummary) {
        let mut venues: Vec<&String> = quotes.keys().collect();
        venues.sort();

        let mut opportunities = Vec::new();
        let mut summary = ScanSummary::default();

        for buy_venue in &venues {
            for sell_venue in &venues {
                if buy_venue == sell_venue {
                    continue;
                }
                summary.pairs_checked += 1;
                match self.evaluate_pair(
                    buy_venue,
                    &quotes[*buy_venue],
                    sell_venue,
                    &quotes[*sell_venue],
                ) {
                    Ok(opportunity) => {
                        info!(
                            buy_venue = %opportunity.buy_venue,
                            sell_venue = %opportunity.sell_venue,
                            buy_price = %opportunity.buy_price,
                            sell_price = %opportunity.sell_price,
                            quantity = %opportunity.quantity,
                            net_profit = %opportunity.net_profit,
                            "Arbitrage opportunity"
                        );
                        summary.opportunities += 1;
                        opportunities.push(opportunity);
                    }
                    Err(SkipReason::MissingPrice) => summary.skipped_missing_price += 1,
                    Err(SkipReason::InsufficientLiquidity) => summary.skipped_liquidity += 1,
                    Err(SkipReason::BelowMinProfit) => summary.below_min_profit += 1,
                }
            }
        }

        debug!(
            pairs = summary.pairs_checked,
            opportunities = summary.opportunities,
            "Arbitrage scan complete"
        );
        (opportunities, summary)
    }

    /// Evaluates one ordered pair. All arithmetic stays unrounded; the
    /// emitted record is rounded to the configured reporting precision.
    fn evaluate_pair(
        &self,
        buy_venue: &str,
        buy: &VenueQuote,
        sell_venue: &str,
        sell: &VenueQuote,
    ) -> Result<ArbitrageOpportunity, SkipReason> {
        if buy.ask <= Decimal::ZERO || sell.bid <= Decimal::ZERO {
            return Err(SkipReason::MissingPrice);
        }

        let quantity = self.settings.trade_size / buy.ask;
        if quantity > buy.ask_qty || quantity > sell.bid_qty {
            trace!(
                buy_venue,
                sell_venue,
                required = %quantity,
                ask_qty = %buy.ask_qty,
                bid_qty = %sell.bid_qty,
                "Skipping pair, not enough best-level liquidity"
            );
            return Err(SkipReason::InsufficientLiquidity);
        }

        let base_withdraw_in_quote = buy.base_withdraw_fee * sell.bid;
        let cost = self.settings.trade_size * (Decimal::ONE + buy.fee_rate) + base_withdraw_in_quote;
        let revenue = sell.bid * quantity * (Decimal::ONE - sell.fee_rate) - sell.quote_withdraw_fee;
        let net_profit = revenue - cost;

        if net_profit < self.settings.min_profit {
            return Err(SkipReason::BelowMinProfit);
        }

        let dp = self.settings.report_decimals;
        Ok(ArbitrageOpportunity {
            buy_venue: buy_venue.to_string(),
            sell_venue: sell_venue.to_string(),
            buy_price: buy.ask.round_dp(dp),
            sell_price: sell.bid.round_dp(dp),
            quantity: quantity.round_dp(dp),
            net_profit: net_profit.round_dp(dp),
            detected_at: Utc::now(),
        })
    }
}

// =============================================================================
// Tests
// =============================================================================
