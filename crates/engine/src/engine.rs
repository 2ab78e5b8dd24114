//! The decision engine: one polling tick at a time.
//!
//! A tick refreshes quotes, appends history, runs the configured
//! detector, drives each instrument's state machine, submits at most one
//! order per instrument, and persists state before the next tick may
//! start. Ticks are strictly sequential; per-venue fetches inside a tick
//! fan out to their own tasks with a bounded timeout, and a venue that
//! misses the budget is simply absent this tick.

use chrono::Utc;
use rust_decimal::{Decimal, RoundingStrategy};
use spikebot_arbitrage::scanner::{ArbitrageScanner, VenueQuote};
use spikebot_core::config::{AppConfig, TradingMode};
use spikebot_core::position::{PositionPolicy, PositionState, TickContext};
use spikebot_core::traits::{BalanceSource, OrderSink, QuoteSource};
use spikebot_core::types::{Instrument, OrderFill, Quote, Side};
use spikebot_data::persistence::{PersistenceError, StateStore};
use spikebot_data::trade_log::{OpportunityLog, OpportunityRecord, TradeLog, TradeRecord};
use spikebot_signals::momentum::rise_from_low;
use spikebot_signals::spike::{EntryPlan, SpikeDetector};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::state::EngineState;

// =============================================================================
// Errors & reports
// =============================================================================

#[derive(Error, Debug)]
pub enum EngineError {
    /// Durable state could not be written; the tick must not be treated
    /// as committed.
    #[error("state persistence failed: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("no quote source registered for venue '{0}'")]
    MissingVenueSource(String),
}

/// What one tick did, mostly for logging and tests.
#[derive(Debug, Default)]
pub struct TickReport {
    pub orders_submitted: usize,
    pub orders_rejected: usize,
    pub opportunities: usize,
    pub fills: Vec<OrderFill>,
}

#[derive(Debug, Default)]
struct DriveOutcome {
    submitted: bool,
    rejected: bool,
    sold: bool,
    fill: Option<OrderFill>,
}

impl TickReport {
    fn absorb(&mut self, outcome: DriveOutcome) {
        if outcome.submitted {
            self.orders_submitted += 1;
        }
        if outcome.rejected {
            self.orders_rejected += 1;
        }
        if let Some(fill) = outcome.fill {
            self.fills.push(fill);
        }
    }
}

// =============================================================================
// Engine
// =============================================================================

pub struct DecisionEngine<B, O>
where
    B: BalanceSource,
    O: OrderSink,
{
    config: AppConfig,
    quote_sources: Vec<Arc<dyn QuoteSource>>,
    balances: B,
    orders: O,
    store: StateStore,
    trade_log: TradeLog,
    opportunity_log: OpportunityLog,
    detector: SpikeDetector,
    scanner: ArbitrageScanner,
    state: EngineState,
}

impl<B, O> DecisionEngine<B, O>
where
    B: BalanceSource,
    O: OrderSink,
{
    /// Validates the configuration, loads persisted state, and wires the
    /// collaborators. Configuration problems are fatal here, before the
    /// tick loop ever starts.
    pub fn new(
        config: AppConfig,
        quote_sources: Vec<Arc<dyn QuoteSource>>,
        balances: B,
        orders: O,
    ) -> Result<Self, EngineError> {
        Self::validate(&config, &quote_sources)?;

        let store = StateStore::new(&config.persistence.state_dir);
        let policy = Self::policy_for(&config);
        let threshold_instrument = (config.engine.mode == TradingMode::Momentum).then(|| {
            Instrument::new(config.momentum.symbol.clone(), config.momentum.venue.clone())
        });
        let state = EngineState::load(
            &store,
            Self::retention_for(&config),
            policy,
            threshold_instrument.as_ref(),
        );

        Ok(Self {
            trade_log: TradeLog::new(&config.persistence.trade_log),
            opportunity_log: OpportunityLog::new(&config.persistence.opportunity_log),
            detector: SpikeDetector::new(config.spike.clone()),
            scanner: ArbitrageScanner::new(config.arbitrage.clone()),
            store,
            state,
            config,
            quote_sources,
            balances,
            orders,
        })
    }

    fn validate(
        config: &AppConfig,
        sources: &[Arc<dyn QuoteSource>],
    ) -> Result<(), EngineError> {
        if config.engine.tick_interval_secs == 0 {
            return Err(EngineError::InvalidConfig(
                "engine.tick_interval_secs must be positive".to_string(),
            ));
        }
        let has_source =
            |venue: &str| sources.iter().any(|s| s.venue() == venue);
        match config.engine.mode {
            TradingMode::Momentum => {
                if !has_source(&config.momentum.venue) {
                    return Err(EngineError::MissingVenueSource(
                        config.momentum.venue.clone(),
                    ));
                }
            }
            TradingMode::Arbitrage => {
                if config.arbitrage.venues.len() < 2 {
                    return Err(EngineError::InvalidConfig(
                        "arbitrage.venues needs at least two venues".to_string(),
                    ));
                }
                for venue in &config.arbitrage.venues {
                    if !has_source(venue) {
                        return Err(EngineError::MissingVenueSource(venue.clone()));
                    }
                }
            }
            TradingMode::Scan => {
                if config.scan.symbols.is_empty() {
                    return Err(EngineError::InvalidConfig(
                        "scan.symbols is empty".to_string(),
                    ));
                }
                if !has_source(&config.scan.venue) {
                    return Err(EngineError::MissingVenueSource(config.scan.venue.clone()));
                }
            }
        }
        Ok(())
    }

    fn policy_for(config: &AppConfig) -> PositionPolicy {
        match config.engine.mode {
            TradingMode::Momentum => PositionPolicy {
                stop_loss_pct: None,
                take_profit_pct: None,
                trailing_giveback_pct: config
                    .momentum
                    .bands
                    .first()
                    .map_or(Decimal::new(1, 2), |band| band.trailing_giveback),
            },
            TradingMode::Arbitrage => PositionPolicy {
                stop_loss_pct: Some(config.arbitrage.stop_loss_pct),
                take_profit_pct: Some(config.arbitrage.take_profit_pct),
                trailing_giveback_pct: config.arbitrage.trailing_giveback_pct,
            },
            TradingMode::Scan => PositionPolicy {
                stop_loss_pct: Some(config.scan.stop_loss_pct),
                take_profit_pct: Some(config.scan.take_profit_pct),
                trailing_giveback_pct: config.scan.trailing_giveback_pct,
            },
        }
    }

    fn retention_for(config: &AppConfig) -> usize {
        match config.engine.mode {
            TradingMode::Momentum | TradingMode::Arbitrage => config.momentum.retention,
            TradingMode::Scan => config.scan.retention,
        }
    }

    #[must_use]
    pub fn state(&self) -> &EngineState {
        &self.state
    }

    /// Runs ticks forever at the configured cadence. Only persistence
    /// failures escape; everything transient is absorbed per tick.
    pub async fn run(&mut self) -> Result<(), EngineError> {
        let period = Duration::from_secs(self.config.engine.tick_interval_secs);
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            mode = ?self.config.engine.mode,
            tick_interval_secs = self.config.engine.tick_interval_secs,
            "Engine started"
        );
        loop {
            interval.tick().await;
            let report = self.tick().await?;
            debug!(
                orders = report.orders_submitted,
                rejected = report.orders_rejected,
                opportunities = report.opportunities,
                "Tick complete"
            );
        }
    }

    /// One full pass. Ticks never overlap: the caller awaits completion
    /// (including persistence) before scheduling the next.
    pub async fn tick(&mut self) -> Result<TickReport, EngineError> {
        match self.config.engine.mode {
            TradingMode::Momentum => self.momentum_tick().await,
            TradingMode::Arbitrage => self.arbitrage_tick().await,
            TradingMode::Scan => self.scan_tick().await,
        }
    }

    // ==================== momentum ====================

    async fn momentum_tick(&mut self) -> Result<TickReport, EngineError> {
        let cfg = self.config.momentum.clone();
        let instrument = Instrument::new(cfg.symbol.clone(), cfg.venue.clone());
        let now = Utc::now();
        let mut report = TickReport::default();

        let Some(quote) = self.fetch_single(&instrument).await else {
            return Ok(report);
        };
        let price = quote.ask;
        self.state.history.append(&instrument, price, now);

        if self.state.history.len(&instrument) < cfg.min_history {
            self.state.save(&self.store)?;
            return Ok(report);
        }

        // While flat with neutral thresholds, look for a recovery that
        // arms new entry thresholds.
        let needs_plan = {
            let machine = self.state.book.machine(&instrument);
            machine.state() == PositionState::Flat && !machine.thresholds().is_set()
        };
        if needs_plan {
            let prices = self.state.history.prices(&instrument);
            let events = self.detector.detect(&prices);
            if let Some(plan) =
                EntryPlan::from_events(&events, price, cfg.entry_discount, &cfg.bands)
            {
                let machine = self.state.book.machine(&instrument);
                machine.set_thresholds(plan.thresholds);
                machine.set_trailing_giveback(plan.trailing_giveback);
            }
        }

        let base_balance = self.balance_or_zero(&cfg.base_asset).await;
        let quote_balance = self.balance_or_zero(&cfg.quote_asset).await;
        let ctx = TickContext {
            price,
            buy_quantity: self.quantize(Self::safe_div(quote_balance, price)),
            sell_quantity: self.quantize(base_balance),
            entry_signal: false,
            timestamp: now,
        };

        let outcome = self.drive_machine(&instrument, &ctx).await;
        if outcome.sold {
            self.state
                .history
                .truncate_to(&instrument, cfg.keep_after_exit);
        }
        report.absorb(outcome);

        let thresholds = self.state.book.machine(&instrument).thresholds();
        self.store.save_thresholds(thresholds.into())?;
        self.state.save(&self.store)?;
        Ok(report)
    }

    // ==================== arbitrage ====================

    async fn arbitrage_tick(&mut self) -> Result<TickReport, EngineError> {
        let cfg = self.config.arbitrage.clone();
        let now = Utc::now();
        let mut report = TickReport::default();

        let quotes = self.fetch_across_venues(&cfg.symbol).await;
        for (venue, quote) in &quotes {
            let instrument = Instrument::new(cfg.symbol.clone(), venue.clone());
            self.state.history.append(&instrument, quote.mid(), now);
        }

        let venue_quotes: HashMap<String, VenueQuote> = quotes
            .iter()
            .map(|(venue, quote)| {
                (
                    venue.clone(),
                    VenueQuote {
                        bid: quote.bid,
                        bid_qty: quote.bid_qty,
                        ask: quote.ask,
                        ask_qty: quote.ask_qty,
                        fee_rate: cfg.fee_rate(venue),
                        base_withdraw_fee: cfg
                            .base_withdraw_fees
                            .get(venue)
                            .copied()
                            .unwrap_or_default(),
                        quote_withdraw_fee: cfg
                            .quote_withdraw_fees
                            .get(venue)
                            .copied()
                            .unwrap_or_default(),
                    },
                )
            })
            .collect();

        let opportunities = self.scanner.scan(&venue_quotes);
        report.opportunities = opportunities.len();
        let rows: Vec<OpportunityRecord> = opportunities
            .iter()
            .map(|opp| OpportunityRecord {
                timestamp: opp.detected_at,
                symbol: cfg.symbol.clone(),
                buy_venue: opp.buy_venue.clone(),
                sell_venue: opp.sell_venue.clone(),
                buy_price: opp.buy_price,
                sell_price: opp.sell_price,
                quantity: opp.quantity,
                profit: opp.net_profit,
            })
            .collect();
        if let Err(e) = self.opportunity_log.append_all(&rows) {
            warn!(error = %e, "Failed to append opportunity log");
        }

        // The most profitable pair names the buy leg this tick.
        let best_buy_venue = opportunities
            .iter()
            .max_by(|a, b| a.net_profit.cmp(&b.net_profit))
            .map(|opp| opp.buy_venue.clone());

        let base_balance = self.balance_or_zero(&cfg.base_asset).await;
        let mut venues: Vec<&String> = quotes.keys().collect();
        venues.sort();
        for venue in venues {
            let quote = &quotes[venue];
            let instrument = Instrument::new(cfg.symbol.clone(), venue.clone());
            let flat = self.state.book.machine(&instrument).state() == PositionState::Flat;
            let entry_signal = flat && best_buy_venue.as_deref() == Some(venue.as_str());
            // Entries price at the ask, exits evaluate at the bid.
            let price = if flat { quote.ask } else { quote.bid };
            let ctx = TickContext {
                price,
                buy_quantity: self.quantize(Self::safe_div(cfg.trade_size, price)),
                sell_quantity: self.quantize(base_balance),
                entry_signal,
                timestamp: now,
            };
            let outcome = self.drive_machine(&instrument, &ctx).await;
            report.absorb(outcome);
        }

        self.state.save(&self.store)?;
        Ok(report)
    }

    // ==================== scan ====================

    async fn scan_tick(&mut self) -> Result<TickReport, EngineError> {
        let cfg = self.config.scan.clone();
        let now = Utc::now();
        let mut report = TickReport::default();

        for symbol in &cfg.symbols {
            let instrument = Instrument::new(symbol.clone(), cfg.venue.clone());
            let Some(quote) = self.fetch_single(&instrument).await else {
                continue;
            };
            let price = quote.ask;
            self.state.history.append(&instrument, price, now);
            if self.state.history.len(&instrument) < cfg.min_history {
                continue;
            }

            let entry_signal = if self.state.book.machine(&instrument).state()
                == PositionState::Flat
            {
                let prices = self.state.history.prices(&instrument);
                rise_from_low(&prices, cfg.window)
                    .is_some_and(|rise| rise >= cfg.rise_threshold)
            } else {
                false
            };

            let base_balance = self.balance_or_zero(symbol).await;
            let ctx = TickContext {
                price,
                buy_quantity: self.quantize(Self::safe_div(cfg.trade_size, price)),
                sell_quantity: self.quantize(base_balance),
                entry_signal,
                timestamp: now,
            };
            let outcome = self.drive_machine(&instrument, &ctx).await;
            report.absorb(outcome);
        }

        self.state.save(&self.store)?;
        Ok(report)
    }

    // ==================== shared plumbing ====================

    /// Drives one machine through its single transition for this tick and
    /// submits the resulting intent, if any. Failed submissions roll the
    /// machine back so the post-tick persist records the pre-submission
    /// state; the trigger re-fires next tick.
    async fn drive_machine(&mut self, instrument: &Instrument, ctx: &TickContext) -> DriveOutcome {
        let prior_buy_price = self
            .state
            .book
            .machine(instrument)
            .position()
            .map(|p| p.buy_price);
        let transition = self.state.book.machine(instrument).transition(ctx);
        let Some(intent) = transition.intent().cloned() else {
            return DriveOutcome::default();
        };

        match self.orders.submit(&intent).await {
            Ok(fill) => {
                self.state.book.machine(instrument).commit_last();
                let profit_loss_pct = match (intent.side, prior_buy_price) {
                    (Side::Sell, Some(buy_price)) if !buy_price.is_zero() => {
                        (fill.average_price - buy_price) / buy_price
                    }
                    _ => Decimal::ZERO,
                };
                let record = TradeRecord {
                    timestamp: fill.timestamp,
                    instrument: instrument.key(),
                    trade_type: intent.side.as_str().to_string(),
                    price: fill.average_price,
                    quantity: fill.quantity,
                    reason: intent.reason.as_str().to_string(),
                    profit_loss_pct,
                };
                if let Err(e) = self.trade_log.append(&record) {
                    warn!(error = %e, "Failed to append trade log");
                }
                DriveOutcome {
                    submitted: true,
                    rejected: false,
                    sold: intent.side == Side::Sell,
                    fill: Some(fill),
                }
            }
            Err(e) => {
                warn!(
                    instrument = %instrument,
                    side = %intent.side,
                    error = %e,
                    "Order submission failed, rolling back transition"
                );
                self.state.book.machine(instrument).rollback_last();
                DriveOutcome {
                    submitted: false,
                    rejected: true,
                    sold: false,
                    fill: None,
                }
            }
        }
    }

    /// Fetches one instrument's quote from its venue's source within the
    /// tick budget. Absence is normal: the instrument is skipped.
    async fn fetch_single(&self, instrument: &Instrument) -> Option<Quote> {
        let source = self
            .quote_sources
            .iter()
            .find(|s| s.venue() == instrument.venue)?;
        let budget = Duration::from_millis(self.config.engine.fetch_timeout_ms);
        match tokio::time::timeout(budget, source.fetch_best_quote(instrument)).await {
            Ok(Ok(Some(quote))) => Some(quote),
            Ok(Ok(None)) => {
                debug!(instrument = %instrument, "No quote this tick");
                None
            }
            Ok(Err(e)) => {
                warn!(instrument = %instrument, error = %e, "Quote fetch failed");
                None
            }
            Err(_) => {
                warn!(
                    instrument = %instrument,
                    timeout_ms = self.config.engine.fetch_timeout_ms,
                    "Quote fetch timed out"
                );
                None
            }
        }
    }

    /// Fans out one fetch task per venue. Each worker owns its own slot in
    /// the result map; a slow venue forfeits its slot instead of stalling
    /// the tick.
    async fn fetch_across_venues(&self, symbol: &str) -> HashMap<String, Quote> {
        let budget = Duration::from_millis(self.config.engine.fetch_timeout_ms);
        let mut tasks: JoinSet<(String, Option<Quote>)> = JoinSet::new();
        for source in &self.quote_sources {
            let source = Arc::clone(source);
            let instrument = Instrument::new(symbol, source.venue());
            tasks.spawn(async move {
                let venue = source.venue().to_string();
                match tokio::time::timeout(budget, source.fetch_best_quote(&instrument)).await {
                    Ok(Ok(quote)) => (venue, quote),
                    Ok(Err(e)) => {
                        warn!(venue = %instrument.venue, error = %e, "Quote fetch failed");
                        (venue, None)
                    }
                    Err(_) => {
                        warn!(venue = %instrument.venue, "Quote fetch timed out");
                        (venue, None)
                    }
                }
            });
        }

        let mut quotes = HashMap::new();
        while let Some(joined) = tasks.join_next().await {
            if let Ok((venue, Some(quote))) = joined {
                quotes.insert(venue, quote);
            }
        }
        quotes
    }

    async fn balance_or_zero(&self, asset: &str) -> Decimal {
        match self.balances.balance(asset).await {
            Ok(amount) => amount,
            Err(e) => {
                warn!(asset, error = %e, "Balance query failed, sizing to zero");
                Decimal::ZERO
            }
        }
    }

    /// Order quantities round down so a fill can never exceed the balance
    /// that sized it.
    fn quantize(&self, quantity: Decimal) -> Decimal {
        quantity.round_dp_with_strategy(
            self.config.engine.quantity_decimals,
            RoundingStrategy::ToZero,
        )
    }

    fn safe_div(numerator: Decimal, denominator: Decimal) -> Decimal {
        if denominator.is_zero() {
            Decimal::ZERO
        } else {
            numerator / denominator
        }
    }
}
