//! End-to-end tick flows against scripted collaborators: quote scripts
//! play one price per tick, the sink fills at the intent price, and state
//! round-trips through a temp directory.

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use spikebot_core::config::{
    AppConfig, FluctuationBand, SpikeBasis, TradingMode,
};
use spikebot_core::position::PositionState;
use spikebot_core::traits::{BalanceSource, OrderSink, QuoteSource};
use spikebot_core::types::{Instrument, OrderFill, OrderIntent, Quote};
use spikebot_engine::DecisionEngine;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

// =============================================================================
// Mocks
// =============================================================================

/// Plays back one scripted ask per fetch; the final price repeats. The
/// bid sits `spread` below the ask.
struct ScriptedSource {
    venue: String,
    spread: Decimal,
    scripts: Mutex<HashMap<String, VecDeque<Decimal>>>,
    hang: bool,
}

impl ScriptedSource {
    fn new(venue: &str, symbol: &str, prices: &[Decimal]) -> Arc<Self> {
        Self::with_spread(venue, symbol, prices, Decimal::ZERO)
    }

    fn with_spread(venue: &str, symbol: &str, prices: &[Decimal], spread: Decimal) -> Arc<Self> {
        let mut scripts = HashMap::new();
        scripts.insert(symbol.to_string(), prices.iter().copied().collect());
        Arc::new(Self {
            venue: venue.to_string(),
            spread,
            scripts: Mutex::new(scripts),
            hang: false,
        })
    }

    fn hanging(venue: &str) -> Arc<Self> {
        Arc::new(Self {
            venue: venue.to_string(),
            spread: Decimal::ZERO,
            scripts: Mutex::new(HashMap::new()),
            hang: true,
        })
    }

    fn add_script(self: &Arc<Self>, symbol: &str, prices: &[Decimal]) {
        self.scripts
            .lock()
            .unwrap()
            .insert(symbol.to_string(), prices.iter().copied().collect());
    }
}

#[async_trait]
impl QuoteSource for ScriptedSource {
    async fn fetch_best_quote(&self, instrument: &Instrument) -> Result<Option<Quote>> {
        if self.hang {
            tokio::time::sleep(Duration::from_secs(86_400)).await;
            return Ok(None);
        }
        let ask = {
            let mut scripts = self.scripts.lock().unwrap();
            let Some(queue) = scripts.get_mut(&instrument.symbol) else {
                return Ok(None);
            };
            if queue.len() > 1 {
                queue.pop_front().unwrap()
            } else {
                match queue.front() {
                    Some(price) => *price,
                    None => return Ok(None),
                }
            }
        };
        Ok(Some(Quote {
            bid: ask - self.spread,
            bid_qty: dec!(1000000),
            ask,
            ask_qty: dec!(1000000),
            timestamp: Utc::now(),
        }))
    }

    fn venue(&self) -> &str {
        &self.venue
    }
}

struct FixedBalances(HashMap<String, Decimal>);

impl FixedBalances {
    fn new(pairs: &[(&str, Decimal)]) -> Self {
        Self(
            pairs
                .iter()
                .map(|(asset, amount)| ((*asset).to_string(), *amount))
                .collect(),
        )
    }
}

#[async_trait]
impl BalanceSource for FixedBalances {
    async fn balance(&self, asset: &str) -> Result<Decimal> {
        Ok(self.0.get(asset).copied().unwrap_or_default())
    }
}

/// Fills at the intent price, or rejects everything while `fail` is set.
#[derive(Default)]
struct RecordingSink {
    fail: AtomicBool,
    submitted: Mutex<Vec<OrderIntent>>,
}

impl RecordingSink {
    fn intents(&self) -> Vec<OrderIntent> {
        self.submitted.lock().unwrap().clone()
    }
}

#[async_trait]
impl OrderSink for RecordingSink {
    async fn submit(&self, intent: &OrderIntent) -> Result<OrderFill> {
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("venue rejected order");
        }
        self.submitted.lock().unwrap().push(intent.clone());
        Ok(OrderFill {
            instrument: intent.instrument.clone(),
            side: intent.side,
            quantity: intent.quantity,
            average_price: intent.price,
            timestamp: intent.timestamp,
        })
    }
}

// =============================================================================
// Config helpers
// =============================================================================

fn momentum_config(dir: &TempDir) -> AppConfig {
    let mut config = AppConfig::default();
    config.engine.mode = TradingMode::Momentum;
    config.engine.quantity_decimals = 1;
    config.momentum.symbol = "GRASSUSDT".to_string();
    config.momentum.venue = "bybit".to_string();
    config.momentum.base_asset = "GRASS".to_string();
    config.momentum.quote_asset = "USDT".to_string();
    config.momentum.min_history = 6;
    config.momentum.retention = 50;
    config.momentum.entry_discount = dec!(0.03);
    config.momentum.keep_after_exit = 3;
    config.momentum.bands = vec![FluctuationBand {
        min_magnitude: dec!(1),
        max_magnitude: dec!(3),
        profit_multiplier: dec!(1.02),
        trailing_giveback: dec!(0.01),
    }];
    config.spike.min_spike = dec!(1);
    config.spike.max_spike = dec!(10);
    config.spike.recovery_threshold = dec!(1);
    config.spike.max_look_back = 5;
    config.spike.stride = 2;
    config.spike.basis = SpikeBasis::Absolute;
    point_paths(&mut config, dir);
    config
}

fn point_paths(config: &mut AppConfig, dir: &TempDir) {
    config.persistence.state_dir = dir.path().join("state");
    config.persistence.trade_log = dir.path().join("trade_history.csv");
    config.persistence.opportunity_log = dir.path().join("opportunities.csv");
}

fn grass() -> Instrument {
    Instrument::new("GRASSUSDT", "bybit")
}

async fn run_ticks<B, O>(engine: &mut DecisionEngine<B, O>, count: usize) -> (usize, usize)
where
    B: BalanceSource,
    O: OrderSink,
{
    let mut submitted = 0;
    let mut rejected = 0;
    for _ in 0..count {
        let report = engine.tick().await.unwrap();
        submitted += report.orders_submitted;
        rejected += report.orders_rejected;
    }
    (submitted, rejected)
}

// =============================================================================
// Momentum mode
// =============================================================================

#[tokio::test]
async fn momentum_recovery_enters_arms_and_takes_profit() {
    let dir = TempDir::new().unwrap();
    let config = momentum_config(&dir);
    let prices = [
        dec!(10),
        dec!(10),
        dec!(10),
        dec!(10),
        dec!(10),
        dec!(8),
        dec!(10),
        dec!(10.3),
        dec!(12),
        dec!(11.8),
    ];
    let source = ScriptedSource::new("bybit", "GRASSUSDT", &prices);
    let sink = Arc::new(RecordingSink::default());
    let balances = FixedBalances::new(&[("USDT", dec!(1000)), ("GRASS", dec!(100))]);

    let mut engine =
        DecisionEngine::new(config, vec![source as Arc<dyn QuoteSource>], balances, Arc::clone(&sink)).unwrap();

    // Five warm-up ticks below min_history, then the dip.
    run_ticks(&mut engine, 6).await;
    assert!(sink.intents().is_empty());

    // Recovery tick: thresholds arm and the entry fires the same tick.
    let report = engine.tick().await.unwrap();
    assert_eq!(report.orders_submitted, 1);
    let machine = engine.state().book.get(&grass()).unwrap();
    assert_eq!(machine.state(), PositionState::Entered);
    assert_eq!(machine.position().unwrap().buy_price, dec!(10));
    assert_eq!(machine.thresholds().start_price, dec!(9.70));
    assert_eq!(machine.thresholds().profit_price, dec!(10.20));

    // 10.3 crosses the profit price: armed, no sale.
    let report = engine.tick().await.unwrap();
    assert_eq!(report.orders_submitted, 0);
    assert_eq!(
        engine.state().book.get(&grass()).unwrap().state(),
        PositionState::Armed
    );

    // Peak at 12, then the 1% giveback sells at 11.8.
    run_ticks(&mut engine, 1).await;
    let report = engine.tick().await.unwrap();
    assert_eq!(report.orders_submitted, 1);

    let intents = sink.intents();
    assert_eq!(intents.len(), 2);
    assert_eq!(intents[0].reason.as_str(), "Entry");
    assert_eq!(intents[0].quantity, dec!(100)); // 1000 USDT at 10
    assert_eq!(intents[1].reason.as_str(), "Take Profit");

    // Post-exit: flat, neutral thresholds, history truncated.
    let machine = engine.state().book.get(&grass()).unwrap();
    assert_eq!(machine.state(), PositionState::Flat);
    assert!(!machine.thresholds().is_set());
    assert_eq!(engine.state().history.len(&grass()), 3);
}

#[tokio::test]
async fn momentum_stop_loss_fires_below_start_price() {
    let dir = TempDir::new().unwrap();
    let config = momentum_config(&dir);
    let prices = [
        dec!(10),
        dec!(10),
        dec!(10),
        dec!(10),
        dec!(10),
        dec!(8),
        dec!(10),
        dec!(9.6),
    ];
    let source = ScriptedSource::new("bybit", "GRASSUSDT", &prices);
    let sink = Arc::new(RecordingSink::default());
    let balances = FixedBalances::new(&[("USDT", dec!(1000)), ("GRASS", dec!(100))]);

    let mut engine =
        DecisionEngine::new(config, vec![source as Arc<dyn QuoteSource>], balances, Arc::clone(&sink)).unwrap();
    run_ticks(&mut engine, 8).await;

    let intents = sink.intents();
    assert_eq!(intents.len(), 2);
    assert_eq!(intents[1].reason.as_str(), "Stop Loss");
    assert_eq!(
        engine.state().book.get(&grass()).unwrap().state(),
        PositionState::Flat
    );
}

#[tokio::test]
async fn failed_order_rolls_back_and_retries_next_tick() {
    let dir = TempDir::new().unwrap();
    let config = momentum_config(&dir);
    let prices = [
        dec!(10),
        dec!(10),
        dec!(10),
        dec!(10),
        dec!(10),
        dec!(8),
        dec!(10),
        dec!(10.1),
    ];
    let source = ScriptedSource::new("bybit", "GRASSUSDT", &prices);
    let sink = Arc::new(RecordingSink::default());
    sink.fail.store(true, Ordering::SeqCst);
    let balances = FixedBalances::new(&[("USDT", dec!(1000)), ("GRASS", dec!(100))]);

    let mut engine =
        DecisionEngine::new(config, vec![source as Arc<dyn QuoteSource>], balances, Arc::clone(&sink)).unwrap();

    // Entry triggers on tick 7 but the venue rejects it.
    let (submitted, rejected) = run_ticks(&mut engine, 7).await;
    assert_eq!(submitted, 0);
    assert_eq!(rejected, 1);
    assert_eq!(
        engine.state().book.get(&grass()).unwrap().state(),
        PositionState::Flat
    );
    // Nothing was persisted as held.
    let store = spikebot_data::StateStore::new(dir.path().join("state"));
    assert!(store.load_positions().is_empty());

    // Thresholds survived the rollback, so the retry succeeds.
    sink.fail.store(false, Ordering::SeqCst);
    let report = engine.tick().await.unwrap();
    assert_eq!(report.orders_submitted, 1);
    assert_eq!(sink.intents().len(), 1);
    assert_eq!(
        engine.state().book.get(&grass()).unwrap().state(),
        PositionState::Entered
    );
}

#[tokio::test]
async fn restart_restores_armed_position_and_thresholds() {
    let dir = TempDir::new().unwrap();
    let prices = [
        dec!(10),
        dec!(10),
        dec!(10),
        dec!(10),
        dec!(10),
        dec!(8),
        dec!(10),
        dec!(10.3),
    ];

    {
        let config = momentum_config(&dir);
        let source = ScriptedSource::new("bybit", "GRASSUSDT", &prices);
        let sink = Arc::new(RecordingSink::default());
        let balances = FixedBalances::new(&[("USDT", dec!(1000)), ("GRASS", dec!(100))]);
        let mut engine = DecisionEngine::new(config, vec![source as Arc<dyn QuoteSource>], balances, sink).unwrap();
        run_ticks(&mut engine, 8).await;
        assert_eq!(
            engine.state().book.get(&grass()).unwrap().state(),
            PositionState::Armed
        );
    }

    // Same state dir, fresh process.
    let config = momentum_config(&dir);
    let source = ScriptedSource::new("bybit", "GRASSUSDT", &[dec!(10.19)]);
    let sink = Arc::new(RecordingSink::default());
    let balances = FixedBalances::new(&[("USDT", dec!(0)), ("GRASS", dec!(100))]);
    let mut engine =
        DecisionEngine::new(config, vec![source as Arc<dyn QuoteSource>], balances, Arc::clone(&sink)).unwrap();

    let machine = engine.state().book.get(&grass()).unwrap();
    assert_eq!(machine.state(), PositionState::Armed);
    assert_eq!(machine.position().unwrap().buy_price, dec!(10));
    assert_eq!(machine.position().unwrap().highest_price_seen, dec!(10.3));
    assert_eq!(machine.thresholds().start_price, dec!(9.70));

    // Trailing logic resumes from the restored peak: 10.3 -> 10.19 is a
    // 1.07% giveback.
    let report = engine.tick().await.unwrap();
    assert_eq!(report.orders_submitted, 1);
    assert_eq!(sink.intents()[0].reason.as_str(), "Take Profit");
}

// =============================================================================
// Arbitrage mode
// =============================================================================

fn arbitrage_config(dir: &TempDir) -> AppConfig {
    let mut config = AppConfig::default();
    config.engine.mode = TradingMode::Arbitrage;
    config.engine.quantity_decimals = 4;
    config.arbitrage.symbol = "LUNAUSDT".to_string();
    config.arbitrage.base_asset = "LUNA".to_string();
    config.arbitrage.quote_asset = "USDT".to_string();
    config.arbitrage.venues = vec!["binance".to_string(), "kraken".to_string()];
    config.arbitrage.trade_size = dec!(1000);
    config.arbitrage.min_profit = dec!(0.01);
    config.arbitrage.default_fee_rate = dec!(0.001);
    point_paths(&mut config, dir);
    config
}

#[tokio::test]
async fn arbitrage_tick_logs_opportunity_and_enters_buy_leg() {
    let dir = TempDir::new().unwrap();
    let config = arbitrage_config(&dir);
    // binance asks 100, kraken bids 100.5: the textbook spread.
    let binance =
        ScriptedSource::with_spread("binance", "LUNAUSDT", &[dec!(100)], dec!(0.1));
    let kraken =
        ScriptedSource::with_spread("kraken", "LUNAUSDT", &[dec!(100.6)], dec!(0.1));
    let sink = Arc::new(RecordingSink::default());
    let balances = FixedBalances::new(&[("LUNA", dec!(0)), ("USDT", dec!(2000))]);

    let mut engine = DecisionEngine::new(
        config,
        vec![binance as Arc<dyn QuoteSource>, kraken],
        balances,
        Arc::clone(&sink),
    )
    .unwrap();

    let report = engine.tick().await.unwrap();
    assert_eq!(report.opportunities, 1);
    assert_eq!(report.orders_submitted, 1);

    let intents = sink.intents();
    assert_eq!(intents[0].instrument, Instrument::new("LUNAUSDT", "binance"));
    assert_eq!(intents[0].price, dec!(100));
    assert_eq!(intents[0].quantity, dec!(10));

    let opportunity_csv =
        std::fs::read_to_string(dir.path().join("opportunities.csv")).unwrap();
    assert!(opportunity_csv.contains("binance"));
    assert!(opportunity_csv.contains("2.995"));

    // The kraken-side machine stayed flat: no sell leg was invented.
    let kraken_machine = engine
        .state()
        .book
        .get(&Instrument::new("LUNAUSDT", "kraken"));
    assert!(kraken_machine.map_or(true, |m| m.state() == PositionState::Flat));
}

#[tokio::test(start_paused = true)]
async fn hung_venue_forfeits_its_slot_without_stalling_the_tick() {
    let dir = TempDir::new().unwrap();
    let config = arbitrage_config(&dir);
    let binance =
        ScriptedSource::with_spread("binance", "LUNAUSDT", &[dec!(100)], dec!(0.1));
    let kraken = ScriptedSource::hanging("kraken");
    let sink = Arc::new(RecordingSink::default());
    let balances = FixedBalances::new(&[("LUNA", dec!(0)), ("USDT", dec!(2000))]);

    let mut engine =
        DecisionEngine::new(config, vec![binance as Arc<dyn QuoteSource>, kraken], balances, sink).unwrap();

    // Completes despite the hung venue; one venue alone yields no pairs.
    let report = engine.tick().await.unwrap();
    assert_eq!(report.opportunities, 0);
    assert_eq!(report.orders_submitted, 0);
    assert_eq!(
        engine
            .state()
            .history
            .len(&Instrument::new("LUNAUSDT", "binance")),
        1
    );
    assert_eq!(
        engine
            .state()
            .history
            .len(&Instrument::new("LUNAUSDT", "kraken")),
        0
    );
}

// =============================================================================
// Scan mode
// =============================================================================

#[tokio::test]
async fn scan_mode_enters_only_the_risen_token() {
    let dir = TempDir::new().unwrap();
    let mut config = AppConfig::default();
    config.engine.mode = TradingMode::Scan;
    config.engine.quantity_decimals = 1;
    config.scan.venue = "dex".to_string();
    config.scan.symbols = vec!["AAA".to_string(), "BBB".to_string()];
    config.scan.rise_threshold = dec!(0.05);
    config.scan.window = 10;
    config.scan.min_history = 3;
    config.scan.retention = 50;
    config.scan.trade_size = dec!(100);
    point_paths(&mut config, &dir);

    let source = ScriptedSource::new("dex", "AAA", &[dec!(100), dec!(90), dec!(95)]);
    source.add_script("BBB", &[dec!(100), dec!(100), dec!(100)]);
    let sink = Arc::new(RecordingSink::default());
    let balances = FixedBalances::new(&[("AAA", dec!(0)), ("BBB", dec!(0))]);

    let mut engine =
        DecisionEngine::new(config, vec![source as Arc<dyn QuoteSource>], balances, Arc::clone(&sink)).unwrap();
    let (submitted, _) = run_ticks(&mut engine, 3).await;

    assert_eq!(submitted, 1);
    let intents = sink.intents();
    assert_eq!(intents[0].instrument, Instrument::new("AAA", "dex"));
    // 100 quote units at 95, rounded down to one decimal.
    assert_eq!(intents[0].quantity, dec!(1.0));
    assert_eq!(
        engine
            .state()
            .book
            .get(&Instrument::new("BBB", "dex"))
            .map(|m| m.state()),
        Some(PositionState::Flat)
    );
}

// =============================================================================
// Startup validation
// =============================================================================

#[tokio::test]
async fn missing_venue_source_is_fatal_at_startup() {
    let dir = TempDir::new().unwrap();
    let config = momentum_config(&dir);
    let sink = Arc::new(RecordingSink::default());
    let balances = FixedBalances::new(&[]);

    // No source registered for bybit.
    let result = DecisionEngine::new(config, vec![], balances, sink);
    assert!(result.is_err());
}

#[tokio::test]
async fn arbitrage_needs_two_venues() {
    let dir = TempDir::new().unwrap();
    let mut config = arbitrage_config(&dir);
    config.arbitrage.venues = vec!["binance".to_string()];
    let source = ScriptedSource::new("binance", "LUNAUSDT", &[dec!(100)]);
    let sink = Arc::new(RecordingSink::default());
    let balances = FixedBalances::new(&[]);

    let result = DecisionEngine::new(config, vec![source as Arc<dyn QuoteSource>], balances, sink);
    assert!(result.is_err());
}
