use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Which decision loop this deployment runs. Modes are mutually exclusive;
/// all three share the same history, detector, and state-machine primitives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradingMode {
    /// Single instrument, spike/recovery driven entry thresholds.
    Momentum,
    /// One instrument quoted across many venues, buy-low/sell-high pairs.
    Arbitrage,
    /// Many instruments on one venue, rise-from-low entry trigger.
    Scan,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub engine: EngineSettings,
    pub momentum: MomentumSettings,
    pub spike: SpikeSettings,
    pub scan: ScanSettings,
    pub arbitrage: ArbitrageSettings,
    pub persistence: PersistenceSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSettings {
    pub mode: TradingMode,
    /// Fixed tick cadence; observed deployments run 3s to 60s.
    pub tick_interval_secs: u64,
    /// Per-venue quote fetch budget within one tick.
    pub fetch_timeout_ms: u64,
    /// Order quantities are rounded down to this many decimals.
    pub quantity_decimals: u32,
}

/// A magnitude band mapping the most recent down-spike to entry parameters.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FluctuationBand {
    pub min_magnitude: Decimal,
    pub max_magnitude: Decimal,
    /// `profit_price = price * profit_multiplier` when the band matches.
    pub profit_multiplier: Decimal,
    pub trailing_giveback: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MomentumSettings {
    pub symbol: String,
    pub venue: String,
    /// Asset bought and sold, e.g. `GRASS`.
    pub base_asset: String,
    /// Asset balances are quoted in, e.g. `USDT`.
    pub quote_asset: String,
    /// Detection is skipped until this many observations exist.
    pub min_history: usize,
    /// Price history retention window.
    pub retention: usize,
    /// `start_price = price * (1 - entry_discount)`.
    pub entry_discount: Decimal,
    /// Observations kept after an exit so stale context cannot re-trigger.
    pub keep_after_exit: usize,
    pub bands: Vec<FluctuationBand>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SpikeBasis {
    /// Change in quote-currency units: `price[i] - price[i-d]`.
    Absolute,
    /// Fractional change: `(price[i] - price[i-d]) / price[i-d]`.
    Ratio,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpikeSettings {
    pub min_spike: Decimal,
    pub max_spike: Decimal,
    pub recovery_threshold: Decimal,
    pub max_look_back: usize,
    /// Spacing between scanned look-back distances (1, 1+s, 1+2s, ...).
    pub stride: usize,
    pub basis: SpikeBasis,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanSettings {
    pub venue: String,
    pub symbols: Vec<String>,
    pub quote_asset: String,
    /// Entry when the newest price sits this fraction above the window low.
    pub rise_threshold: Decimal,
    /// Look-back window for the rise-from-low check.
    pub window: usize,
    pub min_history: usize,
    pub retention: usize,
    pub stop_loss_pct: Decimal,
    pub take_profit_pct: Decimal,
    pub trailing_giveback_pct: Decimal,
    /// Quote-currency size of each entry.
    pub trade_size: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArbitrageSettings {
    pub symbol: String,
    pub base_asset: String,
    pub quote_asset: String,
    pub venues: Vec<String>,
    pub trade_size: Decimal,
    pub min_profit: Decimal,
    pub default_fee_rate: Decimal,
    /// Per-venue taker fee overrides.
    #[serde(default)]
    pub fee_overrides: HashMap<String, Decimal>,
    /// Withdrawal fee in base units charged by the buy venue. Zero by
    /// default; deployments wanting the flat-fee model leave these empty.
    #[serde(default)]
    pub base_withdraw_fees: HashMap<String, Decimal>,
    /// Withdrawal fee in quote units charged by the sell venue.
    #[serde(default)]
    pub quote_withdraw_fees: HashMap<String, Decimal>,
    /// Decimal places applied to reported prices/quantities/profit.
    pub report_decimals: u32,
    pub stop_loss_pct: Decimal,
    pub take_profit_pct: Decimal,
    pub trailing_giveback_pct: Decimal,
}

impl ArbitrageSettings {
    /// Taker fee for a venue, falling back to the default rate.
    #[must_use]
    pub fn fee_rate(&self, venue: &str) -> Decimal {
        self.fee_overrides
            .get(venue)
            .copied()
            .unwrap_or(self.default_fee_rate)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceSettings {
    /// Directory holding positions.json, price_history.json, thresholds.json.
    pub state_dir: PathBuf,
    pub trade_log: PathBuf,
    pub opportunity_log: PathBuf,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            engine: EngineSettings {
                mode: TradingMode::Momentum,
                tick_interval_secs: 30,
                fetch_timeout_ms: 5_000,
                quantity_decimals: 1,
            },
            momentum: MomentumSettings {
                symbol: "GRASSUSDT".to_string(),
                venue: "bybit".to_string(),
                base_asset: "GRASS".to_string(),
                quote_asset: "USDT".to_string(),
                min_history: 60,
                retention: 2400,
                entry_discount: Decimal::new(3, 2), // 0.03
                keep_after_exit: 3,
                bands: vec![
                    FluctuationBand {
                        min_magnitude: Decimal::new(53, 3),  // 0.053
                        max_magnitude: Decimal::new(16, 2),  // 0.16
                        profit_multiplier: Decimal::new(102, 2),
                        trailing_giveback: Decimal::new(1, 2),
                    },
                    FluctuationBand {
                        min_magnitude: Decimal::new(161, 3), // 0.161
                        max_magnitude: Decimal::new(50, 2),  // 0.50
                        profit_multiplier: Decimal::new(103, 2),
                        trailing_giveback: Decimal::new(26, 3),
                    },
                ],
            },
            spike: SpikeSettings {
                min_spike: Decimal::new(53, 3),
                max_spike: Decimal::new(50, 2),
                recovery_threshold: Decimal::new(53, 3),
                max_look_back: 2400,
                stride: 19,
                basis: SpikeBasis::Absolute,
            },
            scan: ScanSettings {
                venue: "aerodrome".to_string(),
                symbols: Vec::new(),
                quote_asset: "USDC".to_string(),
                rise_threshold: Decimal::new(5, 2),
                window: 600,
                min_history: 5,
                retention: 600,
                stop_loss_pct: Decimal::new(-3, 2),
                take_profit_pct: Decimal::new(9, 2),
                trailing_giveback_pct: Decimal::new(15, 3),
                trade_size: Decimal::new(100, 0),
            },
            arbitrage: ArbitrageSettings {
                symbol: "LUNAUSDT".to_string(),
                base_asset: "LUNA".to_string(),
                quote_asset: "USDT".to_string(),
                venues: vec![
                    "binance".to_string(),
                    "bybit".to_string(),
                    "kucoin".to_string(),
                    "mexc".to_string(),
                ],
                trade_size: Decimal::new(1000, 0),
                min_profit: Decimal::new(1, 2),
                default_fee_rate: Decimal::new(1, 3),
                fee_overrides: HashMap::new(),
                base_withdraw_fees: HashMap::new(),
                quote_withdraw_fees: HashMap::new(),
                report_decimals: 4,
                stop_loss_pct: Decimal::new(-3, 2),
                take_profit_pct: Decimal::new(7, 2),
                trailing_giveback_pct: Decimal::new(1, 2),
            },
            persistence: PersistenceSettings {
                state_dir: PathBuf::from("state"),
                trade_log: PathBuf::from("trade_history.csv"),
                opportunity_log: PathBuf::from("opportunities.csv"),
            },
        }
    }
}
