//! Append-only CSV logs: executed trades and arbitrage opportunities.
//!
//! Headers are written once when the file is created; subsequent runs
//! append. The summary reader feeds the `report` command.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use csv::{ReaderBuilder, WriterBuilder};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

// =============================================================================
// Trade log
// =============================================================================

/// One executed trade as written to `trade_history.csv`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    pub timestamp: DateTime<Utc>,
    pub instrument: String,
    /// `buy` or `sell`.
    pub trade_type: String,
    pub price: Decimal,
    pub quantity: Decimal,
    /// `Entry`, `Stop Loss`, or `Take Profit`.
    pub reason: String,
    /// Fractional return realized on a sell, zero on buys.
    pub profit_loss_pct: Decimal,
}

#[derive(Debug, Clone)]
pub struct TradeLog {
    path: PathBuf,
}

impl TradeLog {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one record, writing the header on first use.
    ///
    /// # Errors
    /// Returns an error if the file cannot be opened or written.
    pub fn append(&self, record: &TradeRecord) -> Result<()> {
        let new_file = !self.path.exists();
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("Failed to open trade log: {}", self.path.display()))?;
        let mut writer = WriterBuilder::new().has_headers(new_file).from_writer(file);
        writer.serialize(record)?;
        writer.flush()?;
        Ok(())
    }

    /// Reads every record back, oldest first.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn read_all(&self) -> Result<Vec<TradeRecord>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .from_path(&self.path)
            .with_context(|| format!("Failed to read trade log: {}", self.path.display()))?;
        let mut records = Vec::new();
        for row in reader.deserialize() {
            records.push(row?);
        }
        Ok(records)
    }

    /// Aggregates the log into a performance summary.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn summarize(&self) -> Result<TradeSummary> {
        Ok(TradeSummary::from_records(&self.read_all()?))
    }
}

/// Counts and totals over the trade log.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TradeSummary {
    pub total_trades: usize,
    pub buys: usize,
    pub sells: usize,
    pub take_profits: usize,
    pub stop_losses: usize,
    /// Sum of fractional returns across sells.
    pub total_return: Decimal,
}

impl TradeSummary {
    #[must_use]
    pub fn from_records(records: &[TradeRecord]) -> Self {
        let mut summary = Self {
            total_trades: records.len(),
            ..Self::default()
        };
        for record in records {
            match record.trade_type.as_str() {
                "buy" => summary.buys += 1,
                "sell" => summary.sells += 1,
                _ => {}
            }
            match record.reason.as_str() {
                "Take Profit" => summary.take_profits += 1,
                "Stop Loss" => summary.stop_losses += 1,
                _ => {}
            }
            summary.total_return += record.profit_loss_pct;
        }
        summary
    }
}

// =============================================================================
// Opportunity log
// =============================================================================

/// One arbitrage opportunity row, already rounded for reporting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpportunityRecord {
    pub timestamp: DateTime<Utc>,
    pub symbol: String,
    pub buy_venue: String,
    pub sell_venue: String,
    pub buy_price: Decimal,
    pub sell_price: Decimal,
    pub quantity: Decimal,
    pub profit: Decimal,
}

#[derive(Debug, Clone)]
pub struct OpportunityLog {
    path: PathBuf,
}

impl OpportunityLog {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Appends a batch of opportunity rows from one tick.
    ///
    /// # Errors
    /// Returns an error if the file cannot be opened or written.
    pub fn append_all(&self, records: &[OpportunityRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        let new_file = !self.path.exists();
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("Failed to open opportunity log: {}", self.path.display()))?;
        let mut writer = WriterBuilder::new().has_headers(new_file).from_writer(file);
        for record in records {
            writer.serialize(record)?;
        }
        writer.flush()?;
        Ok(())
    }
}
