use crate::types::{Instrument, OrderFill, OrderIntent, Quote};
use anyhow::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::sync::Arc;

#[async_trait]
pub trait QuoteSource: Send + Sync {
    /// Best bid/ask for one instrument. `Ok(None)` means no data this tick
    /// (thin book, venue hiccup); the caller skips the instrument.
    async fn fetch_best_quote(&self, instrument: &Instrument) -> Result<Option<Quote>>;

    /// Venue identifier this source answers for.
    fn venue(&self) -> &str;
}

#[async_trait]
pub trait BalanceSource: Send + Sync {
    async fn balance(&self, asset: &str) -> Result<Decimal>;
}

#[async_trait]
pub trait OrderSink: Send + Sync {
    /// Submits one order. An `Err` here means the order was NOT placed;
    /// the caller must leave its persisted state untouched.
    async fn submit(&self, intent: &OrderIntent) -> Result<OrderFill>;
}

#[async_trait]
impl<T: OrderSink + ?Sized> OrderSink for Arc<T> {
    async fn submit(&self, intent: &OrderIntent) -> Result<OrderFill> {
        (**self).submit(intent).await
    }
}
