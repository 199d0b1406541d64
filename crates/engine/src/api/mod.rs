//! Exchange API clients

pub mod okx;

pub use okx::OkxClient;

use anyhow::Result;
use async_trait::async_trait;

use crate::types::{Candle, DataSource, FundingRate, OrderBook};

/// Market data needed by the signal pipeline.
///
/// Implemented by [`OkxClient`]; tests plug in fixture sources.
#[async_trait]
pub trait MarketDataSource: Send + Sync {
    /// Candles oldest-first plus where they came from
    async fn candles(&self, symbol: &str, timeframe: &str, limit: u32)
        -> Result<(Vec<Candle>, DataSource)>;

    async fn orderbook(&self, symbol: &str, depth: u32) -> Result<OrderBook>;

    async fn funding_rate(&self, symbol: &str) -> Result<FundingRate>;

    /// Recent open-interest change in percent
    async fn open_interest_change(&self, symbol: &str) -> Result<f64>;
}
