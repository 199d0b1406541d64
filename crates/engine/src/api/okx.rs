//! OKX public API client for market data (no authentication required)
//!
//! Candles, tickers, order books, funding rates and open interest. Responses
//! are cached for a short TTL; candle requests can fall back to a synthetic
//! series so the analysis pipeline always has data to work on.

use anyhow::Result;
use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::MarketDataSource;
use crate::cache::TtlCache;
use crate::types::{
    to_decimal, BookLevel, Candle, DataSource, FundingRate, OpenInterest, OrderBook, Ticker,
};

pub const DEFAULT_BASE_URL: &str = "https://www.okx.com";
const MAX_CANDLES_PER_REQUEST: u32 = 300;
const MAX_BOOK_DEPTH: u32 = 400;
const DEFAULT_CACHE_TTL_SECS: u64 = 30;

/// Quote currencies recognised when splitting concatenated symbols like `BTCUSDT`
const QUOTE_CURRENCIES: &[&str] = &["USDT", "USDC", "USD", "BTC", "ETH"];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SymbolError {
    #[error("Invalid symbol: {0:?}")]
    InvalidSymbol(String),

    #[error("Unsupported timeframe: {0:?}")]
    UnsupportedTimeframe(String),
}

/// Normalise user input to an OKX spot instrument id.
///
/// `btc`, `BTCUSDT`, `BTC/USDT`, `btc-usdt` all become `BTC-USDT`;
/// swap ids (`BTC-USDT-SWAP`) pass through unchanged.
pub fn normalize_symbol(input: &str) -> Result<String, SymbolError> {
    let s = input.trim().to_uppercase().replace(['/', '_', ' '], "-");
    if s.is_empty() || !s.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
        return Err(SymbolError::InvalidSymbol(input.to_string()));
    }

    let parts: Vec<&str> = s.split('-').filter(|p| !p.is_empty()).collect();
    match parts.as_slice() {
        [base] => {
            for quote in QUOTE_CURRENCIES {
                if let Some(b) = base.strip_suffix(quote) {
                    if !b.is_empty() {
                        return Ok(format!("{}-{}", b, quote));
                    }
                }
            }
            Ok(format!("{}-USDT", base))
        }
        [base, quote] => Ok(format!("{}-{}", base, quote)),
        [base, quote, kind] if *kind == "SWAP" => Ok(format!("{}-{}-SWAP", base, quote)),
        _ => Err(SymbolError::InvalidSymbol(input.to_string())),
    }
}

/// Perpetual swap instrument for a spot id (`BTC-USDT` → `BTC-USDT-SWAP`)
pub fn swap_instrument(inst_id: &str) -> String {
    if inst_id.ends_with("-SWAP") {
        inst_id.to_string()
    } else {
        format!("{}-SWAP", inst_id)
    }
}

/// Base currency of an instrument id (`BTC-USDT` → `BTC`)
pub fn base_currency(inst_id: &str) -> &str {
    inst_id.split('-').next().unwrap_or(inst_id)
}

/// Normalise a timeframe to OKX `bar` notation: minutes stay lowercase,
/// hours/days/weeks are uppercase (`1h` → `1H`, `1d` → `1D`).
pub fn normalize_timeframe(input: &str) -> Result<String, SymbolError> {
    let s = input.trim();
    let bar = match s {
        "1m" | "3m" | "5m" | "15m" | "30m" => s.to_string(),
        "1M" => "1M".to_string(),
        _ => {
            let upper = s.to_uppercase();
            match upper.as_str() {
                "1H" | "2H" | "4H" | "6H" | "12H" | "1D" | "1W" => upper,
                "60M" => "1H".to_string(),
                "240M" => "4H".to_string(),
                "24H" => "1D".to_string(),
                _ => return Err(SymbolError::UnsupportedTimeframe(input.to_string())),
            }
        }
    };
    Ok(bar)
}

/// Candle length in millis for a normalised bar
pub fn timeframe_millis(bar: &str) -> i64 {
    const MIN: i64 = 60_000;
    match bar {
        "1m" => MIN,
        "3m" => 3 * MIN,
        "5m" => 5 * MIN,
        "15m" => 15 * MIN,
        "30m" => 30 * MIN,
        "1H" => 60 * MIN,
        "2H" => 120 * MIN,
        "4H" => 240 * MIN,
        "6H" => 360 * MIN,
        "12H" => 720 * MIN,
        "1D" => 1_440 * MIN,
        "1W" => 10_080 * MIN,
        "1M" => 43_200 * MIN,
        _ => 60 * MIN,
    }
}

/// Rough anchor for synthetic series when nothing has been cached yet
fn reference_price(inst_id: &str) -> f64 {
    match base_currency(inst_id) {
        "BTC" => 60_000.0,
        "ETH" => 3_000.0,
        "SOL" => 150.0,
        "BNB" => 550.0,
        "XRP" => 0.6,
        "DOGE" => 0.15,
        _ => 100.0,
    }
}

/// Generate a random-walk candle series ending at `end_time`.
///
/// Every candle satisfies `low <= open, close <= high`; each open equals the
/// previous close.
pub fn synthetic_candles(
    anchor: f64,
    interval_ms: i64,
    count: usize,
    end_time: i64,
    rng: &mut impl Rng,
) -> Vec<Candle> {
    let mut candles = Vec::with_capacity(count);
    let mut price = if anchor.is_finite() && anchor > 0.0 { anchor } else { 100.0 };
    let start = end_time - interval_ms * count as i64;

    for i in 0..count {
        let open = price;
        let close = (open * (1.0 + rng.gen_range(-0.006..0.006))).max(f64::EPSILON);
        let high = open.max(close) * (1.0 + rng.gen_range(0.0..0.003));
        let low = open.min(close) * (1.0 - rng.gen_range(0.0..0.003));

        let (open_d, close_d) = (to_decimal(open), to_decimal(close));
        candles.push(Candle {
            timestamp: start + interval_ms * i as i64,
            open: open_d,
            high: to_decimal(high).max(open_d).max(close_d),
            low: to_decimal(low).min(open_d).min(close_d),
            close: close_d,
            volume: to_decimal(rng.gen_range(50.0..500.0)),
            confirmed: true,
        });
        price = close;
    }
    candles
}

// ---------------------------------------------------------------------------
// Deserialization structs
// ---------------------------------------------------------------------------

/// Every OKX v5 response: `{"code": "0", "msg": "", "data": [...]}`
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    code: String,
    #[serde(default)]
    msg: String,
    #[serde(default = "Vec::new")]
    data: Vec<T>,
}

/// Ticker row, shared by the REST endpoint and the `tickers` websocket channel
#[derive(Debug, Deserialize)]
pub(crate) struct RawTicker {
    #[serde(rename = "instId")]
    inst_id: String,
    last: String,
    #[serde(rename = "bidPx", default)]
    bid_px: String,
    #[serde(rename = "askPx", default)]
    ask_px: String,
    #[serde(rename = "open24h", default)]
    open_24h: String,
    #[serde(rename = "high24h", default)]
    high_24h: String,
    #[serde(rename = "low24h", default)]
    low_24h: String,
    #[serde(rename = "vol24h", default)]
    vol_24h: String,
    ts: String,
}

#[derive(Debug, Deserialize)]
struct RawBook {
    asks: Vec<Vec<String>>,
    bids: Vec<Vec<String>>,
    ts: String,
}

#[derive(Debug, Deserialize)]
struct RawFunding {
    #[serde(rename = "instId")]
    inst_id: String,
    #[serde(rename = "fundingRate")]
    funding_rate: String,
    #[serde(rename = "nextFundingRate", default)]
    next_funding_rate: String,
    #[serde(rename = "fundingTime", default)]
    funding_time: String,
}

#[derive(Debug, Deserialize)]
struct RawOpenInterest {
    #[serde(rename = "instId")]
    inst_id: String,
    oi: String,
    #[serde(rename = "oiCcy", default)]
    oi_ccy: String,
    ts: String,
}

fn dec(s: &str) -> Option<Decimal> {
    Decimal::from_str(s).ok()
}

fn num(s: &str) -> Option<f64> {
    s.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// OKX candle rows are `[ts, o, h, l, c, vol, volCcy, volCcyQuote, confirm]`,
/// newest first. Returns valid candles oldest first.
fn parse_candles(rows: Vec<Vec<String>>) -> Vec<Candle> {
    let total = rows.len();
    let mut candles: Vec<Candle> = rows
        .into_iter()
        .filter_map(|row| {
            if row.len() < 6 {
                return None;
            }
            Some(Candle {
                timestamp: row[0].parse().ok()?,
                open: dec(&row[1])?,
                high: dec(&row[2])?,
                low: dec(&row[3])?,
                close: dec(&row[4])?,
                volume: dec(&row[5])?,
                confirmed: row.get(8).map(|c| c == "1").unwrap_or(true),
            })
        })
        .filter(Candle::is_valid)
        .collect();

    if candles.len() < total {
        warn!(dropped = total - candles.len(), "Dropped malformed candles");
    }
    candles.sort_by_key(|c| c.timestamp);
    candles
}

/// Missing bid/ask/24h fields fall back to the last price
pub(crate) fn parse_ticker(raw: RawTicker) -> Result<Ticker> {
    let last = dec(&raw.last).ok_or_else(|| anyhow::anyhow!("Bad last price {:?}", raw.last))?;
    Ok(Ticker {
        symbol: raw.inst_id,
        last,
        bid: dec(&raw.bid_px).unwrap_or(last),
        ask: dec(&raw.ask_px).unwrap_or(last),
        open_24h: dec(&raw.open_24h).unwrap_or(last),
        high_24h: dec(&raw.high_24h).unwrap_or(last),
        low_24h: dec(&raw.low_24h).unwrap_or(last),
        volume_24h: dec(&raw.vol_24h).unwrap_or_default(),
        timestamp: raw.ts.parse().unwrap_or_default(),
    })
}

fn parse_levels(rows: &[Vec<String>]) -> Vec<BookLevel> {
    rows.iter()
        .filter_map(|row| {
            Some(BookLevel {
                price: dec(row.first()?)?,
                size: dec(row.get(1)?)?,
            })
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Client implementation
// ---------------------------------------------------------------------------

type CandleKey = (String, String, u32);

/// OKX public market data client. Clones share their caches.
#[derive(Clone)]
pub struct OkxClient {
    client: Client,
    base_url: String,
    candles: Arc<TtlCache<CandleKey, Vec<Candle>>>,
    tickers: Arc<TtlCache<String, Ticker>>,
    funding: Arc<TtlCache<String, FundingRate>>,
}

impl Default for OkxClient {
    fn default() -> Self {
        Self::new()
    }
}

impl OkxClient {
    pub fn new() -> Self {
        Self::with_config(DEFAULT_BASE_URL, Duration::from_secs(DEFAULT_CACHE_TTL_SECS))
    }

    pub fn with_config(base_url: &str, cache_ttl: Duration) -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
            base_url: base_url.trim_end_matches('/').to_string(),
            candles: Arc::new(TtlCache::new(cache_ttl)),
            tickers: Arc::new(TtlCache::new(cache_ttl)),
            funding: Arc::new(TtlCache::new(cache_ttl)),
        }
    }

    /// GET `path`, check HTTP status and the envelope `code`
    async fn get_data<T: DeserializeOwned>(&self, path: &str) -> Result<Vec<T>> {
        let url = format!("{}{}", self.base_url, path);
        let response = self.client.get(&url).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("OKX API error {}: {}", status, body);
        }

        let envelope: Envelope<T> = response.json().await?;
        if envelope.code != "0" {
            anyhow::bail!("OKX API error code {}: {}", envelope.code, envelope.msg);
        }
        Ok(envelope.data)
    }

    /// Fetch candles oldest-first. `symbol`/`timeframe` accept loose formats.
    pub async fn get_candles(&self, symbol: &str, timeframe: &str, limit: u32) -> Result<Vec<Candle>> {
        let (candles, _) = self.fetch_candles(symbol, timeframe, limit).await?;
        Ok(candles)
    }

    async fn fetch_candles(
        &self,
        symbol: &str,
        timeframe: &str,
        limit: u32,
    ) -> Result<(Vec<Candle>, DataSource)> {
        let inst_id = normalize_symbol(symbol)?;
        let bar = normalize_timeframe(timeframe)?;
        let limit = limit.clamp(1, MAX_CANDLES_PER_REQUEST);
        let key = (inst_id.clone(), bar.clone(), limit);

        if let Some(cached) = self.candles.get(&key) {
            debug!(inst_id, bar, "Candle cache hit");
            return Ok((cached, DataSource::Cached));
        }

        debug!(inst_id, bar, limit, "Fetching candles from OKX");
        let rows: Vec<Vec<String>> = self
            .get_data(&format!(
                "/api/v5/market/candles?instId={}&bar={}&limit={}",
                inst_id, bar, limit
            ))
            .await?;

        let candles = parse_candles(rows);
        if candles.is_empty() {
            anyhow::bail!("OKX returned no candles for {} {}", inst_id, bar);
        }
        debug!(count = candles.len(), "Fetched candles");
        self.candles.insert(key, candles.clone());
        Ok((candles, DataSource::Live))
    }

    /// Like [`get_candles`](Self::get_candles) but never fails on transport
    /// errors: falls back to a synthetic series anchored at the last known close.
    pub async fn get_candles_or_fallback(
        &self,
        symbol: &str,
        timeframe: &str,
        limit: u32,
    ) -> Result<(Vec<Candle>, DataSource)> {
        let inst_id = normalize_symbol(symbol)?;
        let bar = normalize_timeframe(timeframe)?;

        match self.fetch_candles(&inst_id, &bar, limit).await {
            Ok(result) => Ok(result),
            Err(e) => {
                warn!(inst_id, bar, error = %e, "Candle fetch failed, using synthetic fallback");
                let limit = limit.clamp(1, MAX_CANDLES_PER_REQUEST);
                let anchor = self
                    .candles
                    .get_stale(&(inst_id.clone(), bar.clone(), limit))
                    .and_then(|c| c.last().map(|k| k.close_f64()))
                    .unwrap_or_else(|| reference_price(&inst_id));

                let now = chrono::Utc::now().timestamp_millis();
                let interval = timeframe_millis(&bar);
                let end = now - now.rem_euclid(interval) + interval;
                let mut rng = StdRng::from_entropy();
                let candles = synthetic_candles(anchor, interval, limit as usize, end, &mut rng);
                Ok((candles, DataSource::Synthetic))
            }
        }
    }

    /// GET /api/v5/market/ticker
    pub async fn get_ticker(&self, symbol: &str) -> Result<Ticker> {
        let inst_id = normalize_symbol(symbol)?;
        if let Some(cached) = self.tickers.get(&inst_id) {
            return Ok(cached);
        }

        let data: Vec<RawTicker> = self
            .get_data(&format!("/api/v5/market/ticker?instId={}", inst_id))
            .await?;
        let raw = data
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("No ticker for {}", inst_id))?;

        let ticker = parse_ticker(raw)?;
        self.tickers.insert(inst_id, ticker.clone());
        Ok(ticker)
    }

    /// GET /api/v5/market/books
    pub async fn get_orderbook(&self, symbol: &str, depth: u32) -> Result<OrderBook> {
        let inst_id = normalize_symbol(symbol)?;
        let depth = depth.clamp(1, MAX_BOOK_DEPTH);

        let data: Vec<RawBook> = self
            .get_data(&format!("/api/v5/market/books?instId={}&sz={}", inst_id, depth))
            .await?;
        let raw = data
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("No order book for {}", inst_id))?;

        Ok(OrderBook {
            symbol: inst_id,
            bids: parse_levels(&raw.bids),
            asks: parse_levels(&raw.asks),
            timestamp: raw.ts.parse().unwrap_or_default(),
        })
    }

    /// GET /api/v5/public/funding-rate for the symbol's perpetual swap
    pub async fn get_funding_rate(&self, symbol: &str) -> Result<FundingRate> {
        let inst_id = swap_instrument(&normalize_symbol(symbol)?);
        if let Some(cached) = self.funding.get(&inst_id) {
            return Ok(cached);
        }

        let data: Vec<RawFunding> = self
            .get_data(&format!("/api/v5/public/funding-rate?instId={}", inst_id))
            .await?;
        let raw = data
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("No funding rate for {}", inst_id))?;

        let funding = FundingRate {
            symbol: raw.inst_id,
            funding_rate: num(&raw.funding_rate)
                .ok_or_else(|| anyhow::anyhow!("Bad funding rate {:?}", raw.funding_rate))?,
            next_funding_rate: num(&raw.next_funding_rate),
            funding_time: raw.funding_time.parse().unwrap_or_default(),
        };
        self.funding.insert(inst_id, funding.clone());
        Ok(funding)
    }

    /// GET /api/v5/public/open-interest for the symbol's perpetual swap
    pub async fn get_open_interest(&self, symbol: &str) -> Result<OpenInterest> {
        let inst_id = swap_instrument(&normalize_symbol(symbol)?);
        let data: Vec<RawOpenInterest> = self
            .get_data(&format!(
                "/api/v5/public/open-interest?instType=SWAP&instId={}",
                inst_id
            ))
            .await?;
        let raw = data
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("No open interest for {}", inst_id))?;

        Ok(OpenInterest {
            symbol: raw.inst_id,
            open_interest: num(&raw.oi).unwrap_or_default(),
            open_interest_ccy: num(&raw.oi_ccy).unwrap_or_default(),
            timestamp: raw.ts.parse().unwrap_or_default(),
        })
    }

    /// Percent change between the two latest hourly open-interest points
    /// (GET /api/v5/rubik/stat/contracts/open-interest-volume).
    pub async fn get_open_interest_change(&self, symbol: &str) -> Result<f64> {
        let inst_id = normalize_symbol(symbol)?;
        let ccy = base_currency(&inst_id);
        let rows: Vec<Vec<String>> = self
            .get_data(&format!(
                "/api/v5/rubik/stat/contracts/open-interest-volume?ccy={}&period=1H",
                ccy
            ))
            .await?;

        // newest first: [ts, oi, vol]
        let latest = rows.first().and_then(|r| r.get(1)).and_then(|s| num(s));
        let previous = rows.get(1).and_then(|r| r.get(1)).and_then(|s| num(s));
        match (latest, previous) {
            (Some(now), Some(prev)) if prev > 0.0 => Ok((now - prev) / prev * 100.0),
            _ => anyhow::bail!("Not enough open interest history for {}", ccy),
        }
    }

    /// Drop expired tickers and funding rates, and candles older than
    /// `candle_retention` (expired candles still anchor the synthetic fallback).
    /// Returns how many entries were removed.
    pub fn purge_caches(&self, candle_retention: Duration) -> usize {
        let removed = self.candles.purge_older_than(candle_retention.max(self.candles.ttl()))
            + self.tickers.purge_expired()
            + self.funding.purge_expired();
        if removed > 0 {
            info!(removed, "Purged expired market data cache entries");
        }
        removed
    }
}

#[async_trait]
impl MarketDataSource for OkxClient {
    async fn candles(
        &self,
        symbol: &str,
        timeframe: &str,
        limit: u32,
    ) -> Result<(Vec<Candle>, DataSource)> {
        self.get_candles_or_fallback(symbol, timeframe, limit).await
    }

    async fn orderbook(&self, symbol: &str, depth: u32) -> Result<OrderBook> {
        self.get_orderbook(symbol, depth).await
    }

    async fn funding_rate(&self, symbol: &str) -> Result<FundingRate> {
        self.get_funding_rate(symbol).await
    }

    async fn open_interest_change(&self, symbol: &str) -> Result<f64> {
        self.get_open_interest_change(symbol).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(ts: &str, o: &str, h: &str, l: &str, c: &str) -> Vec<String> {
        [ts, o, h, l, c, "10", "1000", "1000", "1"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    #[test]
    fn test_purge_caches_drops_expired_entries() {
        let client = OkxClient::with_config(DEFAULT_BASE_URL, Duration::from_millis(10));
        let ticker = |symbol: &str| Ticker {
            symbol: symbol.to_string(),
            last: Decimal::ONE,
            bid: Decimal::ONE,
            ask: Decimal::ONE,
            open_24h: Decimal::ONE,
            high_24h: Decimal::ONE,
            low_24h: Decimal::ONE,
            volume_24h: Decimal::ONE,
            timestamp: 0,
        };
        client.tickers.insert("BTC-USDT".into(), ticker("BTC-USDT"));
        client.candles.insert(("BTC-USDT".into(), "1H".into(), 100), Vec::new());
        client.candles.insert(("BTC-USDT".into(), "1H".into(), 50), Vec::new());
        std::thread::sleep(Duration::from_millis(30));

        // expired ticker goes, candles are still inside their retention
        assert_eq!(client.purge_caches(Duration::from_secs(3600)), 1);
        assert!(client.tickers.is_empty());
        assert_eq!(client.candles.len(), 2);

        assert_eq!(client.purge_caches(Duration::from_millis(20)), 2);
        assert!(client.candles.is_empty());
        assert_eq!(client.purge_caches(Duration::from_millis(20)), 0);
    }

    #[test]
    fn test_normalize_symbol_formats() {
        assert_eq!(normalize_symbol("btc").unwrap(), "BTC-USDT");
        assert_eq!(normalize_symbol("BTCUSDT").unwrap(), "BTC-USDT");
        assert_eq!(normalize_symbol("eth/usdc").unwrap(), "ETH-USDC");
        assert_eq!(normalize_symbol("sol-usdt").unwrap(), "SOL-USDT");
        assert_eq!(normalize_symbol("BTC-USDT-SWAP").unwrap(), "BTC-USDT-SWAP");
        assert!(normalize_symbol("").is_err());
        assert!(normalize_symbol("BTC$USDT").is_err());
        assert!(normalize_symbol("A-B-C").is_err());
    }

    #[test]
    fn test_swap_and_base() {
        assert_eq!(swap_instrument("BTC-USDT"), "BTC-USDT-SWAP");
        assert_eq!(swap_instrument("BTC-USDT-SWAP"), "BTC-USDT-SWAP");
        assert_eq!(base_currency("ETH-USDT"), "ETH");
    }

    #[test]
    fn test_normalize_timeframe() {
        assert_eq!(normalize_timeframe("1h").unwrap(), "1H");
        assert_eq!(normalize_timeframe("4h").unwrap(), "4H");
        assert_eq!(normalize_timeframe("1d").unwrap(), "1D");
        assert_eq!(normalize_timeframe("15m").unwrap(), "15m");
        assert_eq!(normalize_timeframe("60m").unwrap(), "1H");
        assert!(normalize_timeframe("7m").is_err());
        assert_eq!(timeframe_millis("4H"), 4 * 3_600_000);
    }

    #[test]
    fn test_parse_candles_orders_and_filters() {
        let rows = vec![
            row("3000", "11", "12", "10", "11.5"),
            // high below close: dropped
            row("2000", "10", "10.5", "9", "11"),
            row("1000", "10", "11", "9", "10.5"),
            vec!["bad".into()],
        ];
        let candles = parse_candles(rows);
        assert_eq!(candles.len(), 2);
        assert_eq!(candles[0].timestamp, 1000);
        assert_eq!(candles[1].timestamp, 3000);
        assert!(candles.iter().all(Candle::is_valid));
    }

    #[test]
    fn test_synthetic_candles_respect_ohlc_invariant() {
        let mut rng = StdRng::seed_from_u64(7);
        let candles = synthetic_candles(60_000.0, 3_600_000, 500, 1_800_000_000_000, &mut rng);
        assert_eq!(candles.len(), 500);
        for pair in candles.windows(2) {
            assert_eq!(pair[0].close, pair[1].open);
            assert_eq!(pair[1].timestamp - pair[0].timestamp, 3_600_000);
        }
        for c in &candles {
            assert!(c.low <= c.open && c.low <= c.close, "{:?}", c);
            assert!(c.open <= c.high && c.close <= c.high, "{:?}", c);
        }
    }

    #[test]
    fn test_synthetic_candles_bad_anchor() {
        let mut rng = StdRng::seed_from_u64(1);
        let candles = synthetic_candles(f64::NAN, 60_000, 10, 600_000, &mut rng);
        assert!(candles.iter().all(Candle::is_valid));
        assert!(candles[0].open > Decimal::ZERO);
    }

    #[test]
    fn test_envelope_error_code() {
        let body = r#"{"code":"51001","msg":"Instrument ID does not exist","data":[]}"#;
        let env: Envelope<RawTicker> = serde_json::from_str(body).unwrap();
        assert_eq!(env.code, "51001");
        assert!(env.data.is_empty());
    }

    #[tokio::test]
    async fn test_fallback_on_unreachable_host() {
        let client = OkxClient::with_config("http://127.0.0.1:9", Duration::from_secs(5));
        let (candles, source) = client
            .get_candles_or_fallback("BTCUSDT", "1h", 50)
            .await
            .unwrap();
        assert_eq!(source, DataSource::Synthetic);
        assert_eq!(candles.len(), 50);
        assert!(candles.iter().all(Candle::is_valid));
    }
}
