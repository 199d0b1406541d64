//! Market data and signal types shared across the engine

use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A single OHLCV candle, oldest-first in every series the engine returns
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    /// Open time, epoch millis
    pub timestamp: i64,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    /// false while the candle is still forming
    #[serde(default = "default_confirmed")]
    pub confirmed: bool,
}

fn default_confirmed() -> bool {
    true
}

impl Candle {
    /// `low <= open, close <= high` and non-negative volume
    pub fn is_valid(&self) -> bool {
        self.low <= self.high
            && self.low <= self.open
            && self.low <= self.close
            && self.open <= self.high
            && self.close <= self.high
            && self.volume >= Decimal::ZERO
    }

    pub fn open_f64(&self) -> f64 {
        to_f64(self.open)
    }

    pub fn high_f64(&self) -> f64 {
        to_f64(self.high)
    }

    pub fn low_f64(&self) -> f64 {
        to_f64(self.low)
    }

    pub fn close_f64(&self) -> f64 {
        to_f64(self.close)
    }

    pub fn volume_f64(&self) -> f64 {
        to_f64(self.volume)
    }

    pub fn is_bullish(&self) -> bool {
        self.close > self.open
    }

    pub fn is_bearish(&self) -> bool {
        self.close < self.open
    }
}

/// Decimal → f64, 0.0 if out of range
pub fn to_f64(value: Decimal) -> f64 {
    value.to_f64().unwrap_or(0.0)
}

/// f64 → Decimal rounded to 8 dp, zero for NaN/inf
pub fn to_decimal(value: f64) -> Decimal {
    Decimal::from_f64(value)
        .map(|d| d.round_dp(8))
        .unwrap_or(Decimal::ZERO)
}

/// Where a candle series came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataSource {
    Live,
    Cached,
    Synthetic,
}

impl DataSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Live => "live",
            Self::Cached => "cached",
            Self::Synthetic => "synthetic",
        }
    }
}

/// Last-trade ticker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ticker {
    pub symbol: String,
    pub last: Decimal,
    pub bid: Decimal,
    pub ask: Decimal,
    pub open_24h: Decimal,
    pub high_24h: Decimal,
    pub low_24h: Decimal,
    pub volume_24h: Decimal,
    pub timestamp: i64,
}

impl Ticker {
    /// 24h change in percent
    pub fn change_24h_pct(&self) -> f64 {
        if self.open_24h.is_zero() {
            return 0.0;
        }
        to_f64((self.last - self.open_24h) / self.open_24h * Decimal::ONE_HUNDRED)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BookLevel {
    pub price: Decimal,
    pub size: Decimal,
}

/// Order book snapshot, bids descending and asks ascending
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderBook {
    pub symbol: String,
    pub bids: Vec<BookLevel>,
    pub asks: Vec<BookLevel>,
    pub timestamp: i64,
}

impl OrderBook {
    /// Share of resting size on the bid side, in [0,1]. 0.5 for an empty book.
    pub fn imbalance(&self) -> f64 {
        let bid: Decimal = self.bids.iter().map(|l| l.size).sum();
        let ask: Decimal = self.asks.iter().map(|l| l.size).sum();
        let total = bid + ask;
        if total.is_zero() {
            return 0.5;
        }
        to_f64(bid / total).clamp(0.0, 1.0)
    }

    pub fn best_bid(&self) -> Option<Decimal> {
        self.bids.first().map(|l| l.price)
    }

    pub fn best_ask(&self) -> Option<Decimal> {
        self.asks.first().map(|l| l.price)
    }

    /// Spread as a percentage of the mid price
    pub fn spread_pct(&self) -> Option<f64> {
        let (bid, ask) = (self.best_bid()?, self.best_ask()?);
        let mid = (bid + ask) / Decimal::TWO;
        if mid.is_zero() {
            return None;
        }
        Some(to_f64((ask - bid) / mid * Decimal::ONE_HUNDRED))
    }
}

/// Perpetual swap funding
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FundingRate {
    pub symbol: String,
    /// Per funding interval, e.g. 0.0001 = 0.01%
    pub funding_rate: f64,
    pub next_funding_rate: Option<f64>,
    pub funding_time: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenInterest {
    pub symbol: String,
    /// In contracts
    pub open_interest: f64,
    /// In base currency
    pub open_interest_ccy: f64,
    pub timestamp: i64,
}

/// Market bias from an analyzer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Bias {
    Bullish,
    Bearish,
    Neutral,
}

impl Bias {
    pub fn direction(&self) -> Direction {
        match self {
            Self::Bullish => Direction::Long,
            Self::Bearish => Direction::Short,
            Self::Neutral => Direction::Neutral,
        }
    }

    /// Both directional and pointing the other way
    pub fn conflicts_with(&self, other: Bias) -> bool {
        matches!(
            (self, other),
            (Self::Bullish, Self::Bearish) | (Self::Bearish, Self::Bullish)
        )
    }
}

/// Trade direction of a signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Long,
    Short,
    Neutral,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Long => "LONG",
            Self::Short => "SHORT",
            Self::Neutral => "NEUTRAL",
        }
    }

    /// +1 long, -1 short, 0 neutral
    pub fn sign(&self) -> i32 {
        match self {
            Self::Long => 1,
            Self::Short => -1,
            Self::Neutral => 0,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "LONG" | "BUY" => Some(Self::Long),
            "SHORT" | "SELL" => Some(Self::Short),
            "NEUTRAL" => Some(Self::Neutral),
            _ => None,
        }
    }
}

/// Threshold-gated recommendation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Action {
    Buy,
    Sell,
    Hold,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Buy => "BUY",
            Self::Sell => "SELL",
            Self::Hold => "HOLD",
        }
    }

    pub fn is_actionable(&self) -> bool {
        !matches!(self, Self::Hold)
    }
}

/// Outcome of a closed signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeResult {
    Win,
    Loss,
}

impl TradeResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Win => "WIN",
            Self::Loss => "LOSS",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "WIN" => Some(Self::Win),
            "LOSS" => Some(Self::Loss),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn candle(o: Decimal, h: Decimal, l: Decimal, c: Decimal) -> Candle {
        Candle {
            timestamp: 0,
            open: o,
            high: h,
            low: l,
            close: c,
            volume: dec!(1),
            confirmed: true,
        }
    }

    #[test]
    fn test_candle_validity() {
        assert!(candle(dec!(10), dec!(12), dec!(9), dec!(11)).is_valid());
        assert!(!candle(dec!(10), dec!(10.5), dec!(9), dec!(11)).is_valid());
        assert!(!candle(dec!(8), dec!(12), dec!(9), dec!(11)).is_valid());
    }

    #[test]
    fn test_orderbook_imbalance() {
        let book = OrderBook {
            symbol: "BTC-USDT".into(),
            bids: vec![BookLevel { price: dec!(99), size: dec!(3) }],
            asks: vec![BookLevel { price: dec!(101), size: dec!(1) }],
            timestamp: 0,
        };
        assert!((book.imbalance() - 0.75).abs() < 1e-9);
        assert!((book.spread_pct().unwrap() - 2.0).abs() < 1e-9);

        let empty = OrderBook { symbol: "X".into(), bids: vec![], asks: vec![], timestamp: 0 };
        assert_eq!(empty.imbalance(), 0.5);
        assert!(empty.spread_pct().is_none());
    }

    #[test]
    fn test_bias_conflict() {
        assert!(Bias::Bullish.conflicts_with(Bias::Bearish));
        assert!(!Bias::Bullish.conflicts_with(Bias::Neutral));
        assert_eq!(Bias::Bearish.direction(), Direction::Short);
    }
}
