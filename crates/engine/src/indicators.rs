//! Technical indicators over a candle series
//!
//! Feeds the `ta` indicators bar by bar and keeps the last value of each,
//! producing an [`IndicatorSnapshot`] for the factor builder.

use serde::{Deserialize, Serialize};
use ta::indicators::{
    AverageTrueRange, BollingerBands, ExponentialMovingAverage, MovingAverageConvergenceDivergence,
    RelativeStrengthIndex, SimpleMovingAverage,
};
use ta::{DataItem, Next};
use thiserror::Error;

use crate::types::{Bias, Candle};

#[derive(Debug, Error, PartialEq)]
pub enum IndicatorError {
    #[error("Not enough candles: need {required}, got {got}")]
    InsufficientData { required: usize, got: usize },

    #[error("Invalid indicator parameter: {0}")]
    InvalidParameter(String),
}

/// Indicator periods
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndicatorConfig {
    pub rsi_period: usize,
    pub ema_fast: usize,
    pub ema_slow: usize,
    pub macd_fast: usize,
    pub macd_slow: usize,
    pub macd_signal: usize,
    pub bb_period: usize,
    pub bb_multiplier: f64,
    pub atr_period: usize,
    pub volume_period: usize,
}

impl Default for IndicatorConfig {
    fn default() -> Self {
        Self {
            rsi_period: 14,
            ema_fast: 9,
            ema_slow: 21,
            macd_fast: 12,
            macd_slow: 26,
            macd_signal: 9,
            bb_period: 20,
            bb_multiplier: 2.0,
            atr_period: 14,
            volume_period: 20,
        }
    }
}

impl IndicatorConfig {
    /// Candles needed before every indicator has warmed up
    pub fn min_candles(&self) -> usize {
        [
            self.rsi_period + 1,
            self.ema_slow,
            self.macd_slow + self.macd_signal,
            self.bb_period,
            self.atr_period + 1,
            self.volume_period,
        ]
        .into_iter()
        .max()
        .unwrap_or(1)
    }
}

/// Last value of every indicator after the whole series
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndicatorSnapshot {
    pub rsi: f64,
    pub ema_fast: f64,
    pub ema_slow: f64,
    pub macd: f64,
    pub macd_signal: f64,
    pub macd_histogram: f64,
    /// Histogram one bar earlier
    pub prev_macd_histogram: f64,
    pub bb_upper: f64,
    pub bb_middle: f64,
    pub bb_lower: f64,
    pub atr: f64,
    pub volume_avg: f64,
    /// Last volume divided by its moving average
    pub volume_ratio: f64,
    pub last_close: f64,
}

impl IndicatorSnapshot {
    /// EMA cross and MACD histogram agree → directional, otherwise neutral
    pub fn trend_bias(&self) -> Bias {
        if self.ema_fast > self.ema_slow && self.macd_histogram > 0.0 {
            Bias::Bullish
        } else if self.ema_fast < self.ema_slow && self.macd_histogram < 0.0 {
            Bias::Bearish
        } else {
            Bias::Neutral
        }
    }

    /// Position of the close inside the Bollinger band, 0 = lower, 1 = upper
    pub fn bb_position(&self) -> f64 {
        let width = self.bb_upper - self.bb_lower;
        if width <= 0.0 {
            return 0.5;
        }
        ((self.last_close - self.bb_lower) / width).clamp(0.0, 1.0)
    }

    /// Bullish momentum in [0,1]: RSI level, MACD histogram sign and slope, EMA cross
    pub fn momentum_score(&self) -> f64 {
        let step = |x: f64| {
            if x > 0.0 {
                1.0
            } else if x < 0.0 {
                0.0
            } else {
                0.5
            }
        };
        let rsi = (self.rsi / 100.0).clamp(0.0, 1.0);
        let histogram = step(self.macd_histogram);
        let slope = step(self.macd_histogram - self.prev_macd_histogram);
        let cross = step(self.ema_fast - self.ema_slow);
        (0.4 * rsi + 0.25 * histogram + 0.1 * slope + 0.25 * cross).clamp(0.0, 1.0)
    }

    pub fn is_overbought(&self) -> bool {
        self.rsi >= 70.0
    }

    pub fn is_oversold(&self) -> bool {
        self.rsi <= 30.0
    }
}

fn param<T>(result: Result<T, ta::errors::TaError>, what: &str) -> Result<T, IndicatorError> {
    result.map_err(|e| IndicatorError::InvalidParameter(format!("{what}: {e:?}")))
}

/// Compute all indicators over `candles` (oldest first)
pub fn compute_snapshot(
    candles: &[Candle],
    config: &IndicatorConfig,
) -> Result<IndicatorSnapshot, IndicatorError> {
    let required = config.min_candles();
    if candles.len() < required {
        return Err(IndicatorError::InsufficientData {
            required,
            got: candles.len(),
        });
    }

    let mut rsi = param(RelativeStrengthIndex::new(config.rsi_period), "RSI period")?;
    let mut ema_fast = param(ExponentialMovingAverage::new(config.ema_fast), "fast EMA period")?;
    let mut ema_slow = param(ExponentialMovingAverage::new(config.ema_slow), "slow EMA period")?;
    let mut macd = param(
        MovingAverageConvergenceDivergence::new(config.macd_fast, config.macd_slow, config.macd_signal),
        "MACD periods",
    )?;
    let mut bb = param(
        BollingerBands::new(config.bb_period, config.bb_multiplier),
        "Bollinger params",
    )?;
    let mut atr = param(AverageTrueRange::new(config.atr_period), "ATR period")?;
    let mut volume_sma = param(SimpleMovingAverage::new(config.volume_period), "volume period")?;

    let mut snapshot = IndicatorSnapshot {
        rsi: 50.0,
        ema_fast: 0.0,
        ema_slow: 0.0,
        macd: 0.0,
        macd_signal: 0.0,
        macd_histogram: 0.0,
        prev_macd_histogram: 0.0,
        bb_upper: 0.0,
        bb_middle: 0.0,
        bb_lower: 0.0,
        atr: 0.0,
        volume_avg: 0.0,
        volume_ratio: 1.0,
        last_close: 0.0,
    };

    let mut last_volume = 0.0;
    for candle in candles {
        let close = candle.close_f64();
        let volume = candle.volume_f64();

        snapshot.rsi = rsi.next(close);
        snapshot.ema_fast = ema_fast.next(close);
        snapshot.ema_slow = ema_slow.next(close);

        let m = macd.next(close);
        snapshot.prev_macd_histogram = snapshot.macd_histogram;
        snapshot.macd = m.macd;
        snapshot.macd_signal = m.signal;
        snapshot.macd_histogram = m.histogram;

        let b = bb.next(close);
        snapshot.bb_upper = b.upper;
        snapshot.bb_middle = b.average;
        snapshot.bb_lower = b.lower;

        // ATR needs DataItem; the builder rejects inconsistent bars, keep the last value then
        if let Ok(bar) = DataItem::builder()
            .open(candle.open_f64())
            .high(candle.high_f64())
            .low(candle.low_f64())
            .close(close)
            .volume(volume)
            .build()
        {
            snapshot.atr = atr.next(&bar);
        }

        snapshot.volume_avg = volume_sma.next(volume);
        snapshot.last_close = close;
        last_volume = volume;
    }

    snapshot.volume_ratio = if snapshot.volume_avg > 0.0 {
        last_volume / snapshot.volume_avg
    } else {
        1.0
    };

    Ok(snapshot)
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::types::{to_decimal, Candle};

    /// Candles with the given closes, open = previous close, wicks of `wick` on both sides
    pub fn candles_from_closes(closes: &[f64], wick: f64) -> Vec<Candle> {
        let mut prev = closes.first().copied().unwrap_or(100.0);
        closes
            .iter()
            .enumerate()
            .map(|(i, &close)| {
                let open = prev;
                prev = close;
                Candle {
                    timestamp: i as i64 * 3_600_000,
                    open: to_decimal(open),
                    high: to_decimal(open.max(close) + wick),
                    low: to_decimal(open.min(close) - wick),
                    close: to_decimal(close),
                    volume: to_decimal(100.0),
                    confirmed: true,
                }
            })
            .collect()
    }
}
