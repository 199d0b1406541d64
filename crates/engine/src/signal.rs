//! Signal pipeline: market data → indicators → SMC → factors → score → levels

use anyhow::Result;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::{Arc, RwLock};
use tracing::{debug, info, warn};

use crate::api::okx::{normalize_symbol, normalize_timeframe};
use crate::api::MarketDataSource;
use crate::circuit_breaker::CircuitBreaker;
use crate::factors::{build_factors, MarketFactors};
use crate::indicators::{compute_snapshot, IndicatorConfig, IndicatorSnapshot};
use crate::narrative::narrate;
use crate::scorer::{ConfluenceScore, ConfluenceScorer, Tier};
use crate::smc::{analyze, SmcAnalysis, SmcConfig};
use crate::types::{to_decimal, Action, Bias, Candle, DataSource, Direction};
use persistence::SignalRecord;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalConfig {
    pub candle_limit: u32,
    pub orderbook_depth: u32,
    /// Target distance as a multiple of the stop distance
    pub reward_ratio: f64,
    /// Stop distance bounds in ATRs
    pub min_stop_atr: f64,
    pub max_stop_atr: f64,
    /// Stop distance in ATRs when no protective level exists
    pub default_stop_atr: f64,
    pub indicators: IndicatorConfig,
    pub smc: SmcConfig,
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            candle_limit: 200,
            orderbook_depth: 50,
            reward_ratio: 2.0,
            min_stop_atr: 0.5,
            max_stop_atr: 3.0,
            default_stop_atr: 1.5,
            indicators: IndicatorConfig::default(),
            smc: SmcConfig::default(),
        }
    }
}

/// Candles plus both analyzers, without scoring
#[derive(Debug, Clone, Serialize)]
pub struct MarketSnapshot {
    pub symbol: String,
    pub timeframe: String,
    pub data_source: DataSource,
    pub candles: Vec<Candle>,
    pub indicators: IndicatorSnapshot,
    pub smc: SmcAnalysis,
}

/// Full pipeline output
#[derive(Debug, Clone, Serialize)]
pub struct GeneratedSignal {
    pub fingerprint: String,
    pub symbol: String,
    pub timeframe: String,
    pub action: Action,
    pub direction: Direction,
    pub score: ConfluenceScore,
    pub entry_price: Decimal,
    pub stop_loss: Decimal,
    pub take_profit: Decimal,
    pub risk_reward: f64,
    /// Open time of the last candle, epoch millis
    pub candle_timestamp: i64,
    /// Epoch millis
    pub generated_at: i64,
    pub data_source: DataSource,
    pub factors: MarketFactors,
    pub indicators: IndicatorSnapshot,
    pub smc: SmcAnalysis,
    pub reasons: Vec<String>,
    pub narrative: String,
    /// Action was downgraded to Hold by the circuit breaker
    pub held_by_circuit_breaker: bool,
}

impl GeneratedSignal {
    pub fn tier(&self) -> Tier {
        self.score.tier
    }

    /// Actionable and built on exchange data. Signals scored on a synthetic
    /// fallback series are never stored, so they cannot reach the breaker or
    /// the trainer.
    pub fn is_trackable(&self) -> bool {
        self.action.is_actionable() && self.data_source != DataSource::Synthetic
    }

    pub fn to_record(&self) -> SignalRecord {
        SignalRecord {
            id: None,
            fingerprint: self.fingerprint.clone(),
            symbol: self.symbol.clone(),
            timeframe: self.timeframe.clone(),
            action: self.action.as_str().to_string(),
            direction: self.direction.as_str().to_string(),
            score: self.score.score,
            tier: self.score.tier.as_str().to_string(),
            entry_price: self.entry_price.to_string(),
            stop_loss: self.stop_loss.to_string(),
            take_profit: self.take_profit.to_string(),
            factors_json: serde_json::to_string(&self.factors).unwrap_or_else(|_| "{}".into()),
            reasons_json: serde_json::to_string(&self.reasons).unwrap_or_else(|_| "[]".into()),
            data_source: self.data_source.as_str().to_string(),
            created_at: self.generated_at,
            result: None,
            exit_price: None,
            pnl_pct: None,
            closed_at: None,
        }
    }
}

/// Dedup key for a signal on a given candle
pub fn fingerprint(symbol: &str, timeframe: &str, candle_timestamp: i64, action: Action) -> String {
    let input = format!("{}|{}|{}|{}", symbol, timeframe, candle_timestamp, action.as_str());
    format!("{:x}", Sha256::digest(input.as_bytes()))
}

/// Stop and target for `direction`. The stop sits behind the nearest protective
/// swing or order block, bounded to `[min_stop_atr, max_stop_atr]` ATRs.
pub fn compute_levels(
    entry: f64,
    direction: Direction,
    atr: f64,
    smc: &SmcAnalysis,
    config: &SignalConfig,
) -> (f64, f64) {
    let sign = match direction {
        Direction::Long => 1.0,
        Direction::Short => -1.0,
        Direction::Neutral => return (entry, entry),
    };
    let atr = if atr.is_finite() && atr > 0.0 { atr } else { entry.abs() * 0.01 };

    let protective = match direction {
        Direction::Long => [
            smc.swing_low,
            smc.latest_order_block(Bias::Bullish).map(|ob| ob.price_low),
        ]
        .into_iter()
        .flatten()
        .filter(|level| *level < entry)
        .fold(None, |best: Option<f64>, level| Some(best.map_or(level, |b| b.max(level)))),
        _ => [
            smc.swing_high,
            smc.latest_order_block(Bias::Bearish).map(|ob| ob.price_high),
        ]
        .into_iter()
        .flatten()
        .filter(|level| *level > entry)
        .fold(None, |best: Option<f64>, level| Some(best.map_or(level, |b| b.min(level)))),
    };

    let distance = protective
        .map(|level| (entry - level).abs())
        .unwrap_or(atr * config.default_stop_atr)
        .clamp(atr * config.min_stop_atr, atr * config.max_stop_atr);

    let stop = entry - sign * distance;
    let target = entry + sign * distance * config.reward_ratio;
    (stop, target)
}

fn collect_reasons(
    smc: &SmcAnalysis,
    indicators: &IndicatorSnapshot,
    factors: &MarketFactors,
    score: &ConfluenceScore,
    data_source: DataSource,
) -> Vec<String> {
    let mut reasons = Vec::new();

    if let Some(brk) = &smc.last_structure_break {
        reasons.push(format!(
            "{} {:?} at {:.4}",
            brk.kind.label(),
            brk.direction,
            brk.price_low.max(brk.price_high)
        ));
    }
    let active_obs = smc.order_blocks.iter().filter(|ob| !ob.mitigated).count();
    if active_obs > 0 {
        reasons.push(format!("{} active order block(s)", active_obs));
    }
    let open_gaps = smc.fair_value_gaps.iter().filter(|g| !g.mitigated).count();
    if open_gaps > 0 {
        reasons.push(format!("{} unfilled fair value gap(s)", open_gaps));
    }
    if let Some(sweep) = smc.liquidity_sweeps.last() {
        reasons.push(format!("{:?} liquidity sweep", sweep.direction));
    }
    if !smc.inducements.is_empty() {
        reasons.push("Inducement wick near the range extreme".into());
    }

    if indicators.is_overbought() {
        reasons.push(format!("RSI overbought ({:.1})", indicators.rsi));
    } else if indicators.is_oversold() {
        reasons.push(format!("RSI oversold ({:.1})", indicators.rsi));
    }
    match indicators.trend_bias() {
        Bias::Bullish => reasons.push("EMA and MACD bullish".into()),
        Bias::Bearish => reasons.push("EMA and MACD bearish".into()),
        Bias::Neutral => {}
    }
    if indicators.volume_ratio >= 1.5 {
        reasons.push(format!("Volume {:.1}x average", indicators.volume_ratio));
    }
    if factors.orderbook_imbalance >= 0.65 {
        reasons.push("Order book supports the move".into());
    } else if factors.orderbook_imbalance <= 0.35 {
        reasons.push("Order book leans against the move".into());
    }

    reasons.extend(score.adjustments.iter().map(|a| a.reason.clone()));

    if data_source == DataSource::Synthetic {
        reasons.push("Synthetic fallback data, exchange unavailable".into());
    }
    reasons
}

/// Runs the whole pipeline against a [`MarketDataSource`]
pub struct SignalEngine {
    source: Arc<dyn MarketDataSource>,
    scorer: Arc<RwLock<ConfluenceScorer>>,
    breaker: Arc<CircuitBreaker>,
    config: SignalConfig,
}

impl SignalEngine {
    pub fn new(
        source: Arc<dyn MarketDataSource>,
        scorer: Arc<RwLock<ConfluenceScorer>>,
        breaker: Arc<CircuitBreaker>,
    ) -> Self {
        Self {
            source,
            scorer,
            breaker,
            config: SignalConfig::default(),
        }
    }

    pub fn with_config(mut self, config: SignalConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &SignalConfig {
        &self.config
    }

    /// Candles, indicators and SMC for `symbol`/`timeframe`
    pub async fn analyze_market(&self, symbol: &str, timeframe: &str) -> Result<MarketSnapshot> {
        let symbol = normalize_symbol(symbol)?;
        let timeframe = normalize_timeframe(timeframe)?;

        let (candles, data_source) = self
            .source
            .candles(&symbol, &timeframe, self.config.candle_limit)
            .await?;
        debug!(symbol, timeframe, count = candles.len(), source = data_source.as_str(), "Candles loaded");

        let indicators = compute_snapshot(&candles, &self.config.indicators)?;
        let smc = analyze(&candles, &self.config.smc);

        Ok(MarketSnapshot {
            symbol,
            timeframe,
            data_source,
            candles,
            indicators,
            smc,
        })
    }

    pub async fn generate(&self, symbol: &str, timeframe: &str) -> Result<GeneratedSignal> {
        let snapshot = self.analyze_market(symbol, timeframe).await?;
        let MarketSnapshot {
            symbol,
            timeframe,
            data_source,
            candles,
            indicators,
            smc,
        } = snapshot;

        let (orderbook, funding, oi_change) = tokio::join!(
            self.source.orderbook(&symbol, self.config.orderbook_depth),
            self.source.funding_rate(&symbol),
            self.source.open_interest_change(&symbol),
        );
        let orderbook = orderbook
            .map_err(|e| warn!(symbol, error = %e, "Order book unavailable"))
            .ok();
        let funding = funding
            .map_err(|e| warn!(symbol, error = %e, "Funding rate unavailable"))
            .ok();
        let oi_change = oi_change
            .map_err(|e| debug!(symbol, error = %e, "Open interest change unavailable"))
            .ok();

        let factors = build_factors(&smc, &indicators, orderbook.as_ref(), funding.as_ref(), oi_change);
        let mut score = self.scorer.read().unwrap().score(&factors);
        let mut reasons = collect_reasons(&smc, &indicators, &factors, &score, data_source);

        let mut held_by_circuit_breaker = false;
        if score.action.is_actionable() && self.breaker.is_tripped() {
            let state = self.breaker.state();
            reasons.push(format!(
                "Circuit breaker tripped after {} consecutive losses, holding",
                state.consecutive_losses
            ));
            score.action = Action::Hold;
            held_by_circuit_breaker = true;
        }

        let last = candles
            .last()
            .ok_or_else(|| anyhow::anyhow!("No candles for {} {}", symbol, timeframe))?;
        let entry = last.close_f64();
        let (stop, target) = compute_levels(entry, factors.direction, indicators.atr, &smc, &self.config);
        let risk = (entry - stop).abs();
        let risk_reward = if risk > 0.0 { (target - entry).abs() / risk } else { 0.0 };

        let action = score.action;
        let mut signal = GeneratedSignal {
            fingerprint: fingerprint(&symbol, &timeframe, last.timestamp, action),
            symbol,
            timeframe,
            action,
            direction: factors.direction,
            entry_price: last.close,
            stop_loss: to_decimal(stop),
            take_profit: to_decimal(target),
            risk_reward,
            candle_timestamp: last.timestamp,
            generated_at: chrono::Utc::now().timestamp_millis(),
            data_source,
            score,
            factors,
            indicators,
            smc,
            reasons,
            narrative: String::new(),
            held_by_circuit_breaker,
        };
        signal.narrative = narrate(&signal);

        info!(
            symbol = %signal.symbol,
            timeframe = %signal.timeframe,
            score = format!("{:.1}", signal.score.score),
            tier = signal.score.tier.as_str(),
            action = signal.action.as_str(),
            "Signal generated"
        );
        Ok(signal)
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::FixtureSource;
    use super::*;
    use crate::types::TradeResult;

    fn engine(source: FixtureSource, breaker: Arc<CircuitBreaker>) -> SignalEngine {
        SignalEngine::new(
            Arc::new(source),
            Arc::new(RwLock::new(ConfluenceScorer::default())),
            breaker,
        )
    }

    #[test]
    fn test_fingerprint_is_stable() {
        let a = fingerprint("BTC-USDT", "1H", 1_000, Action::Buy);
        assert_eq!(a, fingerprint("BTC-USDT", "1H", 1_000, Action::Buy));
        assert_ne!(a, fingerprint("BTC-USDT", "1H", 1_000, Action::Sell));
        assert_ne!(a, fingerprint("BTC-USDT", "4H", 1_000, Action::Buy));
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_levels_are_bounded_by_atr() {
        let smc = SmcAnalysis {
            swing_low: Some(50.0),
            ..analyze(&[], &SmcConfig::default())
        };
        let config = SignalConfig::default();

        // swing far below: stop capped at 3 ATR
        let (stop, target) = compute_levels(100.0, Direction::Long, 2.0, &smc, &config);
        assert!((stop - 94.0).abs() < 1e-9);
        assert!((target - 112.0).abs() < 1e-9);

        // swing too close: stop widened to 0.5 ATR
        let near = SmcAnalysis { swing_low: Some(99.9), ..smc.clone() };
        let (stop, _) = compute_levels(100.0, Direction::Long, 2.0, &near, &config);
        assert!((stop - 99.0).abs() < 1e-9);

        // short without protective level: default distance
        let (stop, target) = compute_levels(100.0, Direction::Short, 2.0, &smc, &config);
        assert!((stop - 103.0).abs() < 1e-9);
        assert!((target - 94.0).abs() < 1e-9);

        assert_eq!(compute_levels(100.0, Direction::Neutral, 2.0, &smc, &config), (100.0, 100.0));
    }

    #[tokio::test]
    async fn test_rising_market_generates_long() {
        let signal = engine(FixtureSource::rising(), Arc::new(CircuitBreaker::default()))
            .generate("btc", "1h")
            .await
            .unwrap();

        assert_eq!(signal.symbol, "BTC-USDT");
        assert_eq!(signal.timeframe, "1H");
        assert_eq!(signal.direction, Direction::Long);
        assert!(signal.stop_loss < signal.entry_price);
        assert!(signal.take_profit > signal.entry_price);
        assert!((signal.risk_reward - 2.0).abs() < 1e-6);
        assert!((0.0..=100.0).contains(&signal.score.score));
        assert!(!signal.narrative.is_empty());
        assert!(!signal.reasons.is_empty());
        if signal.score.tier == Tier::Sharp {
            assert_eq!(signal.action, Action::Buy);
        }
    }

    #[tokio::test]
    async fn test_tripped_breaker_holds() {
        let breaker = Arc::new(CircuitBreaker::new(1));
        breaker.record(TradeResult::Loss);

        let signal = engine(FixtureSource::rising(), breaker)
            .generate("BTC-USDT", "1H")
            .await
            .unwrap();
        assert_eq!(signal.action, Action::Hold);
        if signal.score.tier == Tier::Sharp {
            assert!(signal.held_by_circuit_breaker);
            assert!(signal.reasons.iter().any(|r| r.contains("Circuit breaker")));
        }
    }

    #[tokio::test]
    async fn test_synthetic_signal_is_not_trackable() {
        let live = engine(FixtureSource::rising(), Arc::new(CircuitBreaker::default()))
            .generate("BTC-USDT", "1H")
            .await
            .unwrap();
        let source = FixtureSource {
            data_source: DataSource::Synthetic,
            ..FixtureSource::rising()
        };
        let synthetic = engine(source, Arc::new(CircuitBreaker::default()))
            .generate("BTC-USDT", "1H")
            .await
            .unwrap();

        assert_eq!(synthetic.action, live.action);
        assert_eq!(live.is_trackable(), live.action.is_actionable());
        assert!(!synthetic.is_trackable());
    }

    #[tokio::test]
    async fn test_flat_market_holds() {
        let signal = engine(FixtureSource::flat(), Arc::new(CircuitBreaker::default()))
            .generate("ETH-USDT", "4h")
            .await
            .unwrap();
        assert_eq!(signal.direction, Direction::Neutral);
        assert_eq!(signal.action, Action::Hold);
        assert_eq!(signal.stop_loss, signal.entry_price);
    }

    #[tokio::test]
    async fn test_record_conversion() {
        let signal = engine(FixtureSource::rising(), Arc::new(CircuitBreaker::default()))
            .generate("BTC-USDT", "1H")
            .await
            .unwrap();
        let record = signal.to_record();
        assert_eq!(record.fingerprint, signal.fingerprint);
        assert_eq!(record.direction, "LONG");
        assert_eq!(record.data_source, "live");
        let factors: MarketFactors = serde_json::from_str(&record.factors_json).unwrap();
        assert_eq!(factors.direction, signal.factors.direction);
        assert!((factors.momentum - signal.factors.momentum).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_invalid_timeframe_is_error() {
        let result = engine(FixtureSource::flat(), Arc::new(CircuitBreaker::default()))
            .generate("BTC-USDT", "7m")
            .await;
        assert!(result.is_err());
    }
}
