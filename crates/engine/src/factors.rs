//! Market factor builder
//!
//! Turns the raw analyzer outputs into six `[0,1]` scores oriented toward the
//! candidate direction (1.0 = fully supports it, 0.5 = no information).

use serde::{Deserialize, Serialize};

use crate::indicators::IndicatorSnapshot;
use crate::smc::SmcAnalysis;
use crate::types::{Bias, Direction, FundingRate, OrderBook};

/// Funding rate at which the funding factor saturates
const FUNDING_SATURATION: f64 = 0.001;

/// Number of weighted factors, fixed order shared with the scorer and trainer
pub const FACTOR_COUNT: usize = 6;

pub const FACTOR_NAMES: [&str; FACTOR_COUNT] = [
    "smc_confidence",
    "structure_alignment",
    "orderbook_imbalance",
    "momentum",
    "volume_regime",
    "funding_rate",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketFactors {
    pub smc_confidence: f64,
    pub structure_alignment: f64,
    pub orderbook_imbalance: f64,
    pub momentum: f64,
    pub volume_regime: f64,
    pub funding_rate: f64,

    // Context for score adjustments
    pub direction: Direction,
    pub smc_bias: Bias,
    pub indicator_bias: Bias,
    #[serde(default)]
    pub raw_funding_rate: Option<f64>,
    /// Open interest change in percent
    #[serde(default)]
    pub open_interest_change: Option<f64>,
}

impl MarketFactors {
    /// All factors at 0.5, no direction
    pub fn neutral() -> Self {
        Self {
            smc_confidence: 0.5,
            structure_alignment: 0.5,
            orderbook_imbalance: 0.5,
            momentum: 0.5,
            volume_regime: 0.5,
            funding_rate: 0.5,
            direction: Direction::Neutral,
            smc_bias: Bias::Neutral,
            indicator_bias: Bias::Neutral,
            raw_funding_rate: None,
            open_interest_change: None,
        }
    }

    /// Weighted factors in [`FACTOR_NAMES`] order
    pub fn as_array(&self) -> [f64; FACTOR_COUNT] {
        [
            self.smc_confidence,
            self.structure_alignment,
            self.orderbook_imbalance,
            self.momentum,
            self.volume_regime,
            self.funding_rate,
        ]
    }
}

/// Map a bullish-oriented value in [0,1] onto `direction`
fn orient(bullish: f64, direction: Direction) -> f64 {
    let value = match direction {
        Direction::Long => bullish,
        Direction::Short => 1.0 - bullish,
        Direction::Neutral => 0.5,
    };
    value.clamp(0.0, 1.0)
}

/// 0.5 ± 0.5·`amount` depending on whether `bias` agrees with `direction`
fn agreement(bias: Bias, direction: Direction, amount: f64) -> f64 {
    let amount = amount.clamp(0.0, 1.0);
    let value = match (bias.direction(), direction) {
        (_, Direction::Neutral) | (Direction::Neutral, _) => 0.5,
        (a, b) if a == b => 0.5 + 0.5 * amount,
        _ => 0.5 - 0.5 * amount,
    };
    value.clamp(0.0, 1.0)
}

fn finite_or(value: f64, fallback: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        fallback
    }
}

pub fn build_factors(
    smc: &SmcAnalysis,
    indicators: &IndicatorSnapshot,
    orderbook: Option<&OrderBook>,
    funding: Option<&FundingRate>,
    oi_change: Option<f64>,
) -> MarketFactors {
    let indicator_bias = indicators.trend_bias();
    let direction = match smc.bias {
        Bias::Neutral => indicator_bias.direction(),
        bias => bias.direction(),
    };

    let smc_confidence = agreement(smc.bias, direction, finite_or(smc.confidence, 0.0));

    let structure_alignment = match &smc.last_structure_break {
        Some(brk) => agreement(brk.direction, direction, finite_or(brk.strength, 0.0) / 100.0),
        None => 0.5,
    };

    let orderbook_imbalance = orderbook
        .map(|book| orient(book.imbalance(), direction))
        .unwrap_or(0.5);

    let momentum = orient(finite_or(indicators.momentum_score(), 0.5), direction);

    // Above-average volume backs whichever way price is moving
    let volume_regime = (finite_or(indicators.volume_ratio, 1.0) / 2.0).clamp(0.0, 1.0);

    // Positive funding = crowded longs, so it leans bearish
    let raw_funding_rate = funding.map(|f| f.funding_rate).filter(|r| r.is_finite());
    let funding_rate = raw_funding_rate
        .map(|rate| {
            let bullish = 0.5 - 0.5 * (rate / FUNDING_SATURATION).clamp(-1.0, 1.0);
            orient(bullish, direction)
        })
        .unwrap_or(0.5);

    MarketFactors {
        smc_confidence,
        structure_alignment,
        orderbook_imbalance,
        momentum,
        volume_regime,
        funding_rate,
        direction,
        smc_bias: smc.bias,
        indicator_bias,
        raw_funding_rate,
        open_interest_change: oi_change.filter(|c| c.is_finite()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::test_support::candles_from_closes;
    use crate::indicators::{compute_snapshot, IndicatorConfig};
    use crate::smc::{analyze, SmcConfig};
    use crate::types::BookLevel;
    use rust_decimal_macros::dec;

    fn uptrend() -> (SmcAnalysis, IndicatorSnapshot) {
        let closes: Vec<f64> = (0..80).map(|i| 100.0 + i as f64).collect();
        let candles = candles_from_closes(&closes, 0.25);
        (
            analyze(&candles, &SmcConfig::default()),
            compute_snapshot(&candles, &IndicatorConfig::default()).unwrap(),
        )
    }

    fn book(bid: rust_decimal::Decimal, ask: rust_decimal::Decimal) -> OrderBook {
        OrderBook {
            symbol: "BTC-USDT".into(),
            bids: vec![BookLevel { price: dec!(99), size: bid }],
            asks: vec![BookLevel { price: dec!(101), size: ask }],
            timestamp: 0,
        }
    }

    #[test]
    fn test_uptrend_factors_favor_long() {
        let (smc, snap) = uptrend();
        let factors = build_factors(&smc, &snap, Some(&book(dec!(3), dec!(1))), None, Some(3.0));

        assert_eq!(factors.direction, Direction::Long);
        assert!(factors.smc_confidence > 0.5);
        assert!(factors.structure_alignment > 0.5);
        assert!((factors.orderbook_imbalance - 0.75).abs() < 1e-9);
        assert!(factors.momentum > 0.5);
        assert_eq!(factors.funding_rate, 0.5);
        assert_eq!(factors.open_interest_change, Some(3.0));
        for value in factors.as_array() {
            assert!((0.0..=1.0).contains(&value));
        }
    }

    #[test]
    fn test_funding_is_contrarian() {
        let (smc, snap) = uptrend();
        let crowded_longs = FundingRate {
            symbol: "BTC-USDT-SWAP".into(),
            funding_rate: 0.0008,
            next_funding_rate: None,
            funding_time: 0,
        };
        let factors = build_factors(&smc, &snap, None, Some(&crowded_longs), None);
        assert!(factors.funding_rate < 0.5);
        assert_eq!(factors.raw_funding_rate, Some(0.0008));
        assert_eq!(factors.orderbook_imbalance, 0.5);
    }

    #[test]
    fn test_neutral_direction_centres_directional_factors() {
        let candles = candles_from_closes(&[100.0; 60], 0.5);
        let smc = analyze(&candles, &SmcConfig::default());
        let snap = compute_snapshot(&candles, &IndicatorConfig::default()).unwrap();
        let factors = build_factors(&smc, &snap, Some(&book(dec!(5), dec!(1))), None, None);

        assert_eq!(factors.direction, Direction::Neutral);
        assert_eq!(factors.orderbook_imbalance, 0.5);
        assert_eq!(factors.momentum, 0.5);
        assert_eq!(factors.smc_confidence, 0.5);
    }
}
