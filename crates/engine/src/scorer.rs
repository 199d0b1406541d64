//! Confluence scorer
//!
//! Weighted sum of [`MarketFactors`] on a 0-100 scale plus a handful of
//! additive adjustments, then tiered and gated into an action by the sharp
//! threshold. Weights and threshold are replaceable by the trainer.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::factors::{MarketFactors, FACTOR_COUNT, FACTOR_NAMES};
use crate::types::{Action, Direction};

pub const DEFAULT_SHARP_THRESHOLD: f64 = 70.0;
pub const GOOD_THRESHOLD: f64 = 60.0;
pub const AVERAGE_THRESHOLD: f64 = 40.0;
/// Score returned when scoring fails
pub const NEUTRAL_SCORE: f64 = 50.0;

/// |funding| at or above this is treated as crowded
pub const EXTREME_FUNDING: f64 = 0.0005;
/// Open interest increase (percent) that confirms a move
pub const OI_CONFIRMATION_PCT: f64 = 2.0;

const FUNDING_ADJUSTMENT: f64 = 5.0;
const BIAS_ADJUSTMENT: f64 = 10.0;
const OI_ADJUSTMENT: f64 = 5.0;
const NEUTRAL_PENALTY: f64 = 15.0;

#[derive(Debug, Error, PartialEq)]
pub enum ScoreError {
    #[error("Factor {0} is not a finite number")]
    NonFiniteFactor(&'static str),

    #[error("Invalid weights: {0}")]
    InvalidWeights(String),

    #[error("Invalid sharp threshold: {0}")]
    InvalidThreshold(f64),
}

// ============================================================================
// Weights
// ============================================================================

/// Factor weights, normalised to sum to 100
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightTable {
    pub smc_confidence: f64,
    pub structure_alignment: f64,
    pub orderbook_imbalance: f64,
    pub momentum: f64,
    pub volume_regime: f64,
    pub funding_rate: f64,
}

impl Default for WeightTable {
    fn default() -> Self {
        Self {
            smc_confidence: 25.0,
            structure_alignment: 15.0,
            orderbook_imbalance: 15.0,
            momentum: 20.0,
            volume_regime: 15.0,
            funding_rate: 10.0,
        }
    }
}

impl WeightTable {
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

    pub fn from_array(w: [f64; FACTOR_COUNT]) -> Self {
        Self {
            smc_confidence: w[0],
            structure_alignment: w[1],
            orderbook_imbalance: w[2],
            momentum: w[3],
            volume_regime: w[4],
            funding_rate: w[5],
        }
    }

    pub fn total(&self) -> f64 {
        self.as_array().iter().sum()
    }

    /// Rescale so the weights sum to 100. Negative, non-finite or all-zero weights are rejected.
    pub fn normalized(&self) -> Result<Self, ScoreError> {
        let w = self.as_array();
        if let Some(i) = w.iter().position(|v| !v.is_finite() || *v < 0.0) {
            return Err(ScoreError::InvalidWeights(format!(
                "{} = {}",
                FACTOR_NAMES[i], w[i]
            )));
        }
        let total = self.total();
        if total <= 0.0 {
            return Err(ScoreError::InvalidWeights("weights sum to zero".into()));
        }
        Ok(Self::from_array(w.map(|v| v / total * 100.0)))
    }

    /// `(name, weight)` pairs
    pub fn entries(&self) -> Vec<(&'static str, f64)> {
        FACTOR_NAMES.iter().copied().zip(self.as_array()).collect()
    }
}

// ============================================================================
// Result types
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Tier {
    Sharp,
    Good,
    Average,
    Poor,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sharp => "SHARP",
            Self::Good => "GOOD",
            Self::Average => "AVERAGE",
            Self::Poor => "POOR",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "SHARP" => Some(Self::Sharp),
            "GOOD" => Some(Self::Good),
            "AVERAGE" => Some(Self::Average),
            "POOR" => Some(Self::Poor),
            _ => None,
        }
    }

    /// Sharp > Good > Average > Poor
    pub fn rank(&self) -> u8 {
        match self {
            Self::Sharp => 3,
            Self::Good => 2,
            Self::Average => 1,
            Self::Poor => 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreComponent {
    pub name: String,
    pub factor: f64,
    pub weight: f64,
    pub contribution: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Adjustment {
    pub reason: String,
    pub points: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfluenceScore {
    pub score: f64,
    pub tier: Tier,
    pub action: Action,
    pub direction: Direction,
    pub sharp_threshold: f64,
    pub components: Vec<ScoreComponent>,
    pub adjustments: Vec<Adjustment>,
    /// true when this is the neutral fallback after a scoring error
    pub fallback: bool,
}

impl ConfluenceScore {
    pub fn is_sharp(&self) -> bool {
        self.tier == Tier::Sharp
    }
}

// ============================================================================
// Scorer
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfluenceScorer {
    weights: WeightTable,
    sharp_threshold: f64,
}

impl Default for ConfluenceScorer {
    fn default() -> Self {
        Self {
            weights: WeightTable::default(),
            sharp_threshold: DEFAULT_SHARP_THRESHOLD,
        }
    }
}

impl ConfluenceScorer {
    pub fn new(sharp_threshold: f64) -> Result<Self, ScoreError> {
        let mut scorer = Self::default();
        scorer.set_threshold(sharp_threshold)?;
        Ok(scorer)
    }

    pub fn weights(&self) -> &WeightTable {
        &self.weights
    }

    pub fn sharp_threshold(&self) -> f64 {
        self.sharp_threshold
    }

    fn set_threshold(&mut self, threshold: f64) -> Result<(), ScoreError> {
        if !threshold.is_finite() || !(0.0..=100.0).contains(&threshold) {
            return Err(ScoreError::InvalidThreshold(threshold));
        }
        self.sharp_threshold = threshold;
        Ok(())
    }

    /// Install trained weights and threshold. Nothing changes on error.
    pub fn apply_training(&mut self, weights: &WeightTable, sharp_threshold: f64) -> Result<(), ScoreError> {
        let normalized = weights.normalized()?;
        self.set_threshold(sharp_threshold)?;
        self.weights = normalized;
        Ok(())
    }

    /// Tier for a final score. The Good cut never sits above the sharp threshold.
    pub fn tier_for(&self, score: f64) -> Tier {
        if score >= self.sharp_threshold {
            Tier::Sharp
        } else if score >= GOOD_THRESHOLD.min(self.sharp_threshold) {
            Tier::Good
        } else if score >= AVERAGE_THRESHOLD {
            Tier::Average
        } else {
            Tier::Poor
        }
    }

    fn action_for(tier: Tier, direction: Direction) -> Action {
        match (tier, direction) {
            (Tier::Sharp, Direction::Long) => Action::Buy,
            (Tier::Sharp, Direction::Short) => Action::Sell,
            _ => Action::Hold,
        }
    }

    /// Additive adjustments from the factor context
    fn adjustments(factors: &MarketFactors) -> Vec<Adjustment> {
        let mut out = Vec::new();
        let direction = factors.direction;

        if direction == Direction::Neutral {
            out.push(Adjustment {
                reason: "No directional bias".into(),
                points: -NEUTRAL_PENALTY,
            });
            return out;
        }

        if let Some(rate) = factors.raw_funding_rate {
            if rate.abs() >= EXTREME_FUNDING {
                // positive funding: longs pay, the crowd is long
                let crowd = if rate > 0.0 { Direction::Long } else { Direction::Short };
                if crowd == direction {
                    out.push(Adjustment {
                        reason: format!("Extreme funding {:.4}% with the crowd", rate * 100.0),
                        points: -FUNDING_ADJUSTMENT,
                    });
                } else {
                    out.push(Adjustment {
                        reason: format!("Extreme funding {:.4}% against the crowd", rate * 100.0),
                        points: FUNDING_ADJUSTMENT,
                    });
                }
            }
        }

        let (smc, ind) = (factors.smc_bias, factors.indicator_bias);
        if smc == ind && smc.direction() != Direction::Neutral {
            out.push(Adjustment {
                reason: "SMC and indicators agree".into(),
                points: BIAS_ADJUSTMENT,
            });
        } else if smc.conflicts_with(ind) {
            out.push(Adjustment {
                reason: "SMC and indicators conflict".into(),
                points: -BIAS_ADJUSTMENT,
            });
        }

        if let Some(change) = factors.open_interest_change {
            if change >= OI_CONFIRMATION_PCT {
                out.push(Adjustment {
                    reason: format!("Open interest up {change:.1}%"),
                    points: OI_ADJUSTMENT,
                });
            }
        }

        out
    }

    pub fn try_score(&self, factors: &MarketFactors) -> Result<ConfluenceScore, ScoreError> {
        let values = factors.as_array();
        if let Some(i) = values.iter().position(|v| !v.is_finite()) {
            return Err(ScoreError::NonFiniteFactor(FACTOR_NAMES[i]));
        }
        let weights = self.weights.normalized()?;

        let components: Vec<ScoreComponent> = FACTOR_NAMES
            .iter()
            .zip(values)
            .zip(weights.as_array())
            .map(|((&name, factor), weight)| {
                let factor = factor.clamp(0.0, 1.0);
                ScoreComponent {
                    name: name.to_string(),
                    factor,
                    weight,
                    contribution: factor * weight,
                }
            })
            .collect();

        let base: f64 = components.iter().map(|c| c.contribution).sum();
        let adjustments = Self::adjustments(factors);
        let score = (base + adjustments.iter().map(|a| a.points).sum::<f64>()).clamp(0.0, 100.0);

        let tier = self.tier_for(score);
        Ok(ConfluenceScore {
            score,
            tier,
            action: Self::action_for(tier, factors.direction),
            direction: factors.direction,
            sharp_threshold: self.sharp_threshold,
            components,
            adjustments,
            fallback: false,
        })
    }

    /// Never fails: errors collapse to the neutral score
    pub fn score(&self, factors: &MarketFactors) -> ConfluenceScore {
        match self.try_score(factors) {
            Ok(score) => score,
            Err(e) => {
                warn!("Scoring failed, using neutral score: {}", e);
                self.neutral(factors.direction)
            }
        }
    }

    fn neutral(&self, direction: Direction) -> ConfluenceScore {
        ConfluenceScore {
            score: NEUTRAL_SCORE,
            tier: self.tier_for(NEUTRAL_SCORE),
            action: Action::Hold,
            direction,
            sharp_threshold: self.sharp_threshold,
            components: Vec::new(),
            adjustments: Vec::new(),
            fallback: true,
        }
    }
}
