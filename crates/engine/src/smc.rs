//! Smart Money Concept pattern detection
//!
//! Stateless heuristics over a candle window: swing points, structure breaks
//! (BOS / CHoCH), order blocks, fair value gaps, liquidity sweeps and
//! inducement wicks. Every call recomputes from scratch.
//!
//! Strength values are heuristic scores in [0,100]; the multipliers behind
//! them are tuning knobs, not a calibrated model.

use serde::{Deserialize, Serialize};

use crate::types::{Bias, Candle};

/// Detector thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmcConfig {
    /// Bars on each side a swing high/low must dominate
    pub swing_lookback: usize,
    /// Bars whose high/low form the level a structure break must cross
    pub structure_window: usize,
    /// Displacement body must be this multiple of the average body
    pub displacement_mult: f64,
    /// Volume this multiple of the average confirms an order block
    pub volume_spike_mult: f64,
    /// Bars used for average body / volume / range
    pub avg_window: usize,
    /// Minimum fair value gap as percent of price
    pub min_gap_pct: f64,
    /// Wick-to-body ratio that marks an inducement candle
    pub inducement_wick_ratio: f64,
    /// Bars whose extremes count as resting liquidity
    pub sweep_window: usize,
    /// Only patterns within this many bars of the end vote on bias
    pub recent_bars: usize,
    /// Most recent patterns kept per kind
    pub max_patterns: usize,
}

impl Default for SmcConfig {
    fn default() -> Self {
        Self {
            swing_lookback: 3,
            structure_window: 10,
            displacement_mult: 1.5,
            volume_spike_mult: 1.5,
            avg_window: 20,
            min_gap_pct: 0.05,
            inducement_wick_ratio: 2.0,
            sweep_window: 20,
            recent_bars: 50,
            max_patterns: 10,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternKind {
    OrderBlock,
    FairValueGap,
    LiquiditySweep,
    Inducement,
    BreakOfStructure,
    ChangeOfCharacter,
}

impl PatternKind {
    pub fn label(&self) -> &'static str {
        match self {
            Self::OrderBlock => "Order Block",
            Self::FairValueGap => "Fair Value Gap",
            Self::LiquiditySweep => "Liquidity Sweep",
            Self::Inducement => "Inducement",
            Self::BreakOfStructure => "BOS",
            Self::ChangeOfCharacter => "CHoCH",
        }
    }
}

/// One detected pattern
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmcPattern {
    pub kind: PatternKind,
    pub direction: Bias,
    pub price_high: f64,
    pub price_low: f64,
    pub timestamp: i64,
    /// Index of the defining candle in the analysed window
    pub index: usize,
    /// Heuristic strength in [0,100]
    pub strength: f64,
    /// Gap filled / zone traded through after formation
    pub mitigated: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SwingKind {
    High,
    Low,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwingPoint {
    pub kind: SwingKind,
    pub index: usize,
    pub timestamp: i64,
    pub price: f64,
}

/// Full result of [`analyze`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmcAnalysis {
    pub bias: Bias,
    /// Dominance of the winning side weighted by amount of evidence, [0,1]
    pub confidence: f64,
    /// Direction of the latest structure break
    pub trend: Bias,
    pub bullish_score: f64,
    pub bearish_score: f64,
    pub swing_high: Option<f64>,
    pub swing_low: Option<f64>,
    /// Last close inside the swing range: 0 = swing low (discount), 1 = swing high (premium)
    pub range_position: Option<f64>,
    pub last_structure_break: Option<SmcPattern>,
    pub structure_breaks: Vec<SmcPattern>,
    pub order_blocks: Vec<SmcPattern>,
    pub fair_value_gaps: Vec<SmcPattern>,
    pub liquidity_sweeps: Vec<SmcPattern>,
    pub inducements: Vec<SmcPattern>,
    pub candles_analyzed: usize,
}

impl SmcAnalysis {
    fn empty(candles_analyzed: usize) -> Self {
        Self {
            bias: Bias::Neutral,
            confidence: 0.0,
            trend: Bias::Neutral,
            bullish_score: 0.0,
            bearish_score: 0.0,
            swing_high: None,
            swing_low: None,
            range_position: None,
            last_structure_break: None,
            structure_breaks: Vec::new(),
            order_blocks: Vec::new(),
            fair_value_gaps: Vec::new(),
            liquidity_sweeps: Vec::new(),
            inducements: Vec::new(),
            candles_analyzed,
        }
    }

    /// Every pattern, oldest first
    pub fn all_patterns(&self) -> Vec<&SmcPattern> {
        let mut all: Vec<&SmcPattern> = self
            .structure_breaks
            .iter()
            .chain(&self.order_blocks)
            .chain(&self.fair_value_gaps)
            .chain(&self.liquidity_sweeps)
            .chain(&self.inducements)
            .collect();
        all.sort_by_key(|p| p.index);
        all
    }

    /// Nearest unmitigated order block in `direction` (by recency)
    pub fn latest_order_block(&self, direction: Bias) -> Option<&SmcPattern> {
        self.order_blocks
            .iter()
            .rev()
            .find(|ob| ob.direction == direction && !ob.mitigated)
    }
}

/// f64 columns of a candle window
struct Series {
    open: Vec<f64>,
    high: Vec<f64>,
    low: Vec<f64>,
    close: Vec<f64>,
    volume: Vec<f64>,
    timestamp: Vec<i64>,
}

impl Series {
    fn new(candles: &[Candle]) -> Self {
        Self {
            open: candles.iter().map(Candle::open_f64).collect(),
            high: candles.iter().map(Candle::high_f64).collect(),
            low: candles.iter().map(Candle::low_f64).collect(),
            close: candles.iter().map(Candle::close_f64).collect(),
            volume: candles.iter().map(Candle::volume_f64).collect(),
            timestamp: candles.iter().map(|c| c.timestamp).collect(),
        }
    }

    fn len(&self) -> usize {
        self.close.len()
    }

    fn body(&self, i: usize) -> f64 {
        (self.close[i] - self.open[i]).abs()
    }

    fn range(&self, i: usize) -> f64 {
        self.high[i] - self.low[i]
    }

    fn max_high(&self, from: usize, to: usize) -> f64 {
        self.high[from..to].iter().copied().fold(f64::MIN, f64::max)
    }

    fn min_low(&self, from: usize, to: usize) -> f64 {
        self.low[from..to].iter().copied().fold(f64::MAX, f64::min)
    }

    /// Mean of `f` over the `window` bars before `i` (falls back to bars up to `i`)
    fn trailing_mean(&self, i: usize, window: usize, f: impl Fn(usize) -> f64) -> f64 {
        let start = i.saturating_sub(window);
        let (from, to) = if start < i { (start, i) } else { (0, i + 1) };
        let n = (to - from) as f64;
        (from..to).map(f).sum::<f64>() / n
    }
}

fn keep_recent(mut patterns: Vec<SmcPattern>, max: usize) -> Vec<SmcPattern> {
    if patterns.len() > max {
        patterns.drain(..patterns.len() - max);
    }
    patterns
}

/// Swing highs/lows: a bar whose high (low) beats the `lookback` bars before
/// it strictly and is not exceeded by the `lookback` bars after it.
pub fn find_swings(candles: &[Candle], lookback: usize) -> Vec<SwingPoint> {
    let s = Series::new(candles);
    let n = s.len();
    let mut swings = Vec::new();
    if lookback == 0 || n < 2 * lookback + 1 {
        return swings;
    }

    for i in lookback..n - lookback {
        let left_high = s.max_high(i - lookback, i);
        let right_high = s.max_high(i + 1, i + lookback + 1);
        if s.high[i] > left_high && s.high[i] >= right_high {
            swings.push(SwingPoint {
                kind: SwingKind::High,
                index: i,
                timestamp: s.timestamp[i],
                price: s.high[i],
            });
        }

        let left_low = s.min_low(i - lookback, i);
        let right_low = s.min_low(i + 1, i + lookback + 1);
        if s.low[i] < left_low && s.low[i] <= right_low {
            swings.push(SwingPoint {
                kind: SwingKind::Low,
                index: i,
                timestamp: s.timestamp[i],
                price: s.low[i],
            });
        }
    }
    swings
}

/// Closes crossing the rolling high/low of the previous `window` bars.
/// A crossing with the prevailing trend (or with none yet) is a BOS, against it a CHoCH.
fn detect_structure_breaks(s: &Series, config: &SmcConfig) -> Vec<SmcPattern> {
    let window = config.structure_window.max(1);
    let mut breaks = Vec::new();
    let mut trend = Bias::Neutral;
    let mut was_above = false;
    let mut was_below = false;

    for i in window..s.len() {
        let ref_high = s.max_high(i - window, i);
        let ref_low = s.min_low(i - window, i);
        let close = s.close[i];
        let avg_range = s.trailing_mean(i, config.avg_window, |k| s.range(k)).max(f64::EPSILON);

        let above = close > ref_high;
        let below = close < ref_low;

        if above && !was_above {
            let kind = if trend == Bias::Bearish {
                PatternKind::ChangeOfCharacter
            } else {
                PatternKind::BreakOfStructure
            };
            let displacement = (close - ref_high) / avg_range;
            breaks.push(SmcPattern {
                kind,
                direction: Bias::Bullish,
                price_high: close,
                price_low: ref_high,
                timestamp: s.timestamp[i],
                index: i,
                strength: (40.0 + displacement * 30.0).clamp(0.0, 100.0),
                mitigated: false,
            });
            trend = Bias::Bullish;
        } else if below && !was_below {
            let kind = if trend == Bias::Bullish {
                PatternKind::ChangeOfCharacter
            } else {
                PatternKind::BreakOfStructure
            };
            let displacement = (ref_low - close) / avg_range;
            breaks.push(SmcPattern {
                kind,
                direction: Bias::Bearish,
                price_high: ref_low,
                price_low: close,
                timestamp: s.timestamp[i],
                index: i,
                strength: (40.0 + displacement * 30.0).clamp(0.0, 100.0),
                mitigated: false,
            });
            trend = Bias::Bearish;
        }

        was_above = above;
        was_below = below;
    }
    breaks
}

/// Last opposite-colour candle (up to 3 bars back) before a displacement candle.
/// Blocks later closed through are dropped.
fn detect_order_blocks(s: &Series, config: &SmcConfig) -> Vec<SmcPattern> {
    let n = s.len();
    let mut blocks: Vec<SmcPattern> = Vec::new();
    let mut used = std::collections::HashSet::new();

    for i in 1..n {
        let avg_body = s.trailing_mean(i, config.avg_window, |k| s.body(k));
        if avg_body <= 0.0 {
            continue;
        }
        let body_ratio = s.body(i) / avg_body;
        if body_ratio < config.displacement_mult {
            continue;
        }

        let bullish = s.close[i] > s.open[i];
        let origin = (i.saturating_sub(3)..i).rev().find(|&j| {
            if bullish {
                s.close[j] < s.open[j]
            } else {
                s.close[j] > s.open[j]
            }
        });
        let Some(j) = origin else { continue };
        if !used.insert(j) {
            continue;
        }

        let avg_volume = s.trailing_mean(i, config.avg_window, |k| s.volume[k]);
        let volume_ratio = if avg_volume > 0.0 { s.volume[i] / avg_volume } else { 1.0 };
        let volume_bonus = if volume_ratio >= config.volume_spike_mult {
            (volume_ratio * 10.0).min(30.0)
        } else {
            0.0
        };
        let strength = ((body_ratio / config.displacement_mult * 40.0).min(60.0) + volume_bonus + 10.0)
            .clamp(0.0, 100.0);

        let (zone_high, zone_low) = (s.high[j], s.low[j]);
        let mitigated = (i + 1..n).any(|k| {
            if bullish {
                s.close[k] < zone_low
            } else {
                s.close[k] > zone_high
            }
        });
        if mitigated {
            continue;
        }

        blocks.push(SmcPattern {
            kind: PatternKind::OrderBlock,
            direction: if bullish { Bias::Bullish } else { Bias::Bearish },
            price_high: zone_high,
            price_low: zone_low,
            timestamp: s.timestamp[j],
            index: j,
            strength,
            mitigated: false,
        });
    }
    blocks.sort_by_key(|b| b.index);
    blocks
}

/// Three-candle gaps: `low[i] > high[i-2]` (bullish) / `high[i] < low[i-2]` (bearish)
fn detect_fair_value_gaps(s: &Series, config: &SmcConfig) -> Vec<SmcPattern> {
    let n = s.len();
    let mut gaps = Vec::new();

    for i in 2..n {
        let price = s.close[i - 1].abs().max(f64::EPSILON);

        if s.low[i] > s.high[i - 2] {
            let (top, bottom) = (s.low[i], s.high[i - 2]);
            let gap_pct = (top - bottom) / price * 100.0;
            if gap_pct >= config.min_gap_pct {
                let filled = (i + 1..n).any(|k| s.low[k] <= bottom);
                gaps.push(SmcPattern {
                    kind: PatternKind::FairValueGap,
                    direction: Bias::Bullish,
                    price_high: top,
                    price_low: bottom,
                    timestamp: s.timestamp[i - 1],
                    index: i - 1,
                    strength: (gap_pct * 100.0).min(100.0),
                    mitigated: filled,
                });
            }
        } else if s.high[i] < s.low[i - 2] {
            let (top, bottom) = (s.low[i - 2], s.high[i]);
            let gap_pct = (top - bottom) / price * 100.0;
            if gap_pct >= config.min_gap_pct {
                let filled = (i + 1..n).any(|k| s.high[k] >= top);
                gaps.push(SmcPattern {
                    kind: PatternKind::FairValueGap,
                    direction: Bias::Bearish,
                    price_high: top,
                    price_low: bottom,
                    timestamp: s.timestamp[i - 1],
                    index: i - 1,
                    strength: (gap_pct * 100.0).min(100.0),
                    mitigated: filled,
                });
            }
        }
    }
    gaps
}

/// Wick through the rolling extreme with the close back inside.
/// Taking buy-side liquidity above highs is bearish, sell-side below lows bullish.
fn detect_liquidity_sweeps(s: &Series, config: &SmcConfig) -> Vec<SmcPattern> {
    let window = config.sweep_window.max(1);
    let mut sweeps = Vec::new();

    for i in window..s.len() {
        let ref_high = s.max_high(i - window, i);
        let ref_low = s.min_low(i - window, i);
        let range = s.range(i).max(f64::EPSILON);

        if s.high[i] > ref_high && s.close[i] < ref_high {
            let rejection = (s.high[i] - s.close[i]) / range;
            sweeps.push(SmcPattern {
                kind: PatternKind::LiquiditySweep,
                direction: Bias::Bearish,
                price_high: s.high[i],
                price_low: ref_high,
                timestamp: s.timestamp[i],
                index: i,
                strength: (40.0 + rejection * 60.0).clamp(0.0, 100.0),
                mitigated: false,
            });
        } else if s.low[i] < ref_low && s.close[i] > ref_low {
            let rejection = (s.close[i] - s.low[i]) / range;
            sweeps.push(SmcPattern {
                kind: PatternKind::LiquiditySweep,
                direction: Bias::Bullish,
                price_high: ref_low,
                price_low: s.low[i],
                timestamp: s.timestamp[i],
                index: i,
                strength: (40.0 + rejection * 60.0).clamp(0.0, 100.0),
                mitigated: false,
            });
        }
    }
    sweeps
}

/// Long-wick candles probing the recent extreme: a stop hunt before the real move
fn detect_inducements(s: &Series, config: &SmcConfig) -> Vec<SmcPattern> {
    let window = config.structure_window.max(1);
    let mut found = Vec::new();

    for i in window..s.len() {
        let body = s.body(i).max(s.close[i].abs() * 1e-6).max(f64::EPSILON);
        let upper_wick = s.high[i] - s.open[i].max(s.close[i]);
        let lower_wick = s.open[i].min(s.close[i]) - s.low[i];
        let avg_range = s.trailing_mean(i, config.avg_window, |k| s.range(k));
        let near = avg_range * 0.5;

        let lower_ratio = lower_wick / body;
        let upper_ratio = upper_wick / body;

        if lower_ratio >= config.inducement_wick_ratio
            && lower_wick > upper_wick
            && s.low[i] <= s.min_low(i - window, i) + near
        {
            found.push(SmcPattern {
                kind: PatternKind::Inducement,
                direction: Bias::Bullish,
                price_high: s.open[i].min(s.close[i]),
                price_low: s.low[i],
                timestamp: s.timestamp[i],
                index: i,
                strength: (lower_ratio * 20.0).min(100.0),
                mitigated: false,
            });
        } else if upper_ratio >= config.inducement_wick_ratio
            && upper_wick > lower_wick
            && s.high[i] >= s.max_high(i - window, i) - near
        {
            found.push(SmcPattern {
                kind: PatternKind::Inducement,
                direction: Bias::Bearish,
                price_high: s.high[i],
                price_low: s.open[i].max(s.close[i]),
                timestamp: s.timestamp[i],
                index: i,
                strength: (upper_ratio * 20.0).min(100.0),
                mitigated: false,
            });
        }
    }
    found
}

/// Weighted vote of recent patterns. The latest structure break dominates.
fn aggregate_bias(analysis: &mut SmcAnalysis, n: usize, recent_bars: usize) {
    let cutoff = n.saturating_sub(recent_bars);
    let mut bull = 0.0;
    let mut bear = 0.0;
    let mut vote = |direction: Bias, weight: f64| match direction {
        Bias::Bullish => bull += weight,
        Bias::Bearish => bear += weight,
        Bias::Neutral => {}
    };

    if let Some(brk) = &analysis.last_structure_break {
        let weight = match brk.kind {
            PatternKind::ChangeOfCharacter => 3.5,
            _ => 3.0,
        };
        vote(brk.direction, weight);
    }
    for ob in analysis.order_blocks.iter().filter(|p| p.index >= cutoff) {
        vote(ob.direction, ob.strength / 100.0);
    }
    for gap in analysis
        .fair_value_gaps
        .iter()
        .filter(|p| p.index >= cutoff && !p.mitigated)
    {
        vote(gap.direction, 0.75 * gap.strength / 100.0);
    }
    for sweep in analysis.liquidity_sweeps.iter().filter(|p| p.index >= cutoff) {
        vote(sweep.direction, sweep.strength / 100.0);
    }
    for ind in analysis.inducements.iter().filter(|p| p.index >= cutoff) {
        vote(ind.direction, 0.5 * ind.strength / 100.0);
    }

    let total = bull + bear;
    analysis.bullish_score = bull;
    analysis.bearish_score = bear;
    analysis.bias = if bull > 0.0 && bull > bear * 1.2 {
        Bias::Bullish
    } else if bear > 0.0 && bear > bull * 1.2 {
        Bias::Bearish
    } else {
        Bias::Neutral
    };
    analysis.confidence = if total > 0.0 {
        let dominance = (bull - bear).abs() / total;
        (dominance * (1.0 - (-total / 3.0).exp())).clamp(0.0, 1.0)
    } else {
        0.0
    };
}

/// Run every detector over `candles` (oldest first)
pub fn analyze(candles: &[Candle], config: &SmcConfig) -> SmcAnalysis {
    let s = Series::new(candles);
    let n = s.len();
    let mut analysis = SmcAnalysis::empty(n);
    if n < 3 {
        return analysis;
    }

    let swings = find_swings(candles, config.swing_lookback);
    analysis.swing_high = swings
        .iter()
        .rev()
        .find(|p| p.kind == SwingKind::High)
        .map(|p| p.price)
        .or_else(|| Some(s.max_high(n.saturating_sub(config.structure_window.max(1)), n)));
    analysis.swing_low = swings
        .iter()
        .rev()
        .find(|p| p.kind == SwingKind::Low)
        .map(|p| p.price)
        .or_else(|| Some(s.min_low(n.saturating_sub(config.structure_window.max(1)), n)));

    if let (Some(high), Some(low)) = (analysis.swing_high, analysis.swing_low) {
        if high > low {
            analysis.range_position = Some(((s.close[n - 1] - low) / (high - low)).clamp(0.0, 1.0));
        }
    }

    let breaks = detect_structure_breaks(&s, config);
    analysis.trend = breaks.last().map(|b| b.direction).unwrap_or(Bias::Neutral);
    analysis.last_structure_break = breaks.last().cloned();
    analysis.structure_breaks = keep_recent(breaks, config.max_patterns);
    analysis.order_blocks = keep_recent(detect_order_blocks(&s, config), config.max_patterns);
    analysis.fair_value_gaps = keep_recent(detect_fair_value_gaps(&s, config), config.max_patterns);
    analysis.liquidity_sweeps =
        keep_recent(detect_liquidity_sweeps(&s, config), config.max_patterns);
    analysis.inducements = keep_recent(detect_inducements(&s, config), config.max_patterns);

    aggregate_bias(&mut analysis, n, config.recent_bars);
    analysis
}
