//! Self-improvement trainer
//!
//! Fits two small classifiers on logged WIN/LOSS outcomes (logistic regression
//! and a boosted decision-stump ensemble), keeps whichever scores better on a
//! chronological holdout, and turns it into a new weight table and sharp
//! threshold for the scorer.

use serde::{Deserialize, Serialize};
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::factors::{MarketFactors, FACTOR_COUNT, FACTOR_NAMES};
use crate::scorer::{ConfluenceScorer, ScoreError, WeightTable};
use crate::tracker::{SignalTracker, TrackerError};
use crate::types::TradeResult;

#[derive(Debug, Error)]
pub enum TrainerError {
    #[error("Not enough samples: need {required}, got {got}")]
    InsufficientSamples { required: usize, got: usize },

    #[error("Training data contains only {0} outcomes")]
    SingleClass(&'static str),

    #[error("Trade log I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Tracker error: {0}")]
    Tracker(#[from] TrackerError),

    #[error("Trained weights rejected: {0}")]
    Score(#[from] ScoreError),

    #[error("Training cancelled")]
    Cancelled,

    #[error("Retrain already in progress")]
    AlreadyRunning,

    #[error("Training task failed: {0}")]
    Task(String),
}

/// One closed trade, one JSONL line
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeLogEntry {
    pub symbol: String,
    pub timeframe: String,
    pub factors: MarketFactors,
    /// Score when the signal was generated
    #[serde(default)]
    pub score: Option<f64>,
    pub result: TradeResult,
    #[serde(default)]
    pub pnl_pct: Option<f64>,
    /// Epoch millis
    pub timestamp: i64,
}

/// Read a JSONL trade log. Blank and malformed lines are skipped.
pub fn load_jsonl(path: impl AsRef<Path>) -> Result<Vec<TradeLogEntry>, TrainerError> {
    let path = path.as_ref();
    let reader = BufReader::new(std::fs::File::open(path)?);
    let mut entries = Vec::new();
    let mut skipped = 0usize;

    for (line_no, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        match serde_json::from_str::<TradeLogEntry>(trimmed) {
            Ok(entry) => entries.push(entry),
            Err(e) => {
                skipped += 1;
                warn!(line = line_no + 1, error = %e, "Skipping malformed trade log line");
            }
        }
    }

    info!(count = entries.len(), skipped, path = %path.display(), "Loaded trade log");
    Ok(entries)
}

// ============================================================================
// Models
// ============================================================================

type Features = [f64; FACTOR_COUNT];

fn sigmoid(z: f64) -> f64 {
    if z >= 0.0 {
        1.0 / (1.0 + (-z).exp())
    } else {
        let e = z.exp();
        e / (1.0 + e)
    }
}

/// Binary logistic regression, batch gradient descent with L2
#[derive(Debug, Clone)]
pub struct LogisticRegression {
    pub coefficients: Vec<f64>,
    pub intercept: f64,
    learning_rate: f64,
    max_iter: usize,
    tolerance: f64,
    l2: f64,
    pub cost_history: Vec<f64>,
}

impl LogisticRegression {
    pub fn new(learning_rate: f64, max_iter: usize, l2: f64) -> Self {
        Self {
            coefficients: Vec::new(),
            intercept: 0.0,
            learning_rate,
            max_iter,
            tolerance: 1e-7,
            l2,
            cost_history: Vec::new(),
        }
    }

    fn log_loss(y: &[f64], p: &[f64]) -> f64 {
        let eps = 1e-15;
        -y.iter()
            .zip(p)
            .map(|(&y, &p)| {
                let p = p.clamp(eps, 1.0 - eps);
                y * p.ln() + (1.0 - y) * (1.0 - p).ln()
            })
            .sum::<f64>()
            / y.len() as f64
    }

    pub fn fit(&mut self, x: &[Features], y: &[f64]) {
        let n = x.len() as f64;
        let mut w = vec![0.0; FACTOR_COUNT];
        let mut b = 0.0;
        self.cost_history.clear();

        for iter in 0..self.max_iter {
            let p: Vec<f64> = x
                .iter()
                .map(|row| sigmoid(row.iter().zip(&w).map(|(a, c)| a * c).sum::<f64>() + b))
                .collect();

            let mut dw = vec![0.0; FACTOR_COUNT];
            let mut db = 0.0;
            for (row, (&pi, &yi)) in x.iter().zip(p.iter().zip(y)) {
                let err = pi - yi;
                for (g, v) in dw.iter_mut().zip(row) {
                    *g += err * v;
                }
                db += err;
            }
            for (g, wi) in dw.iter_mut().zip(&w) {
                *g = *g / n + self.l2 * wi;
            }

            for (wi, g) in w.iter_mut().zip(&dw) {
                *wi -= self.learning_rate * g;
            }
            b -= self.learning_rate * db / n;

            let cost = Self::log_loss(y, &p);
            self.cost_history.push(cost);
            if iter > 0 && (self.cost_history[iter - 1] - cost).abs() < self.tolerance {
                debug!(iter, "Logistic regression converged");
                break;
            }
        }

        self.coefficients = w;
        self.intercept = b;
    }

    pub fn predict_proba(&self, row: &Features) -> f64 {
        sigmoid(row.iter().zip(&self.coefficients).map(|(a, c)| a * c).sum::<f64>() + self.intercept)
    }

    pub fn predict(&self, row: &Features) -> bool {
        self.predict_proba(row) >= 0.5
    }

    /// |coefficient| per feature
    pub fn importances(&self) -> Features {
        let mut out = [0.0; FACTOR_COUNT];
        for (o, c) in out.iter_mut().zip(&self.coefficients) {
            *o = c.abs();
        }
        out
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Stump {
    pub feature: usize,
    pub threshold: f64,
    /// +1: predicts WIN above the threshold, -1: below
    pub polarity: f64,
    pub alpha: f64,
}

impl Stump {
    fn vote(&self, row: &Features) -> f64 {
        if (row[self.feature] - self.threshold) * self.polarity > 0.0 {
            1.0
        } else {
            -1.0
        }
    }
}

/// AdaBoost over single-feature threshold stumps
#[derive(Debug, Clone, Default)]
pub struct StumpEnsemble {
    pub stumps: Vec<Stump>,
    rounds: usize,
}

impl StumpEnsemble {
    pub fn new(rounds: usize) -> Self {
        Self {
            stumps: Vec::new(),
            rounds,
        }
    }

    /// Lowest weighted-error stump over every feature and midpoint
    fn best_stump(x: &[Features], y: &[f64], weights: &[f64]) -> Option<(Stump, f64)> {
        let mut best: Option<(Stump, f64)> = None;
        for feature in 0..FACTOR_COUNT {
            let mut values: Vec<f64> = x.iter().map(|row| row[feature]).collect();
            values.sort_by(|a, b| a.total_cmp(b));
            values.dedup();
            for pair in values.windows(2) {
                let threshold = (pair[0] + pair[1]) / 2.0;
                for polarity in [1.0, -1.0] {
                    let stump = Stump {
                        feature,
                        threshold,
                        polarity,
                        alpha: 0.0,
                    };
                    let error: f64 = x
                        .iter()
                        .zip(y)
                        .zip(weights)
                        .filter(|((row, yi), _)| stump.vote(row) != **yi)
                        .map(|(_, w)| w)
                        .sum();
                    if best.as_ref().map_or(true, |(_, e)| error < *e) {
                        best = Some((stump, error));
                    }
                }
            }
        }
        best
    }

    /// `y` in {+1, -1}
    pub fn fit(&mut self, x: &[Features], y: &[f64]) {
        self.stumps.clear();
        let n = x.len();
        if n == 0 {
            return;
        }
        let mut weights = vec![1.0 / n as f64; n];

        for _ in 0..self.rounds {
            let Some((mut stump, error)) = Self::best_stump(x, y, &weights) else {
                break;
            };
            if error >= 0.5 {
                break;
            }
            let error = error.max(1e-10);
            stump.alpha = 0.5 * ((1.0 - error) / error).ln();

            for ((w, row), &yi) in weights.iter_mut().zip(x).zip(y) {
                *w *= (-stump.alpha * yi * stump.vote(row)).exp();
            }
            let total: f64 = weights.iter().sum();
            weights.iter_mut().for_each(|w| *w /= total);

            let perfect = error <= 1e-10;
            self.stumps.push(stump);
            if perfect {
                break;
            }
        }
    }

    pub fn predict(&self, row: &Features) -> bool {
        self.stumps.iter().map(|s| s.alpha * s.vote(row)).sum::<f64>() >= 0.0
    }

    /// Summed stump weight per feature
    pub fn importances(&self) -> Features {
        let mut out = [0.0; FACTOR_COUNT];
        for s in &self.stumps {
            out[s.feature] += s.alpha;
        }
        out
    }
}

// ============================================================================
// Training
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    LogisticRegression,
    StumpEnsemble,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainerConfig {
    pub min_samples: usize,
    pub train_fraction: f64,
    /// Floor for any single weight, in points out of 100
    pub min_weight: f64,
    pub threshold_candidates: Vec<f64>,
    pub min_threshold_samples: usize,
    pub learning_rate: f64,
    pub max_iter: usize,
    pub l2: f64,
    pub ensemble_rounds: usize,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            min_samples: 20,
            train_fraction: 0.75,
            min_weight: 2.0,
            threshold_candidates: vec![60.0, 65.0, 70.0, 75.0, 80.0, 85.0],
            min_threshold_samples: 5,
            learning_rate: 0.5,
            max_iter: 3000,
            l2: 0.001,
            ensemble_rounds: 25,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TrainingReport {
    pub samples: usize,
    pub train_size: usize,
    pub test_size: usize,
    pub win_rate: f64,
    pub logistic_accuracy: f64,
    pub ensemble_accuracy: f64,
    pub model: ModelKind,
    pub feature_importance: Vec<(String, f64)>,
    pub previous_weights: WeightTable,
    pub weights: WeightTable,
    pub previous_threshold: f64,
    pub sharp_threshold: f64,
    /// Win rate of samples at or above the chosen threshold
    pub threshold_win_rate: Option<f64>,
    /// Epoch seconds
    pub trained_at: i64,
}

fn accuracy(predictions: impl Iterator<Item = bool>, labels: &[bool]) -> f64 {
    if labels.is_empty() {
        return 0.0;
    }
    let correct = predictions.zip(labels).filter(|(p, l)| p == *l).count();
    correct as f64 / labels.len() as f64
}

/// Normalise to 100, floor at `min_weight`, renormalise
pub fn importances_to_weights(importances: &Features, min_weight: f64) -> Option<WeightTable> {
    let total: f64 = importances.iter().filter(|v| v.is_finite()).sum();
    if total <= 0.0 {
        return None;
    }
    let floored = importances.map(|v| {
        let v = if v.is_finite() { v } else { 0.0 };
        (v / total * 100.0).max(min_weight)
    });
    let sum: f64 = floored.iter().sum();
    Some(WeightTable::from_array(floored.map(|v| v / sum * 100.0)))
}

#[derive(Clone)]
pub struct Trainer {
    config: TrainerConfig,
}

impl Trainer {
    pub fn new(config: TrainerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TrainerConfig {
        &self.config
    }

    /// Candidate threshold with the best win rate among samples scoring at or above it
    fn pick_threshold(&self, scorer: &ConfluenceScorer, entries: &[TradeLogEntry]) -> Option<(f64, f64)> {
        let scored: Vec<(f64, bool)> = entries
            .iter()
            .filter_map(|e| {
                scorer
                    .try_score(&e.factors)
                    .ok()
                    .map(|s| (s.score, e.result == TradeResult::Win))
            })
            .collect();

        let mut best: Option<(f64, f64)> = None;
        for &threshold in &self.config.threshold_candidates {
            let above: Vec<bool> = scored.iter().filter(|(s, _)| *s >= threshold).map(|(_, w)| *w).collect();
            if above.len() < self.config.min_threshold_samples {
                continue;
            }
            let win_rate = above.iter().filter(|w| **w).count() as f64 / above.len() as f64;
            if best.map_or(true, |(_, rate)| win_rate > rate) {
                best = Some((threshold, win_rate));
            }
        }
        best
    }

    /// Fit on `entries` and produce new weights and threshold.
    /// `current` is only read; apply the report with [`ConfluenceScorer::apply_training`].
    pub fn train(&self, entries: &[TradeLogEntry], current: &ConfluenceScorer) -> Result<TrainingReport, TrainerError> {
        if entries.len() < self.config.min_samples {
            return Err(TrainerError::InsufficientSamples {
                required: self.config.min_samples,
                got: entries.len(),
            });
        }

        let mut entries: Vec<TradeLogEntry> = entries.to_vec();
        entries.sort_by_key(|e| e.timestamp);

        let wins = entries.iter().filter(|e| e.result == TradeResult::Win).count();
        if wins == 0 {
            return Err(TrainerError::SingleClass("LOSS"));
        }
        if wins == entries.len() {
            return Err(TrainerError::SingleClass("WIN"));
        }

        let x: Vec<Features> = entries.iter().map(|e| e.factors.as_array()).collect();
        let labels: Vec<bool> = entries.iter().map(|e| e.result == TradeResult::Win).collect();

        let split = ((entries.len() as f64 * self.config.train_fraction).round() as usize)
            .clamp(1, entries.len() - 1);
        let (x_train, x_test) = x.split_at(split);
        let (l_train, l_test) = labels.split_at(split);

        let y01: Vec<f64> = l_train.iter().map(|&w| if w { 1.0 } else { 0.0 }).collect();
        let ypm: Vec<f64> = l_train.iter().map(|&w| if w { 1.0 } else { -1.0 }).collect();

        let mut logistic = LogisticRegression::new(self.config.learning_rate, self.config.max_iter, self.config.l2);
        logistic.fit(x_train, &y01);
        let logistic_accuracy = accuracy(x_test.iter().map(|r| logistic.predict(r)), l_test);

        let mut ensemble = StumpEnsemble::new(self.config.ensemble_rounds);
        ensemble.fit(x_train, &ypm);
        let ensemble_accuracy = accuracy(x_test.iter().map(|r| ensemble.predict(r)), l_test);

        let (model, importances) = if ensemble_accuracy > logistic_accuracy {
            (ModelKind::StumpEnsemble, ensemble.importances())
        } else {
            (ModelKind::LogisticRegression, logistic.importances())
        };
        debug!(?model, logistic_accuracy, ensemble_accuracy, "Model selected");

        let weights = importances_to_weights(&importances, self.config.min_weight)
            .unwrap_or_else(|| current.weights().clone());

        let mut candidate = current.clone();
        candidate.apply_training(&weights, current.sharp_threshold())?;
        let threshold = self.pick_threshold(&candidate, &entries);
        let sharp_threshold = threshold.map_or(current.sharp_threshold(), |(t, _)| t);

        let total: f64 = importances.iter().sum();
        let feature_importance = FACTOR_NAMES
            .iter()
            .zip(importances)
            .map(|(name, v)| (name.to_string(), if total > 0.0 { v / total } else { 0.0 }))
            .collect();

        Ok(TrainingReport {
            samples: entries.len(),
            train_size: x_train.len(),
            test_size: x_test.len(),
            win_rate: wins as f64 / entries.len() as f64,
            logistic_accuracy,
            ensemble_accuracy,
            model,
            feature_importance,
            previous_weights: current.weights().clone(),
            weights,
            previous_threshold: current.sharp_threshold(),
            sharp_threshold,
            threshold_win_rate: threshold.map(|(_, rate)| rate),
            trained_at: chrono::Utc::now().timestamp(),
        })
    }
}

impl Default for Trainer {
    fn default() -> Self {
        Self::new(TrainerConfig::default())
    }
}

// ============================================================================
// Progress + orchestration
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TrainerStatus {
    Idle,
    Training,
    Completed,
    Error,
}

/// Shared trainer state polled by the API
pub struct TrainerProgress {
    pub status: RwLock<TrainerStatus>,
    pub cancelled: AtomicBool,
    pub last_report: RwLock<Option<TrainingReport>>,
    pub error_message: RwLock<Option<String>>,
    pub runs: RwLock<u32>,
}

impl TrainerProgress {
    pub fn new() -> Self {
        Self {
            status: RwLock::new(TrainerStatus::Idle),
            cancelled: AtomicBool::new(false),
            last_report: RwLock::new(None),
            error_message: RwLock::new(None),
            runs: RwLock::new(0),
        }
    }

    /// Claim the training slot. Returns false if a retrain already holds it.
    pub fn try_start(&self) -> bool {
        let mut status = self.status.write().unwrap();
        if *status == TrainerStatus::Training {
            return false;
        }
        *status = TrainerStatus::Training;
        self.cancelled.store(false, Ordering::Relaxed);
        *self.error_message.write().unwrap() = None;
        true
    }

}

impl Default for TrainerProgress {
    fn default() -> Self {
        Self::new()
    }
}

/// Where training samples come from
#[derive(Debug, Clone)]
pub enum TrainingSource {
    Database,
    File(PathBuf),
}

/// Claim the slot, then load samples, train, install the result into `scorer`
/// and record progress
pub async fn run_retrain(
    tracker: &SignalTracker,
    source: TrainingSource,
    scorer: &RwLock<ConfluenceScorer>,
    trainer: &Trainer,
    progress: &TrainerProgress,
) -> Result<TrainingReport, TrainerError> {
    if !progress.try_start() {
        return Err(TrainerError::AlreadyRunning);
    }
    run_claimed_retrain(tracker, source, scorer, trainer, progress).await
}

/// Same as [`run_retrain`] for a caller that already won [`TrainerProgress::try_start`]
pub async fn run_claimed_retrain(
    tracker: &SignalTracker,
    source: TrainingSource,
    scorer: &RwLock<ConfluenceScorer>,
    trainer: &Trainer,
    progress: &TrainerProgress,
) -> Result<TrainingReport, TrainerError> {
    *progress.runs.write().unwrap() += 1;
    info!(?source, "Retrain starting");

    let result = async {
        let entries = match &source {
            TrainingSource::Database => tracker.trade_log().await?,
            TrainingSource::File(path) => load_jsonl(path)?,
        };
        if progress.cancelled.load(Ordering::Relaxed) {
            return Err(TrainerError::Cancelled);
        }

        let current = scorer.read().unwrap().clone();
        let trainer = trainer.clone();
        // model fitting is CPU-bound
        let report = tokio::task::spawn_blocking(move || trainer.train(&entries, &current))
            .await
            .map_err(|e| TrainerError::Task(e.to_string()))??;
        scorer
            .write()
            .unwrap()
            .apply_training(&report.weights, report.sharp_threshold)?;
        Ok(report)
    }
    .await;

    match &result {
        Ok(report) => {
            info!(
                samples = report.samples,
                model = ?report.model,
                threshold = report.sharp_threshold,
                "Retrain complete, scorer updated"
            );
            *progress.last_report.write().unwrap() = Some(report.clone());
            *progress.status.write().unwrap() = TrainerStatus::Completed;
        }
        Err(e) => {
            error!("Retrain failed: {}", e);
            *progress.error_message.write().unwrap() = Some(e.to_string());
            *progress.status.write().unwrap() = TrainerStatus::Error;
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Bias, Direction};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    /// Wins iff momentum > 0.55, other factors are noise
    fn dataset(n: usize, seed: u64) -> Vec<TradeLogEntry> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..n)
            .map(|i| {
                let momentum: f64 = rng.gen();
                let factors = MarketFactors {
                    smc_confidence: rng.gen(),
                    structure_alignment: rng.gen(),
                    orderbook_imbalance: rng.gen(),
                    momentum,
                    volume_regime: rng.gen(),
                    funding_rate: rng.gen(),
                    direction: Direction::Long,
                    smc_bias: Bias::Neutral,
                    indicator_bias: Bias::Neutral,
                    raw_funding_rate: None,
                    open_interest_change: None,
                };
                TradeLogEntry {
                    symbol: "BTC-USDT".into(),
                    timeframe: "1H".into(),
                    factors,
                    score: None,
                    result: if momentum > 0.55 { TradeResult::Win } else { TradeResult::Loss },
                    pnl_pct: None,
                    timestamp: i as i64,
                }
            })
            .collect()
    }

    #[test]
    fn test_learns_dominant_factor() {
        let entries = dataset(120, 7);
        let report = Trainer::default().train(&entries, &ConfluenceScorer::default()).unwrap();

        let w = report.weights.as_array();
        let max_idx = w
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i)
            .unwrap();
        assert_eq!(FACTOR_NAMES[max_idx], "momentum");
        assert!((report.weights.total() - 100.0).abs() < 1e-6);
        assert_eq!(report.train_size, 90);
        assert_eq!(report.test_size, 30);
        assert!(report.logistic_accuracy.max(report.ensemble_accuracy) > 0.8);
    }

    #[test]
    fn test_threshold_selection() {
        let entries = dataset(120, 11);
        let report = Trainer::default().train(&entries, &ConfluenceScorer::default()).unwrap();
        assert!((60.0..=85.0).contains(&report.sharp_threshold));
        assert!(report.threshold_win_rate.unwrap() > 0.9);
    }

    #[test]
    fn test_weights_floor() {
        let weights = importances_to_weights(&[0.0, 0.0, 0.0, 1.0, 0.0, 0.0], 2.0).unwrap();
        assert!((weights.total() - 100.0).abs() < 1e-9);
        assert!(weights.smc_confidence > 1.5);
        assert!(weights.momentum > 90.0);
        assert!(importances_to_weights(&[0.0; 6], 2.0).is_none());
    }

    #[test]
    fn test_insufficient_samples() {
        let err = Trainer::default()
            .train(&dataset(10, 1), &ConfluenceScorer::default())
            .unwrap_err();
        assert!(matches!(err, TrainerError::InsufficientSamples { required: 20, got: 10 }));
    }

    #[test]
    fn test_single_class_rejected() {
        let mut entries = dataset(30, 3);
        for e in &mut entries {
            e.result = TradeResult::Win;
        }
        let err = Trainer::default().train(&entries, &ConfluenceScorer::default()).unwrap_err();
        assert!(matches!(err, TrainerError::SingleClass("WIN")));
    }

    #[test]
    fn test_stump_ensemble_separable() {
        let x: Vec<Features> = (0..20).map(|i| [0.5, 0.5, i as f64 / 20.0, 0.5, 0.5, 0.5]).collect();
        let y: Vec<f64> = (0..20).map(|i| if i >= 10 { 1.0 } else { -1.0 }).collect();
        let mut ensemble = StumpEnsemble::new(10);
        ensemble.fit(&x, &y);

        assert_eq!(ensemble.stumps.len(), 1);
        assert_eq!(ensemble.stumps[0].feature, 2);
        assert!(ensemble.predict(&[0.5, 0.5, 0.9, 0.5, 0.5, 0.5]));
        assert!(!ensemble.predict(&[0.5, 0.5, 0.1, 0.5, 0.5, 0.5]));
    }

    #[test]
    fn test_load_jsonl_skips_malformed() {
        let entries = dataset(2, 5);
        let mut body = String::new();
        for e in &entries {
            body.push_str(&serde_json::to_string(e).unwrap());
            body.push('\n');
        }
        body.push_str("{not json}\n\n");

        let path = std::env::temp_dir().join(format!("trainer_log_{}.jsonl", std::process::id()));
        std::fs::write(&path, body).unwrap();
        let loaded = load_jsonl(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(loaded.len(), 2);
        assert!(load_jsonl("/nonexistent/log.jsonl").is_err());
    }

    #[tokio::test]
    async fn test_run_retrain_updates_scorer() {
        use crate::circuit_breaker::CircuitBreaker;
        use persistence::Database;
        use std::sync::Arc;

        let db = Database::in_memory().await.unwrap();
        let tracker = SignalTracker::new(db.pool_clone(), Arc::new(CircuitBreaker::default()));
        let scorer = RwLock::new(ConfluenceScorer::default());
        let progress = TrainerProgress::new();

        let path = std::env::temp_dir().join(format!("retrain_log_{}.jsonl", std::process::id()));
        let body: String = dataset(80, 9)
            .iter()
            .map(|e| serde_json::to_string(e).unwrap() + "\n")
            .collect();
        std::fs::write(&path, body).unwrap();

        let report = run_retrain(&tracker, TrainingSource::File(path.clone()), &scorer, &Trainer::default(), &progress)
            .await
            .unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(*progress.status.read().unwrap(), TrainerStatus::Completed);
        assert_eq!(scorer.read().unwrap().sharp_threshold(), report.sharp_threshold);
        let installed = scorer.read().unwrap().weights().as_array();
        for (a, b) in installed.iter().zip(report.weights.as_array()) {
            assert!((a - b).abs() < 1e-9);
        }

        // empty database: too few samples, scorer untouched
        let err = run_retrain(&tracker, TrainingSource::Database, &scorer, &Trainer::default(), &progress).await;
        assert!(err.is_err());
        assert_eq!(*progress.status.read().unwrap(), TrainerStatus::Error);
        assert_eq!(scorer.read().unwrap().sharp_threshold(), report.sharp_threshold);
    }

    #[test]
    fn test_try_start_claims_once() {
        let progress = TrainerProgress::new();
        assert!(progress.try_start());
        assert_eq!(*progress.status.read().unwrap(), TrainerStatus::Training);
        assert!(!progress.try_start());

        *progress.status.write().unwrap() = TrainerStatus::Error;
        assert!(progress.try_start());
    }

    #[tokio::test]
    async fn test_run_retrain_refuses_while_training() {
        use crate::circuit_breaker::CircuitBreaker;
        use persistence::Database;
        use std::sync::Arc;

        let db = Database::in_memory().await.unwrap();
        let tracker = SignalTracker::new(db.pool_clone(), Arc::new(CircuitBreaker::default()));
        let scorer = RwLock::new(ConfluenceScorer::default());
        let progress = TrainerProgress::new();
        assert!(progress.try_start());

        let err = run_retrain(&tracker, TrainingSource::Database, &scorer, &Trainer::default(), &progress)
            .await
            .unwrap_err();
        assert!(matches!(err, TrainerError::AlreadyRunning));
        assert_eq!(*progress.runs.read().unwrap(), 0);
        assert_eq!(*progress.status.read().unwrap(), TrainerStatus::Training);
    }
}
