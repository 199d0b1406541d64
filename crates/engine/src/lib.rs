//! SMC Signals Engine: market data, analysis, scoring and self-improvement
//!
//! Provides:
//! - OKX public API client with TTL caching and synthetic fallback
//! - Technical indicators and Smart Money Concepts detection
//! - Weighted confluence scoring (0-100) with quality tiers
//! - Signal generation, alert rules and outcome tracking with a circuit breaker
//! - Trainer that re-weights the scorer from closed trades
//! - Live price streaming over the OKX websocket

pub mod alerts;
pub mod api;
pub mod cache;
pub mod circuit_breaker;
pub mod factors;
pub mod indicators;
pub mod narrative;
pub mod scorer;
pub mod signal;
pub mod smc;
pub mod streamer;
pub mod tracker;
pub mod trainer;
pub mod types;

// Re-exports for convenience
pub use alerts::{default_rules, load_rules_file, Alert, AlertCondition, AlertEngine, AlertPriority, AlertRule};
pub use api::{MarketDataSource, OkxClient};
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerState};
pub use factors::{build_factors, MarketFactors, FACTOR_NAMES};
pub use indicators::{compute_snapshot, IndicatorConfig, IndicatorSnapshot};
pub use narrative::narrate;
pub use scorer::{ConfluenceScore, ConfluenceScorer, ScoreError, Tier, WeightTable};
pub use signal::{GeneratedSignal, SignalConfig, SignalEngine};
pub use smc::{SmcAnalysis, SmcConfig, SmcPattern};
pub use streamer::{run_price_streamer, PriceStreamer, StreamedPrice, StreamerStatus};
pub use tracker::{OutcomeReport, SignalTracker, TrackerError, TrackerStats};
pub use trainer::{
    run_claimed_retrain, run_retrain, Trainer, TrainerConfig, TrainerError, TrainerProgress, TrainerStatus,
    TrainingReport, TrainingSource,
};
pub use types::*;
