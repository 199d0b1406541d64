//! Signal tracking: persistence, WIN/LOSS outcomes, statistics and the trade log

use rust_decimal::Decimal;
use serde::Serialize;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerState};
use crate::factors::MarketFactors;
use crate::signal::GeneratedSignal;
use crate::trainer::TradeLogEntry;
use crate::types::{to_f64, Direction, TradeResult};
use persistence::{DbError, SignalOutcome, SignalRecord, SignalRepository, SignalStats, SqlitePool, SymbolStats};

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("Signal {0} not found")]
    NotFound(i64),

    #[error("Signal {0} already has an outcome")]
    AlreadyClosed(i64),

    #[error("Signal {0} has no direction to evaluate")]
    NotDirectional(i64),

    #[error("Invalid price: {0}")]
    InvalidPrice(String),

    #[error("Database error: {0}")]
    Database(#[from] DbError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// WIN iff the exit moved in the signal's direction. A flat exit is a LOSS.
/// Returns the result and the direction-signed PnL in percent.
pub fn evaluate_outcome(direction: Direction, entry: Decimal, exit: Decimal) -> Option<(TradeResult, f64)> {
    if entry <= Decimal::ZERO || direction == Direction::Neutral {
        return None;
    }
    let move_sign = match exit.cmp(&entry) {
        std::cmp::Ordering::Greater => 1,
        std::cmp::Ordering::Less => -1,
        std::cmp::Ordering::Equal => 0,
    };
    let result = if move_sign != 0 && move_sign == direction.sign() {
        TradeResult::Win
    } else {
        TradeResult::Loss
    };
    let pnl_pct = to_f64((exit - entry) / entry * Decimal::ONE_HUNDRED) * direction.sign() as f64;
    Some((result, pnl_pct))
}

#[derive(Debug, Clone, Serialize)]
pub struct OutcomeReport {
    pub id: i64,
    pub symbol: String,
    pub result: TradeResult,
    pub entry_price: String,
    pub exit_price: String,
    pub pnl_pct: f64,
    /// This outcome tripped the circuit breaker
    pub circuit_breaker_tripped: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct TrackerStats {
    #[serde(flatten)]
    pub overall: SignalStats,
    pub by_symbol: Vec<SymbolStats>,
    pub circuit_breaker: CircuitBreakerState,
}

/// Converts a closed record into a trainer sample. Rows with unparseable factors are skipped.
pub fn record_to_log_entry(record: &SignalRecord) -> Option<TradeLogEntry> {
    let result = TradeResult::parse(record.result.as_deref()?)?;
    let factors: MarketFactors = match serde_json::from_str(&record.factors_json) {
        Ok(f) => f,
        Err(e) => {
            warn!(id = ?record.id, error = %e, "Skipping signal with unreadable factors");
            return None;
        }
    };
    Some(TradeLogEntry {
        symbol: record.symbol.clone(),
        timeframe: record.timeframe.clone(),
        factors,
        score: Some(record.score),
        result,
        pnl_pct: record.pnl_pct.as_deref().and_then(|p| p.parse().ok()),
        timestamp: record.closed_at.unwrap_or(record.created_at),
    })
}

pub struct SignalTracker {
    pool: SqlitePool,
    breaker: Arc<CircuitBreaker>,
}

impl SignalTracker {
    pub fn new(pool: SqlitePool, breaker: Arc<CircuitBreaker>) -> Self {
        Self { pool, breaker }
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    /// Store a signal. Returns `(id, inserted)`; a repeated fingerprint is not inserted again.
    pub async fn record(&self, signal: &GeneratedSignal) -> Result<(i64, bool), TrackerError> {
        let repo = SignalRepository::new(&self.pool);
        let (id, inserted) = repo.save(&signal.to_record()).await?;
        if inserted {
            info!(id, symbol = %signal.symbol, action = signal.action.as_str(), "Signal recorded");
        }
        Ok((id, inserted))
    }

    /// Close an open directional signal at `exit_price` and feed the circuit breaker
    pub async fn record_outcome(&self, id: i64, exit_price: Decimal) -> Result<OutcomeReport, TrackerError> {
        if exit_price <= Decimal::ZERO {
            return Err(TrackerError::InvalidPrice(exit_price.to_string()));
        }
        let repo = SignalRepository::new(&self.pool);
        let record = repo.get_by_id(id).await?.ok_or(TrackerError::NotFound(id))?;
        if record.result.is_some() {
            return Err(TrackerError::AlreadyClosed(id));
        }

        let direction = Direction::parse(&record.direction).unwrap_or(Direction::Neutral);
        let entry: Decimal = record
            .entry_price
            .parse()
            .map_err(|_| TrackerError::InvalidPrice(record.entry_price.clone()))?;
        let (result, pnl_pct) =
            evaluate_outcome(direction, entry, exit_price).ok_or(TrackerError::NotDirectional(id))?;

        let outcome = SignalOutcome {
            result: result.as_str().to_string(),
            exit_price: exit_price.to_string(),
            pnl_pct: format!("{:.4}", pnl_pct),
            closed_at: chrono::Utc::now().timestamp_millis(),
        };
        if !repo.record_outcome(id, &outcome).await? {
            // closed concurrently between the read and the update
            return Err(TrackerError::AlreadyClosed(id));
        }

        let tripped = self.breaker.record(result);
        info!(id, symbol = %record.symbol, result = result.as_str(), pnl_pct = format!("{:.2}", pnl_pct), "Outcome recorded");

        Ok(OutcomeReport {
            id,
            symbol: record.symbol,
            result,
            entry_price: record.entry_price,
            exit_price: outcome.exit_price,
            pnl_pct,
            circuit_breaker_tripped: tripped,
        })
    }

    pub async fn recent(&self, limit: i64, symbol: Option<&str>) -> Result<Vec<SignalRecord>, TrackerError> {
        let repo = SignalRepository::new(&self.pool);
        Ok(repo.get_recent(limit, symbol).await?)
    }

    /// Signals still waiting for an exit price, oldest first
    pub async fn open_signals(&self) -> Result<Vec<SignalRecord>, TrackerError> {
        let repo = SignalRepository::new(&self.pool);
        Ok(repo.get_open().await?)
    }

    pub async fn stats(&self) -> Result<TrackerStats, TrackerError> {
        let repo = SignalRepository::new(&self.pool);
        Ok(TrackerStats {
            overall: repo.get_stats().await?,
            by_symbol: repo.get_symbol_stats().await?,
            circuit_breaker: self.breaker.state(),
        })
    }

    /// Closed signals as trainer samples, oldest first
    pub async fn trade_log(&self) -> Result<Vec<TradeLogEntry>, TrackerError> {
        let repo = SignalRepository::new(&self.pool);
        let closed = repo.get_closed().await?;
        Ok(closed.iter().filter_map(record_to_log_entry).collect())
    }

    /// Write closed signals as JSONL. Returns the number of lines written.
    pub async fn export_trade_log(&self, path: impl AsRef<Path>) -> Result<usize, TrackerError> {
        let path = path.as_ref();
        let entries = self.trade_log().await?;

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let mut file = std::io::BufWriter::new(std::fs::File::create(path)?);
        for entry in &entries {
            serde_json::to_writer(&mut file, entry)?;
            file.write_all(b"\n")?;
        }
        file.flush()?;

        info!(count = entries.len(), path = %path.display(), "Exported trade log");
        Ok(entries.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scorer::ConfluenceScorer;
    use crate::signal::test_support::FixtureSource;
    use crate::signal::SignalEngine;
    use persistence::Database;
    use rust_decimal_macros::dec;
    use std::sync::RwLock;

    async fn setup(max_losses: u32) -> (Database, SignalTracker, SignalEngine) {
        let db = Database::in_memory().await.unwrap();
        let breaker = Arc::new(CircuitBreaker::new(max_losses));
        let tracker = SignalTracker::new(db.pool_clone(), breaker.clone());
        let engine = SignalEngine::new(
            Arc::new(FixtureSource::rising()),
            Arc::new(RwLock::new(ConfluenceScorer::default())),
            breaker,
        );
        (db, tracker, engine)
    }

    #[test]
    fn test_evaluate_outcome() {
        let (r, pnl) = evaluate_outcome(Direction::Long, dec!(100), dec!(110)).unwrap();
        assert_eq!(r, TradeResult::Win);
        assert!((pnl - 10.0).abs() < 1e-9);

        let (r, pnl) = evaluate_outcome(Direction::Short, dec!(100), dec!(110)).unwrap();
        assert_eq!(r, TradeResult::Loss);
        assert!((pnl + 10.0).abs() < 1e-9);

        let (r, _) = evaluate_outcome(Direction::Short, dec!(100), dec!(95)).unwrap();
        assert_eq!(r, TradeResult::Win);

        let (r, pnl) = evaluate_outcome(Direction::Long, dec!(100), dec!(100)).unwrap();
        assert_eq!(r, TradeResult::Loss);
        assert_eq!(pnl, 0.0);

        assert!(evaluate_outcome(Direction::Neutral, dec!(100), dec!(110)).is_none());
    }

    #[tokio::test]
    async fn test_record_then_outcome() {
        let (_db, tracker, engine) = setup(3).await;
        let signal = engine.generate("BTC-USDT", "1H").await.unwrap();
        assert_eq!(signal.direction, Direction::Long);

        let (id, inserted) = tracker.record(&signal).await.unwrap();
        assert!(inserted);
        let (again, inserted) = tracker.record(&signal).await.unwrap();
        assert_eq!(again, id);
        assert!(!inserted);
        let open = tracker.open_signals().await.unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].id, Some(id));

        let exit = signal.entry_price + dec!(5);
        let report = tracker.record_outcome(id, exit).await.unwrap();
        assert_eq!(report.result, TradeResult::Win);
        assert!(report.pnl_pct > 0.0);
        assert!(tracker.open_signals().await.unwrap().is_empty());

        assert!(matches!(
            tracker.record_outcome(id, exit).await,
            Err(TrackerError::AlreadyClosed(_))
        ));
        assert!(matches!(
            tracker.record_outcome(999, exit).await,
            Err(TrackerError::NotFound(999))
        ));

        let stats = tracker.stats().await.unwrap();
        assert_eq!(stats.overall.wins, 1);
        assert_eq!(stats.by_symbol.len(), 1);
    }

    #[tokio::test]
    async fn test_losses_trip_breaker() {
        let (_db, tracker, engine) = setup(2).await;
        let mut signal = engine.generate("BTC-USDT", "1H").await.unwrap();

        for i in 0..2 {
            signal.fingerprint = format!("fp-{i}");
            let (id, _) = tracker.record(&signal).await.unwrap();
            let report = tracker
                .record_outcome(id, signal.entry_price - dec!(1))
                .await
                .unwrap();
            assert_eq!(report.result, TradeResult::Loss);
            assert_eq!(report.circuit_breaker_tripped, i == 1);
        }
        assert!(tracker.breaker().is_tripped());
    }

    #[tokio::test]
    async fn test_export_trade_log() {
        let (_db, tracker, engine) = setup(3).await;
        let signal = engine.generate("BTC-USDT", "1H").await.unwrap();
        let (id, _) = tracker.record(&signal).await.unwrap();
        tracker.record_outcome(id, signal.entry_price + dec!(1)).await.unwrap();

        let path = std::env::temp_dir().join(format!("trade_log_{}.jsonl", std::process::id()));
        let written = tracker.export_trade_log(&path).await.unwrap();
        let contents = std::fs::read_to_string(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(written, 1);
        let entry: TradeLogEntry = serde_json::from_str(contents.lines().next().unwrap()).unwrap();
        assert_eq!(entry.result, TradeResult::Win);
        assert_eq!(entry.symbol, "BTC-USDT");
    }
}
