//! Signal repository: generated signals and their WIN/LOSS outcomes

use crate::DbResult;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};

/// A persisted signal row
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SignalRecord {
    pub id: Option<i64>,
    /// SHA-256 of symbol/timeframe/candle/action, used for dedup
    pub fingerprint: String,
    pub symbol: String,
    pub timeframe: String,
    pub action: String,
    pub direction: String,
    pub score: f64,
    pub tier: String,
    pub entry_price: String,
    pub stop_loss: String,
    pub take_profit: String,
    pub factors_json: String,
    pub reasons_json: String,
    pub data_source: String,
    /// Epoch millis
    pub created_at: i64,
    pub result: Option<String>,
    pub exit_price: Option<String>,
    pub pnl_pct: Option<String>,
    pub closed_at: Option<i64>,
}

/// Outcome written once when a signal is closed
#[derive(Debug, Clone)]
pub struct SignalOutcome {
    pub result: String,
    pub exit_price: String,
    pub pnl_pct: String,
    pub closed_at: i64,
}

/// Aggregated outcome statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SignalStats {
    pub total_signals: i64,
    pub open_signals: i64,
    pub closed_signals: i64,
    pub wins: i64,
    pub losses: i64,
    /// Percentage, 0 when nothing is closed
    pub win_rate: f64,
    pub avg_pnl_pct: f64,
}

/// Per-symbol breakdown of closed signals
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SymbolStats {
    pub symbol: String,
    pub closed_signals: i64,
    pub wins: i64,
    pub avg_pnl_pct: f64,
}

const SELECT_COLUMNS: &str = r#"
    SELECT id, fingerprint, symbol, timeframe, action, direction, score, tier,
           entry_price, stop_loss, take_profit, factors_json, reasons_json,
           data_source, created_at, result, exit_price, pnl_pct, closed_at
    FROM signals
"#;

/// Repository for signal records
pub struct SignalRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> SignalRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert a signal (INSERT OR IGNORE by fingerprint).
    /// Returns the row id of the new or already-stored signal and whether it was inserted.
    pub async fn save(&self, record: &SignalRecord) -> DbResult<(i64, bool)> {
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO signals (
                fingerprint, symbol, timeframe, action, direction, score, tier,
                entry_price, stop_loss, take_profit, factors_json, reasons_json,
                data_source, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.fingerprint)
        .bind(&record.symbol)
        .bind(&record.timeframe)
        .bind(&record.action)
        .bind(&record.direction)
        .bind(record.score)
        .bind(&record.tier)
        .bind(&record.entry_price)
        .bind(&record.stop_loss)
        .bind(&record.take_profit)
        .bind(&record.factors_json)
        .bind(&record.reasons_json)
        .bind(&record.data_source)
        .bind(record.created_at)
        .execute(self.pool)
        .await?;

        if result.rows_affected() > 0 {
            return Ok((result.last_insert_rowid(), true));
        }

        let row: (i64,) = sqlx::query_as("SELECT id FROM signals WHERE fingerprint = ?")
            .bind(&record.fingerprint)
            .fetch_one(self.pool)
            .await?;
        Ok((row.0, false))
    }

    pub async fn get_by_id(&self, id: i64) -> DbResult<Option<SignalRecord>> {
        let sql = format!("{SELECT_COLUMNS} WHERE id = ?");
        let record = sqlx::query_as::<_, SignalRecord>(&sql)
            .bind(id)
            .fetch_optional(self.pool)
            .await?;
        Ok(record)
    }

    /// Most recent signals first, optionally filtered by symbol
    pub async fn get_recent(&self, limit: i64, symbol: Option<&str>) -> DbResult<Vec<SignalRecord>> {
        let records = match symbol {
            Some(sym) => {
                let sql = format!("{SELECT_COLUMNS} WHERE symbol = ? ORDER BY created_at DESC, id DESC LIMIT ?");
                sqlx::query_as::<_, SignalRecord>(&sql)
                    .bind(sym)
                    .bind(limit)
                    .fetch_all(self.pool)
                    .await?
            }
            None => {
                let sql = format!("{SELECT_COLUMNS} ORDER BY created_at DESC, id DESC LIMIT ?");
                sqlx::query_as::<_, SignalRecord>(&sql)
                    .bind(limit)
                    .fetch_all(self.pool)
                    .await?
            }
        };
        Ok(records)
    }

    /// Signals still waiting for an outcome
    pub async fn get_open(&self) -> DbResult<Vec<SignalRecord>> {
        let sql = format!("{SELECT_COLUMNS} WHERE result IS NULL ORDER BY created_at ASC");
        let records = sqlx::query_as::<_, SignalRecord>(&sql)
            .fetch_all(self.pool)
            .await?;
        Ok(records)
    }

    /// Closed signals in chronological order (trainer input)
    pub async fn get_closed(&self) -> DbResult<Vec<SignalRecord>> {
        let sql = format!("{SELECT_COLUMNS} WHERE result IS NOT NULL ORDER BY closed_at ASC, id ASC");
        let records = sqlx::query_as::<_, SignalRecord>(&sql)
            .fetch_all(self.pool)
            .await?;
        Ok(records)
    }

    /// Write the outcome of an open signal.
    /// Returns false if the signal does not exist or was already closed.
    pub async fn record_outcome(&self, id: i64, outcome: &SignalOutcome) -> DbResult<bool> {
        let result = sqlx::query(
            r#"UPDATE signals
               SET result = ?1, exit_price = ?2, pnl_pct = ?3, closed_at = ?4
               WHERE id = ?5 AND result IS NULL"#,
        )
        .bind(&outcome.result)
        .bind(&outcome.exit_price)
        .bind(&outcome.pnl_pct)
        .bind(outcome.closed_at)
        .bind(id)
        .execute(self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn get_stats(&self) -> DbResult<SignalStats> {
        let row: (i64, i64, i64, i64, Option<f64>) = sqlx::query_as(
            r#"SELECT
                 COUNT(*),
                 COALESCE(SUM(CASE WHEN result IS NOT NULL THEN 1 ELSE 0 END), 0),
                 COALESCE(SUM(CASE WHEN result = 'WIN' THEN 1 ELSE 0 END), 0),
                 COALESCE(SUM(CASE WHEN result = 'LOSS' THEN 1 ELSE 0 END), 0),
                 AVG(CASE WHEN result IS NOT NULL THEN CAST(pnl_pct AS REAL) END)
               FROM signals"#,
        )
        .fetch_one(self.pool)
        .await?;

        let (total, closed, wins, losses, avg_pnl) = row;
        let win_rate = if closed > 0 {
            wins as f64 / closed as f64 * 100.0
        } else {
            0.0
        };

        Ok(SignalStats {
            total_signals: total,
            open_signals: total - closed,
            closed_signals: closed,
            wins,
            losses,
            win_rate,
            avg_pnl_pct: avg_pnl.unwrap_or(0.0),
        })
    }

    pub async fn get_symbol_stats(&self) -> DbResult<Vec<SymbolStats>> {
        let rows = sqlx::query_as::<_, SymbolStats>(
            r#"SELECT symbol,
                      COUNT(*) AS closed_signals,
                      SUM(CASE WHEN result = 'WIN' THEN 1 ELSE 0 END) AS wins,
                      COALESCE(AVG(CAST(pnl_pct AS REAL)), 0.0) AS avg_pnl_pct
               FROM signals
               WHERE result IS NOT NULL
               GROUP BY symbol
               ORDER BY closed_signals DESC"#,
        )
        .fetch_all(self.pool)
        .await?;
        Ok(rows)
    }
}
