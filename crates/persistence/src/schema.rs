//! Database schema definitions

/// SQL to create all tables
/// NOTE: All prices stored as TEXT to preserve rust_decimal::Decimal precision
pub const CREATE_TABLES: &str = r#"
-- Generated trading signals and their outcomes
CREATE TABLE IF NOT EXISTS signals (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    fingerprint TEXT NOT NULL UNIQUE,
    symbol TEXT NOT NULL,
    timeframe TEXT NOT NULL,
    action TEXT NOT NULL,
    direction TEXT NOT NULL,
    score REAL NOT NULL DEFAULT 50,
    tier TEXT NOT NULL,
    entry_price TEXT NOT NULL,
    stop_loss TEXT NOT NULL,
    take_profit TEXT NOT NULL,
    factors_json TEXT NOT NULL,
    reasons_json TEXT NOT NULL DEFAULT '[]',
    created_at INTEGER NOT NULL,
    result TEXT,
    exit_price TEXT,
    pnl_pct TEXT,
    closed_at INTEGER
);

-- ========== INDEXES ==========

CREATE INDEX IF NOT EXISTS idx_signals_symbol ON signals(symbol, timeframe);
CREATE INDEX IF NOT EXISTS idx_signals_created ON signals(created_at DESC);
CREATE INDEX IF NOT EXISTS idx_signals_result ON signals(result)
"#;

/// Additive column migrations, applied after CREATE_TABLES.
/// "duplicate column name" errors are tolerated so they can run on every start.
pub const MIGRATIONS: &[&str] = &[
    "ALTER TABLE signals ADD COLUMN data_source TEXT NOT NULL DEFAULT 'live'",
];
