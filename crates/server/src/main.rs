//! SMC Signals: crypto confluence signal service
//!
//! Usage:
//!   smc-signals serve --port 3001                     — Launch the HTTP API
//!   smc-signals signal --symbol BTC-USDT --timeframe 1H — One-shot signal
//!   smc-signals train --log data/trade_log.jsonl      — Retrain scorer weights
//!   smc-signals export-log --out data/trade_log.jsonl — Dump closed signals as JSONL

mod config;

use axum::{
    body::Bytes,
    extract::{rejection::PathRejection, Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use clap::{Parser, Subcommand};
use engine::api::okx::{normalize_symbol, SymbolError};
use engine::{
    load_rules_file, run_claimed_retrain, run_price_streamer, run_retrain, AlertEngine, CircuitBreaker, ConfluenceScorer,
    MarketDataSource, OkxClient, PriceStreamer, SignalEngine, SignalTracker, Trainer, TrainerConfig,
    TrainerError, TrainerProgress, TrackerError, TrainingSource,
};
use persistence::SignalRepository;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info, warn};

use config::AppConfig;

const APP_VERSION: &str = concat!(env!("CARGO_PKG_VERSION"), "-", env!("GIT_HASH"));

const DEFAULT_SYMBOL: &str = "BTC-USDT";
const DEFAULT_TIMEFRAME: &str = "1H";
const MAX_RECENT_LIMIT: i64 = 500;
/// How often expired market data is swept from the caches
const CACHE_PURGE_SECS: u64 = 300;
/// Expired candles stay this long as the synthetic fallback anchor
const CANDLE_RETENTION_SECS: u64 = 3600;

#[derive(Parser)]
#[command(name = "smc-signals")]
#[command(about = "Smart Money Concepts confluence signals for crypto markets", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Launch the HTTP API, price streamer and periodic retrain
    Serve {
        /// Host to bind to
        #[arg(long, default_value = "0.0.0.0")]
        host: String,
        /// Port to listen on
        #[arg(short, long, default_value_t = 3001)]
        port: u16,
    },
    /// Generate one signal and print it
    Signal {
        #[arg(long, default_value = DEFAULT_SYMBOL)]
        symbol: String,
        #[arg(long, default_value = DEFAULT_TIMEFRAME)]
        timeframe: String,
        /// Print the full signal as JSON
        #[arg(long)]
        json: bool,
    },
    /// Retrain scorer weights from a JSONL trade log (or the database)
    Train {
        /// JSONL trade log; defaults to SMC_TRADE_LOG_PATH when it exists
        #[arg(long)]
        log: Option<PathBuf>,
    },
    /// Export closed signals as a JSONL trade log
    ExportLog {
        /// Output path; defaults to SMC_TRADE_LOG_PATH
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

#[derive(Clone)]
struct AppState {
    config: Arc<AppConfig>,
    db: Arc<persistence::Database>,
    okx: Arc<OkxClient>,
    scorer: Arc<RwLock<ConfluenceScorer>>,
    signals: Arc<SignalEngine>,
    tracker: Arc<SignalTracker>,
    alerts: Arc<AlertEngine>,
    trainer: Arc<Trainer>,
    trainer_progress: Arc<TrainerProgress>,
    streamer: Arc<PriceStreamer>,
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = if verbose {
        EnvFilter::new("debug,engine=debug,smc_signals=debug")
    } else {
        EnvFilter::new("info,engine=info,smc_signals=info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).compact())
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    dotenvy::dotenv().ok();

    let config = AppConfig::from_env();

    match cli.command {
        Commands::Serve { host, port } => {
            cmd_serve(config, &host, port).await?;
        }
        Commands::Signal {
            symbol,
            timeframe,
            json,
        } => {
            cmd_signal(config, &symbol, &timeframe, json).await?;
        }
        Commands::Train { log } => {
            cmd_train(config, log).await?;
        }
        Commands::ExportLog { out } => {
            cmd_export_log(config, out).await?;
        }
    }

    Ok(())
}

/// Wire up the database, clients and shared engine state
async fn build_state(config: AppConfig) -> anyhow::Result<AppState> {
    if let Some(parent) = std::path::Path::new(&config.db_path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let db = persistence::Database::new(&config.db_path).await.map_err(|e| {
        error!("Failed to initialize database: {}", e);
        anyhow::anyhow!("Database initialization failed: {}", e)
    })?;
    info!("Database initialized: {}", config.db_path);

    let okx = Arc::new(OkxClient::with_config(
        &config.okx_base_url,
        Duration::from_secs(config.cache_ttl_secs),
    ));
    let scorer = Arc::new(RwLock::new(ConfluenceScorer::new(config.sharp_threshold)?));
    let breaker = Arc::new(CircuitBreaker::new(config.max_consecutive_losses));

    let source: Arc<dyn MarketDataSource> = okx.clone();
    let signals = Arc::new(SignalEngine::new(source, scorer.clone(), breaker.clone()));
    let tracker = Arc::new(SignalTracker::new(db.pool_clone(), breaker));

    let rules = match &config.alert_rules_path {
        Some(path) => load_rules_file(path)?,
        None => engine::default_rules(),
    };

    Ok(AppState {
        config: Arc::new(config),
        db: Arc::new(db),
        okx,
        scorer,
        signals,
        tracker,
        alerts: Arc::new(AlertEngine::new(rules)),
        trainer: Arc::new(Trainer::new(TrainerConfig::default())),
        trainer_progress: Arc::new(TrainerProgress::new()),
        streamer: Arc::new(PriceStreamer::new()),
    })
}

/// The JSONL trade log when present, the database otherwise
fn default_training_source(config: &AppConfig) -> TrainingSource {
    if config.trade_log_path.exists() {
        TrainingSource::File(config.trade_log_path.clone())
    } else {
        TrainingSource::Database
    }
}

// ============================================================================
// Serve command — Axum web server
// ============================================================================

async fn cmd_serve(config: AppConfig, host: &str, port: u16) -> anyhow::Result<()> {
    info!("SMC Signals v{} starting...", APP_VERSION);
    let state = build_state(config).await?;

    // Price streamer
    if !state.config.stream_symbols.is_empty() {
        let streamer = state.streamer.clone();
        let okx = state.okx.clone();
        let ws_url = state.config.okx_ws_url.clone();
        let symbols = state.config.stream_symbols.clone();
        tokio::spawn(async move {
            run_price_streamer(&streamer, &okx, &ws_url, symbols).await;
        });
    }

    // Periodic retrain, first run at startup
    if state.config.retrain_interval_hours > 0 {
        let state = state.clone();
        tokio::spawn(async move {
            let period = Duration::from_secs(state.config.retrain_interval_hours * 3600);
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                let result = run_retrain(
                    &state.tracker,
                    TrainingSource::Database,
                    &state.scorer,
                    &state.trainer,
                    &state.trainer_progress,
                )
                .await;
                match result {
                    Ok(_) => {}
                    Err(TrainerError::AlreadyRunning) => {
                        info!("Scheduled retrain skipped: a retrain is already running");
                    }
                    Err(TrainerError::InsufficientSamples { .. }) => {
                        info!("Scheduled retrain skipped: not enough closed signals yet");
                    }
                    Err(e) => warn!("Scheduled retrain failed: {}", e),
                }
            }
        });
    }

    // Cache sweep
    {
        let okx = state.okx.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(CACHE_PURGE_SECS));
            ticker.tick().await;
            loop {
                ticker.tick().await;
                okx.purge_caches(Duration::from_secs(CANDLE_RETENTION_SECS));
            }
        });
    }

    let app = api_router(state.clone());

    let addr: std::net::SocketAddr = format!("{}:{}", host, port).parse()?;
    println!("\n=== SMC Signals v{} ===", APP_VERSION);
    println!("Listening on http://{}", addr);
    println!("\nEndpoints:");
    println!("  GET  /api/health                    - Health check");
    println!("  GET  /api/market/candles            - Candles (symbol, timeframe, limit)");
    println!("  GET  /api/market/ticker             - Ticker");
    println!("  GET  /api/market/orderbook          - Order book + imbalance");
    println!("  GET  /api/market/funding            - Funding rate");
    println!("  GET  /api/market/open-interest      - Swap open interest");
    println!("  GET  /api/indicators                - Indicator snapshot");
    println!("  GET  /api/smc/analysis              - SMC analysis");
    println!("  GET  /api/signal                    - Generate a signal");
    println!("  GET  /api/signals/recent            - Recent signals");
    println!("  GET  /api/signals/stats             - Tracker statistics");
    println!("  GET  /api/signals/open              - Signals awaiting an outcome");
    println!("  POST /api/signals/:id/outcome       - Record an exit price");
    println!("  GET  /api/alerts                    - Recent alerts");
    println!("  GET  /api/alerts/rules              - Alert rules");
    println!("  POST /api/alerts/rules/:id/enable   - Enable a rule");
    println!("  POST /api/alerts/rules/:id/disable  - Disable a rule");
    println!("  GET  /api/circuit-breaker           - Circuit breaker state");
    println!("  POST /api/circuit-breaker/reset     - Reset the circuit breaker");
    println!("  POST /api/trainer/retrain           - Start a retrain");
    println!("  GET  /api/trainer/status            - Trainer progress");
    println!("  GET  /api/stream/prices             - Streamed prices");
    println!("\n  Database: {}", state.config.db_path);
    println!("\nPress Ctrl+C to stop\n");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    state.streamer.stop();
    Ok(())
}

/// All HTTP routes under `/api`, CORS open
fn api_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        .route("/health", get(api_health))
        .route("/market/candles", get(api_candles))
        .route("/market/ticker", get(api_ticker))
        .route("/market/orderbook", get(api_orderbook))
        .route("/market/funding", get(api_funding))
        .route("/market/open-interest", get(api_open_interest))
        .route("/indicators", get(api_indicators))
        .route("/smc/analysis", get(api_smc_analysis))
        .route("/signal", get(api_signal))
        .route("/signals/recent", get(api_recent_signals))
        .route("/signals/stats", get(api_signal_stats))
        .route("/signals/open", get(api_open_signals))
        .route("/signals/:id/outcome", post(api_record_outcome))
        .route("/alerts", get(api_alerts))
        .route("/alerts/rules", get(api_alert_rules))
        .route("/alerts/rules/:id/enable", post(api_enable_rule))
        .route("/alerts/rules/:id/disable", post(api_disable_rule))
        .route("/circuit-breaker", get(api_circuit_breaker))
        .route("/circuit-breaker/reset", post(api_reset_circuit_breaker))
        .route("/trainer/retrain", post(api_start_retrain))
        .route("/trainer/status", get(api_trainer_status))
        .route("/stream/prices", get(api_stream_prices))
        .with_state(state);

    Router::new().nest("/api", api_routes).layer(cors)
}

// ============================================================================
// Signal / Train / Export commands — CLI mode
// ============================================================================

async fn cmd_signal(config: AppConfig, symbol: &str, timeframe: &str, json: bool) -> anyhow::Result<()> {
    let state = build_state(config).await?;
    let signal = state.signals.generate(symbol, timeframe).await?;

    if signal.is_trackable() {
        let (id, inserted) = state.tracker.record(&signal).await?;
        info!(id, inserted, "Signal stored");
    } else if signal.action.is_actionable() {
        warn!("Signal built on synthetic data, not stored");
    }
    let alerts = state.alerts.evaluate(&signal);

    if json {
        println!("{}", serde_json::to_string_pretty(&signal)?);
    } else {
        println!("\n{}\n", signal.narrative);
        for component in &signal.score.components {
            println!(
                "  {:<20} {:>5.1} / {:>4.1}",
                component.name, component.contribution, component.weight
            );
        }
        for reason in &signal.reasons {
            println!("  - {}", reason);
        }
    }
    for alert in &alerts {
        println!("ALERT [{:?}] {}", alert.priority, alert.message);
    }
    Ok(())
}

async fn cmd_train(config: AppConfig, log: Option<PathBuf>) -> anyhow::Result<()> {
    let source = match log {
        Some(path) => TrainingSource::File(path),
        None => default_training_source(&config),
    };
    let state = build_state(config).await?;

    let report = run_retrain(
        &state.tracker,
        source,
        &state.scorer,
        &state.trainer,
        &state.trainer_progress,
    )
    .await?;

    println!("\n=== Training report ===");
    println!(
        "Samples: {} (train {}, test {}) | win rate {:.1}%",
        report.samples,
        report.train_size,
        report.test_size,
        report.win_rate * 100.0
    );
    println!(
        "Accuracy: logistic {:.1}% | ensemble {:.1}% | chosen {:?}",
        report.logistic_accuracy * 100.0,
        report.ensemble_accuracy * 100.0,
        report.model
    );
    println!("\n  {:<20} {:>8} {:>8}", "factor", "before", "after");
    for ((name, before), (_, after)) in report.previous_weights.entries().into_iter().zip(report.weights.entries()) {
        println!("  {:<20} {:>8.2} {:>8.2}", name, before, after);
    }
    println!(
        "\nSharp threshold: {:.0} -> {:.0}",
        report.previous_threshold, report.sharp_threshold
    );
    Ok(())
}

async fn cmd_export_log(config: AppConfig, out: Option<PathBuf>) -> anyhow::Result<()> {
    let path = out.unwrap_or_else(|| config.trade_log_path.clone());
    let state = build_state(config).await?;
    let written = state.tracker.export_trade_log(&path).await?;
    println!("Exported {} closed signals to {}", written, path.display());
    Ok(())
}

// ============================================================================
// Helpers
// ============================================================================

type ApiResponse = (StatusCode, Json<serde_json::Value>);

fn ok(value: serde_json::Value) -> ApiResponse {
    (StatusCode::OK, Json(value))
}

fn fail(status: StatusCode, message: impl std::fmt::Display) -> ApiResponse {
    (
        status,
        Json(serde_json::json!({
            "success": false,
            "error": message.to_string(),
        })),
    )
}

/// 400 for bad symbols or timeframes, 502 for upstream failures
fn market_error(e: anyhow::Error) -> ApiResponse {
    if e.downcast_ref::<SymbolError>().is_some() {
        fail(StatusCode::BAD_REQUEST, e)
    } else {
        error!("Market data error: {}", e);
        fail(StatusCode::BAD_GATEWAY, format!("Market data unavailable: {}", e))
    }
}

fn tracker_error(e: TrackerError) -> ApiResponse {
    let status = match &e {
        TrackerError::NotFound(_) => StatusCode::NOT_FOUND,
        TrackerError::AlreadyClosed(_) => StatusCode::CONFLICT,
        TrackerError::NotDirectional(_) | TrackerError::InvalidPrice(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    fail(status, e)
}

fn symbol_param(params: &HashMap<String, String>) -> String {
    params
        .get("symbol")
        .cloned()
        .unwrap_or_else(|| DEFAULT_SYMBOL.to_string())
}

fn timeframe_param(params: &HashMap<String, String>) -> String {
    params
        .get("timeframe")
        .cloned()
        .unwrap_or_else(|| DEFAULT_TIMEFRAME.to_string())
}

// ============================================================================
// API Handlers — Health + Market data
// ============================================================================

/// GET /api/health
async fn api_health(State(state): State<AppState>) -> Json<serde_json::Value> {
    let streamer_status = *state.streamer.status.read().unwrap();
    Json(serde_json::json!({
        "status": "ok",
        "version": APP_VERSION,
        "circuit_breaker_tripped": state.tracker.breaker().is_tripped(),
        "streamer": streamer_status,
        "trainer": *state.trainer_progress.status.read().unwrap(),
    }))
}

/// GET /api/market/candles
async fn api_candles(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResponse {
    let symbol = symbol_param(&params);
    let timeframe = timeframe_param(&params);
    let limit: u32 = params
        .get("limit")
        .and_then(|s| s.parse().ok())
        .unwrap_or(100);

    match state.okx.get_candles_or_fallback(&symbol, &timeframe, limit).await {
        Ok((candles, data_source)) => ok(serde_json::json!({
            "success": true,
            "symbol": symbol,
            "timeframe": timeframe,
            "data_source": data_source,
            "count": candles.len(),
            "candles": candles,
        })),
        Err(e) => market_error(e),
    }
}

/// GET /api/market/ticker
async fn api_ticker(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResponse {
    match state.okx.get_ticker(&symbol_param(&params)).await {
        Ok(ticker) => ok(serde_json::json!({
            "success": true,
            "change_24h_pct": ticker.change_24h_pct(),
            "ticker": ticker,
        })),
        Err(e) => market_error(e),
    }
}

/// GET /api/market/orderbook
async fn api_orderbook(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResponse {
    let depth: u32 = params
        .get("depth")
        .and_then(|s| s.parse().ok())
        .unwrap_or(20);

    match state.okx.get_orderbook(&symbol_param(&params), depth).await {
        Ok(book) => ok(serde_json::json!({
            "success": true,
            "imbalance": book.imbalance(),
            "orderbook": book,
        })),
        Err(e) => market_error(e),
    }
}

/// GET /api/market/funding
async fn api_funding(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResponse {
    match state.okx.get_funding_rate(&symbol_param(&params)).await {
        Ok(funding) => ok(serde_json::json!({
            "success": true,
            "funding": funding,
        })),
        Err(e) => market_error(e),
    }
}

/// GET /api/market/open-interest
async fn api_open_interest(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResponse {
    match state.okx.get_open_interest(&symbol_param(&params)).await {
        Ok(open_interest) => ok(serde_json::json!({
            "success": true,
            "open_interest": open_interest,
        })),
        Err(e) => market_error(e),
    }
}

// ============================================================================
// API Handlers — Analysis + Signals
// ============================================================================

/// GET /api/indicators
async fn api_indicators(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResponse {
    match state
        .signals
        .analyze_market(&symbol_param(&params), &timeframe_param(&params))
        .await
    {
        Ok(snapshot) => ok(serde_json::json!({
            "success": true,
            "symbol": snapshot.symbol,
            "timeframe": snapshot.timeframe,
            "data_source": snapshot.data_source,
            "trend_bias": snapshot.indicators.trend_bias(),
            "momentum_score": snapshot.indicators.momentum_score(),
            "indicators": snapshot.indicators,
        })),
        Err(e) => market_error(e),
    }
}

/// GET /api/smc/analysis
async fn api_smc_analysis(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResponse {
    match state
        .signals
        .analyze_market(&symbol_param(&params), &timeframe_param(&params))
        .await
    {
        Ok(snapshot) => ok(serde_json::json!({
            "success": true,
            "symbol": snapshot.symbol,
            "timeframe": snapshot.timeframe,
            "data_source": snapshot.data_source,
            "analysis": snapshot.smc,
        })),
        Err(e) => market_error(e),
    }
}

/// GET /api/signal: full pipeline; actionable signals are stored, alerts evaluated
async fn api_signal(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResponse {
    let signal = match state
        .signals
        .generate(&symbol_param(&params), &timeframe_param(&params))
        .await
    {
        Ok(s) => s,
        Err(e) => return market_error(e),
    };

    let signal_id = if signal.is_trackable() {
        match state.tracker.record(&signal).await {
            Ok((id, _)) => Some(id),
            Err(e) => {
                error!("Failed to record signal: {}", e);
                None
            }
        }
    } else {
        None
    };
    let alerts = state.alerts.evaluate(&signal);

    ok(serde_json::json!({
        "success": true,
        "signal_id": signal_id,
        "signal": signal,
        "alerts": alerts,
    }))
}

/// GET /api/signals/recent
async fn api_recent_signals(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResponse {
    let symbol = params.get("symbol").map(|s| s.as_str());

    match state.tracker.recent(recent_limit(&params), symbol).await {
        Ok(records) => ok(serde_json::json!({
            "success": true,
            "total": records.len(),
            "data": records,
        })),
        Err(e) => tracker_error(e),
    }
}

/// `limit` query value clamped to 1..=500, 20 when absent or invalid
fn recent_limit(params: &HashMap<String, String>) -> i64 {
    params
        .get("limit")
        .and_then(|s| s.parse::<i64>().ok())
        .unwrap_or(20)
        .clamp(1, MAX_RECENT_LIMIT)
}

/// GET /api/signals/open
async fn api_open_signals(State(state): State<AppState>) -> ApiResponse {
    match state.tracker.open_signals().await {
        Ok(records) => ok(serde_json::json!({
            "success": true,
            "total": records.len(),
            "data": records,
        })),
        Err(e) => tracker_error(e),
    }
}

/// GET /api/signals/stats
async fn api_signal_stats(State(state): State<AppState>) -> ApiResponse {
    match state.tracker.stats().await {
        Ok(stats) => ok(serde_json::json!({
            "success": true,
            "stats": stats,
        })),
        Err(e) => tracker_error(e),
    }
}

#[derive(Debug, Default, Deserialize)]
struct OutcomeRequest {
    /// Current ticker price when omitted
    exit_price: Option<Decimal>,
}

/// Empty or whitespace-only body means no explicit exit price.
/// The Content-Type header is not required.
fn parse_outcome_body(body: &[u8]) -> Result<OutcomeRequest, serde_json::Error> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(OutcomeRequest::default());
    }
    serde_json::from_slice(body)
}

/// POST /api/signals/:id/outcome, body `{"exit_price": "..."}` (optional)
async fn api_record_outcome(
    State(state): State<AppState>,
    id: Result<Path<i64>, PathRejection>,
    body: Bytes,
) -> ApiResponse {
    let id = match id {
        Ok(Path(id)) => id,
        Err(e) => return fail(StatusCode::BAD_REQUEST, format!("Invalid signal id: {}", e.body_text())),
    };
    let request = match parse_outcome_body(&body) {
        Ok(r) => r,
        Err(e) => return fail(StatusCode::BAD_REQUEST, format!("Invalid outcome body: {}", e)),
    };

    let exit_price = match request.exit_price {
        Some(price) => price,
        None => {
            let repo = SignalRepository::new(state.db.pool());
            let record = match repo.get_by_id(id).await {
                Ok(Some(r)) => r,
                Ok(None) => return tracker_error(TrackerError::NotFound(id)),
                Err(e) => return tracker_error(e.into()),
            };
            match state.okx.get_ticker(&record.symbol).await {
                Ok(ticker) => ticker.last,
                Err(e) => return market_error(e),
            }
        }
    };

    match state.tracker.record_outcome(id, exit_price).await {
        Ok(report) => ok(serde_json::json!({
            "success": true,
            "outcome": report,
            "circuit_breaker": state.tracker.breaker().state(),
        })),
        Err(e) => tracker_error(e),
    }
}

// ============================================================================
// API Handlers — Alerts + Circuit breaker
// ============================================================================

/// GET /api/alerts
async fn api_alerts(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Json<serde_json::Value> {
    let limit: usize = params
        .get("limit")
        .and_then(|s| s.parse().ok())
        .unwrap_or(20);
    let alerts = state.alerts.recent_alerts(limit);
    Json(serde_json::json!({
        "success": true,
        "total": alerts.len(),
        "data": alerts,
    }))
}

/// GET /api/alerts/rules
async fn api_alert_rules(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "success": true,
        "rules": state.alerts.rules(),
    }))
}

async fn set_rule_enabled(state: &AppState, id: &str, enabled: bool) -> ApiResponse {
    if state.alerts.set_enabled(id, enabled) {
        info!(rule = id, enabled, "Alert rule toggled");
        ok(serde_json::json!({
            "success": true,
            "rule": id,
            "enabled": enabled,
        }))
    } else {
        fail(StatusCode::NOT_FOUND, format!("Alert rule '{}' not found", id))
    }
}

/// POST /api/alerts/rules/:id/enable
async fn api_enable_rule(State(state): State<AppState>, Path(id): Path<String>) -> ApiResponse {
    set_rule_enabled(&state, &id, true).await
}

/// POST /api/alerts/rules/:id/disable
async fn api_disable_rule(State(state): State<AppState>, Path(id): Path<String>) -> ApiResponse {
    set_rule_enabled(&state, &id, false).await
}

/// GET /api/circuit-breaker
async fn api_circuit_breaker(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "success": true,
        "circuit_breaker": state.tracker.breaker().state(),
    }))
}

/// POST /api/circuit-breaker/reset
async fn api_reset_circuit_breaker(State(state): State<AppState>) -> Json<serde_json::Value> {
    state.tracker.breaker().reset();
    info!("Circuit breaker reset via API");
    Json(serde_json::json!({
        "success": true,
        "circuit_breaker": state.tracker.breaker().state(),
    }))
}

// ============================================================================
// API Handlers — Trainer + Streamer
// ============================================================================

/// POST /api/trainer/retrain: closed signals by default, `?source=file&path=...` for a JSONL log
async fn api_start_retrain(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Json<serde_json::Value> {
    if !state.trainer_progress.try_start() {
        return Json(serde_json::json!({
            "success": false,
            "message": "Retrain already in progress",
        }));
    }

    let source = match params.get("source").map(|s| s.as_str()) {
        Some("file") => TrainingSource::File(
            params
                .get("path")
                .map(PathBuf::from)
                .unwrap_or_else(|| state.config.trade_log_path.clone()),
        ),
        _ => TrainingSource::Database,
    };
    info!(?source, "Starting retrain via API");

    let task_state = state.clone();
    tokio::spawn(async move {
        let _ = run_claimed_retrain(
            &task_state.tracker,
            source,
            &task_state.scorer,
            &task_state.trainer,
            &task_state.trainer_progress,
        )
        .await;
    });

    Json(serde_json::json!({
        "success": true,
        "message": "Retrain started",
    }))
}

/// GET /api/trainer/status
async fn api_trainer_status(State(state): State<AppState>) -> Json<serde_json::Value> {
    let progress = &state.trainer_progress;
    let status = *progress.status.read().unwrap();
    let runs = *progress.runs.read().unwrap();
    let last_report = progress.last_report.read().unwrap().clone();
    let error = progress.error_message.read().unwrap().clone();
    let scorer = state.scorer.read().unwrap().clone();

    Json(serde_json::json!({
        "status": status,
        "runs": runs,
        "last_report": last_report,
        "error": error,
        "weights": scorer.weights(),
        "sharp_threshold": scorer.sharp_threshold(),
    }))
}

/// GET /api/stream/prices
async fn api_stream_prices(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Json<serde_json::Value> {
    let streamer = &state.streamer;
    let prices = match params.get("symbol") {
        Some(symbol) => normalize_symbol(symbol)
            .ok()
            .and_then(|id| streamer.latest(&id))
            .into_iter()
            .collect(),
        None => streamer.snapshot(),
    };
    let status = *streamer.status.read().unwrap();
    let error = streamer.error_message.read().unwrap().clone();

    Json(serde_json::json!({
        "status": status,
        "messages_received": streamer
            .messages_received
            .load(std::sync::atomic::Ordering::Relaxed),
        "prices": prices,
        "error": error,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use persistence::SignalRecord;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    async fn test_state(name: &str) -> AppState {
        let db_path = std::env::temp_dir().join(format!("smc_server_{}_{}.db", name, std::process::id()));
        std::fs::remove_file(&db_path).ok();
        let config = AppConfig {
            db_path: db_path.display().to_string(),
            // nothing listens here: market calls fail fast
            okx_base_url: "http://127.0.0.1:9".to_string(),
            stream_symbols: Vec::new(),
            retrain_interval_hours: 0,
            ..AppConfig::default()
        };
        build_state(config).await.unwrap()
    }

    async fn open_long(state: &AppState) -> i64 {
        let record = SignalRecord {
            id: None,
            fingerprint: "fp-open".into(),
            symbol: "BTC-USDT".into(),
            timeframe: "1H".into(),
            action: "BUY".into(),
            direction: "LONG".into(),
            score: 75.0,
            tier: "SHARP".into(),
            entry_price: "100".into(),
            stop_loss: "95".into(),
            take_profit: "110".into(),
            factors_json: "{}".into(),
            reasons_json: "[]".into(),
            data_source: "live".into(),
            created_at: 1,
            result: None,
            exit_price: None,
            pnl_pct: None,
            closed_at: None,
        };
        let (id, _) = SignalRepository::new(state.db.pool()).save(&record).await.unwrap();
        id
    }

    /// Raw HTTP/1.1 round trip against a served router, returns the response text
    async fn send_raw(app: Router, request: &str) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        stream.write_all(request.as_bytes()).await.unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        response
    }

    #[test]
    fn test_parse_outcome_body() {
        assert!(parse_outcome_body(b"").unwrap().exit_price.is_none());
        assert!(parse_outcome_body(b"  \n").unwrap().exit_price.is_none());
        assert!(parse_outcome_body(b"{}").unwrap().exit_price.is_none());
        assert_eq!(
            parse_outcome_body(br#"{"exit_price": "101.5"}"#).unwrap().exit_price,
            Some(Decimal::new(1015, 1))
        );
        assert!(parse_outcome_body(b"exit=101").is_err());
        assert!(parse_outcome_body(br#"{"exit_price": "abc"}"#).is_err());
    }

    #[test]
    fn test_recent_limit_clamped() {
        let params = |v: &str| HashMap::from([("limit".to_string(), v.to_string())]);
        assert_eq!(recent_limit(&HashMap::new()), 20);
        assert_eq!(recent_limit(&params("-1")), 1);
        assert_eq!(recent_limit(&params("0")), 1);
        assert_eq!(recent_limit(&params("50")), 50);
        assert_eq!(recent_limit(&params("100000")), MAX_RECENT_LIMIT);
        assert_eq!(recent_limit(&params("many")), 20);
    }

    #[tokio::test]
    async fn test_record_outcome_handler() {
        let state = test_state("outcome").await;
        let id = open_long(&state).await;

        // empty body: falls through to the ticker lookup, unknown id is a JSON 404
        let (status, Json(body)) = api_record_outcome(State(state.clone()), Ok(Path(999)), Bytes::new()).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["success"], false);

        let (status, Json(body)) = api_record_outcome(
            State(state.clone()),
            Ok(Path(id)),
            Bytes::from_static(br#"{"exit_price": "abc"}"#),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
        assert!(body["error"].as_str().unwrap().contains("Invalid outcome body"));

        let (status, Json(body)) = api_record_outcome(
            State(state.clone()),
            Ok(Path(id)),
            Bytes::from_static(br#"{"exit_price": "104"}"#),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["outcome"]["result"], "WIN");

        let (status, _) = api_record_outcome(
            State(state.clone()),
            Ok(Path(id)),
            Bytes::from_static(br#"{"exit_price": "104"}"#),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_outcome_route_answers_json_without_content_type() {
        let state = test_state("outcome_route").await;
        let app = api_router(state);

        let response = send_raw(
            app.clone(),
            "POST /api/signals/abc/outcome HTTP/1.1\r\nHost: localhost\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        )
        .await;
        assert!(response.starts_with("HTTP/1.1 400"), "{}", response);
        assert!(response.contains("application/json"), "{}", response);
        assert!(response.contains(r#""success":false"#), "{}", response);

        let response = send_raw(
            app,
            "POST /api/signals/999/outcome HTTP/1.1\r\nHost: localhost\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        )
        .await;
        assert!(response.starts_with("HTTP/1.1 404"), "{}", response);
        assert!(response.contains(r#""success":false"#), "{}", response);
    }

    #[tokio::test]
    async fn test_retrain_started_once() {
        let state = test_state("retrain").await;

        let Json(first) = api_start_retrain(State(state.clone()), Query(HashMap::new())).await;
        let Json(second) = api_start_retrain(State(state.clone()), Query(HashMap::new())).await;
        assert_eq!(first["success"], true);
        assert_eq!(second["success"], false);
        assert_eq!(second["message"], "Retrain already in progress");
    }

    #[tokio::test]
    async fn test_open_signals_route() {
        let state = test_state("open").await;
        let id = open_long(&state).await;

        let (status, Json(body)) = api_open_signals(State(state.clone())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total"], 1);
        assert_eq!(body["data"][0]["id"], id);
    }
}
