//! Live price streamer
//!
//! Subscribes to the OKX public `tickers` channel and keeps the latest tick per
//! symbol. Reconnects after a delay; when the socket keeps failing it polls the
//! REST ticker endpoint instead until the next reconnect attempt.

use futures_util::{SinkExt, StreamExt};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::RwLock;
use tokio::time::{sleep, timeout, Duration};
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use tracing::{debug, info, warn};

use crate::api::okx::{normalize_symbol, parse_ticker, RawTicker};
use crate::api::OkxClient;
use crate::types::Ticker;

pub const DEFAULT_WS_URL: &str = "wss://ws.okx.com:8443/ws/v5/public";
const RECONNECT_DELAY_SECS: u64 = 5;
/// OKX drops idle connections after 30s; ping before that
const PING_AFTER_SECS: u64 = 25;
/// Failed connects in a row before polling REST
const MAX_CONNECT_FAILURES: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StreamerStatus {
    Idle,
    Streaming,
    Polling,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PriceSource {
    Websocket,
    Rest,
}

#[derive(Debug, Clone, Serialize)]
pub struct StreamedPrice {
    pub symbol: String,
    pub last: Decimal,
    pub bid: Decimal,
    pub ask: Decimal,
    pub change_24h_pct: f64,
    /// Exchange timestamp, epoch millis
    pub timestamp: i64,
    pub source: PriceSource,
}

#[derive(Debug, Deserialize)]
struct PushArg {
    channel: String,
}

#[derive(Debug, Deserialize)]
struct TickerPush {
    arg: PushArg,
    #[serde(default)]
    data: Vec<RawTicker>,
}

/// Subscription request for the `tickers` channel
pub fn subscribe_message(symbols: &[String]) -> String {
    let args: Vec<serde_json::Value> = symbols
        .iter()
        .map(|s| serde_json::json!({"channel": "tickers", "instId": s}))
        .collect();
    serde_json::json!({"op": "subscribe", "args": args}).to_string()
}

/// Shared streamer state (same shape as the other progress structs)
pub struct PriceStreamer {
    pub status: RwLock<StreamerStatus>,
    pub cancelled: AtomicBool,
    pub error_message: RwLock<Option<String>>,
    pub messages_received: AtomicU64,
    prices: RwLock<HashMap<String, StreamedPrice>>,
}

impl PriceStreamer {
    pub fn new() -> Self {
        Self {
            status: RwLock::new(StreamerStatus::Idle),
            cancelled: AtomicBool::new(false),
            error_message: RwLock::new(None),
            messages_received: AtomicU64::new(0),
            prices: RwLock::new(HashMap::new()),
        }
    }

    pub fn stop(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    /// Store a tick unless a newer one is already held
    pub fn update(&self, ticker: &Ticker, source: PriceSource) -> bool {
        let mut prices = self.prices.write().unwrap();
        if let Some(existing) = prices.get(&ticker.symbol) {
            if existing.timestamp > ticker.timestamp {
                return false;
            }
        }
        prices.insert(
            ticker.symbol.clone(),
            StreamedPrice {
                symbol: ticker.symbol.clone(),
                last: ticker.last,
                bid: ticker.bid,
                ask: ticker.ask,
                change_24h_pct: ticker.change_24h_pct(),
                timestamp: ticker.timestamp,
                source,
            },
        );
        true
    }

    pub fn latest(&self, symbol: &str) -> Option<StreamedPrice> {
        self.prices.read().unwrap().get(symbol).cloned()
    }

    /// All prices sorted by symbol
    pub fn snapshot(&self) -> Vec<StreamedPrice> {
        let mut out: Vec<StreamedPrice> = self.prices.read().unwrap().values().cloned().collect();
        out.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        out
    }

    /// Apply one websocket text frame. Returns the number of ticks stored.
    /// Subscription acks, errors and `pong` frames are ignored.
    pub fn handle_message(&self, text: &str) -> usize {
        if text == "pong" {
            return 0;
        }
        let push: TickerPush = match serde_json::from_str(text) {
            Ok(p) => p,
            Err(_) => {
                debug!(text, "Ignoring non-ticker frame");
                return 0;
            }
        };
        if push.arg.channel != "tickers" || push.data.is_empty() {
            return 0;
        }
        self.messages_received.fetch_add(1, Ordering::Relaxed);

        push.data
            .into_iter()
            .filter_map(|raw| parse_ticker(raw).ok())
            .filter(|ticker| self.update(ticker, PriceSource::Websocket))
            .count()
    }

    async fn poll_rest(&self, client: &OkxClient, symbols: &[String]) {
        for symbol in symbols {
            match client.get_ticker(symbol).await {
                Ok(ticker) => {
                    self.update(&ticker, PriceSource::Rest);
                }
                Err(e) => warn!(symbol, error = %e, "REST ticker poll failed"),
            }
        }
    }

    /// Sleep in 1s steps so cancellation is noticed quickly
    async fn pause(&self, secs: u64) {
        for _ in 0..secs {
            if self.cancelled.load(Ordering::Relaxed) {
                return;
            }
            sleep(Duration::from_secs(1)).await;
        }
    }
}

impl Default for PriceStreamer {
    fn default() -> Self {
        Self::new()
    }
}

/// Run until `streamer.cancelled` is set
pub async fn run_price_streamer(streamer: &PriceStreamer, client: &OkxClient, ws_url: &str, symbols: Vec<String>) {
    let symbols: Vec<String> = symbols
        .iter()
        .filter_map(|s| match normalize_symbol(s) {
            Ok(id) => Some(id),
            Err(e) => {
                warn!(error = %e, "Skipping stream symbol");
                None
            }
        })
        .collect();
    if symbols.is_empty() {
        warn!("No valid symbols to stream");
        *streamer.status.write().unwrap() = StreamerStatus::Error;
        *streamer.error_message.write().unwrap() = Some("No valid symbols to stream".into());
        return;
    }

    streamer.cancelled.store(false, Ordering::Relaxed);
    info!(?symbols, ws_url, "Price streamer starting");
    let mut failures = 0u32;

    loop {
        if streamer.cancelled.load(Ordering::Relaxed) {
            info!("Price streamer cancelled");
            break;
        }

        match connect_async(ws_url).await {
            Ok((mut ws, _)) => {
                failures = 0;
                *streamer.status.write().unwrap() = StreamerStatus::Streaming;
                *streamer.error_message.write().unwrap() = None;

                if let Err(e) = ws.send(Message::Text(subscribe_message(&symbols))).await {
                    warn!(error = %e, "Subscribe failed");
                } else {
                    info!(count = symbols.len(), "Subscribed to tickers");
                    loop {
                        if streamer.cancelled.load(Ordering::Relaxed) {
                            let _ = ws.close(None).await;
                            break;
                        }
                        match timeout(Duration::from_secs(PING_AFTER_SECS), ws.next()).await {
                            Ok(Some(Ok(Message::Text(text)))) => {
                                streamer.handle_message(&text);
                            }
                            Ok(Some(Ok(Message::Ping(payload)))) => {
                                let _ = ws.send(Message::Pong(payload)).await;
                            }
                            Ok(Some(Ok(Message::Close(frame)))) => {
                                info!(?frame, "Websocket closed by server");
                                break;
                            }
                            Ok(Some(Ok(_))) => {}
                            Ok(Some(Err(e))) => {
                                warn!(error = %e, "Websocket error");
                                break;
                            }
                            Ok(None) => break,
                            Err(_) => {
                                // idle: keep the connection alive
                                if ws.send(Message::Text("ping".into())).await.is_err() {
                                    break;
                                }
                            }
                        }
                    }
                }
            }
            Err(e) => {
                failures += 1;
                warn!(error = %e, failures, "Websocket connect failed");
                *streamer.error_message.write().unwrap() = Some(e.to_string());
                if failures >= MAX_CONNECT_FAILURES {
                    *streamer.status.write().unwrap() = StreamerStatus::Polling;
                    streamer.poll_rest(client, &symbols).await;
                }
            }
        }

        streamer.pause(RECONNECT_DELAY_SECS).await;
    }

    *streamer.status.write().unwrap() = StreamerStatus::Idle;
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    const PUSH: &str = r#"{"arg":{"channel":"tickers","instId":"BTC-USDT"},"data":[{"instType":"SPOT","instId":"BTC-USDT","last":"64250.1","lastSz":"0.01","askPx":"64250.2","askSz":"1","bidPx":"64250.0","bidSz":"2","open24h":"63000","high24h":"64500","low24h":"62800","volCcy24h":"1","vol24h":"100","sodUtc0":"1","sodUtc8":"1","ts":"1700000000000"}]}"#;

    #[test]
    fn test_handle_ticker_push() {
        let streamer = PriceStreamer::new();
        assert_eq!(streamer.handle_message(PUSH), 1);

        let price = streamer.latest("BTC-USDT").unwrap();
        assert_eq!(price.last, dec!(64250.1));
        assert_eq!(price.bid, dec!(64250.0));
        assert_eq!(price.source, PriceSource::Websocket);
        assert!(price.change_24h_pct > 1.9);
    }

    #[test]
    fn test_ignores_control_frames() {
        let streamer = PriceStreamer::new();
        assert_eq!(streamer.handle_message("pong"), 0);
        assert_eq!(
            streamer.handle_message(r#"{"event":"subscribe","arg":{"channel":"tickers","instId":"BTC-USDT"}}"#),
            0
        );
        assert_eq!(streamer.handle_message(r#"{"event":"error","code":"60012","msg":"bad"}"#), 0);
        assert!(streamer.snapshot().is_empty());
    }

    #[test]
    fn test_latest_wins() {
        let streamer = PriceStreamer::new();
        let tick = |last, ts| Ticker {
            symbol: "ETH-USDT".into(),
            last,
            bid: last,
            ask: last,
            open_24h: last,
            high_24h: last,
            low_24h: last,
            volume_24h: dec!(1),
            timestamp: ts,
        };

        assert!(streamer.update(&tick(dec!(3000), 2_000), PriceSource::Websocket));
        assert!(!streamer.update(&tick(dec!(2990), 1_000), PriceSource::Rest));
        assert!(streamer.update(&tick(dec!(3010), 3_000), PriceSource::Rest));

        let price = streamer.latest("ETH-USDT").unwrap();
        assert_eq!(price.last, dec!(3010));
        assert_eq!(price.source, PriceSource::Rest);
    }

    #[test]
    fn test_subscribe_message() {
        let msg = subscribe_message(&["BTC-USDT".into(), "ETH-USDT".into()]);
        let value: serde_json::Value = serde_json::from_str(&msg).unwrap();
        assert_eq!(value["op"], "subscribe");
        assert_eq!(value["args"][1]["instId"], "ETH-USDT");
        assert_eq!(value["args"][0]["channel"], "tickers");
    }

    #[tokio::test]
    async fn test_invalid_symbols_stop_immediately() {
        let streamer = PriceStreamer::new();
        run_price_streamer(&streamer, &OkxClient::new(), DEFAULT_WS_URL, vec!["$$$".into()]).await;
        assert_eq!(*streamer.status.read().unwrap(), StreamerStatus::Error);
    }
}
