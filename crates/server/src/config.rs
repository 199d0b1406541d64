//! Runtime configuration from environment variables (after `.env` is loaded)

use std::path::PathBuf;
use std::str::FromStr;

use engine::api::okx::DEFAULT_BASE_URL;
use engine::scorer::DEFAULT_SHARP_THRESHOLD;
use engine::streamer::DEFAULT_WS_URL;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub db_path: String,
    pub okx_base_url: String,
    pub okx_ws_url: String,
    pub cache_ttl_secs: u64,
    pub sharp_threshold: f64,
    pub stream_symbols: Vec<String>,
    /// 0 disables the periodic retrain
    pub retrain_interval_hours: u64,
    pub trade_log_path: PathBuf,
    pub alert_rules_path: Option<PathBuf>,
    pub max_consecutive_losses: u32,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            db_path: "data/signals.db".to_string(),
            okx_base_url: DEFAULT_BASE_URL.to_string(),
            okx_ws_url: DEFAULT_WS_URL.to_string(),
            cache_ttl_secs: 30,
            sharp_threshold: DEFAULT_SHARP_THRESHOLD,
            stream_symbols: vec!["BTC-USDT".to_string(), "ETH-USDT".to_string()],
            retrain_interval_hours: 24,
            trade_log_path: PathBuf::from("data/trade_log.jsonl"),
            alert_rules_path: None,
            max_consecutive_losses: 3,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; unset or unparseable values keep their defaults
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        Self {
            db_path: get("SMC_DB_PATH").unwrap_or(defaults.db_path),
            okx_base_url: get("OKX_BASE_URL").unwrap_or(defaults.okx_base_url),
            okx_ws_url: get("OKX_WS_URL").unwrap_or(defaults.okx_ws_url),
            cache_ttl_secs: parse_or(get("SMC_CACHE_TTL_SECS"), "SMC_CACHE_TTL_SECS", defaults.cache_ttl_secs),
            sharp_threshold: parse_or(get("SMC_SHARP_THRESHOLD"), "SMC_SHARP_THRESHOLD", defaults.sharp_threshold),
            stream_symbols: get("SMC_STREAM_SYMBOLS")
                .map(|v| {
                    v.split(',')
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                        .collect()
                })
                .unwrap_or(defaults.stream_symbols),
            retrain_interval_hours: parse_or(
                get("SMC_RETRAIN_INTERVAL_HOURS"),
                "SMC_RETRAIN_INTERVAL_HOURS",
                defaults.retrain_interval_hours,
            ),
            trade_log_path: get("SMC_TRADE_LOG_PATH").map(PathBuf::from).unwrap_or(defaults.trade_log_path),
            alert_rules_path: get("SMC_ALERT_RULES_PATH").map(PathBuf::from),
            max_consecutive_losses: parse_or(
                get("SMC_MAX_CONSECUTIVE_LOSSES"),
                "SMC_MAX_CONSECUTIVE_LOSSES",
                defaults.max_consecutive_losses,
            ),
        }
    }
}

fn parse_or<T: FromStr + Copy>(value: Option<String>, key: &str, default: T) -> T {
    match value {
        Some(raw) => raw.parse().unwrap_or_else(|_| {
            warn!(key, value = %raw, "Invalid config value, using default");
            default
        }),
        None => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> AppConfig {
        let vars: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        AppConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[]);
        assert_eq!(config.db_path, "data/signals.db");
        assert_eq!(config.sharp_threshold, 70.0);
        assert_eq!(config.stream_symbols, vec!["BTC-USDT", "ETH-USDT"]);
        assert_eq!(config.retrain_interval_hours, 24);
        assert!(config.alert_rules_path.is_none());
    }

    #[test]
    fn test_overrides_and_bad_values() {
        let config = config_from(&[
            ("SMC_SHARP_THRESHOLD", "75"),
            ("SMC_STREAM_SYMBOLS", "sol-usdt, ,BTC-USDT"),
            ("SMC_RETRAIN_INTERVAL_HOURS", "0"),
            ("SMC_CACHE_TTL_SECS", "soon"),
            ("SMC_ALERT_RULES_PATH", "rules.json"),
        ]);
        assert_eq!(config.sharp_threshold, 75.0);
        assert_eq!(config.stream_symbols, vec!["sol-usdt", "BTC-USDT"]);
        assert_eq!(config.retrain_interval_hours, 0);
        assert_eq!(config.cache_ttl_secs, 30);
        assert_eq!(config.alert_rules_path, Some(PathBuf::from("rules.json")));
    }
}
