//! Alert rules evaluated against generated signals
//!
//! Rules are static configuration: a list of conditions that must all hold,
//! a priority and a cooldown per (rule, symbol). Only enable/disable is
//! mutable at runtime. Triggered alerts go into a bounded buffer, most recent first.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::RwLock;
use tracing::{debug, info};

use crate::scorer::Tier;
use crate::signal::GeneratedSignal;
use crate::types::{Action, DataSource, Direction};

const MAX_ALERTS: usize = 50;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum AlertCondition {
    /// Score at or above
    MinScore(f64),
    /// Tier at least this good
    Tier(Tier),
    Action(Action),
    Symbol(String),
    Timeframe(String),
    Direction(Direction),
}

impl AlertCondition {
    pub fn matches(&self, signal: &GeneratedSignal) -> bool {
        match self {
            Self::MinScore(min) => signal.score.score >= *min,
            Self::Tier(tier) => signal.score.tier.rank() >= tier.rank(),
            Self::Action(action) => signal.action == *action,
            Self::Symbol(symbol) => signal.symbol.eq_ignore_ascii_case(symbol),
            Self::Timeframe(tf) => signal.timeframe.eq_ignore_ascii_case(tf),
            Self::Direction(direction) => signal.direction == *direction,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertPriority {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertRule {
    pub id: String,
    pub name: String,
    pub conditions: Vec<AlertCondition>,
    pub priority: AlertPriority,
    #[serde(default)]
    pub cooldown_secs: u64,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl AlertRule {
    /// Every condition holds (a rule without conditions never fires)
    pub fn matches(&self, signal: &GeneratedSignal) -> bool {
        !self.conditions.is_empty() && self.conditions.iter().all(|c| c.matches(signal))
    }
}

/// A fired alert
#[derive(Debug, Clone, Serialize)]
pub struct Alert {
    pub rule_id: String,
    pub rule_name: String,
    pub priority: AlertPriority,
    pub symbol: String,
    pub timeframe: String,
    pub action: Action,
    pub direction: Direction,
    pub score: f64,
    pub tier: Tier,
    pub entry_price: String,
    pub message: String,
    /// Epoch seconds
    pub triggered_at: i64,
}

pub fn default_rules() -> Vec<AlertRule> {
    vec![
        AlertRule {
            id: "sharp_buy".into(),
            name: "Sharp buy".into(),
            conditions: vec![AlertCondition::Tier(Tier::Sharp), AlertCondition::Action(Action::Buy)],
            priority: AlertPriority::High,
            cooldown_secs: 900,
            enabled: true,
        },
        AlertRule {
            id: "sharp_sell".into(),
            name: "Sharp sell".into(),
            conditions: vec![AlertCondition::Tier(Tier::Sharp), AlertCondition::Action(Action::Sell)],
            priority: AlertPriority::High,
            cooldown_secs: 900,
            enabled: true,
        },
        AlertRule {
            id: "high_confluence".into(),
            name: "Very high confluence".into(),
            conditions: vec![AlertCondition::MinScore(85.0)],
            priority: AlertPriority::Critical,
            cooldown_secs: 1800,
            enabled: true,
        },
        AlertRule {
            id: "good_setup".into(),
            name: "Developing setup".into(),
            conditions: vec![AlertCondition::Tier(Tier::Good)],
            priority: AlertPriority::Low,
            cooldown_secs: 3600,
            enabled: false,
        },
    ]
}

/// Read a JSON array of rules
pub fn load_rules_file(path: impl AsRef<Path>) -> Result<Vec<AlertRule>> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read alert rules from {}", path.display()))?;
    let rules: Vec<AlertRule> = serde_json::from_str(&raw)
        .with_context(|| format!("Invalid alert rules in {}", path.display()))?;
    info!(count = rules.len(), path = %path.display(), "Loaded alert rules");
    Ok(rules)
}

pub struct AlertEngine {
    rules: RwLock<Vec<AlertRule>>,
    /// (rule id, symbol) → last fire time, epoch seconds
    last_fired: RwLock<HashMap<(String, String), i64>>,
    alerts: RwLock<Vec<Alert>>,
}

impl AlertEngine {
    pub fn new(rules: Vec<AlertRule>) -> Self {
        Self {
            rules: RwLock::new(rules),
            last_fired: RwLock::new(HashMap::new()),
            alerts: RwLock::new(Vec::new()),
        }
    }

    pub fn with_default_rules() -> Self {
        Self::new(default_rules())
    }

    /// Evaluate at the current time
    pub fn evaluate(&self, signal: &GeneratedSignal) -> Vec<Alert> {
        self.evaluate_at(signal, chrono::Utc::now().timestamp())
    }

    /// Fire every enabled matching rule not in cooldown, highest priority first
    pub fn evaluate_at(&self, signal: &GeneratedSignal, now: i64) -> Vec<Alert> {
        if signal.data_source == DataSource::Synthetic {
            debug!(symbol = %signal.symbol, "No alerts on synthetic data");
            return Vec::new();
        }
        let rules = self.rules.read().unwrap();
        let mut last_fired = self.last_fired.write().unwrap();
        let mut fired = Vec::new();

        for rule in rules.iter().filter(|r| r.enabled && r.matches(signal)) {
            let key = (rule.id.clone(), signal.symbol.clone());
            if let Some(&last) = last_fired.get(&key) {
                if now - last < rule.cooldown_secs as i64 {
                    debug!(rule = %rule.id, symbol = %signal.symbol, "Alert in cooldown");
                    continue;
                }
            }
            last_fired.insert(key, now);

            fired.push(Alert {
                rule_id: rule.id.clone(),
                rule_name: rule.name.clone(),
                priority: rule.priority,
                symbol: signal.symbol.clone(),
                timeframe: signal.timeframe.clone(),
                action: signal.action,
                direction: signal.direction,
                score: signal.score.score,
                tier: signal.score.tier,
                entry_price: signal.entry_price.normalize().to_string(),
                message: format!(
                    "[{}] {} {} {} score {:.1} ({})",
                    rule.name,
                    signal.symbol,
                    signal.timeframe,
                    signal.action.as_str(),
                    signal.score.score,
                    signal.score.tier.as_str()
                ),
                triggered_at: now,
            });
        }
        drop(last_fired);
        drop(rules);

        fired.sort_by(|a, b| b.priority.cmp(&a.priority));
        for alert in &fired {
            info!(rule = %alert.rule_id, symbol = %alert.symbol, "Alert: {}", alert.message);
            self.push_alert(alert.clone());
        }
        fired
    }

    fn push_alert(&self, alert: Alert) {
        let mut alerts = self.alerts.write().unwrap();
        alerts.insert(0, alert);
        alerts.truncate(MAX_ALERTS);
    }

    /// Most recent first
    pub fn recent_alerts(&self, limit: usize) -> Vec<Alert> {
        self.alerts.read().unwrap().iter().take(limit).cloned().collect()
    }

    pub fn rules(&self) -> Vec<AlertRule> {
        self.rules.read().unwrap().clone()
    }

    /// Returns false for an unknown rule id
    pub fn set_enabled(&self, rule_id: &str, enabled: bool) -> bool {
        let mut rules = self.rules.write().unwrap();
        match rules.iter_mut().find(|r| r.id == rule_id) {
            Some(rule) => {
                rule.enabled = enabled;
                info!(rule = rule_id, enabled, "Alert rule toggled");
                true
            }
            None => false,
        }
    }
}

impl Default for AlertEngine {
    fn default() -> Self {
        Self::with_default_rules()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit_breaker::CircuitBreaker;
    use crate::scorer::ConfluenceScorer;
    use crate::signal::test_support::FixtureSource;
    use crate::signal::SignalEngine;
    use std::sync::Arc;

    async fn sample_signal() -> GeneratedSignal {
        SignalEngine::new(
            Arc::new(FixtureSource::rising()),
            Arc::new(RwLock::new(ConfluenceScorer::default())),
            Arc::new(CircuitBreaker::default()),
        )
        .generate("BTC-USDT", "1H")
        .await
        .unwrap()
    }

    fn rule(id: &str, conditions: Vec<AlertCondition>, cooldown_secs: u64) -> AlertRule {
        AlertRule {
            id: id.into(),
            name: id.into(),
            conditions,
            priority: AlertPriority::Medium,
            cooldown_secs,
            enabled: true,
        }
    }

    #[tokio::test]
    async fn test_all_conditions_must_hold() {
        let signal = sample_signal().await;
        let engine = AlertEngine::new(vec![
            rule(
                "btc_long",
                vec![
                    AlertCondition::Symbol("btc-usdt".into()),
                    AlertCondition::Direction(Direction::Long),
                    AlertCondition::MinScore(0.0),
                ],
                0,
            ),
            rule(
                "eth_only",
                vec![AlertCondition::Symbol("ETH-USDT".into()), AlertCondition::MinScore(0.0)],
                0,
            ),
        ]);

        let fired = engine.evaluate_at(&signal, 1_000);
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].rule_id, "btc_long");
    }

    #[tokio::test]
    async fn test_cooldown_per_rule_and_symbol() {
        let mut signal = sample_signal().await;
        let engine = AlertEngine::new(vec![rule("any", vec![AlertCondition::MinScore(0.0)], 600)]);

        assert_eq!(engine.evaluate_at(&signal, 1_000).len(), 1);
        assert!(engine.evaluate_at(&signal, 1_300).is_empty());

        signal.symbol = "ETH-USDT".into();
        assert_eq!(engine.evaluate_at(&signal, 1_300).len(), 1);

        signal.symbol = "BTC-USDT".into();
        assert_eq!(engine.evaluate_at(&signal, 1_600).len(), 1);
        assert_eq!(engine.recent_alerts(10).len(), 3);
    }

    #[tokio::test]
    async fn test_synthetic_signal_fires_nothing() {
        let mut signal = sample_signal().await;
        signal.data_source = DataSource::Synthetic;
        let engine = AlertEngine::new(vec![rule("any", vec![AlertCondition::MinScore(0.0)], 0)]);

        assert!(engine.evaluate_at(&signal, 1_000).is_empty());
        assert!(engine.recent_alerts(10).is_empty());
    }

    #[tokio::test]
    async fn test_disabled_rule_does_not_fire() {
        let signal = sample_signal().await;
        let engine = AlertEngine::new(vec![rule("any", vec![AlertCondition::MinScore(0.0)], 0)]);

        assert!(engine.set_enabled("any", false));
        assert!(engine.evaluate_at(&signal, 1).is_empty());
        assert!(!engine.set_enabled("missing", true));
    }

    #[tokio::test]
    async fn test_alert_buffer_is_bounded() {
        let signal = sample_signal().await;
        let engine = AlertEngine::new(vec![rule("any", vec![AlertCondition::MinScore(0.0)], 0)]);
        for t in 0..(MAX_ALERTS as i64 + 10) {
            engine.evaluate_at(&signal, t);
        }
        let recent = engine.recent_alerts(usize::MAX);
        assert_eq!(recent.len(), MAX_ALERTS);
        assert_eq!(recent[0].triggered_at, MAX_ALERTS as i64 + 9);
    }

    #[test]
    fn test_rules_round_trip_through_json() {
        let json = r#"[{"id":"r1","name":"Sharp BTC","priority":"high","cooldown_secs":60,
            "conditions":[{"type":"tier","value":"SHARP"},{"type":"symbol","value":"BTC-USDT"}]}]"#;
        let path = std::env::temp_dir().join(format!("alert_rules_{}.json", std::process::id()));
        std::fs::write(&path, json).unwrap();

        let rules = load_rules_file(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(rules.len(), 1);
        assert!(rules[0].enabled);
        assert_eq!(rules[0].conditions[0], AlertCondition::Tier(Tier::Sharp));
        assert!(load_rules_file("/nonexistent/rules.json").is_err());
    }

    #[test]
    fn test_default_rules() {
        let rules = default_rules();
        assert!(rules.iter().any(|r| r.id == "sharp_buy" && r.enabled));
        assert!(rules.iter().any(|r| !r.enabled));
    }
}
