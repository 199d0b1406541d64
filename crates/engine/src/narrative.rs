//! Plain-text summary of a generated signal

use std::fmt::Write;

use crate::scorer::Tier;
use crate::signal::GeneratedSignal;
use crate::smc::PatternKind;
use crate::types::{Action, Bias, DataSource};

fn tier_wording(tier: Tier) -> &'static str {
    match tier {
        Tier::Sharp => "high-conviction",
        Tier::Good => "developing",
        Tier::Average => "mixed",
        Tier::Poor => "weak",
    }
}

fn bias_word(bias: Bias) -> &'static str {
    match bias {
        Bias::Bullish => "bullish",
        Bias::Bearish => "bearish",
        Bias::Neutral => "neutral",
    }
}

/// Multi-line narrative: headline, structure, indicators, plan, notes
pub fn narrate(signal: &GeneratedSignal) -> String {
    let mut out = String::new();
    let score = &signal.score;

    let headline = match signal.action {
        Action::Buy | Action::Sell => format!("{} setup", signal.action.as_str()),
        Action::Hold => "no trade".to_string(),
    };
    let _ = writeln!(
        out,
        "{} {}: {} {}, confluence {:.1}/100 (sharp at {:.0}).",
        signal.symbol,
        signal.timeframe,
        tier_wording(score.tier),
        headline,
        score.score,
        score.sharp_threshold
    );

    let smc = &signal.smc;
    let mut structure = format!(
        "Structure is {} with {:.0}% SMC confidence",
        bias_word(smc.bias),
        smc.confidence * 100.0
    );
    if let Some(brk) = &smc.last_structure_break {
        let kind = match brk.kind {
            PatternKind::ChangeOfCharacter => "change of character",
            _ => "break of structure",
        };
        let _ = write!(structure, ", last {} {}", bias_word(brk.direction), kind);
    }
    if let Some(position) = smc.range_position {
        let zone = if position >= 0.5 { "premium" } else { "discount" };
        let _ = write!(structure, ", price in the {} half of the range", zone);
    }
    let _ = writeln!(out, "{}.", structure);

    let active_obs = smc.order_blocks.iter().filter(|p| !p.mitigated).count();
    let open_gaps = smc.fair_value_gaps.iter().filter(|p| !p.mitigated).count();
    if active_obs + open_gaps + smc.liquidity_sweeps.len() > 0 {
        let _ = writeln!(
            out,
            "Active zones: {} order block(s), {} open fair value gap(s), {} liquidity sweep(s).",
            active_obs,
            open_gaps,
            smc.liquidity_sweeps.len()
        );
    }

    let ind = &signal.indicators;
    let rsi_note = if ind.is_overbought() {
        " (overbought)"
    } else if ind.is_oversold() {
        " (oversold)"
    } else {
        ""
    };
    let _ = writeln!(
        out,
        "RSI {:.1}{}, EMA trend {}, MACD histogram {:+.4}, volume {:.1}x average.",
        ind.rsi,
        rsi_note,
        bias_word(ind.trend_bias()),
        ind.macd_histogram,
        ind.volume_ratio
    );

    if signal.action.is_actionable() {
        let _ = writeln!(
            out,
            "Plan: entry {}, stop {}, target {} (R:R {:.1}).",
            signal.entry_price.normalize(),
            signal.stop_loss.normalize(),
            signal.take_profit.normalize(),
            signal.risk_reward
        );
    }

    if signal.held_by_circuit_breaker {
        let _ = writeln!(out, "Held: the circuit breaker is tripped after consecutive losses.");
    }
    if signal.data_source == DataSource::Synthetic {
        let _ = writeln!(out, "Warning: exchange data unavailable, analysis ran on synthetic candles.");
    }

    out.trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit_breaker::CircuitBreaker;
    use crate::scorer::ConfluenceScorer;
    use crate::signal::test_support::FixtureSource;
    use crate::signal::SignalEngine;
    use std::sync::{Arc, RwLock};

    async fn generate(source: FixtureSource) -> GeneratedSignal {
        SignalEngine::new(
            Arc::new(source),
            Arc::new(RwLock::new(ConfluenceScorer::default())),
            Arc::new(CircuitBreaker::default()),
        )
        .generate("BTC-USDT", "1H")
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_narrative_mentions_symbol_and_score() {
        let signal = generate(FixtureSource::rising()).await;
        let text = narrate(&signal);
        assert!(text.starts_with("BTC-USDT 1H:"));
        assert!(text.contains("confluence"));
        assert!(text.contains("Structure is bullish"));
        assert!(text.contains("RSI"));
    }

    #[tokio::test]
    async fn test_synthetic_data_is_flagged() {
        let mut source = FixtureSource::flat();
        source.data_source = DataSource::Synthetic;
        let signal = generate(source).await;
        assert!(signal.narrative.contains("synthetic candles"));
        assert!(!signal.narrative.contains("Plan:"));
    }
}
