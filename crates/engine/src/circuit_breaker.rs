//! Consecutive-loss circuit breaker
//!
//! Trips after `max_consecutive_losses` losses in a row. A win resets the
//! counter, but once tripped only a manual [`CircuitBreaker::reset`] clears it.

use serde::Serialize;
use std::sync::RwLock;
use tracing::{info, warn};

use crate::types::TradeResult;

pub const DEFAULT_MAX_CONSECUTIVE_LOSSES: u32 = 3;

#[derive(Debug, Clone, Serialize)]
pub struct CircuitBreakerState {
    pub tripped: bool,
    pub consecutive_losses: u32,
    pub max_consecutive_losses: u32,
    /// Epoch seconds of the last trip
    pub tripped_at: Option<i64>,
    pub total_trips: u32,
}

pub struct CircuitBreaker {
    state: RwLock<CircuitBreakerState>,
}

impl CircuitBreaker {
    pub fn new(max_consecutive_losses: u32) -> Self {
        Self {
            state: RwLock::new(CircuitBreakerState {
                tripped: false,
                consecutive_losses: 0,
                max_consecutive_losses: max_consecutive_losses.max(1),
                tripped_at: None,
                total_trips: 0,
            }),
        }
    }

    /// Feed one closed trade. Returns true if this result tripped the breaker.
    pub fn record(&self, result: TradeResult) -> bool {
        let mut state = self.state.write().unwrap();
        match result {
            TradeResult::Win => {
                state.consecutive_losses = 0;
                false
            }
            TradeResult::Loss => {
                state.consecutive_losses += 1;
                if !state.tripped && state.consecutive_losses >= state.max_consecutive_losses {
                    state.tripped = true;
                    state.tripped_at = Some(chrono::Utc::now().timestamp());
                    state.total_trips += 1;
                    warn!(
                        losses = state.consecutive_losses,
                        "Circuit breaker tripped, new signals will be held"
                    );
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn is_tripped(&self) -> bool {
        self.state.read().unwrap().tripped
    }

    pub fn reset(&self) {
        let mut state = self.state.write().unwrap();
        state.tripped = false;
        state.consecutive_losses = 0;
        state.tripped_at = None;
        info!("Circuit breaker reset");
    }

    pub fn state(&self) -> CircuitBreakerState {
        self.state.read().unwrap().clone()
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CONSECUTIVE_LOSSES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trips_after_consecutive_losses() {
        let breaker = CircuitBreaker::new(3);
        assert!(!breaker.record(TradeResult::Loss));
        assert!(!breaker.record(TradeResult::Loss));
        assert!(breaker.record(TradeResult::Loss));
        assert!(breaker.is_tripped());
        assert_eq!(breaker.state().total_trips, 1);
        assert!(breaker.state().tripped_at.is_some());
    }

    #[test]
    fn test_win_resets_counter() {
        let breaker = CircuitBreaker::new(3);
        breaker.record(TradeResult::Loss);
        breaker.record(TradeResult::Loss);
        breaker.record(TradeResult::Win);
        breaker.record(TradeResult::Loss);
        assert!(!breaker.is_tripped());
        assert_eq!(breaker.state().consecutive_losses, 1);
    }

    #[test]
    fn test_win_does_not_clear_trip() {
        let breaker = CircuitBreaker::new(2);
        breaker.record(TradeResult::Loss);
        breaker.record(TradeResult::Loss);
        breaker.record(TradeResult::Win);
        assert!(breaker.is_tripped());

        breaker.reset();
        assert!(!breaker.is_tripped());
        assert_eq!(breaker.state().consecutive_losses, 0);
        assert_eq!(breaker.state().total_trips, 1);
    }
}
