//! CircuitBreaker (spec §4.9): per-node failure state machine.

use crate::config::CircuitConfig;
use crate::types::{CircuitState, CircuitStateKind};
use dashmap::DashMap;

pub struct CircuitBreaker {
    config: CircuitConfig,
    states: DashMap<String, CircuitState>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitConfig) -> Self {
        Self {
            config,
            states: DashMap::new(),
        }
    }

    fn state_for(&self, node_id: &str, now_ms: i64) -> dashmap::mapref::one::RefMut<'_, String, CircuitState> {
        self.states.entry(node_id.to_string()).or_insert(CircuitState {
            state: CircuitStateKind::Closed,
            failures: 0,
            successes: 0,
            last_state_change: now_ms,
        })
    }

    /// `CLOSED`/`HALF_OPEN` admit; `OPEN` rejects until `timeoutMs` elapses,
    /// at which point the next call transitions to `HALF_OPEN` (spec §4.9).
    pub fn is_allowed(&self, node_id: &str, now_ms: i64) -> bool {
        let mut state = self.state_for(node_id, now_ms);
        match state.state {
            CircuitStateKind::Closed | CircuitStateKind::HalfOpen => true,
            CircuitStateKind::Open => {
                if now_ms - state.last_state_change >= self.config.timeout_ms as i64 {
                    state.state = CircuitStateKind::HalfOpen;
                    state.successes = 0;
                    state.last_state_change = now_ms;
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success(&self, node_id: &str, now_ms: i64) {
        let mut state = self.state_for(node_id, now_ms);
        match state.state {
            CircuitStateKind::Closed => {
                state.failures = 0;
            }
            CircuitStateKind::HalfOpen => {
                state.successes += 1;
                if state.successes >= self.config.success_threshold {
                    state.state = CircuitStateKind::Closed;
                    state.failures = 0;
                    state.successes = 0;
                    state.last_state_change = now_ms;
                }
            }
            CircuitStateKind::Open => {}
        }
    }

    pub fn record_failure(&self, node_id: &str, now_ms: i64) {
        let mut state = self.state_for(node_id, now_ms);
        match state.state {
            CircuitStateKind::Closed => {
                state.failures += 1;
                if state.failures >= self.config.threshold {
                    state.state = CircuitStateKind::Open;
                    state.last_state_change = now_ms;
                }
            }
            CircuitStateKind::HalfOpen => {
                state.state = CircuitStateKind::Open;
                state.failures = self.config.threshold;
                state.successes = 0;
                state.last_state_change = now_ms;
            }
            CircuitStateKind::Open => {}
        }
    }

    pub fn state_of(&self, node_id: &str) -> CircuitStateKind {
        self.states
            .get(node_id)
            .map(|s| s.state)
            .unwrap_or(CircuitStateKind::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker() -> CircuitBreaker {
        CircuitBreaker::new(CircuitConfig {
            threshold: 2,
            timeout_ms: 1_000,
            success_threshold: 2,
        })
    }

    #[test]
    fn opens_after_threshold_failures() {
        let cb = breaker();
        assert!(cb.is_allowed("n1", 0));
        cb.record_failure("n1", 0);
        assert!(cb.is_allowed("n1", 0));
        cb.record_failure("n1", 0);
        assert!(!cb.is_allowed("n1", 0));
        assert_eq!(cb.state_of("n1"), CircuitStateKind::Open);
    }

    #[test]
    fn half_opens_after_timeout_then_closes_after_successes() {
        let cb = breaker();
        cb.record_failure("n1", 0);
        cb.record_failure("n1", 0);
        assert!(!cb.is_allowed("n1", 500));
        assert!(cb.is_allowed("n1", 1_000));
        assert_eq!(cb.state_of("n1"), CircuitStateKind::HalfOpen);
        cb.record_success("n1", 1_000);
        assert_eq!(cb.state_of("n1"), CircuitStateKind::HalfOpen);
        cb.record_success("n1", 1_000);
        assert_eq!(cb.state_of("n1"), CircuitStateKind::Closed);
    }

    #[test]
    fn half_open_failure_reopens() {
        let cb = breaker();
        cb.record_failure("n1", 0);
        cb.record_failure("n1", 0);
        cb.is_allowed("n1", 1_000);
        cb.record_failure("n1", 1_000);
        assert_eq!(cb.state_of("n1"), CircuitStateKind::Open);
        assert!(!cb.is_allowed("n1", 1_000));
    }

    #[test]
    fn success_resets_closed_failure_count() {
        let cb = breaker();
        cb.record_failure("n1", 0);
        cb.record_success("n1", 0);
        cb.record_failure("n1", 0);
        assert!(cb.is_allowed("n1", 0));
        assert_eq!(cb.state_of("n1"), CircuitStateKind::Closed);
    }
}
