//! Telemetry (spec component 14): spans, counters, and duration histograms.
//! No external metrics backend is wired in (none is named in spec §6); the
//! surface mirrors what the teacher exposes before reaching for one —
//! `tracing` spans plus `dashmap`-backed counters a caller can snapshot.

use crate::config::TelemetryConfig;
use crate::error::Outcome;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{info_span, Span};

pub struct Telemetry {
    enabled: bool,
    service_name: String,
    executions_total: AtomicU64,
    invariant_violations_total: AtomicU64,
    outcomes: DashMap<Outcome, u64>,
    durations_ms: DashMap<String, Vec<u64>>,
}

impl Telemetry {
    pub fn new(config: TelemetryConfig) -> Self {
        Self {
            enabled: config.enabled,
            service_name: config.service_name,
            executions_total: AtomicU64::new(0),
            invariant_violations_total: AtomicU64::new(0),
            outcomes: DashMap::new(),
            durations_ms: DashMap::new(),
        }
    }

    /// Opens the span for one invocation (spec §4.11 step 3, "Start hooks").
    pub fn start_span(&self, fn_name: &str, trace_id: &str, depth: u32, target: &str) -> Span {
        if !self.enabled {
            return Span::none();
        }
        info_span!(
            "chainbox.execute",
            service = %self.service_name,
            fn_name = %fn_name,
            trace_id = %trace_id,
            depth,
            target = %target,
        )
    }

    pub fn record_execution_start(&self) {
        self.executions_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_duration(&self, fn_name: &str, duration_ms: u64) {
        self.durations_ms
            .entry(fn_name.to_string())
            .or_default()
            .push(duration_ms);
    }

    pub fn record_outcome(&self, outcome: Outcome) {
        *self.outcomes.entry(outcome).or_insert(0) += 1;
    }

    /// Emitted when a completed frame's outcome had to be coerced (spec §9
    /// "Outcome inference").
    pub fn record_invariant_violation(&self) {
        self.invariant_violations_total.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(target: "chainbox::invariant", "trace frame completed without an outcome; coerced to FAILURE");
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        TelemetrySnapshot {
            executions_total: self.executions_total.load(Ordering::Relaxed),
            invariant_violations_total: self.invariant_violations_total.load(Ordering::Relaxed),
            outcomes: self
                .outcomes
                .iter()
                .map(|entry| (*entry.key(), *entry.value()))
                .collect(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TelemetrySnapshot {
    pub executions_total: u64,
    pub invariant_violations_total: u64,
    pub outcomes: Vec<(Outcome, u64)>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_executions_and_outcomes() {
        let telemetry = Telemetry::new(TelemetryConfig {
            enabled: true,
            service_name: "test".to_string(),
        });
        telemetry.record_execution_start();
        telemetry.record_execution_start();
        telemetry.record_outcome(Outcome::Success);
        telemetry.record_invariant_violation();

        let snapshot = telemetry.snapshot();
        assert_eq!(snapshot.executions_total, 2);
        assert_eq!(snapshot.invariant_violations_total, 1);
        assert!(snapshot.outcomes.contains(&(Outcome::Success, 1)));
    }
}
