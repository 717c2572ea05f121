//! Per-target alert evaluation
//!
//! Three independent policies run over every outcome:
//!
//! ```text
//! failure threshold:  fail → push to window; window == threshold → alert, clear window
//! latency (gt/lt):    success → compare latency with threshold
//! latency (avg):      success → push latency; window full → compare mean with threshold
//! wan identity:       success → payload != expected → alert (every tick)
//! ```
//!
//! Failure alerts are edge-triggered: after firing, the window starts empty
//! and a new alert needs a fresh run up to the threshold. By default a
//! success clears the window; in [`FailureMode::Accumulate`] it does not, so
//! `[fail, fail, ok, fail]` alerts with a threshold of 3.

use std::collections::VecDeque;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, trace};

use crate::config::{FailureMode, LatencyMode, LatencyPolicy, Protocol, TargetSpec};
use crate::probe::ProbeOutcome;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    FailureThreshold,
    LatencyViolation,
    WanMismatch,
}

impl fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TriggerKind::FailureThreshold => "failure-threshold",
            TriggerKind::LatencyViolation => "latency-violation",
            TriggerKind::WanMismatch => "wan-mismatch",
        };
        f.write_str(name)
    }
}

/// An alert produced by one evaluation, consumed once by the dispatcher
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertEvent {
    pub message: String,
    pub target: String,
    pub kind: TriggerKind,
    pub timestamp: DateTime<Utc>,
}

impl AlertEvent {
    fn new(spec: &TargetSpec, kind: TriggerKind, message: String) -> Self {
        Self {
            message,
            target: spec.name.clone(),
            kind,
            timestamp: Utc::now(),
        }
    }
}

/// Windows grow on demand past this many entries
const PREALLOCATED_SAMPLES: usize = 16;

/// Rolling evaluation state of one target
///
/// Owned by the target's runner and threaded through [`evaluate`]; never
/// shared between targets.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EvaluatorState {
    /// Recent failing outcomes, at most `failure_threshold` long
    failures: VecDeque<ProbeOutcome>,

    /// Latencies of the most recent successes, at most `window` long
    latencies: VecDeque<f64>,

    /// Failures since the last failure alert (or success, in consecutive mode)
    failure_count: u64,
}

impl EvaluatorState {
    pub fn for_target(spec: &TargetSpec) -> Self {
        let window = spec.latency.map(|policy| policy.window).unwrap_or(0);
        Self {
            failures: VecDeque::with_capacity(spec.failure_threshold.min(PREALLOCATED_SAMPLES)),
            latencies: VecDeque::with_capacity(window.min(PREALLOCATED_SAMPLES)),
            failure_count: 0,
        }
    }

    pub fn failure_window(&self) -> &VecDeque<ProbeOutcome> {
        &self.failures
    }

    pub fn success_window(&self) -> &VecDeque<f64> {
        &self.latencies
    }

    pub fn failure_count(&self) -> u64 {
        self.failure_count
    }
}

/// Result of checking one latency against a latency policy
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LatencyVerdict {
    /// Not enough samples yet (avg mode)
    Pending,
    Ok,
    Violation { observed_ms: f64 },
}

impl LatencyVerdict {
    /// `window` must already contain `latency_ms`
    pub fn evaluate(policy: &LatencyPolicy, latency_ms: f64, window: &VecDeque<f64>) -> Self {
        let observed_ms = match policy.mode {
            LatencyMode::Gt | LatencyMode::Lt => latency_ms,
            LatencyMode::Avg => {
                if window.len() < policy.window {
                    return LatencyVerdict::Pending;
                }
                window.iter().sum::<f64>() / window.len() as f64
            }
        };

        let violated = match policy.mode {
            LatencyMode::Gt | LatencyMode::Avg => observed_ms > policy.threshold_ms,
            LatencyMode::Lt => observed_ms < policy.threshold_ms,
        };

        if violated {
            LatencyVerdict::Violation { observed_ms }
        } else {
            LatencyVerdict::Ok
        }
    }
}

/// Feed one outcome through every policy configured for `spec`
pub fn evaluate(
    outcome: &ProbeOutcome,
    mut state: EvaluatorState,
    spec: &TargetSpec,
) -> (EvaluatorState, Vec<AlertEvent>) {
    let mut alerts = Vec::new();

    if let Some(alert) = evaluate_failures(outcome, &mut state, spec) {
        alerts.push(alert);
    }

    if let Some(alert) = evaluate_latency(outcome, &mut state, spec) {
        alerts.push(alert);
    }

    if let Some(alert) = evaluate_wan(outcome, spec) {
        alerts.push(alert);
    }

    trace!(
        "{}: failure window {}/{}, success window {:?} -> {} alert(s)",
        spec.name,
        state.failures.len(),
        spec.failure_threshold,
        state.latencies,
        alerts.len()
    );

    (state, alerts)
}

fn evaluate_failures(
    outcome: &ProbeOutcome,
    state: &mut EvaluatorState,
    spec: &TargetSpec,
) -> Option<AlertEvent> {
    if outcome.is_success() {
        if spec.failure_mode == FailureMode::Consecutive && !state.failures.is_empty() {
            debug!("{}: success resets failure window", spec.name);
            state.failures.clear();
            state.failure_count = 0;
        }
        return None;
    }

    state.failures.push_back(outcome.clone());
    state.failure_count += 1;

    if state.failures.len() < spec.failure_threshold {
        debug!(
            "{}: failure {}/{}",
            spec.name,
            state.failures.len(),
            spec.failure_threshold
        );
        return None;
    }

    if !spec.alert_enabled {
        while state.failures.len() > spec.failure_threshold {
            state.failures.pop_front();
        }
        debug!("{}: failure threshold reached, alerting disabled", spec.name);
        return None;
    }

    let detail = outcome
        .failure_detail()
        .map(|failure| failure.detail.clone())
        .unwrap_or_default();
    let message = format!(
        "\u{274C} {} ({}) failed {} check(s): {detail}",
        spec.name, spec.protocol, state.failure_count
    );

    debug!("{}: failure threshold reached, alerting", spec.name);
    state.failures.clear();
    state.failure_count = 0;

    Some(AlertEvent::new(spec, TriggerKind::FailureThreshold, message))
}

fn evaluate_latency(
    outcome: &ProbeOutcome,
    state: &mut EvaluatorState,
    spec: &TargetSpec,
) -> Option<AlertEvent> {
    let policy = spec.latency.as_ref()?;
    if spec.protocol == Protocol::Wan || !outcome.is_success() {
        return None;
    }
    let latency_ms = outcome.latency_ms?;

    state.latencies.push_back(latency_ms);
    while state.latencies.len() > policy.window {
        state.latencies.pop_front();
    }

    let verdict = LatencyVerdict::evaluate(policy, latency_ms, &state.latencies);
    trace!(
        "{}: latency {latency_ms:.2}ms ({} {}ms) -> {verdict:?}",
        spec.name, policy.mode, policy.threshold_ms
    );

    let LatencyVerdict::Violation { observed_ms } = verdict else {
        return None;
    };

    let message = match policy.mode {
        LatencyMode::Gt => format!(
            "\u{26A0}\u{FE0F} {} latency {observed_ms:.2}ms is above {}ms",
            spec.name, policy.threshold_ms
        ),
        LatencyMode::Lt => format!(
            "\u{26A0}\u{FE0F} {} latency {observed_ms:.2}ms is below {}ms",
            spec.name, policy.threshold_ms
        ),
        LatencyMode::Avg => format!(
            "\u{26A0}\u{FE0F} {} average latency over the last {} checks {observed_ms:.2}ms is above {}ms",
            spec.name, policy.window, policy.threshold_ms
        ),
    };

    Some(AlertEvent::new(spec, TriggerKind::LatencyViolation, message))
}

fn evaluate_wan(outcome: &ProbeOutcome, spec: &TargetSpec) -> Option<AlertEvent> {
    if spec.protocol != Protocol::Wan || !outcome.is_success() {
        return None;
    }
    let expected = spec.expected_response.as_deref()?;
    let actual = outcome.payload.as_deref().unwrap_or_default().trim();

    if actual == expected.trim() {
        return None;
    }

    debug!("{}: WAN response mismatch", spec.name);
    let message = format!(
        "\u{1F310} {} WAN response changed: expected '{}', got '{actual}'",
        spec.name,
        expected.trim()
    );

    Some(AlertEvent::new(spec, TriggerKind::WanMismatch, message))
}
