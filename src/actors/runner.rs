//! TargetRunner - owns the probing loop of one target
//!
//! ```text
//! probe → log outcome → evaluate → dispatch alerts → sleep(interval) → probe …
//!   ↑                                                     ↑
//!   └──────────── shutdown signal cancels either ─────────┘
//! ```
//!
//! The runner is the only owner of its [`EvaluatorState`]; the supervisor only
//! sees the [`RunnerEvent`]s it publishes.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, instrument, trace, warn};

use crate::config::TargetSpec;
use crate::evaluator::{self, EvaluatorState};
use crate::notifier::Dispatcher;
use crate::probe::{FailureKind, Probe, ProbeOutcome};

use super::messages::{RunExit, RunnerEvent};

/// Added to the target timeout before an in-flight probe is abandoned
const PROBE_DEADLINE_SLACK: Duration = Duration::from_secs(2);

pub struct TargetRunner {
    spec: Arc<TargetSpec>,
    probe: Arc<dyn Probe>,
    dispatcher: Dispatcher,
    state: EvaluatorState,

    /// Flips to `true` once; a dropped sender counts as shutdown too
    shutdown: watch::Receiver<bool>,

    events: mpsc::UnboundedSender<RunnerEvent>,
}

impl TargetRunner {
    pub fn new(
        spec: Arc<TargetSpec>,
        probe: Arc<dyn Probe>,
        dispatcher: Dispatcher,
        shutdown: watch::Receiver<bool>,
        events: mpsc::UnboundedSender<RunnerEvent>,
    ) -> Self {
        let state = EvaluatorState::for_target(&spec);
        Self {
            spec,
            probe,
            dispatcher,
            state,
            shutdown,
            events,
        }
    }

    /// Run until shutdown or until the probe limit is reached
    #[instrument(skip(self), fields(target = %self.spec.name))]
    pub async fn run(mut self) -> RunExit {
        debug!(
            "starting runner for {} every {:?}",
            self.spec.address(),
            self.spec.interval
        );
        self.publish(RunnerEvent::Started {
            target: self.spec.name.clone(),
        });

        let mut probes: u64 = 0;

        let exit = loop {
            if *self.shutdown.borrow() {
                break RunExit::Stopped;
            }

            let outcome = tokio::select! {
                biased;

                _ = self.shutdown.changed() => {
                    debug!("shutdown during probe, discarding attempt");
                    break RunExit::Stopped;
                }

                outcome = probe_once(&self.spec, self.probe.as_ref()) => outcome,
            };

            self.handle_outcome(outcome).await;
            probes += 1;

            if let Some(limit) = self.spec.probe_limit
                && probes >= limit
            {
                debug!("probe limit of {limit} reached");
                break RunExit::ProbeLimitReached;
            }

            tokio::select! {
                biased;

                _ = self.shutdown.changed() => break RunExit::Stopped,

                _ = tokio::time::sleep(self.spec.interval) => {}
            }
        };

        self.publish(RunnerEvent::Exited {
            target: self.spec.name.clone(),
            exit,
        });
        debug!("runner stopped: {exit:?}");
        exit
    }

    async fn handle_outcome(&mut self, outcome: ProbeOutcome) {
        info!("{}", outcome.summary());

        let state = std::mem::take(&mut self.state);
        let (state, alerts) = evaluator::evaluate(&outcome, state, &self.spec);
        self.state = state;
        trace!(
            "failure window {}/{}",
            self.state.failure_window().len(),
            self.spec.failure_threshold
        );

        for alert in &alerts {
            warn!("{} alert: {}", alert.kind, alert.message);
            self.dispatcher.dispatch(alert).await;
        }

        self.publish(RunnerEvent::Tick {
            target: self.spec.name.clone(),
            outcome,
            alerts: alerts.len(),
        });
    }

    fn publish(&self, event: RunnerEvent) {
        // Nobody listening only means the supervisor is already gone
        if self.events.send(event).is_err() {
            trace!("no supervisor listening for runner events");
        }
    }
}

/// One probe attempt, bounded in time and isolated from panics
async fn probe_once(spec: &TargetSpec, probe: &dyn Probe) -> ProbeOutcome {
    let deadline = spec.timeout + PROBE_DEADLINE_SLACK;
    let attempt = AssertUnwindSafe(probe.probe()).catch_unwind();

    match tokio::time::timeout(deadline, attempt).await {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(panic)) => {
            let reason = panic_message(panic.as_ref());
            error!("probe panicked: {reason}");
            ProbeOutcome::failure(
                FailureKind::Internal,
                format!("{} --> probe panicked: {reason}", spec.address()),
            )
        }
        Err(_) => {
            warn!("probe exceeded {deadline:?}");
            ProbeOutcome::failure(
                FailureKind::Timeout,
                format!("{} --> no result within {deadline:?}", spec.address()),
            )
        }
    }
}

/// Best effort text of a panic payload
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
