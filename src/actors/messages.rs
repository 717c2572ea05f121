//! Message types exchanged between runners, their supervising tasks and the
//! supervisor actor
//!
//! 1. **Commands**: request/response messages sent to the supervisor via mpsc
//! 2. **Events**: progress reports flowing from every runner to the supervisor
//! 3. **Status**: the liveness view the supervisor builds from those events

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::oneshot;

use crate::probe::ProbeOutcome;

/// Why a runner loop returned
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunExit {
    /// The shutdown signal was observed
    Stopped,

    /// `probe_count` probes were performed
    ProbeLimitReached,
}

/// Event published by a runner or by the task supervising it
#[derive(Debug, Clone)]
pub enum RunnerEvent {
    /// A (re)started runner entered its loop
    Started { target: String },

    /// One probe iteration completed
    Tick {
        target: String,
        outcome: ProbeOutcome,
        alerts: usize,
    },

    /// The runner panicked; `restarting` tells whether it comes back
    Panicked {
        target: String,
        reason: String,
        restarting: bool,
    },

    /// The runner loop returned normally
    Exited { target: String, exit: RunExit },

    /// The runner could not be (re)built
    Failed { target: String, reason: String },
}

impl RunnerEvent {
    pub fn target(&self) -> &str {
        match self {
            RunnerEvent::Started { target }
            | RunnerEvent::Tick { target, .. }
            | RunnerEvent::Panicked { target, .. }
            | RunnerEvent::Exited { target, .. }
            | RunnerEvent::Failed { target, .. } => target,
        }
    }
}

/// Commands that can be sent to the SupervisorActor
#[derive(Debug)]
pub enum SupervisorCommand {
    /// Get the liveness of every runner, in configuration order
    Status {
        respond_to: oneshot::Sender<Vec<RunnerStatus>>,
    },

    /// Stop every runner and report their final state
    Shutdown {
        respond_to: oneshot::Sender<Vec<RunnerStatus>>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunnerState {
    Starting,
    Running,
    /// Waiting out the backoff after a panic
    Restarting,
    /// Left its loop on the shutdown signal
    Stopped,
    /// Reached its probe limit
    Completed,
    /// Panicked with the terminate policy, or could not be built
    Terminated,
    /// Still busy when the shutdown grace period ran out
    Aborted,
}

impl RunnerState {
    pub fn is_alive(&self) -> bool {
        matches!(
            self,
            RunnerState::Starting | RunnerState::Running | RunnerState::Restarting
        )
    }
}

impl fmt::Display for RunnerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunnerState::Starting => "starting",
            RunnerState::Running => "running",
            RunnerState::Restarting => "restarting",
            RunnerState::Stopped => "stopped",
            RunnerState::Completed => "completed",
            RunnerState::Terminated => "terminated",
            RunnerState::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

/// Liveness of one runner as seen by the supervisor
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunnerStatus {
    pub target: String,
    pub state: RunnerState,

    /// Completed probe iterations across restarts
    pub ticks: u64,

    /// Failing outcomes among those ticks
    pub failures: u64,

    /// Alerts raised (delivered or not)
    pub alerts: u64,

    pub restarts: u32,

    /// Summary line of the most recent outcome
    pub last_outcome: Option<String>,

    pub last_tick: Option<DateTime<Utc>>,

    /// Reason of the most recent panic or build failure
    pub last_error: Option<String>,
}

impl RunnerStatus {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            state: RunnerState::Starting,
            ticks: 0,
            failures: 0,
            alerts: 0,
            restarts: 0,
            last_outcome: None,
            last_tick: None,
            last_error: None,
        }
    }

    /// Fold one event into the status
    pub fn apply(&mut self, event: RunnerEvent) {
        match event {
            RunnerEvent::Started { .. } => {
                if self.state == RunnerState::Restarting {
                    self.restarts += 1;
                }
                self.state = RunnerState::Running;
            }
            RunnerEvent::Tick {
                outcome, alerts, ..
            } => {
                self.ticks += 1;
                if !outcome.is_success() {
                    self.failures += 1;
                }
                self.alerts += alerts as u64;
                self.last_tick = Some(outcome.timestamp);
                self.last_outcome = Some(outcome.summary());
            }
            RunnerEvent::Panicked {
                reason, restarting, ..
            } => {
                self.state = if restarting {
                    RunnerState::Restarting
                } else {
                    RunnerState::Terminated
                };
                self.last_error = Some(reason);
            }
            RunnerEvent::Exited { exit, .. } => {
                self.state = match exit {
                    RunExit::Stopped => RunnerState::Stopped,
                    RunExit::ProbeLimitReached => RunnerState::Completed,
                };
            }
            RunnerEvent::Failed { reason, .. } => {
                self.state = RunnerState::Terminated;
                self.last_error = Some(reason);
            }
        }
    }
}

impl fmt::Display for RunnerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} ({} ticks, {} failed, {} alerts, {} restarts)",
            self.target, self.state, self.ticks, self.failures, self.alerts, self.restarts
        )?;
        if let Some(error) = &self.last_error {
            write!(f, " last error: {error}")?;
        }
        Ok(())
    }
}
