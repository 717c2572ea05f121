//! SupervisorActor - runs one TargetRunner per target and keeps them apart
//!
//! ```text
//!                 SupervisorHandle ── Status / Shutdown ──┐
//!                                                         ▼
//!                                                 SupervisorActor
//!                                                         ▲ RunnerEvent
//!          ┌──────────────────────────────┬───────────────┴──────────────┐
//!   supervise(router)              supervise(nas)                supervise(wan)
//!          │ spawn, await JoinHandle      │                              │
//!   TargetRunner(router)           TargetRunner(nas)              TargetRunner(wan)
//! ```
//!
//! Each runner gets its own supervising task, so a panic is only ever seen by
//! the task owning that runner's `JoinHandle`. Shutdown is a single `watch`
//! flag observed by every runner.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context as TaskContext, Poll};
use std::time::Duration;

use anyhow::{Result, anyhow};
use futures::future::join_all;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, error, info, instrument, warn};

use crate::config::{RestartPolicy, Settings, TargetSpec};
use crate::notifier::Dispatcher;
use crate::probe::{self, Probe};

use super::messages::{RunExit, RunnerEvent, RunnerState, RunnerStatus, SupervisorCommand};
use super::runner::{TargetRunner, panic_message};

/// Builds the probe for a target; called again on every restart
pub type ProbeFactory = Arc<dyn Fn(&TargetSpec) -> Result<Arc<dyn Probe>> + Send + Sync>;

/// The factory used outside of tests
pub fn default_probe_factory() -> ProbeFactory {
    Arc::new(probe::for_target)
}

/// Supervision knobs, usually taken from [`Settings`]
#[derive(Debug, Clone, Copy)]
pub struct SupervisorOptions {
    pub startup_notification: bool,
    pub restart_policy: RestartPolicy,
    pub restart_backoff: Duration,
    pub shutdown_grace: Duration,
}

impl From<&Settings> for SupervisorOptions {
    fn from(settings: &Settings) -> Self {
        Self {
            startup_notification: settings.startup_notification,
            restart_policy: settings.restart_policy,
            restart_backoff: settings.restart_backoff(),
            shutdown_grace: settings.shutdown_grace(),
        }
    }
}

impl Default for SupervisorOptions {
    fn default() -> Self {
        Self::from(&Settings::default())
    }
}

/// Aborts the runner when the supervising task is dropped or aborted
struct RunnerTask(JoinHandle<Result<RunExit>>);

impl Future for RunnerTask {
    type Output = std::result::Result<Result<RunExit>, JoinError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.0).poll(cx)
    }
}

impl Drop for RunnerTask {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Everything a supervising task needs to (re)build its runner
struct Supervision {
    spec: Arc<TargetSpec>,
    factory: ProbeFactory,
    dispatcher: Dispatcher,
    options: SupervisorOptions,
    shutdown: watch::Receiver<bool>,
    events: mpsc::UnboundedSender<RunnerEvent>,
}

impl Supervision {
    fn publish(&self, event: RunnerEvent) {
        let _ = self.events.send(event);
    }

    /// Build a fresh probe and runner, then drive it
    ///
    /// Runs inside the spawned runner task, so a panic while building is
    /// reported like a panic while running.
    fn build_and_run(&self) -> impl Future<Output = Result<RunExit>> + Send + 'static {
        let spec = self.spec.clone();
        let factory = self.factory.clone();
        let dispatcher = self.dispatcher.clone();
        let shutdown = self.shutdown.clone();
        let events = self.events.clone();

        async move {
            let probe = factory(spec.as_ref())?;
            let runner = TargetRunner::new(spec, probe, dispatcher, shutdown, events);
            Ok(runner.run().await)
        }
    }

    /// Keep one runner alive according to the restart policy
    #[instrument(skip(self), fields(target = %self.spec.name))]
    async fn run(mut self) {
        let name = self.spec.name.clone();

        loop {
            let task = RunnerTask(tokio::spawn(self.build_and_run()));
            let panic = match task.await {
                Ok(Ok(exit)) => {
                    debug!("runner exited: {exit:?}");
                    return;
                }
                Ok(Err(e)) => {
                    error!("unable to build probe: {e:#}");
                    self.publish(RunnerEvent::Failed {
                        target: name,
                        reason: format!("{e:#}"),
                    });
                    return;
                }
                Err(e) if e.is_panic() => panic_message(e.into_panic().as_ref()),
                Err(e) => {
                    warn!("runner cancelled: {e}");
                    return;
                }
            };

            let restarting = self.options.restart_policy == RestartPolicy::Restart
                && !*self.shutdown.borrow();
            error!("runner panicked: {panic}");
            self.publish(RunnerEvent::Panicked {
                target: name.clone(),
                reason: panic,
                restarting,
            });

            if !restarting {
                return;
            }

            info!("restarting in {:?}", self.options.restart_backoff);
            tokio::select! {
                biased;

                _ = self.shutdown.changed() => {
                    self.publish(RunnerEvent::Exited {
                        target: name,
                        exit: RunExit::Stopped,
                    });
                    return;
                }

                _ = tokio::time::sleep(self.options.restart_backoff) => {}
            }
        }
    }
}

/// Aggregates runner events into liveness and coordinates shutdown
struct SupervisorActor {
    command_rx: mpsc::Receiver<SupervisorCommand>,
    event_rx: mpsc::UnboundedReceiver<RunnerEvent>,
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
    statuses: Vec<RunnerStatus>,
    grace: Duration,
}

impl SupervisorActor {
    #[instrument(skip_all)]
    async fn run(mut self) {
        debug!("supervising {} runner(s)", self.tasks.len());

        loop {
            tokio::select! {
                Some(event) = self.event_rx.recv() => self.apply(event),

                cmd = self.command_rx.recv() => match cmd {
                    Some(SupervisorCommand::Status { respond_to }) => {
                        self.drain_events();
                        let _ = respond_to.send(self.statuses.clone());
                    }
                    Some(SupervisorCommand::Shutdown { respond_to }) => {
                        let report = self.shutdown().await;
                        let _ = respond_to.send(report);
                        break;
                    }
                    None => {
                        warn!("supervisor handle dropped, shutting down");
                        self.shutdown().await;
                        break;
                    }
                },
            }
        }

        debug!("supervisor stopped");
    }

    fn apply(&mut self, event: RunnerEvent) {
        match self
            .statuses
            .iter_mut()
            .find(|status| status.target == event.target())
        {
            Some(status) => status.apply(event),
            None => warn!("event for unknown target {}", event.target()),
        }
    }

    fn drain_events(&mut self) {
        while let Ok(event) = self.event_rx.try_recv() {
            self.apply(event);
        }
    }

    async fn shutdown(&mut self) -> Vec<RunnerStatus> {
        info!("stopping {} runner(s)", self.tasks.len());
        let _ = self.shutdown_tx.send(true);

        let finished =
            tokio::time::timeout(self.grace, join_all(self.tasks.iter_mut())).await;
        if finished.is_err() {
            warn!("shutdown grace of {:?} expired", self.grace);
        }

        self.drain_events();

        for (task, status) in self.tasks.iter().zip(self.statuses.iter_mut()) {
            if !task.is_finished() {
                task.abort();
                status.state = RunnerState::Aborted;
            } else if status.state.is_alive() {
                status.state = RunnerState::Stopped;
            }
        }

        self.statuses.clone()
    }
}

/// Handle for controlling the supervisor
#[derive(Clone)]
pub struct SupervisorHandle {
    sender: mpsc::Sender<SupervisorCommand>,
}

impl SupervisorHandle {
    /// Announce the targets, then start one supervised runner per target
    pub async fn spawn(
        specs: Vec<TargetSpec>,
        factory: ProbeFactory,
        dispatcher: Dispatcher,
        options: SupervisorOptions,
    ) -> Self {
        if options.startup_notification {
            dispatcher
                .announce(&format!("{} targets enabled", specs.len()))
                .await;
        }

        let (cmd_tx, cmd_rx) = mpsc::channel(32);
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut tasks = Vec::with_capacity(specs.len());
        let mut statuses = Vec::with_capacity(specs.len());

        for spec in specs {
            statuses.push(RunnerStatus::new(&spec.name));

            let supervision = Supervision {
                spec: Arc::new(spec),
                factory: factory.clone(),
                dispatcher: dispatcher.clone(),
                options,
                shutdown: shutdown_rx.clone(),
                events: event_tx.clone(),
            };
            tasks.push(tokio::spawn(supervision.run()));
        }

        let actor = SupervisorActor {
            command_rx: cmd_rx,
            event_rx,
            shutdown_tx,
            tasks,
            statuses,
            grace: options.shutdown_grace,
        };

        tokio::spawn(actor.run());

        Self { sender: cmd_tx }
    }

    /// Current liveness of every runner
    pub async fn status(&self) -> Result<Vec<RunnerStatus>> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(SupervisorCommand::Status { respond_to: tx })
            .await
            .map_err(|_| anyhow!("supervisor is not running"))?;

        Ok(rx.await?)
    }

    /// Stop every runner and return their final state
    pub async fn shutdown(self) -> Result<Vec<RunnerStatus>> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(SupervisorCommand::Shutdown { respond_to: tx })
            .await
            .map_err(|_| anyhow!("supervisor is not running"))?;

        Ok(rx.await?)
    }
}
