//! Supervisor behaviour with misbehaving runners
//!
//! These tests verify that:
//! - A runner that faults on its first tick never stops its siblings
//! - Faulting runners are restarted (or left terminated) per policy
//! - Shutdown stops every runner within the grace period

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use probewatch::{
    actors::messages::RunnerState,
    actors::supervisor::{ProbeFactory, SupervisorHandle, SupervisorOptions},
    config::{RestartPolicy, TargetSpec},
    notifier::{DispatchError, Dispatcher, Notifier},
    probe::Probe,
};

use crate::helpers::{
    PanickingProbe, RecordingNotifier, ScriptedProbe, create_test_spec, wait_for_status,
};

fn options(policy: RestartPolicy) -> SupervisorOptions {
    SupervisorOptions {
        startup_notification: false,
        restart_policy: policy,
        restart_backoff: Duration::from_millis(20),
        shutdown_grace: Duration::from_secs(1),
    }
}

fn three_targets() -> Vec<TargetSpec> {
    vec![
        create_test_spec("one", 5),
        create_test_spec("two", 5),
        create_test_spec("three", 5),
    ]
}

#[tokio::test]
async fn test_probe_panic_does_not_stop_siblings() {
    let factory: ProbeFactory = Arc::new(|spec: &TargetSpec| -> anyhow::Result<Arc<dyn Probe>> {
        if spec.name == "two" {
            Ok(Arc::new(PanickingProbe))
        } else {
            Ok(ScriptedProbe::new(&[]))
        }
    });

    let handle = SupervisorHandle::spawn(
        three_targets(),
        factory,
        Dispatcher::new(Arc::new(RecordingNotifier::default())),
        options(RestartPolicy::Restart),
    )
    .await;

    let status = wait_for_status(&handle, Duration::from_secs(5), |status| {
        status[0].ticks >= 6 && status[2].ticks >= 6
    })
    .await;

    assert!(status[0].ticks >= 6);
    assert!(status[2].ticks >= 6);
    // A probe panic is one failing outcome, the runner itself keeps going
    assert_eq!(status[1].state, RunnerState::Running);
    assert!(status[1].failures >= 1);

    handle.shutdown().await.unwrap();
}

/// Panics on any alert about target "two"
struct ExplodingNotifier;

#[async_trait]
impl Notifier for ExplodingNotifier {
    async fn deliver(&self, message: &str) -> Result<(), DispatchError> {
        if message.contains("two") {
            panic!("notifier blew up");
        }
        Ok(())
    }
}

#[tokio::test]
async fn test_runner_panic_is_restarted_without_affecting_siblings() {
    let factory: ProbeFactory = Arc::new(|spec: &TargetSpec| -> anyhow::Result<Arc<dyn Probe>> {
        if spec.name == "two" {
            Ok(ScriptedProbe::new(&[false]))
        } else {
            Ok(ScriptedProbe::new(&[]))
        }
    });

    let handle = SupervisorHandle::spawn(
        three_targets(),
        factory,
        Dispatcher::new(Arc::new(ExplodingNotifier)),
        options(RestartPolicy::Restart),
    )
    .await;

    let status = wait_for_status(&handle, Duration::from_secs(5), |status| {
        status[0].ticks >= 6 && status[2].ticks >= 6 && status[1].restarts >= 1
    })
    .await;

    assert!(status[0].ticks >= 6);
    assert!(status[2].ticks >= 6);
    assert!(status[1].restarts >= 1);
    assert_eq!(status[1].last_error.as_deref(), Some("notifier blew up"));

    let report = handle.shutdown().await.unwrap();
    assert!(report.iter().all(|status| !status.state.is_alive()));
}

#[tokio::test]
async fn test_terminated_runner_stays_down() {
    let factory: ProbeFactory = Arc::new(|spec: &TargetSpec| -> anyhow::Result<Arc<dyn Probe>> {
        if spec.name == "two" {
            Ok(ScriptedProbe::new(&[false]))
        } else {
            Ok(ScriptedProbe::new(&[]))
        }
    });

    let handle = SupervisorHandle::spawn(
        three_targets(),
        factory,
        Dispatcher::new(Arc::new(ExplodingNotifier)),
        options(RestartPolicy::Terminate),
    )
    .await;

    let status = wait_for_status(&handle, Duration::from_secs(5), |status| {
        status[0].ticks >= 6 && status[2].ticks >= 6
    })
    .await;

    assert_eq!(status[1].state, RunnerState::Terminated);
    assert_eq!(status[1].restarts, 0);
    assert_eq!(status[0].state, RunnerState::Running);
    assert_eq!(status[2].state, RunnerState::Running);

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_probe_limit_completes_runner() {
    let factory: ProbeFactory =
        Arc::new(|_: &TargetSpec| -> anyhow::Result<Arc<dyn Probe>> { Ok(ScriptedProbe::new(&[])) });

    let limited = TargetSpec {
        probe_limit: Some(3),
        ..create_test_spec("limited", 1)
    };

    let recording = Arc::new(RecordingNotifier::default());
    let handle = SupervisorHandle::spawn(
        vec![limited],
        factory,
        Dispatcher::new(recording.clone()),
        SupervisorOptions {
            startup_notification: true,
            ..options(RestartPolicy::Restart)
        },
    )
    .await;

    let status = wait_for_status(&handle, Duration::from_secs(5), |status| {
        status[0].state == RunnerState::Completed
    })
    .await;

    assert_eq!(status[0].state, RunnerState::Completed);
    assert_eq!(status[0].ticks, 3);
    assert_eq!(recording.messages(), vec!["1 targets enabled".to_string()]);

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_shutdown_stops_all_runners() {
    let factory: ProbeFactory =
        Arc::new(|_: &TargetSpec| -> anyhow::Result<Arc<dyn Probe>> { Ok(ScriptedProbe::new(&[])) });

    let specs = vec![
        TargetSpec {
            interval: Duration::from_secs(3600),
            ..create_test_spec("hourly", 0)
        },
        create_test_spec("fast", 5),
    ];

    let handle = SupervisorHandle::spawn(
        specs,
        factory,
        Dispatcher::new(Arc::new(RecordingNotifier::default())),
        options(RestartPolicy::Restart),
    )
    .await;

    wait_for_status(&handle, Duration::from_secs(5), |status| status[0].ticks >= 1).await;

    let report = tokio::time::timeout(Duration::from_secs(2), handle.shutdown())
        .await
        .unwrap()
        .unwrap();

    assert_eq!(report.len(), 2);
    assert!(
        report
            .iter()
            .all(|status| status.state == RunnerState::Stopped)
    );
}
