//! Test helpers shared by the integration tests

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use probewatch::{
    actors::messages::RunnerStatus,
    actors::supervisor::SupervisorHandle,
    config::{Protocol, TargetSpec},
    notifier::{DispatchError, Notifier},
    probe::{FailureKind, Probe, ProbeOutcome},
};
use url::Url;

/// HTTP target with a short interval, suitable for fast runner tests
pub fn create_test_spec(name: &str, interval_ms: u64) -> TargetSpec {
    TargetSpec {
        interval: Duration::from_millis(interval_ms),
        ..TargetSpec::new(name, Protocol::Http, "127.0.0.1")
    }
}

/// HTTP target pointing at a mock server uri such as `http://127.0.0.1:41234`
pub fn create_http_spec(name: &str, uri: &str) -> TargetSpec {
    let url = Url::parse(uri).unwrap();

    TargetSpec {
        port: url.port().unwrap(),
        timeout: Duration::from_secs(2),
        ..TargetSpec::new(name, Protocol::Http, url.host_str().unwrap())
    }
}

/// Records every delivered message
#[derive(Default)]
pub struct RecordingNotifier {
    messages: Mutex<Vec<String>>,
}

impl RecordingNotifier {
    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn deliver(&self, message: &str) -> Result<(), DispatchError> {
        self.messages.lock().unwrap().push(message.to_string());
        Ok(())
    }
}

/// Replays a fixed sequence of results, then keeps succeeding
pub struct ScriptedProbe {
    script: Mutex<VecDeque<bool>>,
}

impl ScriptedProbe {
    pub fn new(script: &[bool]) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.iter().copied().collect()),
        })
    }
}

#[async_trait]
impl Probe for ScriptedProbe {
    async fn probe(&self) -> ProbeOutcome {
        let success = self.script.lock().unwrap().pop_front().unwrap_or(true);
        if success {
            ProbeOutcome::success(3.0)
        } else {
            ProbeOutcome::failure(FailureKind::Connection, "connection refused")
        }
    }
}

pub struct PanickingProbe;

#[async_trait]
impl Probe for PanickingProbe {
    async fn probe(&self) -> ProbeOutcome {
        panic!("probe blew up");
    }
}

/// Poll the supervisor until `done` holds, or give up after `timeout`
pub async fn wait_for_status<F>(
    handle: &SupervisorHandle,
    timeout: Duration,
    done: F,
) -> Vec<RunnerStatus>
where
    F: Fn(&[RunnerStatus]) -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let status = handle.status().await.unwrap();
        if done(&status) || tokio::time::Instant::now() >= deadline {
            return status;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
