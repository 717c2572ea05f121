//! Network probes
//!
//! A probe performs exactly one check against one target and turns whatever
//! happened into a [`ProbeOutcome`]. Probes never log, alert or return
//! errors: every transport problem becomes a failing outcome tagged with a
//! [`FailureKind`].

mod http;
mod icmp;
mod wan;

pub use http::HttpProbe;
pub use icmp::IcmpProbe;
pub use wan::WanProbe;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::config::{Protocol, TargetSpec};

/// A single check against a single target
#[async_trait]
pub trait Probe: Send + Sync {
    async fn probe(&self) -> ProbeOutcome;
}

/// Build the probe matching a target's protocol
pub fn for_target(spec: &TargetSpec) -> anyhow::Result<Arc<dyn Probe>> {
    let probe: Arc<dyn Probe> = match spec.protocol {
        Protocol::Icmp => Arc::new(IcmpProbe::new(spec.host.clone(), spec.timeout)),
        Protocol::Http | Protocol::Https => Arc::new(HttpProbe::new(
            spec.address(),
            spec.timeout,
            spec.verify_tls,
        )?),
        Protocol::Wan => Arc::new(WanProbe::new(
            spec.wan_endpoint.clone(),
            spec.timeout,
            spec.verify_tls,
        )?),
    };
    Ok(probe)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Timeout,
    Dns,
    Connection,
    PermissionDenied,
    /// Echo request sent, no reply
    PacketLoss,
    /// The probe itself misbehaved (panicked)
    Internal,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FailureKind::Timeout => "timeout",
            FailureKind::Dns => "dns",
            FailureKind::Connection => "connection",
            FailureKind::PermissionDenied => "permission denied",
            FailureKind::PacketLoss => "packet loss",
            FailureKind::Internal => "internal",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProbeFailure {
    pub kind: FailureKind,
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProbeStatus {
    Success,
    Failure(ProbeFailure),
}

/// Result of one probe attempt
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeOutcome {
    pub timestamp: DateTime<Utc>,
    pub status: ProbeStatus,

    /// Round trip in milliseconds
    pub latency_ms: Option<f64>,

    /// HTTP status code, recorded but not used for pass/fail
    pub http_status: Option<u16>,

    /// ICMP packet loss as a fraction (0.0 - 1.0)
    pub packet_loss: Option<f64>,

    /// Response body (WAN)
    pub payload: Option<String>,
}

impl ProbeOutcome {
    pub fn success(latency_ms: f64) -> Self {
        Self {
            timestamp: Utc::now(),
            status: ProbeStatus::Success,
            latency_ms: Some(latency_ms),
            http_status: None,
            packet_loss: None,
            payload: None,
        }
    }

    pub fn failure(kind: FailureKind, detail: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            status: ProbeStatus::Failure(ProbeFailure {
                kind,
                detail: detail.into(),
            }),
            latency_ms: None,
            http_status: None,
            packet_loss: None,
            payload: None,
        }
    }

    pub fn with_http_status(mut self, status: u16) -> Self {
        self.http_status = Some(status);
        self
    }

    pub fn with_packet_loss(mut self, loss: f64) -> Self {
        self.packet_loss = Some(loss);
        self
    }

    pub fn with_payload(mut self, payload: impl Into<String>) -> Self {
        self.payload = Some(payload.into());
        self
    }

    pub fn is_success(&self) -> bool {
        matches!(self.status, ProbeStatus::Success)
    }

    pub fn failure_detail(&self) -> Option<&ProbeFailure> {
        match &self.status {
            ProbeStatus::Success => None,
            ProbeStatus::Failure(failure) => Some(failure),
        }
    }

    /// One-line description used in outcome logs and alert messages
    pub fn summary(&self) -> String {
        let mut parts = Vec::new();

        match &self.status {
            ProbeStatus::Success => parts.push("\u{2705}".to_string()),
            ProbeStatus::Failure(failure) => {
                parts.push(format!("\u{274C} {} ({})", failure.detail, failure.kind))
            }
        }

        if let Some(status) = self.http_status {
            parts.push(format!("Status:{status}"));
        }
        if let Some(latency) = self.latency_ms {
            parts.push(format!("Duration:{latency:.2}ms"));
        }
        if let Some(loss) = self.packet_loss {
            parts.push(format!("Packet Loss:{loss}"));
        }
        if let Some(payload) = &self.payload {
            parts.push(format!("Response:{}", payload.trim()));
        }

        parts.join(" --> ")
    }
}

fn classify_reqwest_error(error: &reqwest::Error) -> FailureKind {
    if error.is_timeout() {
        return FailureKind::Timeout;
    }

    // reqwest reports resolver failures as connect errors; the resolver
    // message is only visible in the source chain.
    let mut source: Option<&dyn std::error::Error> = Some(error);
    while let Some(err) = source {
        if err.to_string().to_ascii_lowercase().contains("dns error") {
            return FailureKind::Dns;
        }
        source = err.source();
    }

    FailureKind::Connection
}
