//! WAN identity probe
//!
//! Asks an external IP-echo endpoint which address we appear from. The body
//! is handed to the evaluator as payload; comparing it against the expected
//! address is not the probe's job.

use std::time::{Duration, Instant};

use anyhow::Result;
use async_trait::async_trait;

use super::http::build_client;
use super::{Probe, ProbeOutcome, classify_reqwest_error};

#[derive(Debug, Clone)]
pub struct WanProbe {
    endpoint: String,
    client: reqwest::Client,
}

impl WanProbe {
    pub fn new(endpoint: impl Into<String>, timeout: Duration, verify_tls: bool) -> Result<Self> {
        Ok(Self {
            endpoint: endpoint.into(),
            client: build_client(timeout, verify_tls)?,
        })
    }
}

#[async_trait]
impl Probe for WanProbe {
    async fn probe(&self) -> ProbeOutcome {
        let start = Instant::now();

        let response = match self.client.get(&self.endpoint).send().await {
            Ok(response) => response,
            Err(e) => {
                return ProbeOutcome::failure(
                    classify_reqwest_error(&e),
                    format!("{} --> {e}", self.endpoint),
                );
            }
        };

        let status = response.status().as_u16();

        match response.text().await {
            Ok(body) => {
                let latency_ms = start.elapsed().as_secs_f64() * 1000.0;
                ProbeOutcome::success(latency_ms)
                    .with_http_status(status)
                    .with_payload(body)
            }
            Err(e) => ProbeOutcome::failure(
                classify_reqwest_error(&e),
                format!("{} --> failed to read response body: {e}", self.endpoint),
            )
            .with_http_status(status),
        }
    }
}
