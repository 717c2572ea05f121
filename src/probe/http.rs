//! HTTP/HTTPS availability probe

use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use async_trait::async_trait;

use super::{Probe, ProbeOutcome, classify_reqwest_error};

/// Issues a GET and counts any response inside the timeout as a success;
/// the status code is only recorded.
#[derive(Debug, Clone)]
pub struct HttpProbe {
    url: String,

    /// HTTP client (reused across requests for efficiency)
    client: reqwest::Client,
}

impl HttpProbe {
    pub fn new(url: impl Into<String>, timeout: Duration, verify_tls: bool) -> Result<Self> {
        Ok(Self {
            url: url.into(),
            client: build_client(timeout, verify_tls)?,
        })
    }
}

/// Build a client bounded by `timeout`. With `verify_tls` off, invalid and
/// self-signed certificates are accepted.
pub(super) fn build_client(timeout: Duration, verify_tls: bool) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .connect_timeout(timeout)
        .danger_accept_invalid_certs(!verify_tls)
        .build()
        .context("failed to build HTTP client")
}

#[async_trait]
impl Probe for HttpProbe {
    async fn probe(&self) -> ProbeOutcome {
        let start = Instant::now();

        match self.client.get(&self.url).send().await {
            Ok(response) => {
                let latency_ms = start.elapsed().as_secs_f64() * 1000.0;
                ProbeOutcome::success(latency_ms).with_http_status(response.status().as_u16())
            }
            Err(e) => ProbeOutcome::failure(
                classify_reqwest_error(&e),
                format!("{} --> {e} --> Failed To Connect", self.url),
            ),
        }
    }
}
