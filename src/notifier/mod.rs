//! Alert delivery
//!
//! A [`Notifier`] moves one message over one transport. The [`Dispatcher`]
//! wraps a notifier for the runners: it bounds delivery time, logs the
//! result and never lets a delivery failure reach the probing loop.

mod discord;
mod pushover;
mod webhook;

pub use discord::{DiscordNotifier, Embed, EmbedFooter, Message, MessageBuilder};
pub use pushover::PushoverNotifier;
pub use webhook::WebhookNotifier;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{error, info, instrument, warn};

use crate::config::{ConfigError, NotifierConfig};
use crate::evaluator::AlertEvent;
use crate::util::{get_pushover_token, get_pushover_user};

pub const DEFAULT_DISPATCH_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug)]
pub enum DispatchError {
    /// The request never produced a response
    Transport(String),

    /// The remote end answered with a non-success status
    Rejected { status: u16, body: String },

    /// Delivery did not finish in time
    Timeout(Duration),
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchError::Transport(msg) => write!(f, "failed to send notification: {msg}"),
            DispatchError::Rejected { status, body } => {
                write!(f, "notification rejected with status {status}: {body}")
            }
            DispatchError::Timeout(timeout) => {
                write!(f, "notification not delivered within {timeout:?}")
            }
        }
    }
}

impl std::error::Error for DispatchError {}

impl From<reqwest::Error> for DispatchError {
    fn from(err: reqwest::Error) -> Self {
        DispatchError::Transport(err.to_string())
    }
}

/// Turn a response into a delivery result, keeping the error body for logs
async fn check_response(response: reqwest::Response) -> Result<(), DispatchError> {
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }

    let body = response.text().await.unwrap_or_default();
    Err(DispatchError::Rejected {
        status: status.as_u16(),
        body,
    })
}

/// A notification transport
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn deliver(&self, message: &str) -> Result<(), DispatchError>;
}

/// Used when no transport is configured: alerts only reach the log
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn deliver(&self, message: &str) -> Result<(), DispatchError> {
        warn!("{message}");
        Ok(())
    }
}

/// Build the notifier described by the configuration
pub fn from_config(config: Option<&NotifierConfig>) -> Result<Arc<dyn Notifier>, ConfigError> {
    let notifier: Arc<dyn Notifier> = match config {
        None => Arc::new(LogNotifier),
        Some(NotifierConfig::Pushover(pushover)) => {
            let token = pushover
                .token
                .clone()
                .or_else(get_pushover_token)
                .ok_or_else(|| ConfigError::Notifier("missing pushover token".to_string()))?;
            let user = pushover
                .user
                .clone()
                .or_else(get_pushover_user)
                .ok_or_else(|| ConfigError::Notifier("missing pushover user".to_string()))?;
            Arc::new(PushoverNotifier::new(pushover.url.clone(), token, user))
        }
        Some(NotifierConfig::Discord(discord)) => Arc::new(DiscordNotifier::new(discord.clone())),
        Some(NotifierConfig::Webhook(webhook)) => {
            Arc::new(WebhookNotifier::new(webhook.url.clone()))
        }
    };
    Ok(notifier)
}

/// Shared, cloneable front of the configured notifier
#[derive(Clone)]
pub struct Dispatcher {
    notifier: Arc<dyn Notifier>,
    timeout: Duration,
}

impl Dispatcher {
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        Self {
            notifier,
            timeout: DEFAULT_DISPATCH_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Deliver one alert. Returns whether delivery succeeded; failures are
    /// logged here and otherwise dropped.
    #[instrument(skip_all, fields(target = %alert.target, kind = %alert.kind))]
    pub async fn dispatch(&self, alert: &AlertEvent) -> bool {
        self.send(&alert.message).await
    }

    /// Deliver a message that is not tied to a target (startup notices)
    #[instrument(skip(self))]
    pub async fn announce(&self, message: &str) -> bool {
        self.send(message).await
    }

    async fn send(&self, message: &str) -> bool {
        let delivery = tokio::time::timeout(self.timeout, self.notifier.deliver(message)).await;

        match delivery {
            Ok(Ok(())) => {
                info!("notification delivered");
                true
            }
            Ok(Err(e)) => {
                error!("{e}");
                false
            }
            Err(_) => {
                error!("{}", DispatchError::Timeout(self.timeout));
                false
            }
        }
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}
