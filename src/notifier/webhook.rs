use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde_json::json;

use super::{DispatchError, Notifier, check_response};

/// Posts `{"message": ..., "timestamp": ...}` to an arbitrary URL
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn deliver(&self, message: &str) -> Result<(), DispatchError> {
        let payload = json!({
            "message": message,
            "timestamp": Utc::now().to_rfc3339()
        });

        let response = self.client.post(&self.url).json(&payload).send().await?;
        check_response(response).await
    }
}
