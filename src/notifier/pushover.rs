use async_trait::async_trait;
use reqwest::Client;

use super::{DispatchError, Notifier, check_response};

/// Pushover push notifications
#[derive(Debug, Clone)]
pub struct PushoverNotifier {
    client: Client,
    url: String,
    token: String,
    user: String,
}

impl PushoverNotifier {
    pub fn new(url: impl Into<String>, token: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            url: url.into(),
            token: token.into(),
            user: user.into(),
        }
    }
}

#[async_trait]
impl Notifier for PushoverNotifier {
    async fn deliver(&self, message: &str) -> Result<(), DispatchError> {
        let params = [
            ("token", self.token.as_str()),
            ("user", self.user.as_str()),
            ("message", message),
        ];

        let response = self.client.post(&self.url).form(&params).send().await?;
        check_response(response).await
    }
}
