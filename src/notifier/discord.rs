use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::Serialize;

use crate::config::Discord;

use super::{DispatchError, Notifier, check_response};

const ALERT_COLOR: u32 = 15158332; // Red

#[derive(Debug, Clone, Serialize)]
pub struct Message {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub embeds: Vec<Embed>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Embed {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub footer: Option<EmbedFooter>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EmbedFooter {
    pub text: String,
}

#[derive(Debug, Default)]
pub struct MessageBuilder {
    content: Option<String>,
    embeds: Vec<Embed>,
}

impl MessageBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn content(mut self, content: impl ToString) -> Self {
        self.content = Some(content.to_string());
        self
    }

    pub fn add_embed(mut self, embed: Embed) -> Self {
        self.embeds.push(embed);
        self
    }

    pub fn build(self) -> Message {
        Message {
            content: self.content,
            embeds: self.embeds,
        }
    }
}

/// Discord webhook notifications, optionally mentioning a user
#[derive(Debug, Clone)]
pub struct DiscordNotifier {
    client: Client,
    config: Discord,
}

impl DiscordNotifier {
    pub fn new(config: Discord) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    pub fn build_message(&self, text: &str) -> Message {
        let (title, description) = match text.split_once(": ") {
            Some((title, rest)) if title.len() < 80 => (title, rest),
            _ => ("probewatch", text),
        };

        let embed = Embed {
            title: Some(title.to_string()),
            description: Some(description.to_string()),
            color: Some(ALERT_COLOR),
            footer: Some(EmbedFooter {
                text: "probewatch".to_string(),
            }),
            timestamp: Some(Utc::now().to_rfc3339()),
        };

        let mut builder = MessageBuilder::new().add_embed(embed);
        if let Some(user_id) = &self.config.user_id {
            builder = builder.content(format!("<@{user_id}>"));
        }
        builder.build()
    }
}

#[async_trait]
impl Notifier for DiscordNotifier {
    async fn deliver(&self, message: &str) -> Result<(), DispatchError> {
        let message = self.build_message(message);
        let response = self
            .client
            .post(&self.config.url)
            .json(&message)
            .send()
            .await?;
        check_response(response).await
    }
}
