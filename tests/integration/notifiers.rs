//! Notifier transports against a mock server

use std::time::Duration;

use assert_matches::assert_matches;
use probewatch::{
    config::{Discord, NotifierConfig, Pushover, Webhook},
    notifier::{self, DispatchError, Dispatcher, Notifier, PushoverNotifier, WebhookNotifier},
};
use wiremock::matchers::{body_partial_json, body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn test_pushover_posts_form() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/1/messages.json"))
        .and(body_string_contains("token=app-token"))
        .and(body_string_contains("user=user-key"))
        .and(body_string_contains("message=router+down"))
        .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"status":1}"#))
        .expect(1)
        .mount(&mock_server)
        .await;

    let notifier = PushoverNotifier::new(
        format!("{}/1/messages.json", mock_server.uri()),
        "app-token",
        "user-key",
    );

    notifier.deliver("router down").await.unwrap();
}

#[tokio::test]
async fn test_rejected_delivery_keeps_status() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(400).set_body_string("invalid token"))
        .mount(&mock_server)
        .await;

    let notifier = PushoverNotifier::new(mock_server.uri(), "bad", "user-key");

    let result = notifier.deliver("router down").await;

    assert_matches!(result, Err(DispatchError::Rejected { status: 400, ref body }) if body == "invalid token");
}

#[tokio::test]
async fn test_webhook_posts_json() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hook"))
        .and(body_partial_json(serde_json::json!({ "message": "nas latency high" })))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&mock_server)
        .await;

    let notifier = WebhookNotifier::new(format!("{}/hook", mock_server.uri()));

    notifier.deliver("nas latency high").await.unwrap();
}

#[tokio::test]
async fn test_discord_from_config_mentions_user() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_partial_json(serde_json::json!({ "content": "<@1234>" })))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&mock_server)
        .await;

    let config = NotifierConfig::Discord(Discord {
        url: mock_server.uri(),
        user_id: Some("1234".to_string()),
    });
    let notifier = notifier::from_config(Some(&config)).unwrap();

    notifier.deliver("wan changed").await.unwrap();
}

#[tokio::test]
async fn test_dispatcher_survives_unreachable_transport() {
    let config = NotifierConfig::Webhook(Webhook {
        url: "http://127.0.0.1:9/hook".to_string(),
    });
    let dispatcher = Dispatcher::new(notifier::from_config(Some(&config)).unwrap())
        .with_timeout(Duration::from_secs(2));

    assert!(!dispatcher.announce("1 targets enabled").await);
}

#[test]
fn test_pushover_credentials_from_config() {
    let config = NotifierConfig::Pushover(Pushover {
        token: Some("app-token".to_string()),
        user: Some("user-key".to_string()),
        url: "https://api.pushover.net/1/messages.json".to_string(),
    });

    assert!(notifier::from_config(Some(&config)).is_ok());
}
