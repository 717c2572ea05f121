//! HTTP and WAN probes against a mock server, and the evaluator fed by them

use std::time::Duration;

use pretty_assertions::assert_eq;
use probewatch::{
    config::{Protocol, TargetSpec},
    evaluator::{EvaluatorState, TriggerKind, evaluate},
    probe::{self, HttpProbe, Probe, WanProbe},
};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::helpers::create_http_spec;

#[tokio::test]
async fn test_http_probe_success_records_status() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200).set_body_string("OK"))
        .mount(&mock_server)
        .await;

    let spec = create_http_spec("web", &mock_server.uri());
    let probe = probe::for_target(&spec).unwrap();

    let outcome = probe.probe().await;

    assert!(outcome.is_success());
    assert_eq!(outcome.http_status, Some(200));
    assert!(outcome.latency_ms.is_some());
    assert!(outcome.summary().contains("Status:200"));
}

#[tokio::test]
async fn test_http_probe_counts_any_response_as_reachable() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&mock_server)
        .await;

    let probe = HttpProbe::new(mock_server.uri(), Duration::from_secs(2), false).unwrap();

    let outcome = probe.probe().await;

    assert!(outcome.is_success());
    assert_eq!(outcome.http_status, Some(503));
}

#[tokio::test]
async fn test_http_probe_times_out() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
        .mount(&mock_server)
        .await;

    let probe = HttpProbe::new(mock_server.uri(), Duration::from_millis(200), false).unwrap();

    let outcome = probe.probe().await;

    assert!(!outcome.is_success());
    let failure = outcome.failure_detail().unwrap();
    assert_eq!(failure.kind, probewatch::probe::FailureKind::Timeout);
    assert!(failure.detail.contains("Failed To Connect"));
}

#[tokio::test]
async fn test_wan_probe_returns_payload() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/ip"))
        .respond_with(ResponseTemplate::new(200).set_body_string("203.0.113.7\n"))
        .mount(&mock_server)
        .await;

    let probe = WanProbe::new(
        format!("{}/ip", mock_server.uri()),
        Duration::from_secs(2),
        false,
    )
    .unwrap();

    let outcome = probe.probe().await;

    assert!(outcome.is_success());
    assert_eq!(outcome.payload.as_deref(), Some("203.0.113.7\n"));
}

#[tokio::test]
async fn test_wan_mismatch_alerts_every_tick() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("198.51.100.1"))
        .mount(&mock_server)
        .await;

    let spec = TargetSpec {
        wan_endpoint: mock_server.uri(),
        expected_response: Some("203.0.113.7".to_string()),
        ..TargetSpec::new("wan", Protocol::Wan, "wan")
    };
    let probe = probe::for_target(&spec).unwrap();

    let mut state = EvaluatorState::for_target(&spec);
    let mut kinds = vec![];
    for _ in 0..3 {
        let outcome = probe.probe().await;
        let (next, alerts) = evaluate(&outcome, state, &spec);
        state = next;
        kinds.extend(alerts.into_iter().map(|alert| alert.kind));
    }

    assert_eq!(kinds, vec![TriggerKind::WanMismatch; 3]);
}

#[tokio::test]
async fn test_wan_match_never_alerts() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("203.0.113.7\n"))
        .mount(&mock_server)
        .await;

    let spec = TargetSpec {
        wan_endpoint: mock_server.uri(),
        expected_response: Some("203.0.113.7".to_string()),
        ..TargetSpec::new("wan", Protocol::Wan, "wan")
    };
    let probe = probe::for_target(&spec).unwrap();

    let outcome = probe.probe().await;
    let (_, alerts) = evaluate(&outcome, EvaluatorState::for_target(&spec), &spec);

    assert!(alerts.is_empty());
}
