//! Loading configuration files from disk

use std::io::Write;
use std::time::Duration;

use assert_matches::assert_matches;
use pretty_assertions::assert_eq;
use probewatch::config::{
    ConfigError, FailureMode, LatencyMode, NotifierConfig, Protocol, RestartPolicy,
    read_config_file,
};
use tempfile::NamedTempFile;

const CONFIG: &str = r#"{
    "settings": {
        "startup_notification": false,
        "restart_policy": "terminate",
        "shutdown_grace_secs": 2
    },
    "notifier": { "webhook": { "url": "http://localhost:8080/hook" } },
    "targets": {
        "router": { "target": "192.168.1.1", "service": "ICMP", "interval": 5,
                    "failure_count": 3, "alert": true },
        "nas": { "target": "nas.lan", "service": "HTTPS", "port": "5001",
                 "interval": 30, "failure_count": 2, "alert": "True",
                 "ms_check": true, "ms_calc": "avg", "ms_value": 250 },
        "broken": { "target": "10.0.0.1", "service": "FTP", "interval": 5,
                    "failure_count": 1 },
        "wan": { "target": "wan", "service": "WAN", "interval": 300,
                 "failure_count": 1, "failure_mode": "accumulate",
                 "expected_response_text": "203.0.113.7" }
    }
}"#;

fn write_config(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

#[test]
fn test_read_config_file_resolves_targets_in_order() {
    let file = write_config(CONFIG);

    let config = read_config_file(file.path()).unwrap();
    let (specs, errors) = config.resolve_targets();

    assert!(!config.settings.startup_notification);
    assert_eq!(config.settings.restart_policy, RestartPolicy::Terminate);
    assert_eq!(config.settings.shutdown_grace(), Duration::from_secs(2));
    assert_matches!(config.notifier, Some(NotifierConfig::Webhook(_)));

    let names: Vec<&str> = specs.iter().map(|spec| spec.name.as_str()).collect();
    assert_eq!(names, vec!["router", "nas", "wan"]);

    assert_eq!(specs[0].protocol, Protocol::Icmp);
    assert_eq!(specs[0].failure_threshold, 3);

    assert_eq!(specs[1].port, 5001);
    assert!(specs[1].alert_enabled);
    let latency = specs[1].latency.unwrap();
    assert_eq!(latency.mode, LatencyMode::Avg);
    assert_eq!(latency.threshold_ms, 250.0);

    assert_eq!(specs[2].failure_mode, FailureMode::Accumulate);
    assert_eq!(specs[2].expected_response.as_deref(), Some("203.0.113.7"));

    assert_eq!(errors.len(), 1);
    assert_matches!(&errors[0], ConfigError::InvalidValue { target, key: "service", .. } if target == "broken");
}

#[test]
fn test_missing_file_is_unreadable() {
    let result = read_config_file("/nonexistent/probewatch.json");

    assert_matches!(result, Err(ConfigError::Unreadable { .. }));
}

#[test]
fn test_invalid_json_is_malformed() {
    let file = write_config("{ \"targets\": ");

    assert_matches!(read_config_file(file.path()), Err(ConfigError::Malformed(_)));
}
