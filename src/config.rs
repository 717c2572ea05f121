//! Configuration file loading and target resolution
//!
//! The configuration file is JSON. Global settings and the notifier are
//! deserialized directly; target sections are kept as raw JSON objects and
//! resolved one by one into [`TargetSpec`]s, so a broken section only takes
//! its own target down instead of the whole file.

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{trace, warn};

pub const DEFAULT_PORT: u16 = 443;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);
pub const DEFAULT_LATENCY_WINDOW: usize = 3;
pub const MAX_FAILURE_COUNT: usize = 1000;
pub const MAX_LATENCY_WINDOW: usize = 1000;
pub const DEFAULT_WAN_ENDPOINT: &str = "https://api.ipify.org";
pub const DEFAULT_PUSHOVER_URL: &str = "https://api.pushover.net/1/messages.json";

/// Errors raised while loading the configuration or resolving a target
#[derive(Debug)]
pub enum ConfigError {
    /// The configuration file could not be read
    Unreadable {
        path: String,
        source: std::io::Error,
    },

    /// The file is not valid JSON or does not match the expected layout
    Malformed(String),

    /// A target section is not a JSON object
    NotASection { target: String },

    /// A required key is missing from a target section
    MissingKey { target: String, key: &'static str },

    /// A key is present but its value cannot be used
    InvalidValue {
        target: String,
        key: &'static str,
        value: String,
        reason: String,
    },

    /// Notifier configuration is incomplete
    Notifier(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Unreadable { path, source } => {
                write!(f, "unable to read configuration file '{path}': {source}")
            }
            ConfigError::Malformed(msg) => write!(f, "invalid configuration file: {msg}"),
            ConfigError::NotASection { target } => {
                write!(f, "target '{target}': section must be an object")
            }
            ConfigError::MissingKey { target, key } => {
                write!(f, "target '{target}': missing required key '{key}'")
            }
            ConfigError::InvalidValue {
                target,
                key,
                value,
                reason,
            } => write!(f, "target '{target}': invalid value {value} for '{key}': {reason}"),
            ConfigError::Notifier(msg) => write!(f, "invalid notifier configuration: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Unreadable { source, .. } => Some(source),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub settings: Settings,

    /// Where alerts are delivered; alerts are only logged when absent
    pub notifier: Option<NotifierConfig>,

    /// Named target sections, in file order
    #[serde(default)]
    pub targets: Map<String, Value>,
}

/// Process-wide settings shared by every target
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Send a "N targets enabled" notification before the runners start
    pub startup_notification: bool,

    /// IP-echo endpoint queried by WAN targets
    pub wan_endpoint: String,

    /// Default for HTTPS certificate validation, overridable per target
    pub verify_tls: bool,

    pub restart_policy: RestartPolicy,

    pub restart_backoff_secs: f64,

    /// How long shutdown waits for in-flight iterations
    pub shutdown_grace_secs: f64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            startup_notification: true,
            wan_endpoint: DEFAULT_WAN_ENDPOINT.to_string(),
            verify_tls: false,
            restart_policy: RestartPolicy::default(),
            restart_backoff_secs: 5.0,
            shutdown_grace_secs: 5.0,
        }
    }
}

impl Settings {
    pub fn restart_backoff(&self) -> Duration {
        Duration::try_from_secs_f64(self.restart_backoff_secs).unwrap_or(Duration::from_secs(5))
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::try_from_secs_f64(self.shutdown_grace_secs).unwrap_or(Duration::from_secs(5))
    }
}

/// What the supervisor does with a runner that panicked
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RestartPolicy {
    /// Start the runner again with fresh evaluator state
    #[default]
    Restart,

    /// Log the fault and leave the target stopped
    Terminate,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotifierConfig {
    Pushover(Pushover),
    Discord(Discord),
    Webhook(Webhook),
}

/// Pushover credentials. Missing values are read from `PUSHOVER_TOKEN` and
/// `PUSHOVER_USER` in the environment.
#[derive(Debug, Clone, Deserialize)]
pub struct Pushover {
    pub token: Option<String>,
    pub user: Option<String>,
    #[serde(default = "default_pushover_url")]
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Discord {
    pub url: String,
    pub user_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Webhook {
    pub url: String,
}

fn default_pushover_url() -> String {
    DEFAULT_PUSHOVER_URL.to_string()
}

/// Network protocol a target is probed with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    Icmp,
    Http,
    Https,
    Wan,
}

impl Protocol {
    pub fn scheme(&self) -> Option<&'static str> {
        match self {
            Protocol::Http => Some("http"),
            Protocol::Https => Some("https"),
            Protocol::Icmp | Protocol::Wan => None,
        }
    }
}

impl FromStr for Protocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "ICMP" => Ok(Protocol::Icmp),
            "HTTP" => Ok(Protocol::Http),
            "HTTPS" => Ok(Protocol::Https),
            "WAN" => Ok(Protocol::Wan),
            _ => Err("expected one of ICMP, HTTP, HTTPS, WAN".to_string()),
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Protocol::Icmp => "ICMP",
            Protocol::Http => "HTTP",
            Protocol::Https => "HTTPS",
            Protocol::Wan => "WAN",
        };
        f.write_str(name)
    }
}

/// How a successful probe affects the failure window
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FailureMode {
    /// Any success clears the failure window, so only an unbroken run of
    /// `failure_count` failures alerts.
    #[default]
    Consecutive,

    /// Failures accumulate until an alert fires and successes leave them
    /// alone: `[fail, fail, ok, fail]` with a threshold of 3 alerts on the
    /// last failure.
    Accumulate,
}

impl FromStr for FailureMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "accumulate" => Ok(FailureMode::Accumulate),
            "consecutive" => Ok(FailureMode::Consecutive),
            _ => Err("expected 'accumulate' or 'consecutive'".to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LatencyMode {
    /// Latency above the threshold
    Gt,
    /// Latency below the threshold
    Lt,
    /// Mean of the success window above the threshold
    Avg,
}

impl FromStr for LatencyMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "gt" => Ok(LatencyMode::Gt),
            "lt" => Ok(LatencyMode::Lt),
            "avg" => Ok(LatencyMode::Avg),
            _ => Err("expected one of gt, lt, avg".to_string()),
        }
    }
}

impl fmt::Display for LatencyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LatencyMode::Gt => "gt",
            LatencyMode::Lt => "lt",
            LatencyMode::Avg => "avg",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LatencyPolicy {
    pub mode: LatencyMode,
    pub threshold_ms: f64,
    /// Number of successful latencies averaged in `avg` mode
    pub window: usize,
}

/// Immutable, validated description of one monitored target
#[derive(Debug, Clone, PartialEq)]
pub struct TargetSpec {
    pub name: String,
    pub protocol: Protocol,
    /// Host name or IP address (unused by WAN targets)
    pub host: String,
    /// HTTP/HTTPS only
    pub port: u16,
    pub interval: Duration,
    /// Upper bound for a single probe attempt
    pub timeout: Duration,
    pub failure_threshold: usize,
    pub failure_mode: FailureMode,
    pub alert_enabled: bool,
    pub latency: Option<LatencyPolicy>,
    /// WAN only
    pub expected_response: Option<String>,
    /// WAN only
    pub wan_endpoint: String,
    /// HTTPS certificate validation. Off by default: monitored appliances
    /// commonly serve self-signed certificates.
    pub verify_tls: bool,
    /// Stop after this many probes; unbounded when `None`
    pub probe_limit: Option<u64>,
}

impl TargetSpec {
    /// Build a spec with the defaults used for optional keys
    pub fn new(name: impl Into<String>, protocol: Protocol, host: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            protocol,
            host: host.into(),
            port: DEFAULT_PORT,
            interval: Duration::from_secs(5),
            timeout: DEFAULT_TIMEOUT,
            failure_threshold: 1,
            failure_mode: FailureMode::default(),
            alert_enabled: true,
            latency: None,
            expected_response: None,
            wan_endpoint: DEFAULT_WAN_ENDPOINT.to_string(),
            verify_tls: false,
            probe_limit: None,
        }
    }

    /// Human readable probe address, as it appears in logs and alerts
    pub fn address(&self) -> String {
        match self.protocol {
            Protocol::Icmp => self.host.clone(),
            Protocol::Http | Protocol::Https => {
                let scheme = self.protocol.scheme().unwrap_or("http");
                format!("{scheme}://{}:{}", self.host, self.port)
            }
            Protocol::Wan => self.wan_endpoint.clone(),
        }
    }

    /// Resolve one named configuration section
    pub fn from_section(
        name: &str,
        section: &Value,
        settings: &Settings,
    ) -> Result<TargetSpec, ConfigError> {
        let Some(map) = section.as_object() else {
            return Err(ConfigError::NotASection {
                target: name.to_string(),
            });
        };
        let section = Section { name, map };

        let host = section.required_str("target")?;
        let protocol = section.required_parsed::<Protocol>("service")?;

        let port = match section.optional_u64("port")? {
            Some(port) => u16::try_from(port)
                .ok()
                .filter(|port| *port != 0)
                .ok_or_else(|| section.invalid("port", &port.to_string(), "not a valid port"))?,
            None => DEFAULT_PORT,
        };

        let interval = section.required_secs("interval")?;
        let timeout = section.optional_secs("timeout")?.unwrap_or(DEFAULT_TIMEOUT);

        let failure_threshold =
            section.required_count("failure_count", MAX_FAILURE_COUNT)?;

        let failure_mode = section
            .optional_parsed::<FailureMode>("failure_mode")?
            .unwrap_or_default();
        let alert_enabled = section.optional_bool("alert")?.unwrap_or(true);

        let latency = if section.optional_bool("ms_check")?.unwrap_or(false) {
            if protocol == Protocol::Wan {
                return Err(section.invalid(
                    "ms_check",
                    "true",
                    "latency policies do not apply to WAN targets",
                ));
            }
            let window = section
                .optional_count("ms_window", MAX_LATENCY_WINDOW)?
                .unwrap_or(DEFAULT_LATENCY_WINDOW);
            Some(LatencyPolicy {
                mode: section.required_parsed::<LatencyMode>("ms_calc")?,
                threshold_ms: section.required_f64("ms_value")?,
                window,
            })
        } else {
            None
        };

        let expected_response = section.optional_str("expected_response_text")?;
        if expected_response.is_some() && protocol != Protocol::Wan {
            warn!("target '{name}': expected_response_text is only used by WAN targets");
        }

        let verify_tls = section
            .optional_bool("verify_tls")?
            .unwrap_or(settings.verify_tls);
        let probe_limit = section.optional_u64("probe_count")?;

        Ok(TargetSpec {
            name: name.to_string(),
            protocol,
            host,
            port,
            interval,
            timeout,
            failure_threshold,
            failure_mode,
            alert_enabled,
            latency,
            expected_response,
            wan_endpoint: settings.wan_endpoint.clone(),
            verify_tls,
            probe_limit,
        })
    }
}

impl Config {
    /// Resolve every target section. Sections that fail validation are
    /// returned separately so the caller can report and skip them.
    pub fn resolve_targets(&self) -> (Vec<TargetSpec>, Vec<ConfigError>) {
        let mut specs = Vec::new();
        let mut errors = Vec::new();

        for (name, section) in &self.targets {
            match TargetSpec::from_section(name, section, &self.settings) {
                Ok(spec) => specs.push(spec),
                Err(e) => errors.push(e),
            }
        }

        (specs, errors)
    }
}

pub fn parse_config(content: &str) -> Result<Config, ConfigError> {
    serde_json::from_str(content).map_err(|e| ConfigError::Malformed(e.to_string()))
}

pub fn read_config_file(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let file_content = std::fs::read_to_string(path).map_err(|source| ConfigError::Unreadable {
        path: path.display().to_string(),
        source,
    })?;
    parse_config(&file_content).inspect(|config| trace!("loaded config: {config:?}"))
}

/// Typed accessors over one raw target section
struct Section<'a> {
    name: &'a str,
    map: &'a Map<String, Value>,
}

impl Section<'_> {
    fn get(&self, key: &'static str) -> Option<&Value> {
        self.map.get(key).filter(|value| !value.is_null())
    }

    fn missing(&self, key: &'static str) -> ConfigError {
        ConfigError::MissingKey {
            target: self.name.to_string(),
            key,
        }
    }

    fn invalid(&self, key: &'static str, value: &str, reason: impl ToString) -> ConfigError {
        ConfigError::InvalidValue {
            target: self.name.to_string(),
            key,
            value: value.to_string(),
            reason: reason.to_string(),
        }
    }

    fn optional_str(&self, key: &'static str) -> Result<Option<String>, ConfigError> {
        match self.get(key) {
            None => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.clone())),
            Some(Value::Number(n)) => Ok(Some(n.to_string())),
            Some(other) => Err(self.invalid(key, &other.to_string(), "expected a string")),
        }
    }

    fn required_str(&self, key: &'static str) -> Result<String, ConfigError> {
        self.optional_str(key)?
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| self.missing(key))
    }

    fn optional_parsed<T>(&self, key: &'static str) -> Result<Option<T>, ConfigError>
    where
        T: FromStr<Err = String>,
    {
        self.optional_str(key)?
            .map(|raw| raw.parse::<T>().map_err(|reason| self.invalid(key, &raw, reason)))
            .transpose()
    }

    fn required_parsed<T>(&self, key: &'static str) -> Result<T, ConfigError>
    where
        T: FromStr<Err = String>,
    {
        self.optional_parsed(key)?.ok_or_else(|| self.missing(key))
    }

    fn optional_f64(&self, key: &'static str) -> Result<Option<f64>, ConfigError> {
        let value = match self.get(key) {
            None => return Ok(None),
            Some(Value::Number(n)) => n.as_f64(),
            Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
            Some(_) => None,
        };

        match value {
            Some(v) if v.is_finite() => Ok(Some(v)),
            _ => Err(self.invalid(key, &self.map[key].to_string(), "expected a number")),
        }
    }

    fn required_f64(&self, key: &'static str) -> Result<f64, ConfigError> {
        self.optional_f64(key)?.ok_or_else(|| self.missing(key))
    }

    fn optional_u64(&self, key: &'static str) -> Result<Option<u64>, ConfigError> {
        let value = match self.get(key) {
            None => return Ok(None),
            Some(Value::Number(n)) => n.as_u64(),
            Some(Value::String(s)) => s.trim().parse::<u64>().ok(),
            Some(_) => None,
        };

        value.map(Some).ok_or_else(|| {
            self.invalid(
                key,
                &self.map[key].to_string(),
                "expected a non-negative integer",
            )
        })
    }

    /// A count between 1 and `max`
    fn optional_count(
        &self,
        key: &'static str,
        max: usize,
    ) -> Result<Option<usize>, ConfigError> {
        let Some(count) = self.optional_u64(key)? else {
            return Ok(None);
        };

        match usize::try_from(count) {
            Ok(0) => Err(self.invalid(key, "0", "must be at least 1")),
            Ok(count) if count <= max => Ok(Some(count)),
            _ => Err(self.invalid(key, &count.to_string(), format!("must be at most {max}"))),
        }
    }

    fn required_count(&self, key: &'static str, max: usize) -> Result<usize, ConfigError> {
        self.optional_count(key, max)?.ok_or_else(|| self.missing(key))
    }

    fn optional_secs(&self, key: &'static str) -> Result<Option<Duration>, ConfigError> {
        let Some(secs) = self.optional_f64(key)? else {
            return Ok(None);
        };

        if secs <= 0.0 {
            return Err(self.invalid(key, &secs.to_string(), "must be greater than zero"));
        }

        Duration::try_from_secs_f64(secs)
            .map(Some)
            .map_err(|e| self.invalid(key, &secs.to_string(), e))
    }

    fn required_secs(&self, key: &'static str) -> Result<Duration, ConfigError> {
        self.optional_secs(key)?.ok_or_else(|| self.missing(key))
    }

    fn optional_bool(&self, key: &'static str) -> Result<Option<bool>, ConfigError> {
        match self.get(key) {
            None => Ok(None),
            Some(Value::Bool(b)) => Ok(Some(*b)),
            Some(Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "yes" | "on" | "1" => Ok(Some(true)),
                "false" | "no" | "off" | "0" => Ok(Some(false)),
                _ => Err(self.invalid(key, s, "expected true or false")),
            },
            Some(other) => Err(self.invalid(key, &other.to_string(), "expected true or false")),
        }
    }
}
