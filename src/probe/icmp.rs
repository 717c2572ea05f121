//! ICMP echo probe
//!
//! Sends a single echo request over a native socket (raw when privileged,
//! datagram otherwise) from a blocking thread. When the process is not
//! allowed to open ICMP sockets at all it falls back to the system `ping`
//! command.

use std::io;
use std::net::{IpAddr, SocketAddr, UdpSocket};
use std::process::Stdio;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicU16, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use regex::Regex;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::process::Command;
use tracing::{debug, info};

use super::{FailureKind, Probe, ProbeOutcome};

const ECHO_REQUEST_V4: u8 = 8;
const ECHO_REPLY_V4: u8 = 0;
const ECHO_REQUEST_V6: u8 = 128;
const ECHO_REPLY_V6: u8 = 129;

#[derive(Debug, Clone, Copy, PartialEq)]
enum IcmpCapability {
    Native,
    CommandOnly,
}

static ICMP_CAPABILITY: OnceLock<IcmpCapability> = OnceLock::new();

static PING_SEQUENCE: AtomicU16 = AtomicU16::new(0);

fn detect_icmp_capability() -> IcmpCapability {
    if Socket::new(Domain::IPV4, Type::RAW, Some(Protocol::ICMPV4)).is_ok() {
        info!("icmp probe: using raw sockets");
        return IcmpCapability::Native;
    }

    if Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::ICMPV4)).is_ok() {
        info!("icmp probe: using unprivileged datagram sockets");
        return IcmpCapability::Native;
    }

    info!("icmp probe: native sockets unavailable, falling back to the ping command");
    IcmpCapability::CommandOnly
}

/// Why a single echo did not produce a reply
#[derive(Debug)]
enum EchoError {
    Timeout,
    PermissionDenied(String),
    Network(String),
}

impl EchoError {
    fn into_outcome(self, host: &str, timeout: Duration) -> ProbeOutcome {
        match self {
            EchoError::Timeout => ProbeOutcome::failure(
                FailureKind::PacketLoss,
                format!("Ping Target:{host} --> no reply within {timeout:?}"),
            )
            .with_packet_loss(1.0),
            EchoError::PermissionDenied(e) => ProbeOutcome::failure(
                FailureKind::PermissionDenied,
                format!("Ping Target:{host} --> {e}"),
            ),
            EchoError::Network(e) => ProbeOutcome::failure(
                FailureKind::Connection,
                format!("Ping Target:{host} --> {e}"),
            )
            .with_packet_loss(1.0),
        }
    }
}

impl From<io::Error> for EchoError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => EchoError::Timeout,
            io::ErrorKind::PermissionDenied => EchoError::PermissionDenied(err.to_string()),
            _ => EchoError::Network(err.to_string()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct IcmpProbe {
    host: String,
    timeout: Duration,
}

impl IcmpProbe {
    pub fn new(host: impl Into<String>, timeout: Duration) -> Self {
        Self {
            host: host.into(),
            timeout,
        }
    }

    async fn resolve(&self) -> Result<IpAddr, ProbeOutcome> {
        if let Ok(ip) = self.host.parse::<IpAddr>() {
            return Ok(ip);
        }

        let lookup = tokio::time::timeout(
            self.timeout,
            tokio::net::lookup_host(format!("{}:0", self.host)),
        )
        .await;

        let dns_failure = |detail: String| {
            ProbeOutcome::failure(
                FailureKind::Dns,
                format!("Ping Target:{} --> {detail}", self.host),
            )
        };

        match lookup {
            Err(_) => Err(dns_failure("DNS resolution timed out".to_string())),
            Ok(Err(e)) => Err(dns_failure(format!("DNS resolution failed: {e}"))),
            Ok(Ok(mut addrs)) => addrs
                .next()
                .map(|addr| addr.ip())
                .ok_or_else(|| dns_failure("no addresses found".to_string())),
        }
    }

    async fn ping_native(&self, ip: IpAddr) -> ProbeOutcome {
        let timeout = self.timeout;
        let result = tokio::task::spawn_blocking(move || echo(ip, timeout)).await;

        match result {
            Ok(Ok(rtt)) => success(rtt),
            Ok(Err(EchoError::PermissionDenied(e))) => {
                debug!("native ping to {} not permitted ({e}), using ping command", self.host);
                self.ping_command().await
            }
            Ok(Err(e)) => e.into_outcome(&self.host, timeout),
            Err(e) => ProbeOutcome::failure(
                FailureKind::Internal,
                format!("Ping Target:{} --> echo task failed: {e}", self.host),
            ),
        }
    }

    async fn ping_command(&self) -> ProbeOutcome {
        let output = Command::new("ping")
            .args(ping_args(&self.host, self.timeout))
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await;

        let output = match output {
            Ok(output) => output,
            Err(e) => {
                return ProbeOutcome::failure(
                    spawn_failure_kind(&e),
                    format!("Ping Target:{} --> failed to execute ping: {e}", self.host),
                );
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let report = parse_ping_output(&stdout);

        match report.rtt_ms {
            Some(rtt) if output.status.success() => {
                ProbeOutcome::success(rtt).with_packet_loss(report.packet_loss.unwrap_or(0.0))
            }
            _ => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                let detail = stderr
                    .lines()
                    .chain(stdout.lines())
                    .find(|line| !line.trim().is_empty())
                    .unwrap_or("no reply")
                    .trim()
                    .to_string();
                let kind = if stderr.contains("unknown host")
                    || stderr.contains("Name or service not known")
                {
                    FailureKind::Dns
                } else {
                    FailureKind::PacketLoss
                };
                ProbeOutcome::failure(kind, format!("Ping Target:{} --> {detail}", self.host))
                    .with_packet_loss(report.packet_loss.unwrap_or(1.0))
            }
        }
    }
}

#[async_trait]
impl Probe for IcmpProbe {
    async fn probe(&self) -> ProbeOutcome {
        let capability = *ICMP_CAPABILITY.get_or_init(detect_icmp_capability);

        if capability == IcmpCapability::CommandOnly {
            return self.ping_command().await;
        }

        match self.resolve().await {
            Ok(ip) => self.ping_native(ip).await,
            Err(outcome) => outcome,
        }
    }
}

/// Arguments for a single `ping` echo waiting at most `timeout`
///
/// `-W` takes seconds with Linux iputils but milliseconds on Darwin and
/// FreeBSD.
fn ping_args(host: &str, timeout: Duration) -> Vec<String> {
    let wait = if cfg!(any(
        target_os = "macos",
        target_os = "ios",
        target_os = "freebsd",
        target_os = "dragonfly"
    )) {
        timeout.as_millis().max(1).to_string()
    } else {
        timeout.as_secs().max(1).to_string()
    };

    vec![
        "-c".to_string(),
        "1".to_string(),
        "-W".to_string(),
        wait,
        host.to_string(),
    ]
}

/// Classify a failure to start the `ping` binary
fn spawn_failure_kind(e: &io::Error) -> FailureKind {
    match e.kind() {
        io::ErrorKind::PermissionDenied => FailureKind::PermissionDenied,
        _ => FailureKind::Internal,
    }
}

fn success(rtt: Duration) -> ProbeOutcome {
    ProbeOutcome::success(rtt.as_secs_f64() * 1000.0).with_packet_loss(0.0)
}

/// Send one echo request and wait for the matching reply
fn echo(ip: IpAddr, timeout: Duration) -> Result<Duration, EchoError> {
    let (domain, protocol, request_type, reply_type) = match ip {
        IpAddr::V4(_) => (Domain::IPV4, Protocol::ICMPV4, ECHO_REQUEST_V4, ECHO_REPLY_V4),
        IpAddr::V6(_) => (Domain::IPV6, Protocol::ICMPV6, ECHO_REQUEST_V6, ECHO_REPLY_V6),
    };

    let (socket, raw) = match Socket::new(domain, Type::RAW, Some(protocol)) {
        Ok(socket) => (socket, true),
        Err(_) => (Socket::new(domain, Type::DGRAM, Some(protocol))?, false),
    };

    socket.set_read_timeout(Some(timeout))?;
    socket.set_write_timeout(Some(timeout))?;
    socket.connect(&SocketAddr::new(ip, 0).into())?;

    // Only used for plain send/recv on the connected descriptor.
    let socket: UdpSocket = socket.into();

    let identifier: u16 = rand::random();
    let sequence = PING_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    let packet = build_echo_request(request_type, identifier, sequence, ip.is_ipv4());

    let start = Instant::now();
    socket.send(&packet)?;

    let mut buf = [0u8; 1500];
    loop {
        let remaining = timeout
            .checked_sub(start.elapsed())
            .filter(|remaining| !remaining.is_zero())
            .ok_or(EchoError::Timeout)?;
        socket.set_read_timeout(Some(remaining))?;

        let len = socket.recv(&mut buf)?;
        let elapsed = start.elapsed();

        // Raw IPv4 sockets deliver the IP header in front of the ICMP message.
        let offset = if raw && ip.is_ipv4() && len > 0 && buf[0] >> 4 == 4 {
            usize::from(buf[0] & 0x0f) * 4
        } else {
            0
        };

        if let Some(reply) = parse_echo_reply(&buf[offset..len])
            && reply.kind == reply_type
            && reply.sequence == sequence
            // datagram sockets rewrite the identifier and already filter replies
            && (!raw || reply.identifier == identifier)
        {
            return Ok(elapsed);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct EchoHeader {
    kind: u8,
    identifier: u16,
    sequence: u16,
}

fn parse_echo_reply(message: &[u8]) -> Option<EchoHeader> {
    if message.len() < 8 {
        return None;
    }

    Some(EchoHeader {
        kind: message[0],
        identifier: u16::from_be_bytes([message[4], message[5]]),
        sequence: u16::from_be_bytes([message[6], message[7]]),
    })
}

fn build_echo_request(kind: u8, identifier: u16, sequence: u16, with_checksum: bool) -> Vec<u8> {
    let mut packet = vec![0u8; 64];

    packet[0] = kind;
    packet[1] = 0;
    packet[4..6].copy_from_slice(&identifier.to_be_bytes());
    packet[6..8].copy_from_slice(&sequence.to_be_bytes());
    for (i, byte) in packet[8..].iter_mut().enumerate() {
        *byte = i as u8;
    }

    // the kernel fills in ICMPv6 checksums
    if with_checksum {
        let checksum = icmp_checksum(&packet);
        packet[2..4].copy_from_slice(&checksum.to_be_bytes());
    }

    packet
}

/// RFC 1071 internet checksum
fn icmp_checksum(data: &[u8]) -> u16 {
    let mut sum: u32 = data
        .chunks(2)
        .map(|chunk| match chunk {
            [hi, lo] => u32::from(u16::from_be_bytes([*hi, *lo])),
            [hi] => u32::from(*hi) << 8,
            _ => 0,
        })
        .sum();

    while sum >> 16 != 0 {
        sum = (sum & 0xffff) + (sum >> 16);
    }

    !(sum as u16)
}

#[derive(Debug, Default, PartialEq)]
struct PingReport {
    rtt_ms: Option<f64>,
    packet_loss: Option<f64>,
}

fn parse_ping_output(output: &str) -> PingReport {
    static RTT: OnceLock<Option<Regex>> = OnceLock::new();
    static LOSS: OnceLock<Option<Regex>> = OnceLock::new();

    let rtt = RTT
        .get_or_init(|| Regex::new(r"time[=<](?P<val>[0-9.]+)\s*ms").ok())
        .as_ref()
        .and_then(|re| re.captures(output))
        .and_then(|caps| caps.name("val")?.as_str().parse::<f64>().ok());

    let packet_loss = LOSS
        .get_or_init(|| Regex::new(r"(?P<val>[0-9.]+)% packet loss").ok())
        .as_ref()
        .and_then(|re| re.captures(output))
        .and_then(|caps| caps.name("val")?.as_str().parse::<f64>().ok())
        .map(|percent| percent / 100.0);

    PingReport {
        rtt_ms: rtt,
        packet_loss,
    }
}
