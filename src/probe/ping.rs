//! ICMP echo probe with a `ping` command fallback.
//!
//! Native sockets run inside `spawn_blocking` so the send/receive timing is
//! not disturbed by the async scheduler. RTTs are reported in milliseconds.

use std::mem::MaybeUninit;
use std::net::{IpAddr, SocketAddr};
use std::process::Stdio;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use regex::Regex;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::process::Command;

use super::ProbeError;

#[derive(Debug, Clone, Copy, PartialEq)]
enum IcmpCapability {
    Native,
    CommandOnly,
}

static ICMP_CAPABILITY: OnceLock<IcmpCapability> = OnceLock::new();

static ECHO_SEQUENCE: AtomicU16 = AtomicU16::new(0);

/// Per-family constants for an ICMP echo exchange.
#[derive(Debug, Clone, Copy)]
struct EchoFamily {
    domain: Domain,
    protocol: Protocol,
    request_type: u8,
    reply_type: u8,
}

const ECHO_V4: EchoFamily = EchoFamily {
    domain: Domain::IPV4,
    protocol: Protocol::ICMPV4,
    request_type: 8,
    reply_type: 0,
};

const ECHO_V6: EchoFamily = EchoFamily {
    domain: Domain::IPV6,
    protocol: Protocol::ICMPV6,
    request_type: 128,
    reply_type: 129,
};

impl EchoFamily {
    fn for_ip(ip: &IpAddr) -> Self {
        match ip {
            IpAddr::V4(_) => ECHO_V4,
            IpAddr::V6(_) => ECHO_V6,
        }
    }

    fn is_v4(&self) -> bool {
        self.request_type == ECHO_V4.request_type
    }
}

fn next_echo_id() -> (u16, u16) {
    let identifier: u16 = rand::random();
    let sequence = ECHO_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    (identifier, sequence)
}

fn detect_icmp_capability() -> IcmpCapability {
    if Socket::new(Domain::IPV4, Type::RAW, Some(Protocol::ICMPV4)).is_ok() {
        tracing::info!("Ping probe: using native ICMP (raw socket)");
        return IcmpCapability::Native;
    }

    // Unprivileged ICMP on Linux (ping_group_range) and macOS.
    if Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::ICMPV4)).is_ok() {
        tracing::info!("Ping probe: using native ICMP (datagram socket)");
        return IcmpCapability::Native;
    }

    tracing::info!("Ping probe: native ICMP unavailable, using ping command");
    IcmpCapability::CommandOnly
}

/// Send one echo request to `address` and return the RTT in milliseconds.
pub async fn run_ping_probe(address: &str, timeout: Duration) -> Result<f64, ProbeError> {
    let capability = *ICMP_CAPABILITY.get_or_init(detect_icmp_capability);
    if capability == IcmpCapability::CommandOnly {
        return run_ping_command(address, timeout).await;
    }

    let ip = resolve_address(address).await?;
    let result = tokio::task::spawn_blocking(move || echo_blocking(ip, timeout))
        .await
        .map_err(|e| ProbeError::Network(format!("ping task failed: {}", e)))?;

    match result {
        Err(ProbeError::Permission(reason)) => {
            tracing::debug!("Native ping to {} not permitted ({}), using ping command", address, reason);
            run_ping_command(address, timeout).await
        }
        other => other,
    }
}

async fn resolve_address(address: &str) -> Result<IpAddr, ProbeError> {
    if let Ok(ip) = address.parse::<IpAddr>() {
        return Ok(ip);
    }

    tokio::net::lookup_host(format!("{}:0", address))
        .await
        .map_err(|e| ProbeError::Resolve(format!("{}: {}", address, e)))?
        .next()
        .map(|sa| sa.ip())
        .ok_or_else(|| ProbeError::Resolve(format!("no addresses found for {}", address)))
}

fn socket_error(context: &str, e: std::io::Error) -> ProbeError {
    if e.kind() == std::io::ErrorKind::PermissionDenied {
        ProbeError::Permission(format!("{}: {}", context, e))
    } else {
        ProbeError::Network(format!("{}: {}", context, e))
    }
}

fn echo_blocking(ip: IpAddr, timeout: Duration) -> Result<f64, ProbeError> {
    let family = EchoFamily::for_ip(&ip);

    let (socket, raw) = match Socket::new(family.domain, Type::RAW, Some(family.protocol)) {
        Ok(s) => (s, true),
        Err(_) => {
            let s = Socket::new(family.domain, Type::DGRAM, Some(family.protocol))
                .map_err(|e| socket_error("create ICMP socket", e))?;
            (s, false)
        }
    };

    socket
        .set_read_timeout(Some(timeout))
        .map_err(|e| socket_error("set timeout", e))?;
    socket
        .set_write_timeout(Some(timeout))
        .map_err(|e| socket_error("set timeout", e))?;
    socket
        .connect(&SocketAddr::new(ip, 0).into())
        .map_err(|e| socket_error("connect", e))?;

    let (identifier, sequence) = next_echo_id();
    let packet = build_echo_request(family, identifier, sequence);

    let start = Instant::now();
    socket.send(&packet).map_err(|e| socket_error("send", e))?;

    let mut buf = [MaybeUninit::<u8>::uninit(); 1500];
    loop {
        let len = socket.recv(&mut buf).map_err(|e| match e.kind() {
            std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut => {
                ProbeError::Timeout(timeout)
            }
            _ => socket_error("receive", e),
        })?;
        let elapsed = start.elapsed();
        if elapsed >= timeout {
            return Err(ProbeError::Timeout(timeout));
        }

        // SAFETY: recv initialized the first `len` bytes.
        let data: &[u8] = unsafe { std::slice::from_raw_parts(buf.as_ptr() as *const u8, len) };

        // Datagram sockets get their identifier rewritten by the kernel.
        let expected_id = raw.then_some(identifier);
        if is_echo_reply(family, data, expected_id, sequence) {
            return Ok(elapsed.as_secs_f64() * 1000.0);
        }
    }
}

/// Build an echo request: 8 byte header plus a 56 byte payload.
fn build_echo_request(family: EchoFamily, identifier: u16, sequence: u16) -> Vec<u8> {
    let mut packet = vec![0u8; 64];
    packet[0] = family.request_type;
    packet[4..6].copy_from_slice(&identifier.to_be_bytes());
    packet[6..8].copy_from_slice(&sequence.to_be_bytes());

    let sent_at = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64;
    packet[8..16].copy_from_slice(&sent_at.to_be_bytes());

    // The kernel fills in the ICMPv6 checksum.
    if family.is_v4() {
        let checksum = icmp_checksum(&packet);
        packet[2..4].copy_from_slice(&checksum.to_be_bytes());
    }

    packet
}

fn is_echo_reply(family: EchoFamily, data: &[u8], identifier: Option<u16>, sequence: u16) -> bool {
    // Raw IPv4 sockets deliver the IP header too.
    let offset = if family.is_v4() && !data.is_empty() && data[0] >> 4 == 4 {
        usize::from(data[0] & 0x0f) * 4
    } else {
        0
    };

    let Some(icmp) = data.get(offset..offset + 8) else {
        return false;
    };

    let reply_id = u16::from_be_bytes([icmp[4], icmp[5]]);
    let reply_seq = u16::from_be_bytes([icmp[6], icmp[7]]);

    icmp[0] == family.reply_type
        && reply_seq == sequence
        && identifier.map_or(true, |id| id == reply_id)
}

/// Internet checksum (RFC 1071).
fn icmp_checksum(data: &[u8]) -> u16 {
    let mut sum: u32 = data
        .chunks(2)
        .map(|pair| match pair {
            [hi, lo] => u32::from(u16::from_be_bytes([*hi, *lo])),
            [hi] => u32::from(*hi) << 8,
            _ => 0,
        })
        .sum();

    while sum >> 16 != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }

    !(sum as u16)
}

async fn run_ping_command(address: &str, timeout: Duration) -> Result<f64, ProbeError> {
    let timeout_secs = timeout.as_secs().max(1);

    let output = Command::new("ping")
        .args(["-c", "1", "-W", &timeout_secs.to_string(), address])
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| ProbeError::Command(format!("failed to execute ping: {}", e)))?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(classify_command_failure(&stdout, &stderr, timeout));
    }

    parse_ping_output(&stdout)
}

fn classify_command_failure(stdout: &str, stderr: &str, timeout: Duration) -> ProbeError {
    let stderr_lower = stderr.to_lowercase();
    if stderr_lower.contains("not permitted") || stderr_lower.contains("permission denied") {
        return ProbeError::Permission(stderr.trim().to_string());
    }
    if stderr_lower.contains("unknown host")
        || stderr_lower.contains("cannot resolve")
        || stderr_lower.contains("name or service not known")
        || stderr_lower.contains("temporary failure in name resolution")
    {
        return ProbeError::Resolve(stderr.trim().to_string());
    }
    if stderr_lower.contains("timeout")
        || stdout.contains("100% packet loss")
        || stdout.contains("100.0% packet loss")
    {
        return ProbeError::Timeout(timeout);
    }
    ProbeError::Command(format!("ping failed: {}", stdout.trim()))
}

/// Extract the RTT in milliseconds from `ping` output.
fn parse_ping_output(output: &str) -> Result<f64, ProbeError> {
    static PER_PACKET: OnceLock<Regex> = OnceLock::new();
    let per_packet =
        PER_PACKET.get_or_init(|| Regex::new(r"time[=<](?P<val>[0-9.]+)\s*ms").unwrap());

    if let Some(ms) = per_packet
        .captures(output)
        .and_then(|caps| caps.name("val"))
        .and_then(|m| m.as_str().parse::<f64>().ok())
    {
        return Ok(ms);
    }

    // Summary line: "round-trip min/avg/max/stddev" (macOS) or
    // "rtt min/avg/max/mdev" (Linux). Use the average.
    static SUMMARY: OnceLock<Regex> = OnceLock::new();
    let summary = SUMMARY.get_or_init(|| {
        Regex::new(r"(?:round-trip|rtt)\s+min/avg/max/(?:stddev|mdev)\s*=\s*([0-9.]+)/([0-9.]+)/([0-9.]+)")
            .unwrap()
    });

    summary
        .captures(output)
        .and_then(|caps| caps.get(2))
        .and_then(|m| m.as_str().parse::<f64>().ok())
        .ok_or_else(|| ProbeError::Command(format!("failed to parse ping output: {}", output)))
}
