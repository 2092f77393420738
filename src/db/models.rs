//! Record types shared by the monitor, the log sinks and the report engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Full gateway response as returned by the telemetry endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GatewayResponse {
    #[serde(default)]
    pub device: DeviceInfo,
    #[serde(default)]
    pub signal: SignalInfo,
    #[serde(default)]
    pub time: TimeInfo,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DeviceInfo {
    pub hardware_version: String,
    pub mac_id: String,
    pub manufacturer: String,
    pub model: String,
    pub role: String,
    pub serial: String,
    pub software_version: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalInfo {
    #[serde(rename = "5g")]
    pub five_g: RadioMetrics,
    #[serde(rename = "4g")]
    pub four_g: RadioMetrics,
    pub generic: GenericInfo,
}

/// Instantaneous state of one radio connection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RadioMetrics {
    #[serde(rename = "antennaUsed")]
    pub antenna_used: String,
    pub bands: Vec<String>,
    /// Signal level, conventionally 0.0 to 5.0.
    pub bars: f64,
    /// Sector identifier.
    pub cid: i64,
    /// Tower identifier; 0 means unknown.
    #[serde(rename = "gNBID", alias = "gnbid")]
    pub gnbid: i64,
    pub eid: i64,
    pub pcid: i64,
    /// Received power, dBm.
    pub rsrp: i32,
    pub rsrq: i32,
    pub rssi: i32,
    /// Signal-to-noise ratio, dB.
    pub sinr: i32,
}

impl RadioMetrics {
    /// Tower identifier, `None` when the gateway reported 0.
    pub fn tower_id(&self) -> Option<i64> {
        (self.gnbid != 0).then_some(self.gnbid)
    }

    /// Tower identifier for display, falling back to the physical cell ID.
    pub fn display_tower(&self) -> i64 {
        self.tower_id().unwrap_or(self.pcid)
    }

    /// Whether this connection carries any signal at all.
    pub fn is_active(&self) -> bool {
        !self.bands.is_empty() || self.bars > 0.0
    }

    /// Compare band sets, ignoring order and duplicates.
    pub fn same_bands(&self, other: &RadioMetrics) -> bool {
        let ours: BTreeSet<&str> = self.bands.iter().map(String::as_str).collect();
        let theirs: BTreeSet<&str> = other.bands.iter().map(String::as_str).collect();
        ours == theirs
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GenericInfo {
    pub apn: String,
    #[serde(rename = "hasIPv6")]
    pub has_ipv6: bool,
    pub registration: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TimeInfo {
    /// Gateway clock, epoch seconds.
    pub local_time: i64,
    pub local_time_zone: String,
    pub up_time: i64,
}

/// Ping statistics for one accumulation window.
///
/// `min`, `avg` and `max` are `None` until the window has a success.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PingWindowStats {
    pub min: Option<f64>,
    pub avg: Option<f64>,
    pub max: Option<f64>,
    pub stddev: f64,
    pub loss: f64,
    pub last_rtt: Option<f64>,
    pub sent: u64,
    pub received: u64,
}

/// One persisted observation: gateway telemetry plus the ping window that
/// accumulated since the previous sample.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub gateway: GatewayResponse,
    #[serde(default)]
    pub ping: PingWindowStats,
}

impl Sample {
    pub fn new(gateway: GatewayResponse, ping: PingWindowStats) -> Self {
        Self { gateway, ping }
    }

    /// Timestamp taken from the gateway's own clock.
    pub fn timestamp(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.gateway.time.local_time, 0).unwrap_or_default()
    }

    pub fn five_g(&self) -> &RadioMetrics {
        &self.gateway.signal.five_g
    }

    pub fn four_g(&self) -> &RadioMetrics {
        &self.gateway.signal.four_g
    }
}
