//! Snapshot data model types.

use std::collections::BTreeMap;
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};

use crate::graph::RouteGraph;

/// One local network interface as seen on the last tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InterfaceStatus {
    pub name: String,
    pub ipv4_address: Option<String>,
    #[serde(rename = "status", serialize_with = "serialize_up_down")]
    pub is_up: bool,
}

impl InterfaceStatus {
    /// `"up"` or `"down"`.
    pub fn status(&self) -> &'static str {
        if self.is_up {
            "up"
        } else {
            "down"
        }
    }
}

fn serialize_up_down<S: Serializer>(is_up: &bool, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(if *is_up { "up" } else { "down" })
}

/// A socket endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Endpoint {
    pub ip: IpAddr,
    pub port: u16,
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.ip {
            IpAddr::V4(ip) => write!(f, "{}:{}", ip, self.port),
            IpAddr::V6(ip) => write!(f, "[{}]:{}", ip, self.port),
        }
    }
}

/// Connection state, bucketed into the states the engine reports on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionStatus {
    Established,
    CloseWait,
    Listen,
    TimeWait,
    Other,
}

impl ConnectionStatus {
    /// The statuses every summary reports, even at zero.
    pub const TRACKED: [ConnectionStatus; 4] = [
        ConnectionStatus::Established,
        ConnectionStatus::CloseWait,
        ConnectionStatus::Listen,
        ConnectionStatus::TimeWait,
    ];

    /// Classify an OS status name. Anything unrecognised is `Other`.
    pub fn classify(name: &str) -> Self {
        match name.trim().to_ascii_uppercase().as_str() {
            "ESTABLISHED" => Self::Established,
            "CLOSE_WAIT" => Self::CloseWait,
            "LISTEN" => Self::Listen,
            "TIME_WAIT" => Self::TimeWait,
            _ => Self::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Established => "ESTABLISHED",
            Self::CloseWait => "CLOSE_WAIT",
            Self::Listen => "LISTEN",
            Self::TimeWait => "TIME_WAIT",
            Self::Other => "OTHER",
        }
    }
}

/// Transport protocol of a socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
}

/// A single OS socket connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Connection {
    pub protocol: Protocol,
    pub local_address: Option<Endpoint>,
    pub remote_address: Option<Endpoint>,
    pub status: ConnectionStatus,
}

impl Connection {
    /// Local endpoint for display, `"N/A"` when absent.
    pub fn local_display(&self) -> String {
        display_endpoint(self.local_address)
    }

    /// Remote endpoint for display, `"N/A"` when absent.
    pub fn remote_display(&self) -> String {
        display_endpoint(self.remote_address)
    }
}

fn display_endpoint(endpoint: Option<Endpoint>) -> String {
    endpoint
        .map(|e| e.to_string())
        .unwrap_or_else(|| "N/A".to_string())
}

/// Latitude/longitude pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoLocation {
    pub latitude: f64,
    pub longitude: f64,
}

/// Connections from one tick plus derived aggregates.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ConnectionSummary {
    pub connections: Vec<Connection>,
    pub status_counts: BTreeMap<ConnectionStatus, usize>,
    pub remote_locations: Vec<GeoLocation>,
}

impl ConnectionSummary {
    /// Build a summary from a connection list, counting statuses.
    /// Locations are attached separately.
    pub fn from_connections(connections: Vec<Connection>) -> Self {
        let mut status_counts: BTreeMap<ConnectionStatus, usize> = ConnectionStatus::TRACKED
            .iter()
            .map(|s| (*s, 0))
            .collect();

        for conn in &connections {
            *status_counts.entry(conn.status).or_insert(0) += 1;
        }

        Self {
            connections,
            status_counts,
            remote_locations: Vec::new(),
        }
    }

    pub fn count(&self, status: ConnectionStatus) -> usize {
        self.status_counts.get(&status).copied().unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.status_counts.values().sum()
    }
}

/// Kind of on-demand probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeKind {
    Traceroute,
    Ping,
    #[serde(rename = "speedtest")]
    SpeedTest,
}

impl ProbeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Traceroute => "traceroute",
            Self::Ping => "ping",
            Self::SpeedTest => "speedtest",
        }
    }
}

impl fmt::Display for ProbeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProbeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "traceroute" => Ok(Self::Traceroute),
            "ping" => Ok(Self::Ping),
            "speedtest" | "speed_test" => Ok(Self::SpeedTest),
            other => Err(format!("unknown probe kind: {}", other)),
        }
    }
}

/// Outcome of one probe.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProbeResult {
    Traceroute {
        graph: RouteGraph,
    },
    /// `average_latency` is `None` when no average could be read from the output.
    Ping {
        average_latency: Option<String>,
    },
    SpeedTest {
        download_mbps: f64,
        upload_mbps: f64,
    },
    Error {
        message: String,
    },
}

impl ProbeResult {
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }
}

/// A completed probe as kept in the snapshot store.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProbeRecord {
    pub id: u64,
    pub kind: ProbeKind,
    pub target: Option<String>,
    pub result: ProbeResult,
    pub completed_at: DateTime<Utc>,
}

/// The latest known state of every diagnostic category.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DiagnosticsSnapshot {
    pub interfaces: Arc<Vec<InterfaceStatus>>,
    pub connections: Arc<ConnectionSummary>,
    pub traceroute: Option<Arc<ProbeRecord>>,
    pub ping: Option<Arc<ProbeRecord>>,
    pub speed_test: Option<Arc<ProbeRecord>>,
    pub tick_count: u64,
    pub last_tick_at: Option<DateTime<Utc>>,
}

impl DiagnosticsSnapshot {
    pub fn probe(&self, kind: ProbeKind) -> Option<&Arc<ProbeRecord>> {
        match kind {
            ProbeKind::Traceroute => self.traceroute.as_ref(),
            ProbeKind::Ping => self.ping.as_ref(),
            ProbeKind::SpeedTest => self.speed_test.as_ref(),
        }
    }

    pub(crate) fn probe_slot_mut(&mut self, kind: ProbeKind) -> &mut Option<Arc<ProbeRecord>> {
        match kind {
            ProbeKind::Traceroute => &mut self.traceroute,
            ProbeKind::Ping => &mut self.ping,
            ProbeKind::SpeedTest => &mut self.speed_test,
        }
    }
}
