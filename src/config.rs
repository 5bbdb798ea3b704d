//! Configuration module for netnav.
//!
//! Loads configuration from environment variables with sensible defaults.

use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Which whitespace-separated column of a hop line carries the hop label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HopLabelColumn {
    /// `tracert` style: `  1    <1 ms    <1 ms    <1 ms  192.168.1.1`
    Last,
    /// `traceroute -n` style: ` 1  192.168.1.1  0.412 ms  0.380 ms  0.371 ms`
    Second,
}

/// How the traceroute utility is invoked and how its output is read.
#[derive(Debug, Clone)]
pub struct TracerouteConfig {
    pub program: String,
    /// Arguments placed before the target.
    pub args: Vec<String>,
    /// Number of leading output lines that form the header.
    pub header_lines: usize,
    pub label_column: HopLabelColumn,
    pub timeout: Duration,
}

impl Default for TracerouteConfig {
    fn default() -> Self {
        if cfg!(windows) {
            Self {
                program: "tracert".to_string(),
                args: vec![],
                header_lines: 4,
                label_column: HopLabelColumn::Last,
                timeout: Duration::from_secs(120),
            }
        } else {
            Self {
                program: "traceroute".to_string(),
                args: vec!["-n".to_string()],
                header_lines: 1,
                label_column: HopLabelColumn::Second,
                timeout: Duration::from_secs(120),
            }
        }
    }
}

/// How the ping utility is invoked.
#[derive(Debug, Clone)]
pub struct PingConfig {
    pub program: String,
    /// Flag that carries the probe count (`-n` on Windows, `-c` elsewhere).
    pub count_flag: String,
    pub count: u32,
    pub timeout: Duration,
}

impl Default for PingConfig {
    fn default() -> Self {
        Self {
            program: "ping".to_string(),
            count_flag: if cfg!(windows) { "-n" } else { "-c" }.to_string(),
            count: 4,
            timeout: Duration::from_secs(30),
        }
    }
}

/// Speed test server candidates and transfer sizes.
#[derive(Debug, Clone)]
pub struct SpeedTestConfig {
    pub servers: Vec<String>,
    pub download_bytes: usize,
    pub upload_bytes: usize,
    pub timeout: Duration,
}

impl Default for SpeedTestConfig {
    fn default() -> Self {
        Self {
            servers: vec!["https://speed.cloudflare.com".to_string()],
            download_bytes: 25 * 1024 * 1024,
            upload_bytes: 10 * 1024 * 1024,
            timeout: Duration::from_secs(120),
        }
    }
}

/// Engine configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct DiagnosticsConfig {
    /// HTTP port for the JSON API (default: 8080)
    pub http_port: u16,
    /// Interval between collection ticks (default: 5s)
    pub tick_interval: Duration,
    /// Base URL of the IP geolocation service (default: "https://ipinfo.io")
    pub geo_endpoint: String,
    pub geo_timeout: Duration,
    pub traceroute: TracerouteConfig,
    pub ping: PingConfig,
    pub speed_test: SpeedTestConfig,
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            http_port: 8080,
            tick_interval: Duration::from_millis(5000),
            geo_endpoint: "https://ipinfo.io".to_string(),
            geo_timeout: Duration::from_secs(5),
            traceroute: TracerouteConfig::default(),
            ping: PingConfig::default(),
            speed_test: SpeedTestConfig::default(),
        }
    }
}

impl DiagnosticsConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `NETNAV_HTTP_PORT`: HTTP port (default: 8080)
    /// - `NETNAV_TICK_INTERVAL_MS`: collection interval in milliseconds (default: 5000)
    /// - `NETNAV_GEO_ENDPOINT`: geolocation base URL (default: "https://ipinfo.io")
    /// - `NETNAV_GEO_TIMEOUT_SECS`: geolocation request timeout (default: 5)
    /// - `NETNAV_TRACEROUTE_TIMEOUT_SECS`: traceroute bound (default: 120)
    /// - `NETNAV_PING_TIMEOUT_SECS`: ping bound (default: 30)
    /// - `NETNAV_SPEEDTEST_TIMEOUT_SECS`: speed test bound (default: 120)
    /// - `NETNAV_SPEEDTEST_SERVERS`: comma-separated speed test servers
    pub fn load() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();

        if let Some(port) = parse_var(&lookup, "NETNAV_HTTP_PORT") {
            cfg.http_port = port;
        }

        if let Some(ms) = parse_var::<u64, _>(&lookup, "NETNAV_TICK_INTERVAL_MS") {
            if ms > 0 {
                cfg.tick_interval = Duration::from_millis(ms);
            }
        }

        if let Some(endpoint) = lookup("NETNAV_GEO_ENDPOINT") {
            cfg.geo_endpoint = endpoint.trim_end_matches('/').to_string();
        }

        if let Some(secs) = parse_secs(&lookup, "NETNAV_GEO_TIMEOUT_SECS") {
            cfg.geo_timeout = secs;
        }
        if let Some(secs) = parse_secs(&lookup, "NETNAV_TRACEROUTE_TIMEOUT_SECS") {
            cfg.traceroute.timeout = secs;
        }
        if let Some(secs) = parse_secs(&lookup, "NETNAV_PING_TIMEOUT_SECS") {
            cfg.ping.timeout = secs;
        }
        if let Some(secs) = parse_secs(&lookup, "NETNAV_SPEEDTEST_TIMEOUT_SECS") {
            cfg.speed_test.timeout = secs;
        }

        if let Some(servers) = lookup("NETNAV_SPEEDTEST_SERVERS") {
            let servers: Vec<String> = servers
                .split(',')
                .map(|s| s.trim().trim_end_matches('/').to_string())
                .filter(|s| !s.is_empty())
                .collect();
            if !servers.is_empty() {
                cfg.speed_test.servers = servers;
            }
        }

        cfg
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Option<T>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!("Ignoring invalid value for {}: {:?}", key, raw);
            None
        }
    }
}

fn parse_secs<F>(lookup: &F, key: &str) -> Option<Duration>
where
    F: Fn(&str) -> Option<String>,
{
    parse_var::<u64, _>(lookup, key)
        .filter(|s| *s > 0)
        .map(Duration::from_secs)
}
