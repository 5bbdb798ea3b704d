//! Socket connection collection and summarising.
//!
//! On Linux the kernel socket tables under `/proc/net` are parsed directly.
//! Each table is read independently: an unreadable table or a malformed row
//! is skipped, and the summary is built from whatever remains.

use std::collections::{HashMap, HashSet};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::task::JoinSet;

use super::{CollectionError, ConnectionCollector};
use crate::geo::{is_locatable, GeoCache};
use crate::model::{Connection, ConnectionStatus, ConnectionSummary, Endpoint, Protocol};

/// One kernel socket table.
#[derive(Debug, Clone, Copy)]
struct SocketTable {
    file: &'static str,
    protocol: Protocol,
}

const SOCKET_TABLES: [SocketTable; 4] = [
    SocketTable { file: "tcp", protocol: Protocol::Tcp },
    SocketTable { file: "tcp6", protocol: Protocol::Tcp },
    SocketTable { file: "udp", protocol: Protocol::Udp },
    SocketTable { file: "udp6", protocol: Protocol::Udp },
];

/// Kernel name for a TCP state code (hex), as in `include/net/tcp_states.h`.
fn tcp_state_name(hex: &str) -> &'static str {
    match u8::from_str_radix(hex, 16) {
        Ok(0x01) => "ESTABLISHED",
        Ok(0x02) => "SYN_SENT",
        Ok(0x03) => "SYN_RECV",
        Ok(0x04) => "FIN_WAIT1",
        Ok(0x05) => "FIN_WAIT2",
        Ok(0x06) => "TIME_WAIT",
        Ok(0x07) => "CLOSE",
        Ok(0x08) => "CLOSE_WAIT",
        Ok(0x09) => "LAST_ACK",
        Ok(0x0A) => "LISTEN",
        Ok(0x0B) => "CLOSING",
        _ => "UNKNOWN",
    }
}

fn tcp_status(hex: &str) -> ConnectionStatus {
    ConnectionStatus::classify(tcp_state_name(hex))
}

/// Parse `ADDR:PORT` as written in `/proc/net/*`. Addresses are in host byte
/// order, 8 hex digits for IPv4 and 32 for IPv6; the port is big-endian hex.
pub fn parse_hex_endpoint(field: &str) -> Option<Endpoint> {
    let (addr, port) = field.split_once(':')?;
    let port = u16::from_str_radix(port, 16).ok()?;

    let ip = match addr.len() {
        8 => {
            let word = u32::from_str_radix(addr, 16).ok()?;
            IpAddr::V4(Ipv4Addr::from(word.to_ne_bytes()))
        }
        32 => {
            let mut octets = [0u8; 16];
            for (i, chunk) in octets.chunks_mut(4).enumerate() {
                let word = u32::from_str_radix(addr.get(i * 8..i * 8 + 8)?, 16).ok()?;
                chunk.copy_from_slice(&word.to_ne_bytes());
            }
            IpAddr::V6(Ipv6Addr::from(octets))
        }
        _ => return None,
    };

    Some(Endpoint { ip, port })
}

/// Unbound sides (`0.0.0.0:0`, `[::]:0`) are reported as absent.
fn bound(endpoint: Endpoint) -> Option<Endpoint> {
    if endpoint.ip.is_unspecified() && endpoint.port == 0 {
        None
    } else {
        Some(endpoint)
    }
}

/// Parse one socket table. The header row and malformed rows are skipped.
pub fn parse_socket_table(content: &str, protocol: Protocol) -> Vec<Connection> {
    content
        .lines()
        .skip(1)
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 4 {
                return None;
            }

            let local = parse_hex_endpoint(fields[1])?;
            let remote = parse_hex_endpoint(fields[2])?;
            let status = match protocol {
                Protocol::Tcp => tcp_status(fields[3]),
                // datagram sockets carry no connection state
                Protocol::Udp => ConnectionStatus::Other,
            };

            Some(Connection {
                protocol,
                local_address: bound(local),
                remote_address: bound(remote),
                status,
            })
        })
        .collect()
}

/// Read every socket table under `root`.
///
/// Fails only if none of the tables could be read.
pub fn read_socket_tables(root: &Path) -> Result<Vec<Connection>, CollectionError> {
    let mut connections = Vec::new();
    let mut last_error = None;
    let mut read_any = false;

    for table in SOCKET_TABLES {
        let path = root.join(table.file);
        match std::fs::read_to_string(&path) {
            Ok(content) => {
                read_any = true;
                connections.extend(parse_socket_table(&content, table.protocol));
            }
            Err(e) => {
                tracing::debug!("Skipping {}: {}", path.display(), e);
                last_error = Some(CollectionError::Read {
                    source_name: path.display().to_string(),
                    message: e.to_string(),
                });
            }
        }
    }

    match (read_any, last_error) {
        (false, Some(e)) => Err(e),
        _ => Ok(connections),
    }
}

/// Resolve remote addresses and attach one location per connection whose
/// remote resolved. Each distinct address is looked up once, concurrently.
pub async fn attach_locations(summary: &mut ConnectionSummary, geo: &Arc<GeoCache>) {
    let remotes: HashSet<IpAddr> = summary
        .connections
        .iter()
        .filter_map(|c| c.remote_address)
        .map(|e| e.ip)
        .filter(|ip| is_locatable(*ip))
        .collect();

    let mut lookups = JoinSet::new();
    for ip in remotes {
        let geo = geo.clone();
        lookups.spawn(async move { (ip, geo.resolve(&ip.to_string()).await) });
    }

    let mut resolved = HashMap::new();
    while let Some(joined) = lookups.join_next().await {
        match joined {
            Ok((ip, Some(loc))) => {
                resolved.insert(ip, loc);
            }
            Ok((_, None)) => {}
            Err(e) => tracing::warn!("Geolocation task failed: {}", e),
        }
    }

    summary.remote_locations = summary
        .connections
        .iter()
        .filter_map(|c| c.remote_address)
        .filter_map(|e| resolved.get(&e.ip).copied())
        .collect();
}

/// Reads connections from the kernel and geolocates their remotes.
pub struct SystemConnections {
    proc_net: PathBuf,
    geo: Arc<GeoCache>,
}

impl SystemConnections {
    pub fn new(geo: Arc<GeoCache>) -> Self {
        Self::with_root("/proc/net", geo)
    }

    /// Read socket tables from a directory other than `/proc/net`.
    pub fn with_root<P: Into<PathBuf>>(root: P, geo: Arc<GeoCache>) -> Self {
        Self {
            proc_net: root.into(),
            geo,
        }
    }
}

#[async_trait]
impl ConnectionCollector for SystemConnections {
    async fn collect(&self) -> Result<ConnectionSummary, CollectionError> {
        if cfg!(not(target_os = "linux")) && !self.proc_net.exists() {
            return Err(CollectionError::Unsupported);
        }

        let root = self.proc_net.clone();
        let connections = tokio::task::spawn_blocking(move || read_socket_tables(&root))
            .await
            .map_err(|e| CollectionError::Task(e.to_string()))??;

        let mut summary = ConnectionSummary::from_connections(connections);
        attach_locations(&mut summary, &self.geo).await;
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::{GeoSource, LookupError};
    use crate::model::GeoLocation;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const TCP_TABLE: &str = "  sl  local_address rem_address   st tx_queue rx_queue tr tm->when retrnsmt   uid  timeout inode
   0: 0100007F:0277 00000000:0000 0A 00000000:00000000 00:00000000 00000000     0        0 22501 1 0000000000000000 100 0 0 10 0
   1: 0F02000A:C5D2 08080808:01BB 01 00000000:00000000 02:000A7A2C 00000000  1000        0 71802 2 0000000000000000 20 4 30 10 -1
   2: 0F02000A:C5D4 08080808:01BB 06 00000000:00000000 03:00001637 00000000     0        0 0 3 0000000000000000
   3: 0F02000A:C5D6 01010101:0050 02 00000000:00000000 01:00000055 00000000  1000        0 71811 2 0000000000000000 20 4 30 10 -1
   4: garbage
";

    const TCP6_TABLE: &str = "  sl  local_address                         remote_address                        st tx_queue rx_queue tr tm->when retrnsmt   uid  timeout inode
   0: 00000000000000000000000001000000:0277 00000000000000000000000000000000:0000 0A 00000000:00000000 00:00000000 00000000     0        0 22500 1 0000000000000000 100 0 0 10 0
";

    const UDP_TABLE: &str = "   sl  local_address rem_address   st tx_queue rx_queue tr tm->when retrnsmt   uid  timeout inode ref pointer drops
  100: 3500007F:0035 00000000:0000 07 00000000:00000000 00:00000000 00000000   101        0 19823 2 0000000000000000 0
";

    struct FixedSource {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl GeoSource for FixedSource {
        async fn locate(&self, ip: IpAddr) -> Result<GeoLocation, LookupError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if ip == IpAddr::V4(Ipv4Addr::new(8, 8, 8, 8)) {
                Ok(GeoLocation {
                    latitude: 37.4,
                    longitude: -122.1,
                })
            } else {
                Err(LookupError::MissingLocation)
            }
        }
    }

    #[test]
    fn test_tcp_state_codes() {
        assert_eq!(tcp_status("01"), ConnectionStatus::Established);
        assert_eq!(tcp_status("06"), ConnectionStatus::TimeWait);
        assert_eq!(tcp_status("08"), ConnectionStatus::CloseWait);
        assert_eq!(tcp_status("0A"), ConnectionStatus::Listen);
        assert_eq!(tcp_state_name("09"), "LAST_ACK");
        assert_eq!(tcp_status("09"), ConnectionStatus::Other);
        assert_eq!(tcp_status("zz"), ConnectionStatus::Other);
    }

    #[test]
    fn test_parse_hex_endpoint_v4() {
        let ep = parse_hex_endpoint("0100007F:0277").unwrap();
        if cfg!(target_endian = "little") {
            assert_eq!(ep.ip, IpAddr::V4(Ipv4Addr::LOCALHOST));
        }
        assert_eq!(ep.port, 631);
    }

    #[test]
    fn test_parse_hex_endpoint_v6() {
        let ep = parse_hex_endpoint("00000000000000000000000001000000:0277").unwrap();
        if cfg!(target_endian = "little") {
            assert_eq!(ep.ip, IpAddr::V6(Ipv6Addr::LOCALHOST));
        }
        assert!(parse_hex_endpoint("0000:0277").is_none());
        assert!(parse_hex_endpoint("0100007F").is_none());
    }

    #[test]
    fn test_parse_tcp_table() {
        let conns = parse_socket_table(TCP_TABLE, Protocol::Tcp);
        assert_eq!(conns.len(), 4);

        assert_eq!(conns[0].status, ConnectionStatus::Listen);
        assert_eq!(conns[0].remote_address, None);
        assert_eq!(conns[1].status, ConnectionStatus::Established);
        assert_eq!(conns[1].remote_address.unwrap().port, 443);
        assert_eq!(conns[2].status, ConnectionStatus::TimeWait);
        // SYN_SENT
        assert_eq!(conns[3].status, ConnectionStatus::Other);
    }

    #[test]
    fn test_udp_sockets_are_other() {
        let conns = parse_socket_table(UDP_TABLE, Protocol::Udp);
        assert_eq!(conns.len(), 1);
        assert_eq!(conns[0].protocol, Protocol::Udp);
        assert_eq!(conns[0].status, ConnectionStatus::Other);
    }

    fn write_tables(dir: &Path, tables: &[(&str, &str)]) {
        std::fs::create_dir_all(dir).unwrap();
        for (name, content) in tables {
            std::fs::write(dir.join(name), content).unwrap();
        }
    }

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("netnav-{}-{}", name, std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        dir
    }

    #[test]
    fn test_missing_tables_are_skipped() {
        let dir = scratch_dir("partial");
        write_tables(&dir, &[("tcp", TCP_TABLE), ("udp", UDP_TABLE)]);

        let conns = read_socket_tables(&dir).unwrap();
        assert_eq!(conns.len(), 5);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_no_readable_tables_is_an_error() {
        let dir = scratch_dir("empty");
        std::fs::create_dir_all(&dir).unwrap();

        assert!(matches!(
            read_socket_tables(&dir),
            Err(CollectionError::Read { .. })
        ));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn test_collect_summarises_and_locates() {
        let dir = scratch_dir("collect");
        write_tables(
            &dir,
            &[("tcp", TCP_TABLE), ("tcp6", TCP6_TABLE), ("udp", UDP_TABLE)],
        );

        let source = Arc::new(FixedSource {
            calls: AtomicUsize::new(0),
        });
        let geo = Arc::new(GeoCache::new(source.clone()));
        let collector = SystemConnections::with_root(&dir, geo);

        let summary = collector.collect().await.unwrap();
        assert_eq!(summary.connections.len(), 6);
        assert_eq!(summary.total(), summary.connections.len());
        assert_eq!(summary.count(ConnectionStatus::Listen), 2);
        assert_eq!(summary.count(ConnectionStatus::Other), 2);

        if cfg!(target_endian = "little") {
            // two connections to 8.8.8.8 resolve from a single lookup; 1.1.1.1 fails
            assert_eq!(summary.remote_locations.len(), 2);
            assert_eq!(source.calls.load(Ordering::SeqCst), 2);
        }
        let with_remote = summary
            .connections
            .iter()
            .filter(|c| c.remote_address.is_some())
            .count();
        assert!(summary.remote_locations.len() <= with_remote);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn test_mapped_loopback_remote_is_not_located() {
        let table = "  sl  local_address                         remote_address                        st tx_queue rx_queue tr tm->when retrnsmt   uid  timeout inode
   0: 0000000000000000FFFF00000100007F:D6A2 0000000000000000FFFF00000100007F:1F90 01 00000000:00000000 00:00000000 00000000  1000        0 81234 1 0000000000000000 20 4 30 10 -1
";
        let mut summary =
            ConnectionSummary::from_connections(parse_socket_table(table, Protocol::Tcp));
        assert_eq!(summary.connections.len(), 1);
        let remote = summary.connections[0].remote_address.unwrap();
        assert_eq!(remote.port, 8080);
        if cfg!(target_endian = "little") {
            assert_eq!(remote.ip.to_canonical(), IpAddr::V4(Ipv4Addr::LOCALHOST));
        }

        let source = Arc::new(FixedSource {
            calls: AtomicUsize::new(0),
        });
        let geo = Arc::new(GeoCache::new(source.clone()));
        attach_locations(&mut summary, &geo).await;

        assert_eq!(source.calls.load(Ordering::SeqCst), 0);
        assert!(summary.remote_locations.is_empty());
    }
}
