//! Local interface enumeration.

use std::net::{IpAddr, Ipv4Addr};

use async_trait::async_trait;
use pnet::datalink;

use super::{CollectionError, InterfaceCollector};
use crate::model::InterfaceStatus;

/// Interface as reported by the OS, before names are merged.
#[derive(Debug, Clone)]
pub struct RawInterface {
    pub name: String,
    pub ipv4: Option<Ipv4Addr>,
    pub is_up: bool,
}

/// Collapse OS entries into one status per distinct name, in first-seen order.
///
/// A name listed more than once is up if any entry is up; the first IPv4
/// address found wins.
pub fn merge_interfaces(raw: Vec<RawInterface>) -> Vec<InterfaceStatus> {
    let mut merged: Vec<InterfaceStatus> = Vec::with_capacity(raw.len());

    for iface in raw {
        match merged.iter_mut().find(|m| m.name == iface.name) {
            Some(existing) => {
                existing.is_up |= iface.is_up;
                if existing.ipv4_address.is_none() {
                    existing.ipv4_address = iface.ipv4.map(|ip| ip.to_string());
                }
            }
            None => merged.push(InterfaceStatus {
                name: iface.name,
                ipv4_address: iface.ipv4.map(|ip| ip.to_string()),
                is_up: iface.is_up,
            }),
        }
    }

    merged
}

fn read_system_interfaces() -> Vec<RawInterface> {
    datalink::interfaces()
        .into_iter()
        .map(|iface| {
            let ipv4 = iface.ips.iter().find_map(|net| match net.ip() {
                IpAddr::V4(v4) => Some(v4),
                IpAddr::V6(_) => None,
            });
            RawInterface {
                is_up: iface.is_up(),
                name: iface.name,
                ipv4,
            }
        })
        .collect()
}

/// Reads interfaces from the OS.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemInterfaces;

#[async_trait]
impl InterfaceCollector for SystemInterfaces {
    async fn collect(&self) -> Result<Vec<InterfaceStatus>, CollectionError> {
        let raw = tokio::task::spawn_blocking(read_system_interfaces)
            .await
            .map_err(|e| CollectionError::Task(e.to_string()))?;

        Ok(merge_interfaces(raw))
    }
}
