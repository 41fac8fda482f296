//! Convenience wrappers around common actions.

use futures::stream::{self, StreamExt, TryStreamExt};
use serde::Serialize;
use std::net::Ipv4Addr;

use crate::client::Tr064Client;
use crate::error::{Result, Tr064Error};
use crate::service::ActionResult;

pub const HOSTS: &str = "urn:LanDeviceHosts-com:serviceId:Hosts1";
pub const WAN_IP_CONNECTION: &str = "urn:upnp-org:serviceId:WANIPConn1";

/// Host table lookups in flight at once
const HOST_QUERY_CONCURRENCY: usize = 20;

/// One entry of the gateway's host table
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HostInfo {
    pub mac: String,
    pub ip: Option<String>,
    pub active: bool,
    pub name: Option<String>,
    pub interface: Option<String>,
}

impl HostInfo {
    fn from_outputs(mac: String, outputs: &ActionResult) -> Self {
        let field = |name: &str| outputs.get(name).filter(|v| !v.is_empty()).cloned();
        Self {
            mac,
            ip: field("NewIPAddress"),
            active: outputs.get("NewActive").map(String::as_str) == Some("1"),
            name: field("NewHostName"),
            interface: field("NewInterfaceType"),
        }
    }
}

impl Tr064Client {
    /// Public IPv4 address of the WAN connection
    pub async fn external_ipv4(&self) -> Result<Ipv4Addr> {
        let outputs = self
            .exec(WAN_IP_CONNECTION, "GetExternalIPAddress", &[])
            .await?;
        let value = outputs.get("NewExternalIPAddress").ok_or_else(|| {
            Tr064Error::Parse("GetExternalIPAddress returned no NewExternalIPAddress".to_string())
        })?;
        value
            .parse()
            .map_err(|_| Tr064Error::Parse(format!("Invalid IPv4 address '{}'", value)))
    }

    /// Look up hosts by MAC address, in the order given
    pub async fn host_infos<S: AsRef<str>>(&self, macs: &[S]) -> Result<Vec<HostInfo>> {
        let hosts = self.service(HOSTS).await?;
        stream::iter(macs.iter().map(|mac| mac.as_ref().to_string()))
            .map(|mac| {
                let hosts = hosts.clone();
                async move {
                    let outputs = hosts
                        .exec_action("GetSpecificHostEntry", &[("NewMACAddress", mac.as_str())])
                        .await?;
                    Ok::<_, Tr064Error>(HostInfo::from_outputs(mac, &outputs))
                }
            })
            .buffered(HOST_QUERY_CONCURRENCY)
            .try_collect()
            .await
    }

    /// Every entry of the host table, in index order
    pub async fn all_hosts(&self) -> Result<Vec<HostInfo>> {
        let hosts = self.service(HOSTS).await?;
        let count = hosts.exec_action("GetHostNumberOfEntries", &[]).await?;
        let count: u32 = count
            .get("NewHostNumberOfEntries")
            .and_then(|n| n.parse().ok())
            .ok_or_else(|| Tr064Error::Parse("Invalid NewHostNumberOfEntries".to_string()))?;

        stream::iter(0..count)
            .map(|index| {
                let hosts = hosts.clone();
                async move {
                    let index = index.to_string();
                    let outputs = hosts
                        .exec_action("GetGenericHostEntry", &[("NewIndex", index.as_str())])
                        .await?;
                    let mac = outputs.get("NewMACAddress").cloned().unwrap_or_default();
                    Ok::<_, Tr064Error>(HostInfo::from_outputs(mac, &outputs))
                }
            })
            .buffered(HOST_QUERY_CONCURRENCY)
            .try_collect()
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_info_from_outputs() {
        let outputs: ActionResult = [
            ("NewIPAddress", "192.168.178.23"),
            ("NewActive", "1"),
            ("NewHostName", "laptop"),
            ("NewInterfaceType", ""),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        let host = HostInfo::from_outputs("AA:BB:CC:DD:EE:FF".to_string(), &outputs);
        assert_eq!(host.ip.as_deref(), Some("192.168.178.23"));
        assert!(host.active);
        assert_eq!(host.name.as_deref(), Some("laptop"));
        assert_eq!(host.interface, None);
    }

    #[test]
    fn test_inactive_host() {
        let outputs: ActionResult = [("NewActive".to_string(), "0".to_string())].into_iter().collect();
        let host = HostInfo::from_outputs("00:11:22:33:44:55".to_string(), &outputs);
        assert!(!host.active);
        assert_eq!(host.ip, None);
    }
}
