use std::collections::HashMap;
use std::net::Ipv4Addr;

use serde::Serialize;

use crate::common::entity::{MacAddr, TransportType};

/// The single active upstream network. Replaced wholesale on change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpstreamInformation {
    pub if_index: u32,
    pub if_name: String,
    /// `None` on rawip interfaces (e.g. most cellular modems).
    pub mac: Option<MacAddr>,
    /// Public IPv4 address used as the NAT source.
    pub ipv4_addr: Option<Ipv4Addr>,
    pub transport: TransportType,
    pub network_id: u64,
}

impl UpstreamInformation {
    pub fn mac_or_null(&self) -> MacAddr {
        self.mac.unwrap_or(MacAddr::NULL)
    }

    /// IPv4 offload needs a public address to match NAT reply tuples against.
    pub fn is_ipv4_eligible(&self) -> bool {
        self.ipv4_addr.is_some()
    }
}

/// Interface index to name lookup, used for logging and stats reporting.
///
/// Entries are never removed for the lifetime of the coordinator; a reused
/// index simply overwrites the older name.
#[derive(Debug, Default)]
pub struct InterfaceNames {
    names: HashMap<u32, String>,
}

impl InterfaceNames {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, if_index: u32, name: &str) {
        if self.names.get(&if_index).is_some_and(|n| n == name) {
            return;
        }
        self.names.insert(if_index, name.to_string());
    }

    pub fn name(&self, if_index: u32) -> Option<&str> {
        self.names.get(&if_index).map(String::as_str)
    }

    /// Name for reporting, falling back to the numeric index.
    pub fn display_name(&self, if_index: u32) -> String {
        self.name(if_index)
            .map_or_else(|| format!("if{if_index}"), ToString::to_string)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upstream(mac: Option<MacAddr>, addr: Option<Ipv4Addr>) -> UpstreamInformation {
        UpstreamInformation {
            if_index: 7,
            if_name: "rmnet0".to_string(),
            mac,
            ipv4_addr: addr,
            transport: TransportType::Cellular,
            network_id: 100,
        }
    }

    #[test]
    fn rawip_upstream_uses_null_mac() {
        assert!(upstream(None, None).mac_or_null().is_null());
        let mac = MacAddr([2, 0, 0, 0, 0, 1]);
        assert_eq!(upstream(Some(mac), None).mac_or_null(), mac);
    }

    #[test]
    fn ipv4_eligibility_requires_address() {
        assert!(!upstream(None, None).is_ipv4_eligible());
        assert!(upstream(None, Some(Ipv4Addr::new(100, 64, 0, 1))).is_ipv4_eligible());
    }

    #[test]
    fn names_overwrite_and_fall_back() {
        let mut names = InterfaceNames::new();
        names.insert(3, "wlan0");
        names.insert(3, "wlan0");
        assert_eq!(names.len(), 1);
        names.insert(3, "wlan1");
        assert_eq!(names.name(3), Some("wlan1"));
        assert_eq!(names.display_name(4), "if4");
    }
}
