use std::net::Ipv4Addr;

use serde::Serialize;

use crate::common::entity::MacAddr;

/// L2/L3 identity of a tethered client on a downstream interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ClientInfo {
    pub downstream_if_index: u32,
    pub downstream_mac: MacAddr,
    pub client_addr: Ipv4Addr,
    pub client_mac: MacAddr,
}

impl ClientInfo {
    pub fn key(&self) -> ClientKey {
        ClientKey {
            downstream_if_index: self.downstream_if_index,
            client_addr: self.client_addr,
        }
    }
}

/// Identity of a client within the coordinator: (downstream, IPv4 address).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientKey {
    pub downstream_if_index: u32,
    pub client_addr: Ipv4Addr,
}
