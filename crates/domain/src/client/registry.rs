use std::collections::BTreeMap;
use std::net::Ipv4Addr;

use super::entity::ClientInfo;

/// Result of removing a single client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientRemoval {
    pub removed: Option<ClientInfo>,
    /// The downstream has no clients left and was forgotten.
    pub downstream_emptied: bool,
}

/// Per-downstream map of tethered clients, keyed by client IPv4 address.
///
/// Pure bookkeeping: the registry never touches the rule store. Callers
/// hand removed clients to the IPv4 engine for rule teardown.
#[derive(Debug, Default)]
pub struct ClientRegistry {
    by_downstream: BTreeMap<u32, BTreeMap<Ipv4Addr, ClientInfo>>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite a client. Returns the previous entry for that key.
    pub fn add_client(&mut self, downstream: u32, info: ClientInfo) -> Option<ClientInfo> {
        self.by_downstream
            .entry(downstream)
            .or_default()
            .insert(info.client_addr, info)
    }

    pub fn remove_client(&mut self, downstream: u32, info: &ClientInfo) -> ClientRemoval {
        let Some(clients) = self.by_downstream.get_mut(&downstream) else {
            return ClientRemoval {
                removed: None,
                downstream_emptied: false,
            };
        };
        let removed = clients.remove(&info.client_addr);
        let downstream_emptied = clients.is_empty();
        if downstream_emptied {
            self.by_downstream.remove(&downstream);
        }
        ClientRemoval {
            removed,
            downstream_emptied,
        }
    }

    /// Forget every client of a downstream, returning them in address order.
    pub fn clear_clients(&mut self, downstream: u32) -> Vec<ClientInfo> {
        self.by_downstream
            .remove(&downstream)
            .map(|clients| clients.into_values().collect())
            .unwrap_or_default()
    }

    /// Find the client owning a private IPv4 address on any downstream.
    /// When several downstreams hold the address the lowest interface index
    /// wins.
    pub fn lookup(&self, addr: Ipv4Addr) -> Option<&ClientInfo> {
        self.by_downstream
            .values()
            .find_map(|clients| clients.get(&addr))
    }

    pub fn clients(&self, downstream: u32) -> impl Iterator<Item = &ClientInfo> {
        self.by_downstream
            .get(&downstream)
            .into_iter()
            .flat_map(BTreeMap::values)
    }

    pub fn downstream_count(&self) -> usize {
        self.by_downstream.len()
    }

    pub fn client_count(&self) -> usize {
        self.by_downstream.values().map(BTreeMap::len).sum()
    }

    /// All clients, ordered by downstream then address.
    pub fn all_clients(&self) -> Vec<ClientInfo> {
        self.by_downstream
            .values()
            .flat_map(|clients| clients.values().copied())
            .collect()
    }
}
