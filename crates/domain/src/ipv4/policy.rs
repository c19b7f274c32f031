use std::collections::HashSet;

use crate::common::entity::L4Protocol;
use crate::conntrack::entity::FlowTuple;

/// FTP control and PPTP need ALG rewriting by the host stack.
pub const DEFAULT_NON_OFFLOADED_TCP_PORTS: [u16; 2] = [21, 1723];

/// Decides which conntrack flows may be offloaded.
#[derive(Debug, Clone)]
pub struct OffloadPolicy {
    non_offloaded_tcp_ports: HashSet<u16>,
}

impl Default for OffloadPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_NON_OFFLOADED_TCP_PORTS)
    }
}

impl OffloadPolicy {
    pub fn new(ports: impl IntoIterator<Item = u16>) -> Self {
        Self {
            non_offloaded_tcp_ports: ports.into_iter().collect(),
        }
    }

    /// TCP and UDP only. The port blocklist applies to TCP destinations.
    pub fn is_offloadable(&self, protocol: L4Protocol, orig: &FlowTuple) -> bool {
        match protocol {
            L4Protocol::Tcp => !self.non_offloaded_tcp_ports.contains(&orig.dst_port),
            L4Protocol::Udp => true,
            L4Protocol::Other(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn tuple(dst_port: u16) -> FlowTuple {
        FlowTuple {
            src: Ipv4Addr::new(192, 168, 43, 2),
            dst: Ipv4Addr::new(1, 1, 1, 1),
            src_port: 40000,
            dst_port,
        }
    }

    #[test]
    fn blocklist_is_tcp_only() {
        let policy = OffloadPolicy::default();
        assert!(!policy.is_offloadable(L4Protocol::Tcp, &tuple(21)));
        assert!(!policy.is_offloadable(L4Protocol::Tcp, &tuple(1723)));
        assert!(policy.is_offloadable(L4Protocol::Udp, &tuple(21)));
        assert!(policy.is_offloadable(L4Protocol::Tcp, &tuple(443)));
    }

    #[test]
    fn other_protocols_are_never_offloaded() {
        let policy = OffloadPolicy::default();
        assert!(!policy.is_offloadable(L4Protocol::Other(47), &tuple(443)));
    }

    #[test]
    fn custom_ports() {
        let policy = OffloadPolicy::new([8080]);
        assert!(policy.is_offloadable(L4Protocol::Tcp, &tuple(21)));
        assert!(!policy.is_offloadable(L4Protocol::Tcp, &tuple(8080)));
    }
}
