use std::net::Ipv6Addr;

use ebpf_common::tether::{
    ETH_P_IPV6, ETHER_MTU, Tether6Value, TetherDownstream6Key, TetherUpstream6Key,
};
use serde::Serialize;

use crate::common::entity::MacAddr;

/// Forwarding rule for one IPv6 neighbor behind a downstream interface.
///
/// The kernel key encodes the upstream, so a rule is never mutated in place:
/// moving it to another upstream means deleting the old key and inserting a
/// rule derived with [`Ipv6ForwardingRule::on_new_upstream`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Ipv6ForwardingRule {
    pub upstream_if_index: u32,
    pub downstream_if_index: u32,
    pub neighbor: Ipv6Addr,
    pub downstream_mac: MacAddr,
    pub neighbor_mac: MacAddr,
}

impl Ipv6ForwardingRule {
    pub fn on_new_upstream(&self, upstream_if_index: u32) -> Self {
        Self {
            upstream_if_index,
            ..*self
        }
    }

    /// Key matching traffic from the upstream toward the neighbor.
    pub fn downstream_key(&self, upstream_mac: MacAddr) -> TetherDownstream6Key {
        TetherDownstream6Key {
            iif: self.upstream_if_index,
            dst_mac: upstream_mac.octets(),
            _pad: [0; 2],
            neigh6: self.neighbor.octets(),
        }
    }

    pub fn downstream_value(&self) -> Tether6Value {
        Tether6Value {
            oif: self.downstream_if_index,
            eth_dst_mac: self.neighbor_mac.octets(),
            eth_src_mac: self.downstream_mac.octets(),
            eth_proto: ETH_P_IPV6,
            pmtu: ETHER_MTU,
        }
    }

    pub fn forwarding(&self, upstream_mac: MacAddr) -> UpstreamForwarding {
        UpstreamForwarding {
            downstream_if_index: self.downstream_if_index,
            downstream_mac: self.downstream_mac,
            upstream_if_index: self.upstream_if_index,
            upstream_mac,
        }
    }
}

/// Default upstream-direction IPv6 rule for a whole downstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpstreamForwarding {
    pub downstream_if_index: u32,
    pub downstream_mac: MacAddr,
    pub upstream_if_index: u32,
    pub upstream_mac: MacAddr,
}

impl UpstreamForwarding {
    pub fn key(&self) -> TetherUpstream6Key {
        TetherUpstream6Key {
            iif: self.downstream_if_index,
            dst_mac: self.downstream_mac.octets(),
            _pad: [0; 2],
        }
    }

    /// The gateway MAC is left null; the offload program resolves the next
    /// hop on ethernet upstreams.
    pub fn value(&self) -> Tether6Value {
        Tether6Value {
            oif: self.upstream_if_index,
            eth_dst_mac: MacAddr::NULL.octets(),
            eth_src_mac: self.upstream_mac.octets(),
            eth_proto: ETH_P_IPV6,
            pmtu: ETHER_MTU,
        }
    }
}
