use std::net::Ipv4Addr;

use ebpf_common::tether::{ETH_P_IP, ETHER_MTU, Tether4Key, Tether4Value};

use crate::client::entity::ClientInfo;
use crate::common::entity::{L4Protocol, MacAddr};
use crate::conntrack::entity::FlowTuple;
use crate::upstream::entity::UpstreamInformation;

/// The two complementary map entries of one NAT'd flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4RulePair {
    /// Client to internet, matched on the downstream interface.
    pub upstream_key: Tether4Key,
    pub upstream_value: Tether4Value,
    /// Internet to client, matched on the upstream interface.
    pub downstream_key: Tether4Key,
    pub downstream_value: Tether4Value,
}

/// Derive both directions of a flow from its conntrack tuples.
pub fn build_rule_pair(
    protocol: L4Protocol,
    orig: &FlowTuple,
    reply: &FlowTuple,
    client: &ClientInfo,
    upstream: &UpstreamInformation,
) -> Ipv4RulePair {
    let upstream_mac = upstream.mac_or_null();
    let proto = u16::from(protocol.to_u8());

    let upstream_key = upstream_key(protocol, orig, client);
    let upstream_value = Tether4Value {
        oif: upstream.if_index,
        eth_dst_mac: MacAddr::NULL.octets(),
        eth_src_mac: upstream_mac.octets(),
        eth_proto: ETH_P_IP,
        pmtu: ETHER_MTU,
        src46: mapped(reply.dst),
        dst46: mapped(reply.src),
        src_port: reply.dst_port.to_be(),
        dst_port: reply.src_port.to_be(),
        last_used: 0,
    };

    let downstream_key = Tether4Key {
        iif: upstream.if_index,
        dst_mac: upstream_mac.octets(),
        l4_proto: proto,
        src4: reply.src.octets(),
        dst4: reply.dst.octets(),
        src_port: reply.src_port.to_be(),
        dst_port: reply.dst_port.to_be(),
    };
    let downstream_value = Tether4Value {
        oif: client.downstream_if_index,
        eth_dst_mac: client.client_mac.octets(),
        eth_src_mac: client.downstream_mac.octets(),
        eth_proto: ETH_P_IP,
        pmtu: ETHER_MTU,
        src46: mapped(orig.dst),
        dst46: mapped(orig.src),
        src_port: orig.dst_port.to_be(),
        dst_port: orig.src_port.to_be(),
        last_used: 0,
    };

    Ipv4RulePair {
        upstream_key,
        upstream_value,
        downstream_key,
        downstream_value,
    }
}

/// Key of the client-to-internet entry. Depends only on the client side of
/// the flow, so a teardown can rebuild it without the upstream.
pub fn upstream_key(protocol: L4Protocol, orig: &FlowTuple, client: &ClientInfo) -> Tether4Key {
    Tether4Key {
        iif: client.downstream_if_index,
        dst_mac: client.downstream_mac.octets(),
        l4_proto: u16::from(protocol.to_u8()),
        src4: orig.src.octets(),
        dst4: orig.dst.octets(),
        src_port: orig.src_port.to_be(),
        dst_port: orig.dst_port.to_be(),
    }
}

/// Recover the original-direction tuple from an upstream-direction key.
pub fn tuple_from_upstream_key(key: &Tether4Key) -> FlowTuple {
    FlowTuple {
        src: Ipv4Addr::from(key.src4),
        dst: Ipv4Addr::from(key.dst4),
        src_port: u16::from_be(key.src_port),
        dst_port: u16::from_be(key.dst_port),
    }
}

fn mapped(addr: Ipv4Addr) -> [u8; 16] {
    addr.to_ipv6_mapped().octets()
}
