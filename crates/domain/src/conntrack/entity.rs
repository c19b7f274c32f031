use std::net::Ipv4Addr;
use std::time::Duration;

use serde::Serialize;

use crate::common::entity::L4Protocol;

// ── Conntrack status bits (linux/netfilter/nf_conntrack_common.h) ───

pub const IPS_SEEN_REPLY: u32 = 1 << 1;
pub const IPS_ASSURED: u32 = 1 << 2;
pub const IPS_CONFIRMED: u32 = 1 << 3;
pub const IPS_SRC_NAT: u32 = 1 << 4;
pub const IPS_SRC_NAT_DONE: u32 = 1 << 7;
pub const IPS_DYING: u32 = 1 << 9;

/// Status bits every offloadable, established NAT session carries.
pub const ESTABLISHED_MASK: u32 = IPS_CONFIRMED | IPS_ASSURED | IPS_SEEN_REPLY | IPS_SRC_NAT_DONE;

// ── Timeouts ────────────────────────────────────────────────────────

/// Kernel default `nf_conntrack_tcp_timeout_established`.
pub const TCP_ESTABLISHED_TIMEOUT_SECS: u32 = 432_000;

/// Kernel default `nf_conntrack_udp_timeout_stream`.
pub const UDP_STREAM_TIMEOUT_SECS: u32 = 180;

/// A flow whose offloaded packets were seen within this window gets its
/// kernel conntrack timeout refreshed on the next poll.
///
/// Offloaded packets skip the host stack, so the kernel never sees them
/// and would expire a busy flow mid-transfer. Flows idle longer than this
/// are left alone and age out on the normal timeout.
pub const CONNTRACK_TIMEOUT_UPDATE_INTERVAL: Duration = Duration::from_secs(60);

/// Netlink message class of a conntrack event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConntrackMsgType {
    /// Creation or update of an entry.
    New,
    Delete,
}

/// One direction of a tracked flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct FlowTuple {
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
    pub src_port: u16,
    pub dst_port: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ConntrackEvent {
    pub msg_type: ConntrackMsgType,
    pub protocol: L4Protocol,
    /// Client-to-internet tuple as seen before NAT.
    pub tuple_orig: FlowTuple,
    /// Internet-to-client tuple; its destination is the NAT public address.
    pub tuple_reply: FlowTuple,
    pub status: u32,
    pub timeout_secs: u32,
}

/// What a conntrack event means for the offload rules of its flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowTransition {
    Establish,
    Teardown,
    Ignore,
}

impl ConntrackEvent {
    pub fn transition(&self) -> FlowTransition {
        if self.msg_type == ConntrackMsgType::Delete || self.status & IPS_DYING != 0 {
            return FlowTransition::Teardown;
        }
        if self.status & ESTABLISHED_MASK == ESTABLISHED_MASK {
            FlowTransition::Establish
        } else {
            FlowTransition::Ignore
        }
    }
}

/// Request to push a flow's kernel conntrack timeout forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutRefresh {
    pub protocol: L4Protocol,
    /// Original-direction tuple identifying the conntrack entry.
    pub tuple: FlowTuple,
    pub timeout_secs: u32,
}

impl TimeoutRefresh {
    /// Build a refresh for an offloadable protocol; other protocols have no
    /// offload rules and never need one.
    pub fn for_flow(protocol: L4Protocol, tuple: FlowTuple) -> Option<Self> {
        let timeout_secs = match protocol {
            L4Protocol::Tcp => TCP_ESTABLISHED_TIMEOUT_SECS,
            L4Protocol::Udp => UDP_STREAM_TIMEOUT_SECS,
            L4Protocol::Other(_) => return None,
        };
        Some(Self {
            protocol,
            tuple,
            timeout_secs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tuple() -> FlowTuple {
        FlowTuple {
            src: Ipv4Addr::new(192, 168, 43, 2),
            dst: Ipv4Addr::new(140, 112, 8, 116),
            src_port: 62449,
            dst_port: 443,
        }
    }

    fn event(msg_type: ConntrackMsgType, status: u32) -> ConntrackEvent {
        ConntrackEvent {
            msg_type,
            protocol: L4Protocol::Tcp,
            tuple_orig: tuple(),
            tuple_reply: tuple(),
            status,
            timeout_secs: 432_000,
        }
    }

    #[test]
    fn established_new_event() {
        let e = event(ConntrackMsgType::New, ESTABLISHED_MASK);
        assert_eq!(e.transition(), FlowTransition::Establish);
    }

    #[test]
    fn unreplied_new_event_is_ignored() {
        let e = event(ConntrackMsgType::New, IPS_CONFIRMED | IPS_SRC_NAT_DONE);
        assert_eq!(e.transition(), FlowTransition::Ignore);
    }

    #[test]
    fn delete_and_dying_tear_down() {
        assert_eq!(
            event(ConntrackMsgType::Delete, 0).transition(),
            FlowTransition::Teardown
        );
        assert_eq!(
            event(ConntrackMsgType::New, ESTABLISHED_MASK | IPS_DYING).transition(),
            FlowTransition::Teardown
        );
    }

    #[test]
    fn refresh_timeouts_by_protocol() {
        let tcp = TimeoutRefresh::for_flow(L4Protocol::Tcp, tuple()).unwrap();
        assert_eq!(tcp.timeout_secs, TCP_ESTABLISHED_TIMEOUT_SECS);
        let udp = TimeoutRefresh::for_flow(L4Protocol::Udp, tuple()).unwrap();
        assert_eq!(udp.timeout_secs, UDP_STREAM_TIMEOUT_SECS);
        assert!(TimeoutRefresh::for_flow(L4Protocol::Other(1), tuple()).is_none());
    }
}
