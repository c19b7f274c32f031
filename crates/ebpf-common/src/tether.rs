//! Tethering offload shared types for kernel (eBPF) and userspace.
//!
//! Used by: the tc offload programs attached to upstream/downstream
//! interfaces, and the userspace coordinator that populates their maps.
//! All multi-byte address and port fields are stored in network byte order.

// ── Pinned map names ────────────────────────────────────────────────

pub const MAP_DOWNSTREAM4: &str = "map_offload_tether_downstream4_map";
pub const MAP_UPSTREAM4: &str = "map_offload_tether_upstream4_map";
pub const MAP_DOWNSTREAM6: &str = "map_offload_tether_downstream6_map";
pub const MAP_UPSTREAM6: &str = "map_offload_tether_upstream6_map";
pub const MAP_STATS: &str = "map_offload_tether_stats_map";
pub const MAP_LIMIT: &str = "map_offload_tether_limit_map";
pub const MAP_DEV: &str = "map_offload_tether_dev_map";

// ── Protocol constants ──────────────────────────────────────────────

pub const ETH_P_IP: u16 = 0x0800;
pub const ETH_P_IPV6: u16 = 0x86DD;

/// Default path MTU written into forwarding values.
pub const ETHER_MTU: u16 = 1500;

pub const IPPROTO_TCP: u8 = 6;
pub const IPPROTO_UDP: u8 = 17;

pub const NULL_MAC: [u8; 6] = [0; 6];

// ── Quota sentinels ─────────────────────────────────────────────────

/// Caller-facing quota value meaning "no limit".
pub const QUOTA_UNLIMITED: i64 = -1;

/// Limit map value meaning "no limit".
pub const LIMIT_UNLIMITED: u64 = u64::MAX;

/// Limit map value type, keyed by upstream interface index. Holds the
/// running rx+tx byte total at which the kernel stops offloading.
pub type TetherLimitValue = u64;

// ── IPv4 key, 24 bytes ─────────────────────────────────────────────

/// Key of both IPv4 forwarding maps (upstream and downstream direction).
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Tether4Key {
    /// Ingress interface index.
    pub iif: u32,
    /// Destination MAC the packet must carry on ingress.
    pub dst_mac: [u8; 6],
    /// IP protocol, widened to keep the layout packed.
    pub l4_proto: u16,
    pub src4: [u8; 4],
    pub dst4: [u8; 4],
    pub src_port: u16,
    pub dst_port: u16,
}

// ── IPv4 value, 64 bytes ───────────────────────────────────────────

/// Rewrite applied to a matching IPv4 packet before redirecting it.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tether4Value {
    /// Egress interface index.
    pub oif: u32,
    pub eth_dst_mac: [u8; 6],
    pub eth_src_mac: [u8; 6],
    pub eth_proto: u16,
    pub pmtu: u16,
    /// Rewritten source address as an IPv4-mapped IPv6 address.
    pub src46: [u8; 16],
    /// Rewritten destination address as an IPv4-mapped IPv6 address.
    pub dst46: [u8; 16],
    pub src_port: u16,
    pub dst_port: u16,
    /// CLOCK_BOOTTIME nanoseconds of the last packet, updated by the kernel.
    pub last_used: u64,
}

// ── IPv6 downstream key, 28 bytes ──────────────────────────────────

/// Key of the IPv6 downstream map: traffic arriving on the upstream
/// interface for a tethered neighbor.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TetherDownstream6Key {
    /// Upstream interface index.
    pub iif: u32,
    /// Upstream interface MAC, or [`NULL_MAC`] on rawip upstreams.
    pub dst_mac: [u8; 6],
    pub _pad: [u8; 2],
    pub neigh6: [u8; 16],
}

// ── IPv6 upstream key, 12 bytes ────────────────────────────────────

/// Key of the IPv6 upstream map: all traffic from one downstream.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TetherUpstream6Key {
    /// Downstream interface index.
    pub iif: u32,
    /// Downstream interface MAC.
    pub dst_mac: [u8; 6],
    pub _pad: [u8; 2],
}

// ── IPv6 value, 20 bytes ───────────────────────────────────────────

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tether6Value {
    pub oif: u32,
    pub eth_dst_mac: [u8; 6],
    pub eth_src_mac: [u8; 6],
    pub eth_proto: u16,
    pub pmtu: u16,
}

// ── Stats value, 48 bytes ──────────────────────────────────────────

/// Per-upstream-interface counters maintained by the offload programs.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TetherStatsValue {
    pub rx_packets: u64,
    pub rx_bytes: u64,
    pub rx_errors: u64,
    pub tx_packets: u64,
    pub tx_bytes: u64,
    pub tx_errors: u64,
}

impl TetherStatsValue {
    /// Total bytes forwarded in both directions.
    pub const fn total_bytes(&self) -> u64 {
        self.rx_bytes.saturating_add(self.tx_bytes)
    }
}

// ── Pod impls ────────────────────────────────────────────────────────

#[cfg(feature = "userspace")]
unsafe impl aya::Pod for Tether4Key {}
#[cfg(feature = "userspace")]
unsafe impl aya::Pod for Tether4Value {}
#[cfg(feature = "userspace")]
unsafe impl aya::Pod for TetherDownstream6Key {}
#[cfg(feature = "userspace")]
unsafe impl aya::Pod for TetherUpstream6Key {}
#[cfg(feature = "userspace")]
unsafe impl aya::Pod for Tether6Value {}
#[cfg(feature = "userspace")]
unsafe impl aya::Pod for TetherStatsValue {}

// ── Tests ────────────────────────────────────────────────────────────
