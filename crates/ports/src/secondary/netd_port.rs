use std::net::Ipv6Addr;

use domain::common::entity::MacAddr;
use domain::common::error::DomainError;
use ebpf_common::tether::TetherStatsValue;

/// IPv6 downstream rule as understood by the legacy offload daemon API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OffloadRuleParcel {
    pub input_if_index: u32,
    pub output_if_index: u32,
    pub destination: Ipv6Addr,
    pub prefix_length: u8,
    pub src_l2: MacAddr,
    pub dst_l2: MacAddr,
    pub pmtu: u16,
}

/// Secondary port for kernels where the offload maps are owned by a
/// privileged network daemon and only reachable through per-call RPCs.
///
/// The daemon exposes IPv6 downstream rules and per-interface stats/quota;
/// it has no IPv4, upstream IPv6 or device tables.
pub trait NetdPort: Send {
    fn offload_rule_add(&mut self, rule: &OffloadRuleParcel) -> Result<(), DomainError>;

    fn offload_rule_remove(&mut self, rule: &OffloadRuleParcel) -> Result<(), DomainError>;

    fn offload_get_stats(&self) -> Result<Vec<(u32, TetherStatsValue)>, DomainError>;

    /// `quota_bytes` is `-1` for unlimited.
    fn offload_set_interface_quota(
        &mut self,
        if_index: u32,
        quota_bytes: i64,
    ) -> Result<(), DomainError>;

    fn offload_get_and_clear_stats(&mut self, if_index: u32)
    -> Result<TetherStatsValue, DomainError>;
}
