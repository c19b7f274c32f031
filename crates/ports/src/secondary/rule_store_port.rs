use domain::common::error::DomainError;
use domain::stats::entity::Quota;
use ebpf_common::tether::{
    Tether4Key, Tether4Value, Tether6Value, TetherDownstream6Key, TetherStatsValue,
    TetherUpstream6Key,
};
use serde::Serialize;

/// Which of the offload tables a rule store can reach. Queried once at
/// construction; every table is queried independently.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TableCapabilities {
    pub ipv4_upstream: bool,
    pub ipv4_downstream: bool,
    pub ipv6_upstream: bool,
    pub ipv6_downstream: bool,
    pub dev: bool,
    pub stats: bool,
    pub limit: bool,
}

impl TableCapabilities {
    pub const ALL: Self = Self {
        ipv4_upstream: true,
        ipv4_downstream: true,
        ipv6_upstream: true,
        ipv6_downstream: true,
        dev: true,
        stats: true,
        limit: true,
    };

    /// Stats and limit tables are needed by both rule engines.
    pub fn supports_stats(&self) -> bool {
        self.stats && self.limit
    }

    pub fn supports_ipv4(&self) -> bool {
        self.ipv4_upstream && self.ipv4_downstream && self.dev && self.supports_stats()
    }

    /// The device table is optional for IPv6: it is written when present.
    pub fn supports_ipv6(&self) -> bool {
        self.ipv6_upstream && self.ipv6_downstream && self.supports_stats()
    }

    /// Names of the tables that are absent, for logging.
    pub fn missing(&self) -> Vec<&'static str> {
        [
            ("ipv4_upstream", self.ipv4_upstream),
            ("ipv4_downstream", self.ipv4_downstream),
            ("ipv6_upstream", self.ipv6_upstream),
            ("ipv6_downstream", self.ipv6_downstream),
            ("dev", self.dev),
            ("stats", self.stats),
            ("limit", self.limit),
        ]
        .into_iter()
        .filter_map(|(name, present)| (!present).then_some(name))
        .collect()
    }
}

/// Direction of an IPv4 forwarding table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Ipv4Direction {
    /// Client to internet.
    Upstream,
    /// Internet to client.
    Downstream,
}

impl Ipv4Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Upstream => "upstream",
            Self::Downstream => "downstream",
        }
    }
}

/// Secondary port over the offload forwarding, device, stats and limit
/// tables.
///
/// Two strategies implement it: direct access to pinned BPF maps, and a
/// legacy store delegating each call to a privileged daemon. Calls block
/// and are made from the single dispatch context.
pub trait RuleStorePort: Send {
    fn capabilities(&self) -> TableCapabilities;

    fn ipv4_rule_add(
        &mut self,
        direction: Ipv4Direction,
        key: &Tether4Key,
        value: &Tether4Value,
    ) -> Result<(), DomainError>;

    /// Returns `false` when the key was not present.
    fn ipv4_rule_remove(
        &mut self,
        direction: Ipv4Direction,
        key: &Tether4Key,
    ) -> Result<bool, DomainError>;

    /// All upstream-direction IPv4 entries, including kernel-maintained
    /// `last_used` timestamps.
    fn ipv4_upstream_entries(&self) -> Result<Vec<(Tether4Key, Tether4Value)>, DomainError>;

    fn ipv6_downstream_add(
        &mut self,
        key: &TetherDownstream6Key,
        value: &Tether6Value,
    ) -> Result<(), DomainError>;

    fn ipv6_downstream_remove(&mut self, key: &TetherDownstream6Key) -> Result<bool, DomainError>;

    fn ipv6_upstream_add(
        &mut self,
        key: &TetherUpstream6Key,
        value: &Tether6Value,
    ) -> Result<(), DomainError>;

    fn ipv6_upstream_remove(&mut self, key: &TetherUpstream6Key) -> Result<bool, DomainError>;

    /// Map an interface index to itself in the redirect device table.
    fn dev_add(&mut self, if_index: u32) -> Result<(), DomainError>;

    /// Raw counters of every interface with a stats entry.
    fn stats_snapshot(&self) -> Result<Vec<(u32, TetherStatsValue)>, DomainError>;

    /// Install a limit for an upstream interface, creating a zeroed stats
    /// entry if there is none.
    fn set_limit(&mut self, if_index: u32, quota: Quota) -> Result<(), DomainError>;

    /// Read an interface's final counters, then delete its stats and limit
    /// entries.
    fn get_and_clear_stats(&mut self, if_index: u32) -> Result<TetherStatsValue, DomainError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rule_store_port_is_object_safe() {
        fn _check(port: &dyn RuleStorePort) {
            let _ = port.capabilities();
            let _ = port.stats_snapshot();
        }
    }

    #[test]
    fn all_tables_support_everything() {
        let caps = TableCapabilities::ALL;
        assert!(caps.supports_ipv4());
        assert!(caps.supports_ipv6());
        assert!(caps.missing().is_empty());
    }

    #[test]
    fn missing_dev_disables_ipv4_only() {
        let caps = TableCapabilities {
            dev: false,
            ..TableCapabilities::ALL
        };
        assert!(!caps.supports_ipv4());
        assert!(caps.supports_ipv6());
        assert_eq!(caps.missing(), vec!["dev"]);
    }

    #[test]
    fn missing_limit_disables_both() {
        let caps = TableCapabilities {
            limit: false,
            ..TableCapabilities::ALL
        };
        assert!(!caps.supports_ipv4());
        assert!(!caps.supports_ipv6());
    }
}
