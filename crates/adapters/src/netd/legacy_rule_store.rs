use std::net::Ipv6Addr;

use domain::common::entity::MacAddr;
use domain::common::error::DomainError;
use domain::stats::entity::Quota;
use ebpf_common::tether::{
    Tether4Key, Tether4Value, Tether6Value, TetherDownstream6Key, TetherStatsValue,
    TetherUpstream6Key,
};
use ports::secondary::netd_port::{NetdPort, OffloadRuleParcel};
use ports::secondary::rule_store_port::{Ipv4Direction, RuleStorePort, TableCapabilities};
use tracing::debug;

/// Full-length prefix: every legacy rule targets one neighbor.
const NEIGHBOR_PREFIX_LEN: u8 = 128;

/// Rule store delegating to a privileged daemon through [`NetdPort`].
///
/// Only IPv6 downstream rules and stats/quota exist on this path. The
/// daemon forwards upstream IPv6 on its own, so those calls succeed
/// without effect.
///
/// The agent binary has no daemon to talk to and always wires
/// `OffloadMapManager`. This store is for embedders that supply their own
/// [`NetdPort`] and pass the store to `OffloadCoordinator` in its place.
pub struct NetdRuleStore<P: NetdPort> {
    netd: P,
}

impl<P: NetdPort> NetdRuleStore<P> {
    pub fn new(netd: P) -> Self {
        Self { netd }
    }

    pub fn into_inner(self) -> P {
        self.netd
    }
}

/// Convert a downstream map entry to the daemon's rule parcel.
pub fn to_parcel(key: &TetherDownstream6Key, value: &Tether6Value) -> OffloadRuleParcel {
    OffloadRuleParcel {
        input_if_index: key.iif,
        output_if_index: value.oif,
        destination: Ipv6Addr::from(key.neigh6),
        prefix_length: NEIGHBOR_PREFIX_LEN,
        src_l2: MacAddr(value.eth_src_mac),
        dst_l2: MacAddr(value.eth_dst_mac),
        pmtu: value.pmtu,
    }
}

fn removal_parcel(key: &TetherDownstream6Key) -> OffloadRuleParcel {
    // The daemon matches removals on input interface and destination only.
    OffloadRuleParcel {
        input_if_index: key.iif,
        output_if_index: 0,
        destination: Ipv6Addr::from(key.neigh6),
        prefix_length: NEIGHBOR_PREFIX_LEN,
        src_l2: MacAddr::NULL,
        dst_l2: MacAddr::NULL,
        pmtu: 0,
    }
}

impl<P: NetdPort> RuleStorePort for NetdRuleStore<P> {
    fn capabilities(&self) -> TableCapabilities {
        TableCapabilities {
            ipv6_upstream: true,
            ipv6_downstream: true,
            stats: true,
            limit: true,
            ..TableCapabilities::default()
        }
    }

    fn ipv4_rule_add(
        &mut self,
        _direction: Ipv4Direction,
        _key: &Tether4Key,
        _value: &Tether4Value,
    ) -> Result<(), DomainError> {
        Err(DomainError::TableUnavailable("ipv4 rules"))
    }

    fn ipv4_rule_remove(
        &mut self,
        _direction: Ipv4Direction,
        _key: &Tether4Key,
    ) -> Result<bool, DomainError> {
        Err(DomainError::TableUnavailable("ipv4 rules"))
    }

    fn ipv4_upstream_entries(&self) -> Result<Vec<(Tether4Key, Tether4Value)>, DomainError> {
        Err(DomainError::TableUnavailable("ipv4 rules"))
    }

    fn ipv6_downstream_add(
        &mut self,
        key: &TetherDownstream6Key,
        value: &Tether6Value,
    ) -> Result<(), DomainError> {
        self.netd.offload_rule_add(&to_parcel(key, value))
    }

    fn ipv6_downstream_remove(&mut self, key: &TetherDownstream6Key) -> Result<bool, DomainError> {
        self.netd.offload_rule_remove(&removal_parcel(key))?;
        Ok(true)
    }

    fn ipv6_upstream_add(
        &mut self,
        key: &TetherUpstream6Key,
        _value: &Tether6Value,
    ) -> Result<(), DomainError> {
        debug!(downstream = key.iif, "upstream ipv6 forwarding handled by netd");
        Ok(())
    }

    fn ipv6_upstream_remove(&mut self, _key: &TetherUpstream6Key) -> Result<bool, DomainError> {
        Ok(true)
    }

    fn dev_add(&mut self, _if_index: u32) -> Result<(), DomainError> {
        Err(DomainError::TableUnavailable("dev map"))
    }

    fn stats_snapshot(&self) -> Result<Vec<(u32, TetherStatsValue)>, DomainError> {
        self.netd.offload_get_stats()
    }

    fn set_limit(&mut self, if_index: u32, quota: Quota) -> Result<(), DomainError> {
        self.netd
            .offload_set_interface_quota(if_index, quota.to_raw())
    }

    fn get_and_clear_stats(&mut self, if_index: u32) -> Result<TetherStatsValue, DomainError> {
        self.netd.offload_get_and_clear_stats(if_index)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    #[derive(Default)]
    struct FakeNetd {
        rules: Vec<OffloadRuleParcel>,
        removed: Vec<OffloadRuleParcel>,
        quotas: BTreeMap<u32, i64>,
        stats: BTreeMap<u32, TetherStatsValue>,
    }

    impl NetdPort for FakeNetd {
        fn offload_rule_add(&mut self, rule: &OffloadRuleParcel) -> Result<(), DomainError> {
            self.rules.push(*rule);
            Ok(())
        }

        fn offload_rule_remove(&mut self, rule: &OffloadRuleParcel) -> Result<(), DomainError> {
            self.removed.push(*rule);
            Ok(())
        }

        fn offload_get_stats(&self) -> Result<Vec<(u32, TetherStatsValue)>, DomainError> {
            Ok(self.stats.iter().map(|(k, v)| (*k, *v)).collect())
        }

        fn offload_set_interface_quota(
            &mut self,
            if_index: u32,
            quota_bytes: i64,
        ) -> Result<(), DomainError> {
            self.quotas.insert(if_index, quota_bytes);
            Ok(())
        }

        fn offload_get_and_clear_stats(
            &mut self,
            if_index: u32,
        ) -> Result<TetherStatsValue, DomainError> {
            self.quotas.remove(&if_index);
            self.stats
                .remove(&if_index)
                .ok_or_else(|| DomainError::NotFound(format!("ifindex {if_index}")))
        }
    }

    fn key() -> TetherDownstream6Key {
        TetherDownstream6Key {
            iif: 7,
            dst_mac: [2, 0, 0, 0, 0, 7],
            _pad: [0; 2],
            neigh6: Ipv6Addr::new(0x2001, 0xdb8, 0, 0, 0, 0, 0, 1).octets(),
        }
    }

    fn value() -> Tether6Value {
        Tether6Value {
            oif: 20,
            eth_dst_mac: [6, 0, 0, 0, 0, 1],
            eth_src_mac: [2, 0, 0, 0, 0, 20],
            eth_proto: ebpf_common::tether::ETH_P_IPV6,
            pmtu: 1500,
        }
    }

    #[test]
    fn only_ipv6_and_stats_tables_are_reported() {
        let store = NetdRuleStore::new(FakeNetd::default());
        let caps = store.capabilities();
        assert!(caps.supports_ipv6());
        assert!(!caps.supports_ipv4());
        assert_eq!(caps.missing(), vec!["ipv4_upstream", "ipv4_downstream", "dev"]);
    }

    #[test]
    fn downstream_rule_becomes_full_length_parcel() {
        let mut store = NetdRuleStore::new(FakeNetd::default());
        store.ipv6_downstream_add(&key(), &value()).unwrap();
        let netd = store.into_inner();
        assert_eq!(
            netd.rules,
            vec![OffloadRuleParcel {
                input_if_index: 7,
                output_if_index: 20,
                destination: Ipv6Addr::new(0x2001, 0xdb8, 0, 0, 0, 0, 0, 1),
                prefix_length: 128,
                src_l2: MacAddr([2, 0, 0, 0, 0, 20]),
                dst_l2: MacAddr([6, 0, 0, 0, 0, 1]),
                pmtu: 1500,
            }]
        );
    }

    #[test]
    fn removal_matches_on_interface_and_destination() {
        let mut store = NetdRuleStore::new(FakeNetd::default());
        assert!(store.ipv6_downstream_remove(&key()).unwrap());
        let removed = store.into_inner().removed;
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].input_if_index, 7);
        assert_eq!(removed[0].prefix_length, 128);
    }

    #[test]
    fn upstream_forwarding_calls_are_accepted_silently() {
        let mut store = NetdRuleStore::new(FakeNetd::default());
        let up_key = TetherUpstream6Key {
            iif: 20,
            dst_mac: [2, 0, 0, 0, 0, 20],
            _pad: [0; 2],
        };
        store.ipv6_upstream_add(&up_key, &value()).unwrap();
        assert!(store.ipv6_upstream_remove(&up_key).unwrap());
        assert!(store.into_inner().rules.is_empty());
    }

    #[test]
    fn ipv4_and_dev_calls_are_unavailable() {
        let mut store = NetdRuleStore::new(FakeNetd::default());
        let key4 = Tether4Key {
            iif: 20,
            dst_mac: [0; 6],
            l4_proto: 6,
            src4: [192, 168, 43, 2],
            dst4: [1, 1, 1, 1],
            src_port: 0,
            dst_port: 0,
        };
        assert!(matches!(
            store.ipv4_rule_remove(Ipv4Direction::Upstream, &key4),
            Err(DomainError::TableUnavailable(_))
        ));
        assert!(matches!(
            store.dev_add(7),
            Err(DomainError::TableUnavailable(_))
        ));
    }

    #[test]
    fn quota_is_passed_as_raw_value() {
        let mut store = NetdRuleStore::new(FakeNetd::default());
        store.set_limit(7, Quota::Unlimited).unwrap();
        store.set_limit(8, Quota::Bytes(5_000)).unwrap();
        let netd = store.into_inner();
        assert_eq!(netd.quotas.get(&7), Some(&-1));
        assert_eq!(netd.quotas.get(&8), Some(&5_000));
    }

    #[test]
    fn stats_are_read_and_cleared_through_netd() {
        let mut netd = FakeNetd::default();
        netd.stats.insert(
            7,
            TetherStatsValue {
                rx_bytes: 42,
                ..TetherStatsValue::default()
            },
        );
        let mut store = NetdRuleStore::new(netd);
        assert_eq!(store.stats_snapshot().unwrap().len(), 1);
        assert_eq!(store.get_and_clear_stats(7).unwrap().rx_bytes, 42);
        assert!(store.stats_snapshot().unwrap().is_empty());
    }

    #[test]
    fn coordinator_runs_ipv6_only_over_netd() {
        use std::sync::Arc;
        use std::time::Duration;

        use application::forwarding_context::EngineMode;
        use application::offload_coordinator::{
            CoordinatorDeps, CoordinatorSettings, OffloadCoordinator,
        };
        use domain::common::entity::TransportType;
        use domain::ipv4::policy::OffloadPolicy;
        use domain::ipv6::entity::Ipv6ForwardingRule;
        use domain::upstream::entity::UpstreamInformation;
        use ports::test_utils::{
            ManualClock, NoopMetrics, RecordingConntrackRefresher, RecordingStatsReporter,
        };

        let mut coordinator = OffloadCoordinator::new(
            CoordinatorDeps {
                store: Box::new(NetdRuleStore::new(FakeNetd::default())),
                reporter: Box::new(RecordingStatsReporter::new()),
                refresher: Box::new(RecordingConntrackRefresher::new()),
                clock: Arc::new(ManualClock::new(Duration::from_secs(1_000))),
                metrics: Arc::new(NoopMetrics),
            },
            CoordinatorSettings {
                poll_interval: Duration::from_secs(5),
                policy: OffloadPolicy::default(),
            },
        );
        coordinator.set_upstream(Some(UpstreamInformation {
            if_index: 7,
            if_name: "rmnet0".to_string(),
            mac: Some(MacAddr([2, 0, 0, 0, 0, 7])),
            ipv4_addr: None,
            transport: TransportType::Cellular,
            network_id: 100,
        }));

        let rule = Ipv6ForwardingRule {
            upstream_if_index: 7,
            downstream_if_index: 20,
            neighbor: Ipv6Addr::new(0x2001, 0xdb8, 0, 0, 0, 0, 0, 1),
            downstream_mac: MacAddr([2, 0, 0, 0, 0, 20]),
            neighbor_mac: MacAddr([6, 0, 0, 0, 0, 1]),
        };
        assert!(coordinator.add_ipv6_rule(rule));

        let snapshot = coordinator.dump();
        assert_eq!(snapshot.ipv4_mode, EngineMode::Disabled);
        assert_eq!(snapshot.ipv6_mode, EngineMode::Offloading);
        assert_eq!(snapshot.ipv6_rules.get(&20).map(Vec::len), Some(1));
        assert_eq!(snapshot.active_upstreams, vec![7]);

        assert!(coordinator.remove_ipv6_rule(&rule));
        let snapshot = coordinator.dump();
        assert!(snapshot.ipv6_rules.is_empty());
        assert!(snapshot.active_upstreams.is_empty());
    }
}
