use std::collections::{BTreeMap, HashMap};
use std::net::Ipv6Addr;

use domain::common::entity::MacAddr;
use domain::ipv6::entity::{Ipv6ForwardingRule, UpstreamForwarding};
use tracing::{debug, info, warn};

use crate::forwarding_context::{EngineMode, ForwardingContext};

const FAMILY: &str = "ipv6";

#[derive(Debug, Clone, Copy)]
struct Ipv6Entry {
    rule: Ipv6ForwardingRule,
    /// Upstream MAC the rule's key was derived with, needed to delete it.
    upstream_mac: MacAddr,
}

/// IPv6 forwarding rules, one per active neighbor, grouped by downstream.
///
/// Each downstream keeps its rules in insertion order so that moving them
/// to a new upstream re-adds them in the same order.
///
/// The upstream-direction entry is keyed by the downstream alone, so there
/// is one per downstream: written when the downstream gets its first rule,
/// deleted after its last one, and re-pointed when rules on another
/// upstream need it.
#[derive(Debug)]
pub struct Ipv6RuleEngine {
    mode: EngineMode,
    rules: HashMap<u32, Vec<Ipv6Entry>>,
    forwarding: HashMap<u32, UpstreamForwarding>,
}

impl Ipv6RuleEngine {
    pub fn new(mode: EngineMode) -> Self {
        Self {
            mode,
            rules: HashMap::new(),
            forwarding: HashMap::new(),
        }
    }

    pub fn mode(&self) -> EngineMode {
        self.mode
    }

    /// Add a rule. A rule for a neighbor that already has one is ignored;
    /// use [`Self::update_rules`] to change rules.
    pub fn add_rule(
        &mut self,
        ctx: &mut ForwardingContext,
        rule: Ipv6ForwardingRule,
        upstream_mac: MacAddr,
    ) -> bool {
        let existing = self.rules.get(&rule.downstream_if_index);
        if existing.is_some_and(|rules| rules.iter().any(|e| e.rule.neighbor == rule.neighbor)) {
            debug!(
                downstream = rule.downstream_if_index,
                neighbor = %rule.neighbor,
                "IPv6 rule already present"
            );
            return false;
        }

        let entry = Ipv6Entry { rule, upstream_mac };
        if !self.install(ctx, &entry) {
            return false;
        }
        self.rules
            .entry(rule.downstream_if_index)
            .or_default()
            .push(entry);
        self.publish_count(ctx);
        true
    }

    /// Remove the rule for `neighbor` on a downstream.
    pub fn remove_rule(
        &mut self,
        ctx: &mut ForwardingContext,
        downstream: u32,
        neighbor: Ipv6Addr,
    ) -> bool {
        let Some(rules) = self.rules.get_mut(&downstream) else {
            return false;
        };
        let Some(pos) = rules.iter().position(|e| e.rule.neighbor == neighbor) else {
            return false;
        };
        let entry = rules.remove(pos);
        let newest = rules.last().copied();
        if rules.is_empty() {
            self.rules.remove(&downstream);
        }
        self.uninstall(ctx, &entry, newest);
        self.publish_count(ctx);
        true
    }

    /// Move every rule of a downstream to a new upstream: remove all under
    /// the old key, then re-add all under the new one in the same order.
    /// An upstream index of 0 means there is no upstream and rules are only
    /// removed.
    pub fn update_rules(
        &mut self,
        ctx: &mut ForwardingContext,
        downstream: u32,
        new_upstream_if: u32,
        upstream_mac: MacAddr,
    ) {
        let previous: Vec<Ipv6ForwardingRule> = self.rules(downstream);
        if previous.is_empty() {
            return;
        }
        self.clear_rules(ctx, downstream);
        if new_upstream_if == 0 {
            return;
        }
        info!(
            downstream,
            upstream = new_upstream_if,
            rules = previous.len(),
            "moving IPv6 rules to new upstream"
        );
        for rule in previous {
            self.add_rule(ctx, rule.on_new_upstream(new_upstream_if), upstream_mac);
        }
    }

    /// Remove every rule of a downstream, newest last.
    pub fn clear_rules(&mut self, ctx: &mut ForwardingContext, downstream: u32) {
        for rule in self.rules(downstream) {
            self.remove_rule(ctx, downstream, rule.neighbor);
        }
    }

    /// Remove every rule of every downstream pointing at `upstream_if`.
    pub fn remove_rules_on_upstream(&mut self, ctx: &mut ForwardingContext, upstream_if: u32) {
        let mut targets: Vec<(u32, Ipv6Addr)> = self
            .rules
            .iter()
            .flat_map(|(downstream, rules)| {
                rules
                    .iter()
                    .filter(|e| e.rule.upstream_if_index == upstream_if)
                    .map(move |e| (*downstream, e.rule.neighbor))
            })
            .collect();
        targets.sort_unstable_by_key(|(downstream, _)| *downstream);
        for (downstream, neighbor) in targets {
            self.remove_rule(ctx, downstream, neighbor);
        }
    }

    /// Upstream the downstream's forwarding entry currently points at.
    pub fn forwarding_upstream(&self, downstream: u32) -> Option<u32> {
        self.forwarding
            .get(&downstream)
            .map(|fwd| fwd.upstream_if_index)
    }

    /// Rules of a downstream in insertion order.
    pub fn rules(&self, downstream: u32) -> Vec<Ipv6ForwardingRule> {
        self.rules
            .get(&downstream)
            .map(|rules| rules.iter().map(|e| e.rule).collect())
            .unwrap_or_default()
    }

    pub fn rule_count(&self, downstream: u32) -> usize {
        self.rules.get(&downstream).map_or(0, Vec::len)
    }

    pub fn total_rules(&self) -> usize {
        self.rules.values().map(Vec::len).sum()
    }

    pub fn snapshot(&self) -> BTreeMap<u32, Vec<Ipv6ForwardingRule>> {
        self.rules
            .keys()
            .map(|downstream| (*downstream, self.rules(*downstream)))
            .collect()
    }

    /// Insert the neighbor rule, point the downstream's forwarding entry
    /// at the rule's upstream, then count it against the upstream. Returns
    /// `false` when the insert failed.
    fn install(&mut self, ctx: &mut ForwardingContext, entry: &Ipv6Entry) -> bool {
        if self.mode == EngineMode::Disabled {
            return true;
        }
        let rule = &entry.rule;
        ctx.ensure_dev(rule.upstream_if_index);
        ctx.ensure_dev(rule.downstream_if_index);

        let key = rule.downstream_key(entry.upstream_mac);
        if let Err(e) = ctx.store.ipv6_downstream_add(&key, &rule.downstream_value()) {
            warn!(
                downstream = rule.downstream_if_index,
                neighbor = %rule.neighbor,
                error = %e,
                "failed to add IPv6 rule"
            );
            ctx.metrics.record_rule_store_error("ipv6_downstream_add");
            return false;
        }
        ctx.metrics.record_rule_installed(FAMILY);

        self.point_forwarding(ctx, entry);
        ctx.rule_installed(rule.upstream_if_index);
        true
    }

    /// Delete the neighbor rule, fix up the forwarding entry, then release
    /// the rule from its upstream's tally. `newest` is the newest rule still
    /// left on the downstream.
    fn uninstall(
        &mut self,
        ctx: &mut ForwardingContext,
        entry: &Ipv6Entry,
        newest: Option<Ipv6Entry>,
    ) {
        if self.mode == EngineMode::Disabled {
            return;
        }
        let rule = &entry.rule;
        let key = rule.downstream_key(entry.upstream_mac);
        match ctx.store.ipv6_downstream_remove(&key) {
            Ok(_) => ctx.metrics.record_rule_removed(FAMILY),
            Err(e) => warn!(
                downstream = rule.downstream_if_index,
                neighbor = %rule.neighbor,
                error = %e,
                "failed to remove IPv6 rule"
            ),
        }

        match newest {
            None => self.stop_forwarding(ctx, rule.downstream_if_index),
            Some(next) => {
                let current = self.forwarding_upstream(rule.downstream_if_index);
                let still_served = self
                    .rules
                    .get(&rule.downstream_if_index)
                    .is_some_and(|rules| {
                        rules
                            .iter()
                            .any(|e| Some(e.rule.upstream_if_index) == current)
                    });
                if !still_served {
                    self.point_forwarding(ctx, &next);
                }
            }
        }

        ctx.rule_removed(rule.upstream_if_index);
    }

    /// Write the downstream's forwarding entry unless it already points at
    /// this rule's upstream. A failed write leaves it unrecorded so the next
    /// rule retries.
    fn point_forwarding(&mut self, ctx: &mut ForwardingContext, entry: &Ipv6Entry) {
        let fwd = entry.rule.forwarding(entry.upstream_mac);
        let previous = self.forwarding.get(&fwd.downstream_if_index).copied();
        if previous == Some(fwd) {
            return;
        }
        match ctx.store.ipv6_upstream_add(&fwd.key(), &fwd.value()) {
            Ok(()) => {
                match previous {
                    None => info!(
                        downstream = fwd.downstream_if_index,
                        upstream = fwd.upstream_if_index,
                        "started upstream IPv6 forwarding"
                    ),
                    Some(old) => info!(
                        downstream = fwd.downstream_if_index,
                        from = old.upstream_if_index,
                        upstream = fwd.upstream_if_index,
                        "re-pointed upstream IPv6 forwarding"
                    ),
                }
                self.forwarding.insert(fwd.downstream_if_index, fwd);
            }
            Err(e) => ctx.store_error("ipv6_upstream_add", &e),
        }
    }

    fn stop_forwarding(&mut self, ctx: &mut ForwardingContext, downstream: u32) {
        let Some(fwd) = self.forwarding.remove(&downstream) else {
            return;
        };
        match ctx.store.ipv6_upstream_remove(&fwd.key()) {
            Ok(_) => info!(
                downstream,
                upstream = fwd.upstream_if_index,
                "stopped upstream IPv6 forwarding"
            ),
            Err(e) => ctx.store_error("ipv6_upstream_remove", &e),
        }
    }

    fn publish_count(&self, ctx: &ForwardingContext) {
        ctx.metrics
            .set_rules_active(FAMILY, self.total_rules() as u64);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use domain::stats::entity::Quota;
    use ports::secondary::rule_store_port::TableCapabilities;
    use ports::test_utils::{NoopMetrics, RecordingRuleStore, StoreCall};
    use proptest::prelude::*;

    const UPSTREAM: u32 = 7;
    const DOWNSTREAM: u32 = 20;

    fn ctx(store: &RecordingRuleStore) -> ForwardingContext {
        ForwardingContext::new(Box::new(store.clone()), Arc::new(NoopMetrics))
    }

    fn neighbor(n: u16) -> Ipv6Addr {
        Ipv6Addr::new(0x2001, 0xdb8, 0, 0, 0, 0, 0, n)
    }

    fn rule(n: u16) -> Ipv6ForwardingRule {
        Ipv6ForwardingRule {
            upstream_if_index: UPSTREAM,
            downstream_if_index: DOWNSTREAM,
            neighbor: neighbor(n),
            downstream_mac: MacAddr([2, 0, 0, 0, 0, 20]),
            neighbor_mac: MacAddr([6, 0, 0, 0, 0, n as u8]),
        }
    }

    fn forwarding(upstream: u32) -> UpstreamForwarding {
        rule(1).on_new_upstream(upstream).forwarding(MacAddr::NULL)
    }

    /// Calls without device table writes.
    fn rule_calls(store: &RecordingRuleStore) -> Vec<StoreCall> {
        store
            .take_calls()
            .into_iter()
            .filter(|c| !matches!(c, StoreCall::DevAdd(_)))
            .collect()
    }

    #[test]
    fn end_to_end_first_and_last_rule_triggers() {
        let store = RecordingRuleStore::with_all_tables();
        let mut ctx = ctx(&store);
        let mut engine = Ipv6RuleEngine::new(EngineMode::Offloading);

        assert!(engine.add_rule(&mut ctx, rule(1), MacAddr::NULL));
        assert_eq!(
            rule_calls(&store),
            vec![
                StoreCall::Ipv6DownstreamAdd(rule(1).downstream_key(MacAddr::NULL)),
                StoreCall::Ipv6UpstreamAdd(forwarding(UPSTREAM).key()),
                StoreCall::SetLimit(UPSTREAM, Quota::Unlimited),
            ]
        );

        assert!(engine.add_rule(&mut ctx, rule(2), MacAddr::NULL));
        assert_eq!(
            rule_calls(&store),
            vec![StoreCall::Ipv6DownstreamAdd(rule(2).downstream_key(MacAddr::NULL))]
        );

        assert!(engine.remove_rule(&mut ctx, DOWNSTREAM, neighbor(1)));
        assert_eq!(
            rule_calls(&store),
            vec![StoreCall::Ipv6DownstreamRemove(rule(1).downstream_key(MacAddr::NULL))]
        );

        assert!(engine.remove_rule(&mut ctx, DOWNSTREAM, neighbor(2)));
        assert_eq!(
            rule_calls(&store),
            vec![
                StoreCall::Ipv6DownstreamRemove(rule(2).downstream_key(MacAddr::NULL)),
                StoreCall::Ipv6UpstreamRemove(forwarding(UPSTREAM).key()),
                StoreCall::GetAndClear(UPSTREAM),
            ]
        );
        assert_eq!(engine.total_rules(), 0);
    }

    #[test]
    fn device_entries_precede_first_insert() {
        let store = RecordingRuleStore::with_all_tables();
        let mut ctx = ctx(&store);
        let mut engine = Ipv6RuleEngine::new(EngineMode::Offloading);
        engine.add_rule(&mut ctx, rule(1), MacAddr::NULL);
        let calls = store.calls();
        assert_eq!(calls[0], StoreCall::DevAdd(UPSTREAM));
        assert_eq!(calls[1], StoreCall::DevAdd(DOWNSTREAM));
    }

    #[test]
    fn duplicate_neighbor_is_ignored() {
        let store = RecordingRuleStore::with_all_tables();
        let mut ctx = ctx(&store);
        let mut engine = Ipv6RuleEngine::new(EngineMode::Offloading);
        assert!(engine.add_rule(&mut ctx, rule(1), MacAddr::NULL));
        store.take_calls();
        assert!(!engine.add_rule(&mut ctx, rule(1), MacAddr::NULL));
        assert!(store.calls().is_empty());
        assert_eq!(engine.rule_count(DOWNSTREAM), 1);
    }

    fn count(calls: &[StoreCall], pred: impl Fn(&StoreCall) -> bool) -> usize {
        calls.iter().filter(|c| pred(c)).count()
    }

    #[test]
    fn update_moves_rules_preserving_order() {
        let store = RecordingRuleStore::with_all_tables();
        let mut ctx = ctx(&store);
        let mut engine = Ipv6RuleEngine::new(EngineMode::Offloading);
        for n in [5, 3, 9] {
            engine.add_rule(&mut ctx, rule(n), MacAddr::NULL);
        }
        let before: Vec<Ipv6Addr> = engine.rules(DOWNSTREAM).iter().map(|r| r.neighbor).collect();
        store.take_calls();

        engine.update_rules(&mut ctx, DOWNSTREAM, 8, MacAddr::NULL);

        let after = engine.rules(DOWNSTREAM);
        assert!(after.iter().all(|r| r.upstream_if_index == 8));
        let after_order: Vec<Ipv6Addr> = after.iter().map(|r| r.neighbor).collect();
        assert_eq!(before, after_order);

        let calls = rule_calls(&store);
        assert_eq!(
            count(&calls, |c| matches!(c, StoreCall::Ipv6UpstreamRemove(_))),
            1
        );
        assert_eq!(count(&calls, |c| matches!(c, StoreCall::GetAndClear(_))), 1);
        assert_eq!(
            count(&calls, |c| matches!(c, StoreCall::Ipv6UpstreamAdd(_))),
            1
        );
        assert_eq!(count(&calls, |c| matches!(c, StoreCall::SetLimit(..))), 1);

        let stop = calls
            .iter()
            .position(|c| matches!(c, StoreCall::Ipv6UpstreamRemove(_)));
        let clear = calls
            .iter()
            .position(|c| *c == StoreCall::GetAndClear(UPSTREAM));
        let start = calls
            .iter()
            .position(|c| matches!(c, StoreCall::Ipv6UpstreamAdd(_)));
        let limit = calls
            .iter()
            .position(|c| *c == StoreCall::SetLimit(8, Quota::Unlimited));
        assert!(stop < clear && clear < start && start < limit);
        assert_eq!(store.ipv6_downstream_count(), 3);
        assert_eq!(store.ipv6_forwarding_oif(&forwarding(8).key()), Some(8));
    }

    #[test]
    fn forwarding_survives_removal_of_older_upstream_rules() {
        let store = RecordingRuleStore::with_all_tables();
        let mut ctx = ctx(&store);
        let mut engine = Ipv6RuleEngine::new(EngineMode::Offloading);
        let key = forwarding(UPSTREAM).key();

        engine.add_rule(&mut ctx, rule(1), MacAddr::NULL);
        engine.add_rule(&mut ctx, rule(2).on_new_upstream(8), MacAddr::NULL);
        assert_eq!(engine.forwarding_upstream(DOWNSTREAM), Some(8));
        assert_eq!(store.ipv6_forwarding_oif(&key), Some(8));
        store.take_calls();

        assert!(engine.remove_rule(&mut ctx, DOWNSTREAM, neighbor(1)));
        let calls = rule_calls(&store);
        assert_eq!(
            count(&calls, |c| matches!(c, StoreCall::Ipv6UpstreamRemove(_))),
            0
        );
        assert!(calls.contains(&StoreCall::GetAndClear(UPSTREAM)));
        assert_eq!(store.ipv6_forwarding_oif(&key), Some(8));

        assert!(engine.remove_rule(&mut ctx, DOWNSTREAM, neighbor(2)));
        let calls = rule_calls(&store);
        assert_eq!(
            calls,
            vec![
                StoreCall::Ipv6DownstreamRemove(
                    rule(2).on_new_upstream(8).downstream_key(MacAddr::NULL)
                ),
                StoreCall::Ipv6UpstreamRemove(key),
                StoreCall::GetAndClear(8),
            ]
        );
        assert_eq!(store.ipv6_forwarding_oif(&key), None);
        assert_eq!(engine.forwarding_upstream(DOWNSTREAM), None);
    }

    #[test]
    fn forwarding_falls_back_when_its_upstream_leaves() {
        let store = RecordingRuleStore::with_all_tables();
        let mut ctx = ctx(&store);
        let mut engine = Ipv6RuleEngine::new(EngineMode::Offloading);
        let key = forwarding(UPSTREAM).key();

        engine.add_rule(&mut ctx, rule(1), MacAddr::NULL);
        engine.add_rule(&mut ctx, rule(2).on_new_upstream(8), MacAddr::NULL);
        store.take_calls();

        assert!(engine.remove_rule(&mut ctx, DOWNSTREAM, neighbor(2)));
        let calls = rule_calls(&store);
        assert_eq!(
            count(&calls, |c| matches!(c, StoreCall::Ipv6UpstreamRemove(_))),
            0
        );
        assert!(calls.contains(&StoreCall::Ipv6UpstreamAdd(key)));
        assert_eq!(engine.forwarding_upstream(DOWNSTREAM), Some(UPSTREAM));
        assert_eq!(store.ipv6_forwarding_oif(&key), Some(UPSTREAM));
    }

    #[test]
    fn update_to_no_upstream_only_removes() {
        let store = RecordingRuleStore::with_all_tables();
        let mut ctx = ctx(&store);
        let mut engine = Ipv6RuleEngine::new(EngineMode::Offloading);
        engine.add_rule(&mut ctx, rule(1), MacAddr::NULL);
        engine.update_rules(&mut ctx, DOWNSTREAM, 0, MacAddr::NULL);
        assert_eq!(engine.total_rules(), 0);
        assert_eq!(store.ipv6_downstream_count(), 0);
    }

    #[test]
    fn clear_removes_everything_once() {
        let store = RecordingRuleStore::with_all_tables();
        let mut ctx = ctx(&store);
        let mut engine = Ipv6RuleEngine::new(EngineMode::Offloading);
        engine.add_rule(&mut ctx, rule(1), MacAddr::NULL);
        engine.add_rule(&mut ctx, rule(2), MacAddr::NULL);
        store.take_calls();
        engine.clear_rules(&mut ctx, DOWNSTREAM);
        let calls = rule_calls(&store);
        assert_eq!(
            calls
                .iter()
                .filter(|c| matches!(c, StoreCall::GetAndClear(_)))
                .count(),
            1
        );
        assert_eq!(
            calls
                .iter()
                .filter(|c| matches!(c, StoreCall::Ipv6UpstreamRemove(_)))
                .count(),
            1
        );
        assert_eq!(engine.rule_count(DOWNSTREAM), 0);
    }

    #[test]
    fn upstream_teardown_spans_downstreams() {
        let store = RecordingRuleStore::with_all_tables();
        let mut ctx = ctx(&store);
        let mut engine = Ipv6RuleEngine::new(EngineMode::Offloading);
        engine.add_rule(&mut ctx, rule(1), MacAddr::NULL);
        let other = Ipv6ForwardingRule {
            downstream_if_index: 21,
            ..rule(2)
        };
        engine.add_rule(&mut ctx, other, MacAddr::NULL);
        let elsewhere = Ipv6ForwardingRule {
            downstream_if_index: 22,
            ..rule(3).on_new_upstream(9)
        };
        engine.add_rule(&mut ctx, elsewhere, MacAddr::NULL);

        engine.remove_rules_on_upstream(&mut ctx, UPSTREAM);
        assert_eq!(engine.total_rules(), 1);
        assert_eq!(engine.rule_count(22), 1);
        assert!(!ctx.tally.is_active(UPSTREAM));
        assert!(ctx.tally.is_active(9));
    }

    #[test]
    fn disabled_mode_tracks_without_pushing() {
        let store = RecordingRuleStore::new(TableCapabilities {
            ipv6_upstream: false,
            ..TableCapabilities::ALL
        });
        let mut ctx = ctx(&store);
        let mut engine = Ipv6RuleEngine::new(EngineMode::from_support(
            ctx.capabilities.supports_ipv6(),
        ));
        assert_eq!(engine.mode(), EngineMode::Disabled);

        assert!(engine.add_rule(&mut ctx, rule(1), MacAddr::NULL));
        assert!(engine.add_rule(&mut ctx, rule(2), MacAddr::NULL));
        engine.update_rules(&mut ctx, DOWNSTREAM, 8, MacAddr::NULL);
        assert_eq!(engine.rule_count(DOWNSTREAM), 2);
        assert!(engine.remove_rule(&mut ctx, DOWNSTREAM, neighbor(1)));
        assert_eq!(engine.rule_count(DOWNSTREAM), 1);
        engine.clear_rules(&mut ctx, DOWNSTREAM);

        assert!(store.calls().is_empty());
        assert_eq!(ctx.tally.active_interfaces(), Vec::<u32>::new());
    }

    #[test]
    fn failed_insert_is_not_tracked() {
        let store = RecordingRuleStore::with_all_tables();
        let mut ctx = ctx(&store);
        let mut engine = Ipv6RuleEngine::new(EngineMode::Offloading);
        store.fail_on("ipv6_downstream_add");
        assert!(!engine.add_rule(&mut ctx, rule(1), MacAddr::NULL));
        assert_eq!(engine.rule_count(DOWNSTREAM), 0);
        assert!(!ctx.tally.is_active(UPSTREAM));

        store.clear_failures();
        assert!(engine.add_rule(&mut ctx, rule(1), MacAddr::NULL));
        assert_eq!(store.limit(UPSTREAM), Some(Quota::Unlimited));
    }

    #[test]
    fn failed_forwarding_start_keeps_rule() {
        let store = RecordingRuleStore::with_all_tables();
        let mut ctx = ctx(&store);
        let mut engine = Ipv6RuleEngine::new(EngineMode::Offloading);
        store.fail_on("ipv6_upstream_add");
        assert!(engine.add_rule(&mut ctx, rule(1), MacAddr::NULL));
        assert_eq!(engine.rule_count(DOWNSTREAM), 1);
        assert!(ctx.tally.is_active(UPSTREAM));
    }

    proptest! {
        #[test]
        fn count_is_adds_minus_removes(
            adds in proptest::collection::btree_set(1u16..200, 1..24),
            remove_mask in proptest::collection::vec(any::<bool>(), 24),
        ) {
            let store = RecordingRuleStore::with_all_tables();
            let mut ctx = ctx(&store);
            let mut engine = Ipv6RuleEngine::new(EngineMode::Offloading);

            let added: Vec<u16> = adds.into_iter().collect();
            for n in &added {
                prop_assert!(engine.add_rule(&mut ctx, rule(*n), MacAddr::NULL));
            }
            let removed: Vec<u16> = added
                .iter()
                .zip(&remove_mask)
                .filter(|(_, r)| **r)
                .map(|(n, _)| *n)
                .collect();
            for n in &removed {
                prop_assert!(engine.remove_rule(&mut ctx, DOWNSTREAM, neighbor(*n)));
            }

            prop_assert_eq!(engine.rule_count(DOWNSTREAM), added.len() - removed.len());

            let calls = store.calls();
            let starts = calls.iter().filter(|c| matches!(c, StoreCall::Ipv6UpstreamAdd(_))).count();
            let stops = calls.iter().filter(|c| matches!(c, StoreCall::Ipv6UpstreamRemove(_))).count();
            prop_assert_eq!(starts, 1);
            prop_assert_eq!(stops, usize::from(added.len() == removed.len()));
        }
    }
}
