use std::collections::{HashMap, HashSet};
use std::time::Duration;

use domain::client::entity::ClientKey;
use domain::client::registry::ClientRegistry;
use domain::common::entity::L4Protocol;
use domain::conntrack::entity::{
    CONNTRACK_TIMEOUT_UPDATE_INTERVAL, ConntrackEvent, FlowTransition, FlowTuple, TimeoutRefresh,
};
use domain::ipv4::entity::{Ipv4RulePair, build_rule_pair, upstream_key};
use domain::ipv4::policy::OffloadPolicy;
use domain::upstream::entity::UpstreamInformation;
use ebpf_common::tether::Tether4Key;
use ports::secondary::conntrack_timeout_port::ConntrackTimeoutPort;
use ports::secondary::rule_store_port::Ipv4Direction;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::forwarding_context::{EngineMode, ForwardingContext};

const FAMILY: &str = "ipv4";

/// Whether conntrack events are being consumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsumerState {
    Stopped,
    Running,
}

#[derive(Debug, Clone, Copy)]
struct FlowEntry {
    pair: Ipv4RulePair,
    protocol: L4Protocol,
    orig: FlowTuple,
    client: ClientKey,
    upstream_if: u32,
}

/// What the engine did with one conntrack event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOutcome {
    Installed,
    Removed,
    Skipped(&'static str),
}

/// IPv4 NAT flow rules derived from conntrack events.
///
/// Every flow is a rule pair stored under its upstream-direction key, and
/// indexed by client so that a departing client's rules are found without
/// scanning all flows.
#[derive(Debug)]
pub struct Ipv4RuleEngine {
    mode: EngineMode,
    consumer: ConsumerState,
    policy: OffloadPolicy,
    flows: HashMap<Tether4Key, FlowEntry>,
    by_client: HashMap<ClientKey, HashSet<Tether4Key>>,
}

impl Ipv4RuleEngine {
    pub fn new(mode: EngineMode, policy: OffloadPolicy) -> Self {
        Self {
            mode,
            consumer: ConsumerState::Stopped,
            policy,
            flows: HashMap::new(),
            by_client: HashMap::new(),
        }
    }

    pub fn mode(&self) -> EngineMode {
        self.mode
    }

    pub fn consumer_state(&self) -> ConsumerState {
        self.consumer
    }

    pub fn flow_count(&self) -> usize {
        self.flows.len()
    }

    pub fn client_flow_count(&self, client: &ClientKey) -> usize {
        self.by_client.get(client).map_or(0, HashSet::len)
    }

    /// Begin consuming events. A disabled engine never starts.
    pub fn start_consumer(&mut self) {
        if self.mode == EngineMode::Disabled || self.consumer == ConsumerState::Running {
            return;
        }
        self.consumer = ConsumerState::Running;
        info!("conntrack consumer started");
    }

    /// Stop consuming. Teardown events would be missed from now on, so all
    /// installed flows are removed.
    pub fn stop_consumer(&mut self, ctx: &mut ForwardingContext) {
        if self.consumer == ConsumerState::Stopped {
            return;
        }
        self.consumer = ConsumerState::Stopped;
        self.clear_all(ctx);
        info!("conntrack consumer stopped");
    }

    pub fn on_event(
        &mut self,
        ctx: &mut ForwardingContext,
        event: &ConntrackEvent,
        clients: &ClientRegistry,
        upstream: Option<&UpstreamInformation>,
    ) -> EventOutcome {
        if self.consumer == ConsumerState::Stopped {
            debug!("conntrack consumer stopped, event dropped");
            return EventOutcome::Skipped("consumer_stopped");
        }
        if !self.policy.is_offloadable(event.protocol, &event.tuple_orig) {
            return EventOutcome::Skipped("not_offloadable");
        }
        match event.transition() {
            FlowTransition::Establish => self.establish(ctx, event, clients, upstream),
            FlowTransition::Teardown => self.teardown(ctx, event, clients),
            FlowTransition::Ignore => EventOutcome::Skipped("not_established"),
        }
    }

    fn establish(
        &mut self,
        ctx: &mut ForwardingContext,
        event: &ConntrackEvent,
        clients: &ClientRegistry,
        upstream: Option<&UpstreamInformation>,
    ) -> EventOutcome {
        let Some(upstream) = upstream.filter(|u| u.is_ipv4_eligible()) else {
            return EventOutcome::Skipped("no_ipv4_upstream");
        };
        if upstream.ipv4_addr != Some(event.tuple_reply.dst) {
            return EventOutcome::Skipped("not_upstream_nat");
        }
        let Some(client) = clients.lookup(event.tuple_orig.src) else {
            return EventOutcome::Skipped("unknown_client");
        };

        let pair = build_rule_pair(
            event.protocol,
            &event.tuple_orig,
            &event.tuple_reply,
            client,
            upstream,
        );
        if self.flows.contains_key(&pair.upstream_key) {
            return EventOutcome::Skipped("already_installed");
        }

        ctx.ensure_dev(upstream.if_index);
        ctx.ensure_dev(client.downstream_if_index);

        if let Err(e) =
            ctx.store
                .ipv4_rule_add(Ipv4Direction::Upstream, &pair.upstream_key, &pair.upstream_value)
        {
            ctx.store_error("ipv4_rule_add", &e);
            return EventOutcome::Skipped("store_error");
        }
        if let Err(e) = ctx.store.ipv4_rule_add(
            Ipv4Direction::Downstream,
            &pair.downstream_key,
            &pair.downstream_value,
        ) {
            ctx.store_error("ipv4_rule_add", &e);
            if let Err(rollback) = ctx
                .store
                .ipv4_rule_remove(Ipv4Direction::Upstream, &pair.upstream_key)
            {
                error!(error = %rollback, "failed to roll back upstream IPv4 rule");
            }
            return EventOutcome::Skipped("store_error");
        }

        ctx.metrics.record_rule_installed(FAMILY);
        ctx.rule_installed(upstream.if_index);

        let key = client.key();
        self.flows.insert(
            pair.upstream_key,
            FlowEntry {
                pair,
                protocol: event.protocol,
                orig: event.tuple_orig,
                client: key,
                upstream_if: upstream.if_index,
            },
        );
        self.by_client
            .entry(key)
            .or_default()
            .insert(pair.upstream_key);
        self.publish_count(ctx);
        EventOutcome::Installed
    }

    fn teardown(
        &mut self,
        ctx: &mut ForwardingContext,
        event: &ConntrackEvent,
        clients: &ClientRegistry,
    ) -> EventOutcome {
        let Some(client) = clients.lookup(event.tuple_orig.src) else {
            return EventOutcome::Skipped("unknown_client");
        };
        let key = upstream_key(event.protocol, &event.tuple_orig, client);
        if self.remove_flow(ctx, &key) {
            EventOutcome::Removed
        } else {
            EventOutcome::Skipped("not_installed")
        }
    }

    /// Remove every flow of one client.
    pub fn remove_client_rules(&mut self, ctx: &mut ForwardingContext, client: &ClientKey) -> usize {
        let Some(keys) = self.by_client.remove(client) else {
            return 0;
        };
        let mut removed = 0;
        for key in keys {
            if self.remove_flow(ctx, &key) {
                removed += 1;
            }
        }
        if removed > 0 {
            info!(
                downstream = client.downstream_if_index,
                client = %client.client_addr,
                removed,
                "removed IPv4 rules of client"
            );
        }
        removed
    }

    /// Remove every flow, e.g. after an upstream change.
    pub fn clear_all(&mut self, ctx: &mut ForwardingContext) {
        let keys: Vec<Tether4Key> = self.flows.keys().copied().collect();
        for key in &keys {
            self.remove_flow(ctx, key);
        }
        self.by_client.clear();
        if !keys.is_empty() {
            info!(removed = keys.len(), "cleared all IPv4 rules");
        }
    }

    fn remove_flow(&mut self, ctx: &mut ForwardingContext, key: &Tether4Key) -> bool {
        let Some(entry) = self.flows.remove(key) else {
            return false;
        };
        if let Some(keys) = self.by_client.get_mut(&entry.client) {
            keys.remove(key);
            if keys.is_empty() {
                self.by_client.remove(&entry.client);
            }
        }

        let pair = &entry.pair;
        let upstream = ctx
            .store
            .ipv4_rule_remove(Ipv4Direction::Upstream, &pair.upstream_key);
        let downstream = ctx
            .store
            .ipv4_rule_remove(Ipv4Direction::Downstream, &pair.downstream_key);
        for (direction, result) in [
            (Ipv4Direction::Upstream, upstream),
            (Ipv4Direction::Downstream, downstream),
        ] {
            if let Err(e) = result {
                warn!(direction = direction.as_str(), error = %e, "failed to remove IPv4 rule");
                ctx.metrics.record_rule_store_error("ipv4_rule_remove");
            }
        }
        ctx.metrics.record_rule_removed(FAMILY);
        ctx.rule_removed(entry.upstream_if);
        self.publish_count(ctx);
        true
    }

    /// Refresh kernel conntrack timeouts of flows the fast path used within
    /// the update interval. Returns the number of refresh requests issued.
    pub fn refresh_timeouts(
        &self,
        ctx: &ForwardingContext,
        now_boot_ns: u64,
        refresher: &mut dyn ConntrackTimeoutPort,
    ) -> usize {
        if self.flows.is_empty() {
            return 0;
        }
        let entries = match ctx.store.ipv4_upstream_entries() {
            Ok(entries) => entries,
            Err(e) => {
                ctx.store_error("ipv4_upstream_entries", &e);
                return 0;
            }
        };
        let window = duration_ns(CONNTRACK_TIMEOUT_UPDATE_INTERVAL);
        let mut issued = 0;
        for (key, value) in entries {
            let Some(flow) = self.flows.get(&key) else {
                continue;
            };
            if value.last_used == 0 || now_boot_ns.saturating_sub(value.last_used) >= window {
                continue;
            }
            let Some(request) = TimeoutRefresh::for_flow(flow.protocol, flow.orig) else {
                continue;
            };
            match refresher.refresh_timeout(&request) {
                Ok(()) => {
                    ctx.metrics.record_conntrack_refresh("ok");
                    issued += 1;
                }
                Err(e) => {
                    debug!(error = %e, "conntrack timeout refresh failed");
                    ctx.metrics.record_conntrack_refresh("error");
                }
            }
        }
        issued
    }

    fn publish_count(&self, ctx: &ForwardingContext) {
        ctx.metrics.set_rules_active(FAMILY, self.flows.len() as u64);
    }
}

fn duration_ns(d: Duration) -> u64 {
    u64::try_from(d.as_nanos()).unwrap_or(u64::MAX)
}
