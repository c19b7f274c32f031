use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use domain::client::entity::ClientInfo;
use domain::client::registry::ClientRegistry;
use domain::common::entity::MacAddr;
use domain::common::error::DomainError;
use domain::conntrack::entity::ConntrackEvent;
use domain::ipv4::policy::OffloadPolicy;
use domain::ipv6::entity::Ipv6ForwardingRule;
use domain::stats::engine::AlertOutcome;
use domain::stats::entity::ForwardedStats;
use domain::upstream::entity::UpstreamInformation;
use ports::secondary::clock_port::ClockPort;
use ports::secondary::conntrack_timeout_port::ConntrackTimeoutPort;
use ports::secondary::metrics_port::MetricsPort;
use ports::secondary::rule_store_port::{RuleStorePort, TableCapabilities};
use ports::secondary::stats_report_port::StatsReportPort;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::forwarding_context::{EngineMode, ForwardingContext};
use crate::ipv4_rule_service_impl::{ConsumerState, EventOutcome, Ipv4RuleEngine};
use crate::ipv6_rule_service_impl::Ipv6RuleEngine;
use crate::polling_scheduler::{PollingHandle, PollingScheduler};

/// External events serialized through the coordinator's queue.
#[derive(Debug)]
pub enum OffloadEvent {
    UpstreamChanged(Option<UpstreamInformation>),
    InterfaceKnown {
        if_index: u32,
        name: String,
    },
    Ipv6RuleAdd(Ipv6ForwardingRule),
    Ipv6RuleRemove(Ipv6ForwardingRule),
    Ipv6RuleUpdate {
        downstream: u32,
        upstream_if_index: u32,
    },
    Ipv6RuleClear {
        downstream: u32,
    },
    ClientAdd {
        downstream: u32,
        info: ClientInfo,
    },
    ClientRemove {
        downstream: u32,
        info: ClientInfo,
    },
    ClientClear {
        downstream: u32,
    },
    Conntrack(ConntrackEvent),
    SetLimit {
        iface: String,
        quota_bytes: i64,
        reply: oneshot::Sender<Result<(), DomainError>>,
    },
    SetAlert {
        quota_bytes: i64,
        reply: oneshot::Sender<Result<(), DomainError>>,
    },
    StartPolling,
    StopPolling,
    Dump {
        reply: oneshot::Sender<CoordinatorSnapshot>,
    },
}

/// Diagnostic view of the coordinator state.
#[derive(Debug, Clone, Serialize)]
pub struct CoordinatorSnapshot {
    pub upstream: Option<UpstreamInformation>,
    pub capabilities: TableCapabilities,
    pub ipv4_mode: EngineMode,
    pub ipv6_mode: EngineMode,
    pub conntrack_consumer: ConsumerState,
    pub clients: Vec<ClientInfo>,
    pub ipv6_rules: BTreeMap<u32, Vec<Ipv6ForwardingRule>>,
    pub ipv4_flows: usize,
    pub active_upstreams: Vec<u32>,
    pub polling: bool,
    pub poll_interval_ms: u64,
}

#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    pub poll_interval: Duration,
    pub policy: OffloadPolicy,
}

/// Collaborators the coordinator drives.
pub struct CoordinatorDeps {
    pub store: Box<dyn RuleStorePort>,
    pub reporter: Box<dyn StatsReportPort>,
    pub refresher: Box<dyn ConntrackTimeoutPort>,
    pub clock: Arc<dyn ClockPort>,
    pub metrics: Arc<dyn MetricsPort>,
}

enum Step {
    Event(OffloadEvent),
    Poll,
    Shutdown,
}

/// Top-level tethering offload coordinator.
///
/// Owns every piece of offload state and mutates it from one logical
/// context: either directly through its methods, or through [`Self::run`]
/// consuming an event queue.
pub struct OffloadCoordinator {
    ctx: ForwardingContext,
    clients: ClientRegistry,
    upstream: Option<UpstreamInformation>,
    ipv6: Ipv6RuleEngine,
    ipv4: Ipv4RuleEngine,
    polling: PollingScheduler,
    reporter: Box<dyn StatsReportPort>,
    refresher: Box<dyn ConntrackTimeoutPort>,
    clock: Arc<dyn ClockPort>,
}

impl OffloadCoordinator {
    pub fn new(deps: CoordinatorDeps, settings: CoordinatorSettings) -> Self {
        let ctx = ForwardingContext::new(deps.store, deps.metrics);
        let caps = ctx.capabilities;

        let ipv6_mode = EngineMode::from_support(caps.supports_ipv6());
        let ipv4_mode = EngineMode::from_support(caps.supports_ipv4());
        for (engine, mode) in [("ipv6", ipv6_mode), ("ipv4", ipv4_mode)] {
            ctx.metrics
                .set_engine_offloading(engine, mode == EngineMode::Offloading);
            if mode == EngineMode::Disabled {
                warn!(
                    engine,
                    missing = ?caps.missing(),
                    "required offload tables unavailable, engine disabled"
                );
            }
        }

        Self {
            ctx,
            clients: ClientRegistry::new(),
            upstream: None,
            ipv6: Ipv6RuleEngine::new(ipv6_mode),
            ipv4: Ipv4RuleEngine::new(ipv4_mode, settings.policy),
            polling: PollingScheduler::new(settings.poll_interval),
            reporter: deps.reporter,
            refresher: deps.refresher,
            clock: deps.clock,
        }
    }

    // ── Topology ───────────────────────────────────────────────────

    /// Replace the active upstream. Any change clears all IPv4 flows; a
    /// cleared upstream also removes the IPv6 rules pointing at it. IPv6
    /// rules on a replaced upstream are moved by the downstream owner
    /// through [`Self::update_ipv6_rules`].
    pub fn set_upstream(&mut self, upstream: Option<UpstreamInformation>) {
        if self.upstream == upstream {
            return;
        }
        if let Some(new) = &upstream {
            self.ctx.names.insert(new.if_index, &new.if_name);
        }
        let previous = std::mem::replace(&mut self.upstream, upstream);

        self.ipv4.clear_all(&mut self.ctx);
        if self.upstream.is_none()
            && let Some(old) = &previous
        {
            self.ipv6.remove_rules_on_upstream(&mut self.ctx, old.if_index);
        }

        match &self.upstream {
            Some(u) => info!(
                upstream = u.if_index,
                iface = %u.if_name,
                ipv4 = u.is_ipv4_eligible(),
                network_id = u.network_id,
                "upstream changed"
            ),
            None => info!("upstream cleared"),
        }
    }

    /// Learn an interface name for logging and stats reporting.
    pub fn register_interface(&mut self, if_index: u32, name: &str) {
        self.ctx.names.insert(if_index, name);
    }

    // ── IPv6 rules ─────────────────────────────────────────────────

    pub fn add_ipv6_rule(&mut self, rule: Ipv6ForwardingRule) -> bool {
        let mac = self.upstream_mac(rule.upstream_if_index);
        self.ipv6.add_rule(&mut self.ctx, rule, mac)
    }

    pub fn remove_ipv6_rule(&mut self, rule: &Ipv6ForwardingRule) -> bool {
        self.ipv6
            .remove_rule(&mut self.ctx, rule.downstream_if_index, rule.neighbor)
    }

    pub fn update_ipv6_rules(&mut self, downstream: u32, new_upstream_if: u32) {
        let mac = self.upstream_mac(new_upstream_if);
        self.ipv6
            .update_rules(&mut self.ctx, downstream, new_upstream_if, mac);
    }

    pub fn clear_ipv6_rules(&mut self, downstream: u32) {
        self.ipv6.clear_rules(&mut self.ctx, downstream);
    }

    pub fn ipv6_rules(&self, downstream: u32) -> Vec<Ipv6ForwardingRule> {
        self.ipv6.rules(downstream)
    }

    fn upstream_mac(&self, upstream_if: u32) -> MacAddr {
        self.upstream
            .as_ref()
            .filter(|u| u.if_index == upstream_if)
            .map_or(MacAddr::NULL, UpstreamInformation::mac_or_null)
    }

    // ── Clients ────────────────────────────────────────────────────

    pub fn add_client(&mut self, downstream: u32, info: ClientInfo) {
        if let Some(previous) = self.clients.add_client(downstream, info)
            && previous != info
        {
            // Flows of the old identity carry stale MACs.
            self.ipv4.remove_client_rules(&mut self.ctx, &previous.key());
        }
    }

    pub fn remove_client(&mut self, downstream: u32, info: &ClientInfo) {
        let removal = self.clients.remove_client(downstream, info);
        if let Some(removed) = removal.removed {
            self.ipv4.remove_client_rules(&mut self.ctx, &removed.key());
        }
        if removal.downstream_emptied {
            debug!(downstream, "last client of downstream removed");
        }
    }

    pub fn clear_clients(&mut self, downstream: u32) {
        for client in self.clients.clear_clients(downstream) {
            self.ipv4.remove_client_rules(&mut self.ctx, &client.key());
        }
    }

    // ── Conntrack ──────────────────────────────────────────────────

    pub fn on_conntrack_event(&mut self, event: &ConntrackEvent) -> EventOutcome {
        let outcome = self
            .ipv4
            .on_event(&mut self.ctx, event, &self.clients, self.upstream.as_ref());
        let kind = match outcome {
            EventOutcome::Installed => "installed",
            EventOutcome::Removed => "removed",
            EventOutcome::Skipped(_) => "skipped",
        };
        self.ctx.metrics.record_conntrack_event(kind);
        outcome
    }

    // ── Limits and alerts ──────────────────────────────────────────

    /// Set the data limit of an upstream interface by name. The limit is
    /// pushed right away only if the interface has active rules.
    pub fn set_limit(&mut self, iface: &str, quota_bytes: i64) -> Result<(), DomainError> {
        let quota = self.ctx.stats.set_limit(iface, quota_bytes)?;
        let active: Vec<u32> = self
            .ctx
            .tally
            .active_interfaces()
            .into_iter()
            .filter(|idx| self.ctx.names.name(*idx) == Some(iface))
            .collect();
        for if_index in active {
            self.ctx.apply_limit(if_index, quota);
        }
        info!(iface, quota = ?quota, "data limit set");
        Ok(())
    }

    pub fn set_alert(&mut self, quota_bytes: i64) -> Result<(), DomainError> {
        if self.ctx.stats.set_alert(quota_bytes)? == AlertOutcome::ReachedNow {
            info!("alert quota reached");
            self.reporter.notify_alert_reached();
        }
        Ok(())
    }

    // ── Polling ────────────────────────────────────────────────────

    pub fn start_polling(&mut self) {
        if !self.polling.start() {
            return;
        }
        self.ipv4.start_consumer();
        info!(
            interval_ms = self.polling.interval().as_millis(),
            "offload polling started"
        );
    }

    /// Push final stats, then stop the timer and the conntrack consumer.
    pub fn stop_polling(&mut self) {
        if !self.polling.is_running() {
            return;
        }
        self.poll_once();
        self.polling.stop();
        self.ipv4.stop_consumer(&mut self.ctx);
        info!("offload polling stopped");
    }

    pub fn polling_interval(&self) -> Duration {
        self.polling.interval()
    }

    pub fn is_polling(&self) -> bool {
        self.polling.is_running()
    }

    pub fn polling_handle(&self) -> PollingHandle {
        self.polling.handle()
    }

    /// One polling cycle. Each phase first checks that polling was not
    /// halted in the meantime.
    pub fn poll_once(&mut self) {
        if !self.polling.is_running() {
            return;
        }
        self.push_stats();

        if !self.polling.is_running() {
            return;
        }
        let now = self.clock.now_boot_ns();
        let refreshed = self
            .ipv4
            .refresh_timeouts(&self.ctx, now, self.refresher.as_mut());
        if refreshed > 0 {
            debug!(refreshed, "conntrack timeouts refreshed");
        }
    }

    fn push_stats(&mut self) {
        if !self.ctx.capabilities.supports_stats() {
            return;
        }
        let snapshot = match self.ctx.store.stats_snapshot() {
            Ok(snapshot) => snapshot,
            Err(e) => {
                self.ctx.store_error("stats_snapshot", &e);
                return;
            }
        };
        let snapshot: Vec<(u32, ForwardedStats)> = snapshot
            .into_iter()
            .map(|(idx, raw)| (idx, raw.into()))
            .collect();
        let outcome = self.ctx.stats.ingest_snapshot(&snapshot, &self.ctx.names);
        self.ctx.metrics.record_stats_poll();

        if !outcome.delta.is_empty() {
            for entry in &outcome.delta.iface_records {
                self.ctx
                    .metrics
                    .record_bytes_forwarded(&entry.iface, "rx", entry.stats.rx_bytes);
                self.ctx
                    .metrics
                    .record_bytes_forwarded(&entry.iface, "tx", entry.stats.tx_bytes);
            }
            self.reporter.notify_stats_updated(&outcome.delta);
        }
        if outcome.alert_reached {
            info!("alert quota reached");
            self.reporter.notify_alert_reached();
        }
        for iface in &outcome.limits_reached {
            info!(iface = %iface, "data limit reached");
            self.reporter.notify_limit_reached(iface);
        }
    }

    // ── Diagnostics ────────────────────────────────────────────────

    pub fn dump(&self) -> CoordinatorSnapshot {
        CoordinatorSnapshot {
            upstream: self.upstream.clone(),
            capabilities: self.ctx.capabilities,
            ipv4_mode: self.ipv4.mode(),
            ipv6_mode: self.ipv6.mode(),
            conntrack_consumer: self.ipv4.consumer_state(),
            clients: self.clients.all_clients(),
            ipv6_rules: self.ipv6.snapshot(),
            ipv4_flows: self.ipv4.flow_count(),
            active_upstreams: self.ctx.tally.active_interfaces(),
            polling: self.polling.is_running(),
            poll_interval_ms: u64::try_from(self.polling.interval().as_millis())
                .unwrap_or(u64::MAX),
        }
    }

    // ── Event loop ─────────────────────────────────────────────────

    /// Apply one queued event.
    pub fn handle_event(&mut self, event: OffloadEvent) {
        match event {
            OffloadEvent::UpstreamChanged(upstream) => self.set_upstream(upstream),
            OffloadEvent::InterfaceKnown { if_index, name } => {
                self.register_interface(if_index, &name);
            }
            OffloadEvent::Ipv6RuleAdd(rule) => {
                self.add_ipv6_rule(rule);
            }
            OffloadEvent::Ipv6RuleRemove(rule) => {
                self.remove_ipv6_rule(&rule);
            }
            OffloadEvent::Ipv6RuleUpdate {
                downstream,
                upstream_if_index,
            } => self.update_ipv6_rules(downstream, upstream_if_index),
            OffloadEvent::Ipv6RuleClear { downstream } => self.clear_ipv6_rules(downstream),
            OffloadEvent::ClientAdd { downstream, info } => self.add_client(downstream, info),
            OffloadEvent::ClientRemove { downstream, info } => {
                self.remove_client(downstream, &info);
            }
            OffloadEvent::ClientClear { downstream } => self.clear_clients(downstream),
            OffloadEvent::Conntrack(event) => {
                self.on_conntrack_event(&event);
            }
            OffloadEvent::SetLimit {
                iface,
                quota_bytes,
                reply,
            } => {
                let _ = reply.send(self.set_limit(&iface, quota_bytes));
            }
            OffloadEvent::SetAlert { quota_bytes, reply } => {
                let _ = reply.send(self.set_alert(quota_bytes));
            }
            OffloadEvent::StartPolling => self.start_polling(),
            OffloadEvent::StopPolling => self.stop_polling(),
            OffloadEvent::Dump { reply } => {
                let _ = reply.send(self.dump());
            }
        }
    }

    /// Main loop. Consumes events and poll ticks until cancelled or the
    /// queue closes, draining queued events on cancellation. Returns the
    /// coordinator so the caller can inspect final state.
    pub async fn run(
        mut self,
        mut rx: mpsc::Receiver<OffloadEvent>,
        cancel_token: CancellationToken,
    ) -> Self {
        let mut count: u64 = 0;

        loop {
            let step = tokio::select! {
                () = cancel_token.cancelled() => Step::Shutdown,
                msg = rx.recv() => match msg {
                    Some(event) => Step::Event(event),
                    None => Step::Shutdown,
                },
                () = self.polling.tick() => Step::Poll,
            };
            match step {
                Step::Event(event) => {
                    count += 1;
                    self.handle_event(event);
                }
                Step::Poll => self.poll_once(),
                Step::Shutdown => {
                    while let Ok(event) = rx.try_recv() {
                        count += 1;
                        self.handle_event(event);
                    }
                    break;
                }
            }
        }

        info!(total_events = count, "offload coordinator stopped");
        self
    }
}

/// Cloneable sender side of the coordinator queue.
#[derive(Debug, Clone)]
pub struct CoordinatorHandle {
    tx: mpsc::Sender<OffloadEvent>,
}

impl CoordinatorHandle {
    pub fn new(tx: mpsc::Sender<OffloadEvent>) -> Self {
        Self { tx }
    }

    /// Raw sender, for producers that must not block (e.g. conntrack readers).
    pub fn sender(&self) -> mpsc::Sender<OffloadEvent> {
        self.tx.clone()
    }

    pub async fn send(&self, event: OffloadEvent) -> Result<(), DomainError> {
        self.tx
            .send(event)
            .await
            .map_err(|_| DomainError::EngineError("offload coordinator stopped".to_string()))
    }

    pub async fn set_upstream(&self, upstream: Option<UpstreamInformation>) -> Result<(), DomainError> {
        self.send(OffloadEvent::UpstreamChanged(upstream)).await
    }

    pub async fn add_ipv6_rule(&self, rule: Ipv6ForwardingRule) -> Result<(), DomainError> {
        self.send(OffloadEvent::Ipv6RuleAdd(rule)).await
    }

    pub async fn remove_ipv6_rule(&self, rule: Ipv6ForwardingRule) -> Result<(), DomainError> {
        self.send(OffloadEvent::Ipv6RuleRemove(rule)).await
    }

    pub async fn update_ipv6_rules(
        &self,
        downstream: u32,
        upstream_if_index: u32,
    ) -> Result<(), DomainError> {
        self.send(OffloadEvent::Ipv6RuleUpdate {
            downstream,
            upstream_if_index,
        })
        .await
    }

    pub async fn clear_ipv6_rules(&self, downstream: u32) -> Result<(), DomainError> {
        self.send(OffloadEvent::Ipv6RuleClear { downstream }).await
    }

    pub async fn add_client(&self, downstream: u32, info: ClientInfo) -> Result<(), DomainError> {
        self.send(OffloadEvent::ClientAdd { downstream, info }).await
    }

    pub async fn remove_client(&self, downstream: u32, info: ClientInfo) -> Result<(), DomainError> {
        self.send(OffloadEvent::ClientRemove { downstream, info })
            .await
    }

    pub async fn clear_clients(&self, downstream: u32) -> Result<(), DomainError> {
        self.send(OffloadEvent::ClientClear { downstream }).await
    }

    pub async fn start_polling(&self) -> Result<(), DomainError> {
        self.send(OffloadEvent::StartPolling).await
    }

    pub async fn stop_polling(&self) -> Result<(), DomainError> {
        self.send(OffloadEvent::StopPolling).await
    }

    pub async fn set_limit(&self, iface: &str, quota_bytes: i64) -> Result<(), DomainError> {
        let (reply, rx) = oneshot::channel();
        self.send(OffloadEvent::SetLimit {
            iface: iface.to_string(),
            quota_bytes,
            reply,
        })
        .await?;
        rx.await
            .map_err(|_| DomainError::EngineError("offload coordinator dropped reply".to_string()))?
    }

    pub async fn set_alert(&self, quota_bytes: i64) -> Result<(), DomainError> {
        let (reply, rx) = oneshot::channel();
        self.send(OffloadEvent::SetAlert { quota_bytes, reply })
            .await?;
        rx.await
            .map_err(|_| DomainError::EngineError("offload coordinator dropped reply".to_string()))?
    }

    pub async fn dump(&self) -> Result<CoordinatorSnapshot, DomainError> {
        let (reply, rx) = oneshot::channel();
        self.send(OffloadEvent::Dump { reply }).await?;
        rx.await
            .map_err(|_| DomainError::EngineError("offload coordinator dropped reply".to_string()))
    }
}
