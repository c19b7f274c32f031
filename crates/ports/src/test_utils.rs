use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use domain::common::error::DomainError;
use domain::conntrack::entity::TimeoutRefresh;
use domain::stats::entity::{Quota, StatsDelta};
use ebpf_common::tether::{
    Tether4Key, Tether4Value, Tether6Value, TetherDownstream6Key, TetherStatsValue,
    TetherUpstream6Key,
};

use crate::secondary::clock_port::ClockPort;
use crate::secondary::conntrack_timeout_port::ConntrackTimeoutPort;
use crate::secondary::metrics_port::{EngineMetrics, EventMetrics, PollMetrics, RuleMetrics};
use crate::secondary::rule_store_port::{Ipv4Direction, RuleStorePort, TableCapabilities};
use crate::secondary::stats_report_port::StatsReportPort;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// No-op implementation of all metrics sub-traits for use in tests.
///
/// All methods inherit the default no-op implementations from the sub-traits.
pub struct NoopMetrics;

impl RuleMetrics for NoopMetrics {}
impl EngineMetrics for NoopMetrics {}
impl PollMetrics for NoopMetrics {}
impl EventMetrics for NoopMetrics {}

// ── Rule store ─────────────────────────────────────────────────────

/// A mutating call observed by [`RecordingRuleStore`], in call order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreCall {
    Ipv4Add(Ipv4Direction, Tether4Key),
    Ipv4Remove(Ipv4Direction, Tether4Key),
    Ipv6DownstreamAdd(TetherDownstream6Key),
    Ipv6DownstreamRemove(TetherDownstream6Key),
    Ipv6UpstreamAdd(TetherUpstream6Key),
    Ipv6UpstreamRemove(TetherUpstream6Key),
    DevAdd(u32),
    SetLimit(u32, Quota),
    GetAndClear(u32),
}

impl StoreCall {
    /// Operation name used for failure injection.
    pub fn op(&self) -> &'static str {
        match self {
            Self::Ipv4Add(Ipv4Direction::Upstream, _) => "ipv4_rule_add_upstream",
            Self::Ipv4Add(Ipv4Direction::Downstream, _) => "ipv4_rule_add_downstream",
            Self::Ipv4Remove(Ipv4Direction::Upstream, _) => "ipv4_rule_remove_upstream",
            Self::Ipv4Remove(Ipv4Direction::Downstream, _) => "ipv4_rule_remove_downstream",
            Self::Ipv6DownstreamAdd(_) => "ipv6_downstream_add",
            Self::Ipv6DownstreamRemove(_) => "ipv6_downstream_remove",
            Self::Ipv6UpstreamAdd(_) => "ipv6_upstream_add",
            Self::Ipv6UpstreamRemove(_) => "ipv6_upstream_remove",
            Self::DevAdd(_) => "dev_add",
            Self::SetLimit(..) => "set_limit",
            Self::GetAndClear(_) => "get_and_clear_stats",
        }
    }
}

#[derive(Debug, Default)]
pub struct RuleStoreState {
    pub capabilities: TableCapabilities,
    pub ipv4_upstream: HashMap<Tether4Key, Tether4Value>,
    pub ipv4_downstream: HashMap<Tether4Key, Tether4Value>,
    pub ipv6_downstream: HashMap<TetherDownstream6Key, Tether6Value>,
    pub ipv6_upstream: HashMap<TetherUpstream6Key, Tether6Value>,
    pub dev: BTreeSet<u32>,
    pub stats: BTreeMap<u32, TetherStatsValue>,
    pub limits: BTreeMap<u32, Quota>,
    pub calls: Vec<StoreCall>,
    pub failing: HashSet<&'static str>,
}

/// In-memory rule store recording every mutating call.
///
/// Clones share state, so a test can keep one handle while the engine
/// under test owns another.
#[derive(Debug, Clone, Default)]
pub struct RecordingRuleStore {
    state: Arc<Mutex<RuleStoreState>>,
}

impl RecordingRuleStore {
    pub fn new(capabilities: TableCapabilities) -> Self {
        Self {
            state: Arc::new(Mutex::new(RuleStoreState {
                capabilities,
                ..RuleStoreState::default()
            })),
        }
    }

    pub fn with_all_tables() -> Self {
        Self::new(TableCapabilities::ALL)
    }

    /// Run a closure against the shared state.
    pub fn with_state<R>(&self, f: impl FnOnce(&mut RuleStoreState) -> R) -> R {
        f(&mut lock(&self.state))
    }

    pub fn calls(&self) -> Vec<StoreCall> {
        self.with_state(|s| s.calls.clone())
    }

    pub fn take_calls(&self) -> Vec<StoreCall> {
        self.with_state(|s| std::mem::take(&mut s.calls))
    }

    /// Make every call of `op` fail until [`Self::clear_failures`].
    pub fn fail_on(&self, op: &'static str) {
        self.with_state(|s| s.failing.insert(op));
    }

    pub fn clear_failures(&self) {
        self.with_state(|s| s.failing.clear());
    }

    pub fn set_stats(&self, if_index: u32, stats: TetherStatsValue) {
        self.with_state(|s| s.stats.insert(if_index, stats));
    }

    pub fn set_last_used(&self, key: &Tether4Key, last_used_ns: u64) {
        self.with_state(|s| {
            if let Some(value) = s.ipv4_upstream.get_mut(key) {
                value.last_used = last_used_ns;
            }
        });
    }

    pub fn limit(&self, if_index: u32) -> Option<Quota> {
        self.with_state(|s| s.limits.get(&if_index).copied())
    }

    pub fn ipv4_rule_count(&self) -> (usize, usize) {
        self.with_state(|s| (s.ipv4_upstream.len(), s.ipv4_downstream.len()))
    }

    pub fn ipv6_downstream_count(&self) -> usize {
        self.with_state(|s| s.ipv6_downstream.len())
    }

    /// Output interface of the upstream forwarding entry stored under `key`.
    pub fn ipv6_forwarding_oif(&self, key: &TetherUpstream6Key) -> Option<u32> {
        self.with_state(|s| s.ipv6_upstream.get(key).map(|value| value.oif))
    }

    fn record(&self, call: StoreCall, table_present: bool) -> Result<(), DomainError> {
        let mut state = lock(&self.state);
        let op = call.op();
        state.calls.push(call);
        if !table_present {
            return Err(DomainError::TableUnavailable(op));
        }
        if state.failing.contains(op) {
            return Err(DomainError::RuleStore(format!("{op}: injected failure")));
        }
        Ok(())
    }

    fn caps(&self) -> TableCapabilities {
        self.with_state(|s| s.capabilities)
    }
}

impl RuleStorePort for RecordingRuleStore {
    fn capabilities(&self) -> TableCapabilities {
        self.caps()
    }

    fn ipv4_rule_add(
        &mut self,
        direction: Ipv4Direction,
        key: &Tether4Key,
        value: &Tether4Value,
    ) -> Result<(), DomainError> {
        let caps = self.caps();
        let present = match direction {
            Ipv4Direction::Upstream => caps.ipv4_upstream,
            Ipv4Direction::Downstream => caps.ipv4_downstream,
        };
        self.record(StoreCall::Ipv4Add(direction, *key), present)?;
        self.with_state(|s| match direction {
            Ipv4Direction::Upstream => s.ipv4_upstream.insert(*key, *value),
            Ipv4Direction::Downstream => s.ipv4_downstream.insert(*key, *value),
        });
        Ok(())
    }

    fn ipv4_rule_remove(
        &mut self,
        direction: Ipv4Direction,
        key: &Tether4Key,
    ) -> Result<bool, DomainError> {
        let caps = self.caps();
        let present = match direction {
            Ipv4Direction::Upstream => caps.ipv4_upstream,
            Ipv4Direction::Downstream => caps.ipv4_downstream,
        };
        self.record(StoreCall::Ipv4Remove(direction, *key), present)?;
        Ok(self.with_state(|s| match direction {
            Ipv4Direction::Upstream => s.ipv4_upstream.remove(key).is_some(),
            Ipv4Direction::Downstream => s.ipv4_downstream.remove(key).is_some(),
        }))
    }

    fn ipv4_upstream_entries(&self) -> Result<Vec<(Tether4Key, Tether4Value)>, DomainError> {
        Ok(self.with_state(|s| s.ipv4_upstream.iter().map(|(k, v)| (*k, *v)).collect()))
    }

    fn ipv6_downstream_add(
        &mut self,
        key: &TetherDownstream6Key,
        value: &Tether6Value,
    ) -> Result<(), DomainError> {
        let present = self.caps().ipv6_downstream;
        self.record(StoreCall::Ipv6DownstreamAdd(*key), present)?;
        self.with_state(|s| s.ipv6_downstream.insert(*key, *value));
        Ok(())
    }

    fn ipv6_downstream_remove(&mut self, key: &TetherDownstream6Key) -> Result<bool, DomainError> {
        let present = self.caps().ipv6_downstream;
        self.record(StoreCall::Ipv6DownstreamRemove(*key), present)?;
        Ok(self.with_state(|s| s.ipv6_downstream.remove(key).is_some()))
    }

    fn ipv6_upstream_add(
        &mut self,
        key: &TetherUpstream6Key,
        value: &Tether6Value,
    ) -> Result<(), DomainError> {
        let present = self.caps().ipv6_upstream;
        self.record(StoreCall::Ipv6UpstreamAdd(*key), present)?;
        self.with_state(|s| s.ipv6_upstream.insert(*key, *value));
        Ok(())
    }

    fn ipv6_upstream_remove(&mut self, key: &TetherUpstream6Key) -> Result<bool, DomainError> {
        let present = self.caps().ipv6_upstream;
        self.record(StoreCall::Ipv6UpstreamRemove(*key), present)?;
        Ok(self.with_state(|s| s.ipv6_upstream.remove(key).is_some()))
    }

    fn dev_add(&mut self, if_index: u32) -> Result<(), DomainError> {
        let present = self.caps().dev;
        self.record(StoreCall::DevAdd(if_index), present)?;
        self.with_state(|s| s.dev.insert(if_index));
        Ok(())
    }

    fn stats_snapshot(&self) -> Result<Vec<(u32, TetherStatsValue)>, DomainError> {
        let state = lock(&self.state);
        if !state.capabilities.stats {
            return Err(DomainError::TableUnavailable("stats_snapshot"));
        }
        if state.failing.contains("stats_snapshot") {
            return Err(DomainError::RuleStore("stats_snapshot: injected failure".into()));
        }
        Ok(state.stats.iter().map(|(k, v)| (*k, *v)).collect())
    }

    fn set_limit(&mut self, if_index: u32, quota: Quota) -> Result<(), DomainError> {
        let present = self.caps().supports_stats();
        self.record(StoreCall::SetLimit(if_index, quota), present)?;
        self.with_state(|s| {
            s.stats.entry(if_index).or_default();
            s.limits.insert(if_index, quota);
        });
        Ok(())
    }

    fn get_and_clear_stats(&mut self, if_index: u32) -> Result<TetherStatsValue, DomainError> {
        let present = self.caps().supports_stats();
        self.record(StoreCall::GetAndClear(if_index), present)?;
        self.with_state(|s| {
            s.limits.remove(&if_index);
            s.stats
                .remove(&if_index)
                .ok_or_else(|| DomainError::NotFound(format!("stats entry for ifindex {if_index}")))
        })
    }
}

// ── Stats reporting ────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct ReporterState {
    pub deltas: Vec<StatsDelta>,
    pub alerts: usize,
    pub limits_reached: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct RecordingStatsReporter {
    state: Arc<Mutex<ReporterState>>,
}

impl RecordingStatsReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn deltas(&self) -> Vec<StatsDelta> {
        lock(&self.state).deltas.clone()
    }

    pub fn alerts(&self) -> usize {
        lock(&self.state).alerts
    }

    pub fn limits_reached(&self) -> Vec<String> {
        lock(&self.state).limits_reached.clone()
    }
}

impl StatsReportPort for RecordingStatsReporter {
    fn notify_stats_updated(&mut self, delta: &StatsDelta) {
        lock(&self.state).deltas.push(delta.clone());
    }

    fn notify_alert_reached(&mut self) {
        lock(&self.state).alerts += 1;
    }

    fn notify_limit_reached(&mut self, iface: &str) {
        lock(&self.state).limits_reached.push(iface.to_string());
    }
}

// ── Conntrack timeout refresh ──────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct RecordingConntrackRefresher {
    requests: Arc<Mutex<Vec<TimeoutRefresh>>>,
}

impl RecordingConntrackRefresher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn requests(&self) -> Vec<TimeoutRefresh> {
        lock(&self.requests).clone()
    }
}

impl ConntrackTimeoutPort for RecordingConntrackRefresher {
    fn refresh_timeout(&mut self, request: &TimeoutRefresh) -> Result<(), DomainError> {
        lock(&self.requests).push(*request);
        Ok(())
    }
}

// ── Clock ──────────────────────────────────────────────────────────

/// Clock that only moves when told to.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now_ns: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new(start: Duration) -> Self {
        let clock = Self::default();
        clock.set(start);
        clock
    }

    pub fn set(&self, now: Duration) {
        self.now_ns
            .store(u64::try_from(now.as_nanos()).unwrap_or(u64::MAX), Ordering::SeqCst);
    }

    pub fn advance(&self, by: Duration) {
        self.now_ns.fetch_add(
            u64::try_from(by.as_nanos()).unwrap_or(u64::MAX),
            Ordering::SeqCst,
        );
    }
}

impl ClockPort for ManualClock {
    fn now_boot_ns(&self) -> u64 {
        self.now_ns.load(Ordering::SeqCst)
    }
}
