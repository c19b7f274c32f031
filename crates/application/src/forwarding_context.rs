use std::collections::HashSet;
use std::sync::Arc;

use domain::common::error::DomainError;
use domain::common::tally::{TallyTransition, UpstreamRuleTally};
use domain::stats::engine::StatsTracker;
use domain::stats::entity::Quota;
use domain::upstream::entity::InterfaceNames;
use ports::secondary::metrics_port::MetricsPort;
use ports::secondary::rule_store_port::{RuleStorePort, TableCapabilities};
use serde::Serialize;
use tracing::{debug, warn};

/// Whether a rule engine pushes rules to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineMode {
    Offloading,
    /// A required table is missing. Requests are tracked but never pushed.
    Disabled,
}

impl EngineMode {
    pub fn from_support(supported: bool) -> Self {
        if supported {
            Self::Offloading
        } else {
            Self::Disabled
        }
    }
}

/// Interfaces already written to the redirect device table.
#[derive(Debug, Default)]
pub struct DevMapTracker {
    seen: HashSet<u32>,
}

impl DevMapTracker {
    /// Returns `true` the first time an index is marked.
    pub fn mark(&mut self, if_index: u32) -> bool {
        self.seen.insert(if_index)
    }

    pub fn unmark(&mut self, if_index: u32) {
        self.seen.remove(&if_index);
    }

    pub fn contains(&self, if_index: u32) -> bool {
        self.seen.contains(&if_index)
    }
}

/// State shared by both rule engines: the rule store strategy, the
/// per-upstream tally driving limit install and stats teardown, and the
/// stats tracker those triggers feed.
pub struct ForwardingContext {
    pub store: Box<dyn RuleStorePort>,
    pub capabilities: TableCapabilities,
    pub tally: UpstreamRuleTally,
    pub stats: StatsTracker,
    pub names: InterfaceNames,
    pub dev_map: DevMapTracker,
    pub metrics: Arc<dyn MetricsPort>,
}

impl ForwardingContext {
    pub fn new(store: Box<dyn RuleStorePort>, metrics: Arc<dyn MetricsPort>) -> Self {
        let capabilities = store.capabilities();
        Self {
            store,
            capabilities,
            tally: UpstreamRuleTally::new(),
            stats: StatsTracker::new(),
            names: InterfaceNames::new(),
            dev_map: DevMapTracker::default(),
            metrics,
        }
    }

    /// Count a newly installed rule. On the first rule for an upstream the
    /// configured limit (unlimited by default) is pushed.
    pub fn rule_installed(&mut self, upstream_if: u32) {
        if self.tally.add(upstream_if) != TallyTransition::First {
            return;
        }
        let iface = self.names.display_name(upstream_if);
        let quota = self.stats.limit_for(&iface);
        self.apply_limit(upstream_if, quota);
    }

    /// Count a removed rule. On the last rule for an upstream its counters
    /// are read and cleared, and folded into carry-over.
    pub fn rule_removed(&mut self, upstream_if: u32) {
        if self.tally.remove(upstream_if) != TallyTransition::Last {
            return;
        }
        match self.store.get_and_clear_stats(upstream_if) {
            Ok(final_stats) => {
                debug!(if_index = upstream_if, "upstream stats cleared after last rule");
                self.stats.fold_final(upstream_if, final_stats.into());
            }
            Err(e) => self.store_error("get_and_clear_stats", &e),
        }
    }

    /// Push a limit to the store and start watching it.
    pub fn apply_limit(&mut self, upstream_if: u32, quota: Quota) {
        match self.store.set_limit(upstream_if, quota) {
            Ok(()) => self.stats.limit_installed(upstream_if, quota),
            Err(e) => self.store_error("set_limit", &e),
        }
    }

    /// Write an interface to the device table once per coordinator lifetime.
    /// Skipped when the store has no device table.
    pub fn ensure_dev(&mut self, if_index: u32) {
        if !self.capabilities.dev || !self.dev_map.mark(if_index) {
            return;
        }
        if let Err(e) = self.store.dev_add(if_index) {
            self.dev_map.unmark(if_index);
            self.store_error("dev_add", &e);
        }
    }

    pub fn store_error(&self, operation: &str, err: &DomainError) {
        warn!(operation, error = %err, "rule store operation failed");
        self.metrics.record_rule_store_error(operation);
    }
}
