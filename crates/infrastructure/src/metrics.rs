use ports::secondary::metrics_port::{EngineMetrics, EventMetrics, PollMetrics, RuleMetrics};
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::registry::Registry;

// ── Label types ─────────────────────────────────────────────────────

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct FamilyLabels {
    pub family: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct OperationLabels {
    pub operation: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct EngineLabels {
    pub engine: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct BytesLabels {
    pub interface: String,
    pub direction: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ResultLabels {
    pub result: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct KindLabels {
    pub kind: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ReasonLabels {
    pub reason: String,
}

// ── Agent metrics registry ──────────────────────────────────────────

/// Prometheus metrics registry for the agent.
///
/// All metric families use interior mutability (atomics), so recording
/// metrics only requires `&self`. Wrap in `Arc` for multi-task sharing.
pub struct AgentMetrics {
    registry: Registry,
    pub rules_installed_total: Family<FamilyLabels, Counter>,
    pub rules_removed_total: Family<FamilyLabels, Counter>,
    pub rules_active: Family<FamilyLabels, Gauge>,
    pub rule_store_errors_total: Family<OperationLabels, Counter>,
    pub engine_offloading: Family<EngineLabels, Gauge>,
    pub stats_polls_total: Counter,
    pub bytes_forwarded_total: Family<BytesLabels, Counter>,
    pub conntrack_refreshes_total: Family<ResultLabels, Counter>,
    pub conntrack_events_total: Family<KindLabels, Counter>,
    pub events_dropped_total: Family<ReasonLabels, Counter>,
}

impl AgentMetrics {
    /// Create a new metrics registry with all metrics registered under
    /// the `tether_offload` prefix.
    pub fn new() -> Self {
        let mut registry = Registry::with_prefix("tether_offload");

        let rules_installed_total = Family::<FamilyLabels, Counter>::default();
        registry.register(
            "rules_installed",
            "Forwarding rules written to the rule store",
            rules_installed_total.clone(),
        );

        let rules_removed_total = Family::<FamilyLabels, Counter>::default();
        registry.register(
            "rules_removed",
            "Forwarding rules deleted from the rule store",
            rules_removed_total.clone(),
        );

        let rules_active = Family::<FamilyLabels, Gauge>::default();
        registry.register(
            "rules_active",
            "Forwarding rules currently tracked per address family",
            rules_active.clone(),
        );

        let rule_store_errors_total = Family::<OperationLabels, Counter>::default();
        registry.register(
            "rule_store_errors",
            "Failed rule store operations",
            rule_store_errors_total.clone(),
        );

        let engine_offloading = Family::<EngineLabels, Gauge>::default();
        registry.register(
            "engine_offloading",
            "Rule engine status (1=offloading, 0=disabled)",
            engine_offloading.clone(),
        );

        let stats_polls_total = Counter::default();
        registry.register(
            "stats_polls",
            "Completed stats polling cycles",
            stats_polls_total.clone(),
        );

        let bytes_forwarded_total = Family::<BytesLabels, Counter>::default();
        registry.register(
            "bytes_forwarded",
            "Bytes forwarded by the offload fast path",
            bytes_forwarded_total.clone(),
        );

        let conntrack_refreshes_total = Family::<ResultLabels, Counter>::default();
        registry.register(
            "conntrack_refreshes",
            "Conntrack timeout refresh requests by result",
            conntrack_refreshes_total.clone(),
        );

        let conntrack_events_total = Family::<KindLabels, Counter>::default();
        registry.register(
            "conntrack_events",
            "Conntrack events handled by the coordinator",
            conntrack_events_total.clone(),
        );

        let events_dropped_total = Family::<ReasonLabels, Counter>::default();
        registry.register(
            "events_dropped",
            "Events dropped before reaching the coordinator",
            events_dropped_total.clone(),
        );

        Self {
            registry,
            rules_installed_total,
            rules_removed_total,
            rules_active,
            rule_store_errors_total,
            engine_offloading,
            stats_polls_total,
            bytes_forwarded_total,
            conntrack_refreshes_total,
            conntrack_events_total,
            events_dropped_total,
        }
    }

    /// Encode all registered metrics in `OpenMetrics` text format.
    pub fn encode(&self) -> String {
        let mut buffer = String::new();
        if let Err(e) = prometheus_client::encoding::text::encode(&mut buffer, &self.registry) {
            tracing::warn!(error = %e, "metrics encoding failed");
            buffer.clear();
        }
        buffer
    }
}

impl Default for AgentMetrics {
    fn default() -> Self {
        Self::new()
    }
}

fn family(family: &str) -> FamilyLabels {
    FamilyLabels {
        family: family.to_string(),
    }
}

// ── Sub-trait implementations ──────────────────────────────────────

impl RuleMetrics for AgentMetrics {
    fn record_rule_installed(&self, family_name: &str) {
        self.rules_installed_total
            .get_or_create(&family(family_name))
            .inc();
    }

    fn record_rule_removed(&self, family_name: &str) {
        self.rules_removed_total
            .get_or_create(&family(family_name))
            .inc();
    }

    fn set_rules_active(&self, family_name: &str, count: u64) {
        self.rules_active
            .get_or_create(&family(family_name))
            .set(count.try_into().unwrap_or(i64::MAX));
    }

    fn record_rule_store_error(&self, operation: &str) {
        self.rule_store_errors_total
            .get_or_create(&OperationLabels {
                operation: operation.to_string(),
            })
            .inc();
    }
}

impl EngineMetrics for AgentMetrics {
    fn set_engine_offloading(&self, engine: &str, offloading: bool) {
        self.engine_offloading
            .get_or_create(&EngineLabels {
                engine: engine.to_string(),
            })
            .set(i64::from(offloading));
    }
}

impl PollMetrics for AgentMetrics {
    fn record_stats_poll(&self) {
        self.stats_polls_total.inc();
    }

    fn record_bytes_forwarded(&self, interface: &str, direction: &str, bytes: u64) {
        self.bytes_forwarded_total
            .get_or_create(&BytesLabels {
                interface: interface.to_string(),
                direction: direction.to_string(),
            })
            .inc_by(bytes);
    }

    fn record_conntrack_refresh(&self, result: &str) {
        self.conntrack_refreshes_total
            .get_or_create(&ResultLabels {
                result: result.to_string(),
            })
            .inc();
    }
}

impl EventMetrics for AgentMetrics {
    fn record_conntrack_event(&self, kind: &str) {
        self.conntrack_events_total
            .get_or_create(&KindLabels {
                kind: kind.to_string(),
            })
            .inc();
    }

    fn record_event_dropped(&self, reason: &str) {
        self.events_dropped_total
            .get_or_create(&ReasonLabels {
                reason: reason.to_string(),
            })
            .inc();
    }
}

// MetricsPort comes from the blanket impl over the sub-traits.
