// Focused sub-traits for recording Prometheus metrics, grouped by concern.
//
// All methods take `&self` because the underlying implementation uses
// atomic operations (interior mutability via `prometheus-client`).
//
// Default implementations are no-ops, allowing test mocks to implement
// only the sub-traits relevant to the service under test.

// ── Forwarding rule metrics ────────────────────────────────────────

pub trait RuleMetrics: Send + Sync {
    /// Record a rule written to the rule store (`family` is ipv4/ipv6).
    fn record_rule_installed(&self, _family: &str) {}

    /// Record a rule deleted from the rule store.
    fn record_rule_removed(&self, _family: &str) {}

    /// Set the number of rules currently tracked for a family.
    fn set_rules_active(&self, _family: &str, _count: u64) {}

    /// Record a failed rule store operation.
    fn record_rule_store_error(&self, _operation: &str) {}
}

// ── Engine status metrics ──────────────────────────────────────────

pub trait EngineMetrics: Send + Sync {
    /// Set whether a rule engine is offloading (true) or disabled (false).
    fn set_engine_offloading(&self, _engine: &str, _offloading: bool) {}
}

// ── Polling metrics ────────────────────────────────────────────────

pub trait PollMetrics: Send + Sync {
    /// Record a completed stats poll.
    fn record_stats_poll(&self) {}

    /// Record bytes forwarded on an interface and direction (rx/tx).
    fn record_bytes_forwarded(&self, _interface: &str, _direction: &str, _bytes: u64) {}

    /// Record a conntrack timeout refresh with its result (ok/error).
    fn record_conntrack_refresh(&self, _result: &str) {}
}

// ── Event pipeline metrics ─────────────────────────────────────────

pub trait EventMetrics: Send + Sync {
    /// Record a conntrack event handed to the coordinator.
    fn record_conntrack_event(&self, _kind: &str) {}

    /// Record a dropped event with a reason label.
    fn record_event_dropped(&self, _reason: &str) {}
}

// ── Composite super-trait ──────────────────────────────────────────

/// Unified metrics port composing all sub-traits.
///
/// Services accept `Arc<dyn MetricsPort>`.
pub trait MetricsPort: RuleMetrics + EngineMetrics + PollMetrics + EventMetrics {}

/// Blanket implementation: any type implementing all sub-traits automatically
/// implements `MetricsPort`.
impl<T> MetricsPort for T where T: RuleMetrics + EngineMetrics + PollMetrics + EventMetrics {}
