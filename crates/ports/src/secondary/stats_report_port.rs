use domain::stats::entity::StatsDelta;

/// Secondary port toward the system's stats/quota consumer.
///
/// Notifications are fire-and-forget; implementations log their own
/// delivery failures.
pub trait StatsReportPort: Send {
    /// Per-interface and per-uid deltas since the previous push.
    fn notify_stats_updated(&mut self, delta: &StatsDelta);

    /// The global alert quota was reached.
    fn notify_alert_reached(&mut self);

    /// The data limit installed for `iface` is used up.
    fn notify_limit_reached(&mut self, iface: &str);
}
