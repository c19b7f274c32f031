use std::collections::BTreeMap;

use domain::stats::entity::{ForwardedStats, StatsDelta};
use ports::secondary::stats_report_port::StatsReportPort;

/// Stats reporter that logs every notification via tracing.
///
/// Used when no external stats consumer is attached. Keeps the running
/// per-interface totals it has reported so they can be logged on shutdown.
#[derive(Debug, Default)]
pub struct LogStatsReporter {
    totals: BTreeMap<String, ForwardedStats>,
    alerts: u64,
    limits_reached: Vec<String>,
}

impl LogStatsReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn totals(&self) -> &BTreeMap<String, ForwardedStats> {
        &self.totals
    }

    pub fn alerts_reached(&self) -> u64 {
        self.alerts
    }

    pub fn limits_reached(&self) -> &[String] {
        &self.limits_reached
    }
}

impl StatsReportPort for LogStatsReporter {
    fn notify_stats_updated(&mut self, delta: &StatsDelta) {
        for entry in &delta.iface_records {
            let total = self.totals.entry(entry.iface.clone()).or_default();
            *total = total.saturating_add(&entry.stats);
            tracing::info!(
                iface = %entry.iface,
                uid = entry.uid,
                rx_bytes = entry.stats.rx_bytes,
                rx_packets = entry.stats.rx_packets,
                tx_bytes = entry.stats.tx_bytes,
                tx_packets = entry.stats.tx_packets,
                "offloaded stats updated"
            );
        }
    }

    fn notify_alert_reached(&mut self) {
        self.alerts += 1;
        tracing::warn!(alerts = self.alerts, "offload alert quota reached");
    }

    fn notify_limit_reached(&mut self, iface: &str) {
        self.limits_reached.push(iface.to_string());
        tracing::warn!(iface, "offload data limit reached");
    }
}
