pub mod clock_port;
pub mod conntrack_timeout_port;
pub mod metrics_port;
pub mod netd_port;
pub mod rule_store_port;
pub mod stats_report_port;
