use std::time::Duration;

// ── Paths ──────────────────────────────────────────────────────────

pub const DEFAULT_CONFIG_PATH: &str = "/etc/tether-offload/config.yaml";
pub const DEFAULT_MAP_PIN_DIR: &str = "/sys/fs/bpf/tethering";
pub const DEFAULT_CONNTRACK_TOOL: &str = "conntrack";

// ── Network defaults ───────────────────────────────────────────────

pub const DEFAULT_METRICS_PORT: u16 = 9090;
pub const DEFAULT_BIND_ADDRESS: &str = "127.0.0.1";

// ── Offload defaults ───────────────────────────────────────────────

/// Floor of the stats polling interval; smaller configured values are raised.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 5_000;

// ── Channel capacities ─────────────────────────────────────────────

pub const EVENT_CHANNEL_CAPACITY: usize = 4_096;

// ── Timeouts ───────────────────────────────────────────────────────

pub const GRACEFUL_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_metrics_port_is_valid() {
        assert_ne!(DEFAULT_METRICS_PORT, 0);
        assert!(DEFAULT_POLL_INTERVAL_MS >= 1_000);
    }

    #[test]
    fn channel_capacity_is_positive() {
        assert!(EVENT_CHANNEL_CAPACITY > 0);
    }

    #[test]
    fn shutdown_timeout_is_reasonable() {
        assert!(GRACEFUL_SHUTDOWN_TIMEOUT.as_secs() >= 1);
        assert!(GRACEFUL_SHUTDOWN_TIMEOUT.as_secs() <= 30);
    }
}
