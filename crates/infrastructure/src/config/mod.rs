//! Agent configuration: structs, parsing, and validation.
//!
//! - `common`: `ConfigError` and shared validation helpers
//! - this module: the `agent` and `offload` sections

mod common;

pub use common::ConfigError;

use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use domain::ipv4::policy::{DEFAULT_NON_OFFLOADED_TCP_PORTS, OffloadPolicy};
use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_BIND_ADDRESS, DEFAULT_CONNTRACK_TOOL, DEFAULT_MAP_PIN_DIR, DEFAULT_METRICS_PORT,
    DEFAULT_POLL_INTERVAL_MS, EVENT_CHANNEL_CAPACITY,
};
use common::{default_true, require_non_empty, validation, warn_if_world_writable};

// ── Top-level config ───────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AgentConfig {
    #[serde(default)]
    pub agent: AgentInfo,

    #[serde(default)]
    pub offload: OffloadConfig,
}

impl AgentConfig {
    /// Load config from a YAML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        warn_if_world_writable(path, "config file");
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse config from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml_ng::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the config after deserialization.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.agent.metrics_port == 0 {
            return Err(validation("agent.metrics_port", "port must be non-zero"));
        }
        if self.agent.bind_address.parse::<IpAddr>().is_err() {
            return Err(validation(
                "agent.bind_address",
                format!("'{}' is not an IP address", self.agent.bind_address),
            ));
        }

        require_non_empty("offload.map_pin_dir", &self.offload.map_pin_dir)?;
        require_non_empty("offload.conntrack_tool", &self.offload.conntrack_tool)?;
        if self.offload.event_channel_capacity == 0 {
            return Err(validation(
                "offload.event_channel_capacity",
                "must be greater than zero",
            ));
        }
        if let Some(idx) = self
            .offload
            .non_offloaded_tcp_ports
            .iter()
            .position(|p| *p == 0)
        {
            return Err(validation(
                &format!("offload.non_offloaded_tcp_ports[{idx}]"),
                "port must be non-zero",
            ));
        }
        Ok(())
    }
}

// ── Agent section ──────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AgentInfo {
    #[serde(default = "default_log_level")]
    pub log_level: LogLevel,

    #[serde(default = "default_log_format")]
    pub log_format: LogFormat,

    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,

    /// Address of the metrics/health listener. Loopback by default.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
}

impl Default for AgentInfo {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
            metrics_port: default_metrics_port(),
            bind_address: default_bind_address(),
        }
    }
}

fn default_log_level() -> LogLevel {
    LogLevel::Info
}
fn default_log_format() -> LogFormat {
    LogFormat::Json
}
fn default_metrics_port() -> u16 {
    DEFAULT_METRICS_PORT
}
fn default_bind_address() -> String {
    DEFAULT_BIND_ADDRESS.to_string()
}

// ── Offload section ────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OffloadConfig {
    /// When false the agent starts but never opens the offload maps.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Directory holding the maps pinned by the tc offload programs.
    #[serde(default = "default_map_pin_dir")]
    pub map_pin_dir: String,

    /// Stats polling interval. Values below the 5000 ms floor are raised.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// TCP destination ports never offloaded (protocol helpers need them).
    #[serde(default = "default_non_offloaded_tcp_ports")]
    pub non_offloaded_tcp_ports: Vec<u16>,

    /// Path or name of the `conntrack` command-line tool.
    #[serde(default = "default_conntrack_tool")]
    pub conntrack_tool: String,

    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,
}

impl Default for OffloadConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            map_pin_dir: default_map_pin_dir(),
            poll_interval_ms: default_poll_interval_ms(),
            non_offloaded_tcp_ports: default_non_offloaded_tcp_ports(),
            conntrack_tool: default_conntrack_tool(),
            event_channel_capacity: default_event_channel_capacity(),
        }
    }
}

impl OffloadConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn map_pin_path(&self) -> PathBuf {
        PathBuf::from(&self.map_pin_dir)
    }

    pub fn policy(&self) -> OffloadPolicy {
        OffloadPolicy::new(self.non_offloaded_tcp_ports.iter().copied())
    }
}

fn default_map_pin_dir() -> String {
    DEFAULT_MAP_PIN_DIR.to_string()
}
fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}
fn default_non_offloaded_tcp_ports() -> Vec<u16> {
    DEFAULT_NON_OFFLOADED_TCP_PORTS.to_vec()
}
fn default_conntrack_tool() -> String {
    DEFAULT_CONNTRACK_TOOL.to_string()
}
fn default_event_channel_capacity() -> usize {
    EVENT_CHANNEL_CAPACITY
}

// ── Log level ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Trace => "trace",
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for LogLevel {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "error" => Ok(Self::Error),
            "warn" | "warning" => Ok(Self::Warn),
            "info" => Ok(Self::Info),
            "debug" => Ok(Self::Debug),
            "trace" => Ok(Self::Trace),
            _ => Err(ConfigError::InvalidValue {
                field: "log_level".to_string(),
                value: s.to_string(),
                expected: "error|warn|info|debug|trace".to_string(),
            }),
        }
    }
}

// ── Log format ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Json,
    Text,
}

impl LogFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Text => "text",
        }
    }
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "text" | "pretty" => Ok(Self::Text),
            _ => Err(ConfigError::InvalidValue {
                field: "log_format".to_string(),
                value: s.to_string(),
                expected: "json|text".to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use super::*;
    use domain::common::entity::L4Protocol;
    use domain::conntrack::entity::FlowTuple;

    #[test]
    fn empty_document_uses_defaults() {
        let config = AgentConfig::from_yaml("{}").unwrap();
        assert_eq!(config.agent.log_level, LogLevel::Info);
        assert_eq!(config.agent.log_format, LogFormat::Json);
        assert_eq!(config.agent.metrics_port, DEFAULT_METRICS_PORT);
        assert!(config.offload.enabled);
        assert_eq!(config.offload.map_pin_dir, "/sys/fs/bpf/tethering");
        assert_eq!(config.offload.poll_interval(), Duration::from_secs(5));
        assert_eq!(config.offload.non_offloaded_tcp_ports, vec![21, 1723]);
        assert_eq!(config.offload.conntrack_tool, "conntrack");
    }

    #[test]
    fn load_full_config() {
        let yaml = r"
agent:
  log_level: debug
  log_format: text
  metrics_port: 9191
  bind_address: 0.0.0.0
offload:
  enabled: true
  map_pin_dir: /sys/fs/bpf/tether
  poll_interval_ms: 7500
  non_offloaded_tcp_ports: [21]
  conntrack_tool: /usr/sbin/conntrack
  event_channel_capacity: 128
";
        let config = AgentConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.agent.log_level, LogLevel::Debug);
        assert_eq!(config.agent.log_format, LogFormat::Text);
        assert_eq!(config.agent.metrics_port, 9191);
        assert_eq!(config.offload.map_pin_path(), PathBuf::from("/sys/fs/bpf/tether"));
        assert_eq!(config.offload.poll_interval(), Duration::from_millis(7_500));
        assert_eq!(config.offload.event_channel_capacity, 128);
    }

    #[test]
    fn configured_ports_drive_policy() {
        let yaml = r"
offload:
  non_offloaded_tcp_ports: [8080]
";
        let policy = AgentConfig::from_yaml(yaml).unwrap().offload.policy();
        let tuple = FlowTuple {
            src: Ipv4Addr::new(192, 168, 43, 2),
            dst: Ipv4Addr::new(1, 1, 1, 1),
            src_port: 40_000,
            dst_port: 8080,
        };
        assert!(!policy.is_offloadable(L4Protocol::Tcp, &tuple));
        let ftp = FlowTuple {
            dst_port: 21,
            ..tuple
        };
        assert!(policy.is_offloadable(L4Protocol::Tcp, &ftp));
    }

    #[test]
    fn unknown_top_level_field_rejected() {
        let yaml = r"
firewall:
  enabled: true
";
        assert!(matches!(
            AgentConfig::from_yaml(yaml),
            Err(ConfigError::Yaml(_))
        ));
    }

    #[test]
    fn unknown_offload_field_rejected() {
        let yaml = r"
offload:
  backend: netd
";
        assert!(AgentConfig::from_yaml(yaml).is_err());
    }

    #[test]
    fn empty_pin_dir_rejected() {
        let yaml = r#"
offload:
  map_pin_dir: ""
"#;
        let err = AgentConfig::from_yaml(yaml).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Validation { ref field, .. } if field == "offload.map_pin_dir"
        ));
    }

    #[test]
    fn zero_channel_capacity_rejected() {
        let yaml = r"
offload:
  event_channel_capacity: 0
";
        let err = AgentConfig::from_yaml(yaml).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Validation { ref field, .. } if field == "offload.event_channel_capacity"
        ));
    }

    #[test]
    fn zero_port_rejected() {
        let yaml = r"
offload:
  non_offloaded_tcp_ports: [21, 0]
";
        let err = AgentConfig::from_yaml(yaml).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Validation { ref field, .. } if field == "offload.non_offloaded_tcp_ports[1]"
        ));
    }

    #[test]
    fn bad_bind_address_rejected() {
        let yaml = r"
agent:
  bind_address: localhost
";
        assert!(AgentConfig::from_yaml(yaml).is_err());
    }

    #[test]
    fn short_poll_interval_is_kept_for_scheduler_to_raise() {
        let yaml = r"
offload:
  poll_interval_ms: 100
";
        let config = AgentConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.offload.poll_interval(), Duration::from_millis(100));
    }

    #[test]
    fn log_level_parsing() {
        assert_eq!("WARNING".parse::<LogLevel>().unwrap(), LogLevel::Warn);
        assert!("verbose".parse::<LogLevel>().is_err());
        assert_eq!("pretty".parse::<LogFormat>().unwrap(), LogFormat::Text);
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = AgentConfig::load(Path::new("/nonexistent/tether-offload.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
