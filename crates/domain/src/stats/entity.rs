use ebpf_common::tether::{QUOTA_UNLIMITED, TetherStatsValue};
use serde::Serialize;

use super::error::StatsError;

/// Reporting uid for per-interface totals.
pub const UID_ALL: i32 = -1;

/// Reporting uid that attributes offloaded traffic to tethering.
pub const UID_TETHERING: i32 = -5;

/// Byte/packet counters forwarded on one interface.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ForwardedStats {
    pub rx_bytes: u64,
    pub rx_packets: u64,
    pub tx_bytes: u64,
    pub tx_packets: u64,
}

impl ForwardedStats {
    /// Delta from `previous` to `self`. A counter that went backwards was
    /// reset, so its current value is the whole delta.
    pub fn delta_since(&self, previous: &Self) -> Self {
        fn diff(cur: u64, prev: u64) -> u64 {
            if cur < prev { cur } else { cur - prev }
        }
        Self {
            rx_bytes: diff(self.rx_bytes, previous.rx_bytes),
            rx_packets: diff(self.rx_packets, previous.rx_packets),
            tx_bytes: diff(self.tx_bytes, previous.tx_bytes),
            tx_packets: diff(self.tx_packets, previous.tx_packets),
        }
    }

    pub fn saturating_add(&self, other: &Self) -> Self {
        Self {
            rx_bytes: self.rx_bytes.saturating_add(other.rx_bytes),
            rx_packets: self.rx_packets.saturating_add(other.rx_packets),
            tx_bytes: self.tx_bytes.saturating_add(other.tx_bytes),
            tx_packets: self.tx_packets.saturating_add(other.tx_packets),
        }
    }

    pub fn total_bytes(&self) -> u64 {
        self.rx_bytes.saturating_add(self.tx_bytes)
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::default()
    }
}

impl From<TetherStatsValue> for ForwardedStats {
    fn from(v: TetherStatsValue) -> Self {
        Self {
            rx_bytes: v.rx_bytes,
            rx_packets: v.rx_packets,
            tx_bytes: v.tx_bytes,
            tx_packets: v.tx_packets,
        }
    }
}

/// Validated data limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Quota {
    Unlimited,
    Bytes(u64),
}

impl Quota {
    /// Accepts `0..=i64::MAX` or [`QUOTA_UNLIMITED`]; anything else is rejected.
    pub fn from_raw(raw: i64) -> Result<Self, StatsError> {
        if raw == QUOTA_UNLIMITED {
            return Ok(Self::Unlimited);
        }
        u64::try_from(raw)
            .map(Self::Bytes)
            .map_err(|_| StatsError::InvalidQuota(raw))
    }

    pub fn to_raw(self) -> i64 {
        match self {
            Self::Unlimited => QUOTA_UNLIMITED,
            Self::Bytes(b) => i64::try_from(b).unwrap_or(i64::MAX),
        }
    }
}

/// One reported stats record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatsEntry {
    pub iface: String,
    pub uid: i32,
    pub stats: ForwardedStats,
}

/// Deltas pushed to the stats-reporting boundary after a poll.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatsDelta {
    pub iface_records: Vec<StatsEntry>,
    pub uid_records: Vec<StatsEntry>,
}

impl StatsDelta {
    pub fn push(&mut self, iface: String, stats: ForwardedStats) {
        self.uid_records.push(StatsEntry {
            iface: iface.clone(),
            uid: UID_TETHERING,
            stats,
        });
        self.iface_records.push(StatsEntry {
            iface,
            uid: UID_ALL,
            stats,
        });
    }

    pub fn is_empty(&self) -> bool {
        self.iface_records.is_empty()
    }

    pub fn total_bytes(&self) -> u64 {
        self.iface_records
            .iter()
            .fold(0u64, |acc, e| acc.saturating_add(e.stats.total_bytes()))
    }

    /// Delta for one interface, summed over its records.
    pub fn for_iface(&self, iface: &str) -> ForwardedStats {
        self.iface_records
            .iter()
            .filter(|e| e.iface == iface)
            .fold(ForwardedStats::default(), |acc, e| acc.saturating_add(&e.stats))
    }
}
