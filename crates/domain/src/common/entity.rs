use std::fmt;
use std::str::FromStr;

use ebpf_common::tether::{IPPROTO_TCP, IPPROTO_UDP, NULL_MAC};
use serde::{Deserialize, Serialize, Serializer};

/// Ethernet hardware address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MacAddr(pub [u8; 6]);

impl MacAddr {
    /// All-zero address, used on rawip interfaces that carry no L2 header.
    pub const NULL: Self = Self(NULL_MAC);

    pub fn is_null(&self) -> bool {
        self.0 == NULL_MAC
    }

    pub fn octets(&self) -> [u8; 6] {
        self.0
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}

impl FromStr for MacAddr {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut out = [0u8; 6];
        let mut parts = s.split(':');
        for byte in &mut out {
            let part = parts
                .next()
                .ok_or_else(|| format!("MAC address '{s}' has fewer than 6 octets"))?;
            if part.len() != 2 {
                return Err(format!("invalid octet '{part}' in MAC address '{s}'"));
            }
            *byte = u8::from_str_radix(part, 16)
                .map_err(|_| format!("invalid octet '{part}' in MAC address '{s}'"))?;
        }
        if parts.next().is_some() {
            return Err(format!("MAC address '{s}' has more than 6 octets"));
        }
        Ok(Self(out))
    }
}

impl Serialize for MacAddr {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Transport-layer protocol of a tracked flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum L4Protocol {
    Tcp,
    Udp,
    Other(u8),
}

impl L4Protocol {
    /// Convert to the IP protocol number used in offload map keys.
    pub fn to_u8(self) -> u8 {
        match self {
            Self::Tcp => IPPROTO_TCP,
            Self::Udp => IPPROTO_UDP,
            Self::Other(n) => n,
        }
    }

    pub fn from_u8(n: u8) -> Self {
        match n {
            IPPROTO_TCP => Self::Tcp,
            IPPROTO_UDP => Self::Udp,
            other => Self::Other(other),
        }
    }

    pub fn is_offloadable(self) -> bool {
        matches!(self, Self::Tcp | Self::Udp)
    }
}

impl fmt::Display for L4Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp => f.write_str("tcp"),
            Self::Udp => f.write_str("udp"),
            Self::Other(n) => write!(f, "{n}"),
        }
    }
}

/// Link technology of an upstream network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportType {
    Cellular,
    Wifi,
    Bluetooth,
    Ethernet,
    #[default]
    Unknown,
}
