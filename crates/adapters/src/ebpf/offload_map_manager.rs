use std::path::{Path, PathBuf};

use aya::maps::{DevMapHash, HashMap, Map, MapData, MapError, MapType};
use domain::common::error::DomainError;
use domain::stats::entity::Quota;
use ebpf_common::tether::{
    LIMIT_UNLIMITED, MAP_DEV, MAP_DOWNSTREAM4, MAP_DOWNSTREAM6, MAP_LIMIT, MAP_STATS,
    MAP_UPSTREAM4, MAP_UPSTREAM6, Tether4Key, Tether4Value, Tether6Value, TetherDownstream6Key,
    TetherLimitValue, TetherStatsValue, TetherUpstream6Key,
};
use ports::secondary::rule_store_port::{Ipv4Direction, RuleStorePort, TableCapabilities};
use tracing::{info, warn};

/// Rule store backed by the offload maps pinned by the tc programs.
///
/// Maps are opened from `<pin_dir>/<map name>`:
/// - `map_offload_tether_{upstream,downstream}4_map`: `HashMap<Tether4Key, Tether4Value>`
/// - `map_offload_tether_downstream6_map`: `HashMap<TetherDownstream6Key, Tether6Value>`
/// - `map_offload_tether_upstream6_map`: `HashMap<TetherUpstream6Key, Tether6Value>`
/// - `map_offload_tether_stats_map`: `HashMap<u32, TetherStatsValue>`
/// - `map_offload_tether_limit_map`: `HashMap<u32, TetherLimitValue>`
/// - `map_offload_tether_dev_map`: `DevMapHash` (ifindex to itself)
///
/// A map that cannot be opened is left out; [`RuleStorePort::capabilities`]
/// reports which ones are present.
pub struct OffloadMapManager {
    pin_dir: PathBuf,
    upstream4: Option<HashMap<MapData, Tether4Key, Tether4Value>>,
    downstream4: Option<HashMap<MapData, Tether4Key, Tether4Value>>,
    downstream6: Option<HashMap<MapData, TetherDownstream6Key, Tether6Value>>,
    upstream6: Option<HashMap<MapData, TetherUpstream6Key, Tether6Value>>,
    stats: Option<HashMap<MapData, u32, TetherStatsValue>>,
    limit: Option<HashMap<MapData, u32, TetherLimitValue>>,
    dev: Option<DevMapHash<MapData>>,
}

impl OffloadMapManager {
    /// Open every pinned offload map under `pin_dir`. Fails only if the
    /// directory itself is missing.
    pub fn open(pin_dir: impl AsRef<Path>) -> Result<Self, anyhow::Error> {
        let pin_dir = pin_dir.as_ref().to_path_buf();
        if !pin_dir.is_dir() {
            anyhow::bail!("map pin directory '{}' not found", pin_dir.display());
        }

        let manager = Self {
            upstream4: open_hash_map(&pin_dir, MAP_UPSTREAM4),
            downstream4: open_hash_map(&pin_dir, MAP_DOWNSTREAM4),
            downstream6: open_hash_map(&pin_dir, MAP_DOWNSTREAM6),
            upstream6: open_hash_map(&pin_dir, MAP_UPSTREAM6),
            stats: open_hash_map(&pin_dir, MAP_STATS),
            limit: open_hash_map(&pin_dir, MAP_LIMIT),
            dev: open_pinned(&pin_dir, MAP_DEV).and_then(|map| {
                DevMapHash::try_from(map)
                    .map_err(|e| warn!(map = MAP_DEV, error = %e, "unexpected map type"))
                    .ok()
            }),
            pin_dir,
        };

        let caps = manager.capabilities();
        info!(
            pin_dir = %manager.pin_dir.display(),
            missing = ?caps.missing(),
            "offload maps opened"
        );
        Ok(manager)
    }

    fn ipv4_table(
        &mut self,
        direction: Ipv4Direction,
    ) -> Result<&mut HashMap<MapData, Tether4Key, Tether4Value>, DomainError> {
        let table = match direction {
            Ipv4Direction::Upstream => self.upstream4.as_mut(),
            Ipv4Direction::Downstream => self.downstream4.as_mut(),
        };
        table.ok_or(DomainError::TableUnavailable(match direction {
            Ipv4Direction::Upstream => MAP_UPSTREAM4,
            Ipv4Direction::Downstream => MAP_DOWNSTREAM4,
        }))
    }

    fn current_stats(&self, if_index: u32) -> Result<Option<TetherStatsValue>, DomainError> {
        let stats = self
            .stats
            .as_ref()
            .ok_or(DomainError::TableUnavailable(MAP_STATS))?;
        match stats.get(&if_index, 0) {
            Ok(value) => Ok(Some(value)),
            Err(e) if is_not_found(&e) => Ok(None),
            Err(e) => Err(map_err("stats lookup", &e)),
        }
    }
}

impl RuleStorePort for OffloadMapManager {
    fn capabilities(&self) -> TableCapabilities {
        TableCapabilities {
            ipv4_upstream: self.upstream4.is_some(),
            ipv4_downstream: self.downstream4.is_some(),
            ipv6_upstream: self.upstream6.is_some(),
            ipv6_downstream: self.downstream6.is_some(),
            dev: self.dev.is_some(),
            stats: self.stats.is_some(),
            limit: self.limit.is_some(),
        }
    }

    fn ipv4_rule_add(
        &mut self,
        direction: Ipv4Direction,
        key: &Tether4Key,
        value: &Tether4Value,
    ) -> Result<(), DomainError> {
        self.ipv4_table(direction)?
            .insert(key, value, 0)
            .map_err(|e| map_err("ipv4 insert", &e))
    }

    fn ipv4_rule_remove(
        &mut self,
        direction: Ipv4Direction,
        key: &Tether4Key,
    ) -> Result<bool, DomainError> {
        removed(self.ipv4_table(direction)?.remove(key), "ipv4 delete")
    }

    fn ipv4_upstream_entries(&self) -> Result<Vec<(Tether4Key, Tether4Value)>, DomainError> {
        let table = self
            .upstream4
            .as_ref()
            .ok_or(DomainError::TableUnavailable(MAP_UPSTREAM4))?;
        // Entries deleted mid-iteration surface as errors and are skipped.
        Ok(table.iter().filter_map(Result::ok).collect())
    }

    fn ipv6_downstream_add(
        &mut self,
        key: &TetherDownstream6Key,
        value: &Tether6Value,
    ) -> Result<(), DomainError> {
        self.downstream6
            .as_mut()
            .ok_or(DomainError::TableUnavailable(MAP_DOWNSTREAM6))?
            .insert(key, value, 0)
            .map_err(|e| map_err("ipv6 downstream insert", &e))
    }

    fn ipv6_downstream_remove(&mut self, key: &TetherDownstream6Key) -> Result<bool, DomainError> {
        let table = self
            .downstream6
            .as_mut()
            .ok_or(DomainError::TableUnavailable(MAP_DOWNSTREAM6))?;
        removed(table.remove(key), "ipv6 downstream delete")
    }

    fn ipv6_upstream_add(
        &mut self,
        key: &TetherUpstream6Key,
        value: &Tether6Value,
    ) -> Result<(), DomainError> {
        self.upstream6
            .as_mut()
            .ok_or(DomainError::TableUnavailable(MAP_UPSTREAM6))?
            .insert(key, value, 0)
            .map_err(|e| map_err("ipv6 upstream insert", &e))
    }

    fn ipv6_upstream_remove(&mut self, key: &TetherUpstream6Key) -> Result<bool, DomainError> {
        let table = self
            .upstream6
            .as_mut()
            .ok_or(DomainError::TableUnavailable(MAP_UPSTREAM6))?;
        removed(table.remove(key), "ipv6 upstream delete")
    }

    fn dev_add(&mut self, if_index: u32) -> Result<(), DomainError> {
        self.dev
            .as_mut()
            .ok_or(DomainError::TableUnavailable(MAP_DEV))?
            .insert(if_index, if_index, None, 0)
            .map_err(|e| DomainError::RuleStore(format!("dev map insert {if_index}: {e}")))
    }

    fn stats_snapshot(&self) -> Result<Vec<(u32, TetherStatsValue)>, DomainError> {
        let stats = self
            .stats
            .as_ref()
            .ok_or(DomainError::TableUnavailable(MAP_STATS))?;
        Ok(stats.iter().filter_map(Result::ok).collect())
    }

    fn set_limit(&mut self, if_index: u32, quota: Quota) -> Result<(), DomainError> {
        if self.limit.is_none() {
            return Err(DomainError::TableUnavailable(MAP_LIMIT));
        }
        let current = match self.current_stats(if_index)? {
            Some(current) => current,
            None => {
                let zero = TetherStatsValue::default();
                if let Some(stats) = self.stats.as_mut() {
                    stats
                        .insert(if_index, zero, 0)
                        .map_err(|e| map_err("stats insert", &e))?;
                }
                zero
            }
        };
        let value = limit_value(&current, quota);
        if let Some(limit) = self.limit.as_mut() {
            limit
                .insert(if_index, value, 0)
                .map_err(|e| map_err("limit insert", &e))?;
        }
        Ok(())
    }

    fn get_and_clear_stats(&mut self, if_index: u32) -> Result<TetherStatsValue, DomainError> {
        let final_stats = self
            .current_stats(if_index)?
            .ok_or_else(|| DomainError::NotFound(format!("stats entry for ifindex {if_index}")))?;
        if let Some(stats) = self.stats.as_mut() {
            removed(stats.remove(&if_index), "stats delete")?;
        }
        if let Some(limit) = self.limit.as_mut() {
            removed(limit.remove(&if_index), "limit delete")?;
        }
        Ok(final_stats)
    }
}

/// Limit map value for a quota: the kernel stops offloading once the
/// running rx+tx total reaches it.
pub fn limit_value(current: &TetherStatsValue, quota: Quota) -> TetherLimitValue {
    match quota {
        Quota::Unlimited => LIMIT_UNLIMITED,
        Quota::Bytes(bytes) => current.total_bytes().saturating_add(bytes),
    }
}

fn open_pinned(pin_dir: &Path, name: &'static str) -> Option<Map> {
    let path = pin_dir.join(name);
    match MapData::from_pin(&path).and_then(map_from_map_data) {
        Ok(map) => Some(map),
        Err(e) => {
            warn!(map = name, path = %path.display(), error = %e, "pinned map unavailable");
            None
        }
    }
}

/// aya 0.13 has no `Map::from_map_data`; pick the variant from the kernel's
/// map type for the kinds this adapter opens.
fn map_from_map_data(map_data: MapData) -> Result<Map, MapError> {
    Ok(match map_data.info()?.map_type()? {
        MapType::Hash => Map::HashMap(map_data),
        MapType::LruHash => Map::LruHashMap(map_data),
        MapType::DevMapHash => Map::DevMapHash(map_data),
        _ => Map::Unsupported(map_data),
    })
}

fn open_hash_map<K: aya::Pod, V: aya::Pod>(
    pin_dir: &Path,
    name: &'static str,
) -> Option<HashMap<MapData, K, V>> {
    let map = open_pinned(pin_dir, name)?;
    HashMap::try_from(map)
        .map_err(|e| warn!(map = name, error = %e, "unexpected map type"))
        .ok()
}

fn is_not_found(err: &MapError) -> bool {
    match err {
        MapError::KeyNotFound => true,
        MapError::SyscallError(e) => e.io_error.kind() == std::io::ErrorKind::NotFound,
        _ => false,
    }
}

fn removed(res: Result<(), MapError>, operation: &str) -> Result<bool, DomainError> {
    match res {
        Ok(()) => Ok(true),
        Err(e) if is_not_found(&e) => Ok(false),
        Err(e) => Err(map_err(operation, &e)),
    }
}

fn map_err(operation: &str, err: &MapError) -> DomainError {
    DomainError::RuleStore(format!("{operation} failed: {err}"))
}
