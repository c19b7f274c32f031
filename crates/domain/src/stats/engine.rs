use std::collections::{BTreeMap, HashMap};

use crate::upstream::entity::InterfaceNames;

use super::entity::{ForwardedStats, Quota, StatsDelta};
use super::error::StatsError;

/// Effect of arming the global alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertOutcome {
    /// Unlimited quota: alerting is off.
    Disabled,
    /// Checked against forwarded bytes on each poll.
    Armed,
    /// Zero quota: the alert is already reached.
    ReachedNow,
}

/// Everything a poll produced for the reporting boundary.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct PollOutcome {
    pub delta: StatsDelta,
    pub alert_reached: bool,
    /// Interfaces whose installed limit was used up during this poll.
    pub limits_reached: Vec<String>,
}

/// Converts raw counter snapshots into reportable deltas.
///
/// Counters read-and-cleared on rule teardown are folded into a carry-over
/// bucket so that the next push still reports them even though the
/// interface no longer appears in snapshots.
#[derive(Debug, Default)]
pub struct StatsTracker {
    last_seen: HashMap<u32, ForwardedStats>,
    carry_over: HashMap<u32, ForwardedStats>,
    quotas: HashMap<String, Quota>,
    remaining_alert: Option<u64>,
    /// Bytes left before an installed finite limit is reached.
    limit_watch: HashMap<u32, u64>,
}

impl StatsTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and remember a limit. The caller decides whether it has to be
    /// pushed to the rule store right away.
    pub fn set_limit(&mut self, iface: &str, raw_quota: i64) -> Result<Quota, StatsError> {
        if iface.is_empty() {
            return Err(StatsError::EmptyInterfaceName);
        }
        let quota = Quota::from_raw(raw_quota)?;
        self.quotas.insert(iface.to_string(), quota);
        Ok(quota)
    }

    /// Configured limit for an interface, unlimited when none was set.
    pub fn limit_for(&self, iface: &str) -> Quota {
        self.quotas.get(iface).copied().unwrap_or(Quota::Unlimited)
    }

    pub fn set_alert(&mut self, raw_quota: i64) -> Result<AlertOutcome, StatsError> {
        match Quota::from_raw(raw_quota)? {
            Quota::Unlimited => {
                self.remaining_alert = None;
                Ok(AlertOutcome::Disabled)
            }
            Quota::Bytes(0) => {
                self.remaining_alert = None;
                Ok(AlertOutcome::ReachedNow)
            }
            Quota::Bytes(bytes) => {
                self.remaining_alert = Some(bytes);
                Ok(AlertOutcome::Armed)
            }
        }
    }

    pub fn alert_armed(&self) -> bool {
        self.remaining_alert.is_some()
    }

    /// Start (or stop) watching an interface for its limit being used up.
    pub fn limit_installed(&mut self, if_index: u32, quota: Quota) {
        match quota {
            Quota::Bytes(bytes) => {
                self.limit_watch.insert(if_index, bytes);
            }
            Quota::Unlimited => {
                self.limit_watch.remove(&if_index);
            }
        }
    }

    /// Record the final counters of an interface whose stats entry was just
    /// read and cleared.
    pub fn fold_final(&mut self, if_index: u32, final_stats: ForwardedStats) {
        let previous = self.last_seen.remove(&if_index).unwrap_or_default();
        let delta = final_stats.delta_since(&previous);
        let bucket = self.carry_over.entry(if_index).or_default();
        *bucket = bucket.saturating_add(&delta);
        self.limit_watch.remove(&if_index);
    }

    pub fn carry_over_for(&self, if_index: u32) -> ForwardedStats {
        self.carry_over.get(&if_index).copied().unwrap_or_default()
    }

    /// Merge a full snapshot with pending carry-over into one delta push.
    pub fn ingest_snapshot(
        &mut self,
        snapshot: &[(u32, ForwardedStats)],
        names: &InterfaceNames,
    ) -> PollOutcome {
        let mut per_if: BTreeMap<u32, ForwardedStats> = BTreeMap::new();
        for &(if_index, current) in snapshot {
            let previous = self.last_seen.insert(if_index, current).unwrap_or_default();
            let entry = per_if.entry(if_index).or_default();
            *entry = entry.saturating_add(&current.delta_since(&previous));
        }
        for (if_index, carried) in self.carry_over.drain() {
            let entry = per_if.entry(if_index).or_default();
            *entry = entry.saturating_add(&carried);
        }

        let mut outcome = PollOutcome::default();
        for (if_index, delta) in &per_if {
            if !delta.is_zero() {
                outcome.delta.push(names.display_name(*if_index), *delta);
            }
        }

        if let Some(remaining) = self.remaining_alert {
            let used = outcome.delta.total_bytes();
            if used >= remaining {
                self.remaining_alert = None;
                outcome.alert_reached = true;
            } else {
                self.remaining_alert = Some(remaining - used);
            }
        }

        let mut reached: Vec<u32> = Vec::new();
        for (if_index, remaining) in &mut self.limit_watch {
            let used = per_if.get(if_index).map_or(0, ForwardedStats::total_bytes);
            *remaining = remaining.saturating_sub(used);
            if *remaining == 0 {
                reached.push(*if_index);
            }
        }
        reached.sort_unstable();
        for if_index in reached {
            self.limit_watch.remove(&if_index);
            outcome.limits_reached.push(names.display_name(if_index));
        }

        outcome
    }
}
