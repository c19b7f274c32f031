use std::collections::HashMap;

/// Effect of a tally change on an upstream interface's rule population.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TallyTransition {
    /// The count went from zero to one.
    First,
    /// The count went from one to zero.
    Last,
    Unchanged,
}

/// Reference count of installed forwarding rules per upstream interface.
///
/// Shared by both rule engines: the zero-to-one edge installs the data
/// limit, the one-to-zero edge reads and clears the interface's counters.
#[derive(Debug, Default)]
pub struct UpstreamRuleTally {
    counts: HashMap<u32, usize>,
}

impl UpstreamRuleTally {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, if_index: u32) -> TallyTransition {
        let count = self.counts.entry(if_index).or_insert(0);
        *count += 1;
        if *count == 1 {
            TallyTransition::First
        } else {
            TallyTransition::Unchanged
        }
    }

    /// Decrement the count. Removing from an interface with no rules is a no-op.
    pub fn remove(&mut self, if_index: u32) -> TallyTransition {
        let Some(count) = self.counts.get_mut(&if_index) else {
            return TallyTransition::Unchanged;
        };
        *count -= 1;
        if *count == 0 {
            self.counts.remove(&if_index);
            TallyTransition::Last
        } else {
            TallyTransition::Unchanged
        }
    }

    pub fn count(&self, if_index: u32) -> usize {
        self.counts.get(&if_index).copied().unwrap_or(0)
    }

    pub fn is_active(&self, if_index: u32) -> bool {
        self.counts.contains_key(&if_index)
    }

    /// Upstream interfaces with at least one rule, in ascending order.
    pub fn active_interfaces(&self) -> Vec<u32> {
        let mut out: Vec<u32> = self.counts.keys().copied().collect();
        out.sort_unstable();
        out
    }
}
