use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::period::Period;

/// A member's last known balance at a previous group, recorded while the
/// sync pass scans each group's archives. Lets a member who resurfaces
/// mid-period in a new group be traced back to their old-group total.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRecord {
    pub member_id: u64,
    pub prior_group: String,
    pub period_end_cumulative: u64,
    pub period: Period,
}

/// Cross-group index of [`TransferRecord`]s, bounded by a TTL.
///
/// Constructed explicitly and handed to the orchestrator; nothing in the
/// crate keeps one of these in module-level state. Entries are short-lived:
/// the index only has to survive from one sync pass to the lookups made
/// during the same or the following pass.
#[derive(Debug)]
pub struct TransferIndex {
    entries: HashMap<u64, (TransferRecord, Instant)>,
    ttl: Duration,
}

impl TransferIndex {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            ttl,
        }
    }

    /// Record (or refresh) a member's prior-group balance.
    pub fn insert(&mut self, record: TransferRecord) {
        self.entries
            .insert(record.member_id, (record, Instant::now()));
    }

    /// Look up a member's prior-group record, if one is still live.
    pub fn lookup(&self, member_id: u64) -> Option<&TransferRecord> {
        let (record, inserted) = self.entries.get(&member_id)?;
        if inserted.elapsed() >= self.ttl {
            return None;
        }
        Some(record)
    }

    /// Drop every expired entry. Called once per sync pass.
    pub fn prune(&mut self) {
        let ttl = self.ttl;
        self.entries.retain(|_, (_, inserted)| inserted.elapsed() < ttl);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
