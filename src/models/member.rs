use serde::{Deserialize, Serialize};

/// One member's state for a single sync pass.
///
/// `cumulative` holds one slot per day of the tracked period: slot `d - 1` is
/// the running total recorded on day `d`, and `0` means no value has been
/// recorded yet. The vector is replaced wholesale every cycle, never patched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Member {
    pub id: u64,
    pub display_name: String,
    pub cumulative: Vec<u64>,
}

impl Member {
    /// Cumulative total recorded for a 1-based day, or 0 if out of range.
    pub fn value_on(&self, day: u32) -> u64 {
        if day == 0 {
            return 0;
        }
        self.cumulative.get(day as usize - 1).copied().unwrap_or(0)
    }

    /// Highest 1-based day with a positive recorded value.
    pub fn max_data_day(&self) -> u32 {
        self.cumulative
            .iter()
            .rposition(|&v| v > 0)
            .map(|i| i as u32 + 1)
            .unwrap_or(0)
    }
}

/// Everything known about one group after a single upstream fetch.
///
/// Rebuilt fully every cycle from upstream truth rather than mutated in
/// place; simplicity over efficiency is deliberate here.
#[derive(Debug, Clone)]
pub struct GroupSnapshot {
    pub group_id: u64,
    pub name: String,
    /// Ranked metadata from upstream; sometimes omitted.
    pub rank: Option<u32>,
    pub quota_per_day: u64,
    pub members: Vec<Member>,
    /// Highest 1-based day with a positive cumulative value across all
    /// members in this pass.
    pub max_data_day: u32,
}

impl GroupSnapshot {
    pub fn new(
        group_id: u64,
        name: String,
        rank: Option<u32>,
        quota_per_day: u64,
        members: Vec<Member>,
    ) -> Self {
        let max_data_day = members.iter().map(Member::max_data_day).max().unwrap_or(0);
        Self {
            group_id,
            name,
            rank,
            quota_per_day,
            members,
            max_data_day,
        }
    }
}
