//! Late-joiner-aware quota accounting.
//!
//! A member who joins on day 15 must not be judged against a day-1-to-date
//! quota, so targets are prorated from the member's first active day.

use crate::delta::Gain;

/// Quota accounting for one member over one period.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaProfile {
    /// First 1-based day with a strictly positive gain; 1 if none found.
    pub start_day: u32,
    pub quota_per_day: u64,
}

impl QuotaProfile {
    /// Derive the profile from a member's daily gains.
    pub fn from_gains(gains: &[Gain], quota_per_day: u64) -> Self {
        let start_day = gains
            .iter()
            .position(Gain::is_positive)
            .map(|i| i as u32 + 1)
            .unwrap_or(1);
        Self {
            start_day,
            quota_per_day,
        }
    }

    /// A member whose accounting starts after day 1 joined mid-period.
    pub fn is_new_member(&self) -> bool {
        self.start_day > 1
    }

    /// Prorated quota target through a 1-based day: zero before the start
    /// day, one quota per elapsed active day from then on.
    pub fn effective_target(&self, day: u32) -> u64 {
        if day < self.start_day {
            return 0;
        }
        (day - self.start_day + 1) as u64 * self.quota_per_day
    }

    /// Signed gap between actual progress and the prorated target.
    /// Negative means behind quota.
    pub fn carryover(&self, cumulative_total: u64, day: u32) -> i64 {
        cumulative_total as i64 - self.effective_target(day) as i64
    }
}
