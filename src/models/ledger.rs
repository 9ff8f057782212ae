use serde::{Deserialize, Serialize};

use crate::period::Period;

/// One member's row in a month section.
///
/// `days` holds the cumulative totals Day1..DayN (0 = no value recorded).
/// Carryover is never stored: it is always recomputed from
/// `cumulative_total - effective_target` so it can never drift from its
/// inputs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerRow {
    pub member_id: u64,
    pub display_name: String,
    pub days: Vec<u64>,
    /// First day with a strictly positive gain (1-based).
    pub start_day: u32,
    /// Prorated quota target at the latest data day.
    pub effective_target: u64,
    pub is_new_member: bool,
    /// True end-of-period cumulative, filled by fetch-back at close (or by
    /// the one-time late backfill). None while the final day is unconfirmed.
    pub period_end_snapshot: Option<u64>,
    pub possible_transfer: bool,
}

impl LedgerRow {
    /// Latest recorded cumulative total, 0 if the row has no data yet.
    pub fn latest_total(&self) -> u64 {
        self.days.iter().rev().find(|&&v| v > 0).copied().unwrap_or(0)
    }

    /// Signed gap between actual progress and the prorated target.
    /// Negative means behind quota.
    pub fn carryover(&self) -> i64 {
        self.latest_total() as i64 - self.effective_target as i64
    }

    /// Gain of the period's final day, derivable only once the end-of-period
    /// snapshot has been confirmed. A snapshot below the last recorded value
    /// means corrupted or reset data and yields None.
    pub fn final_day_gain(&self, expected_days: u32) -> Option<u64> {
        let snapshot = self.period_end_snapshot?;
        let last_recorded = *self.days.get(expected_days as usize - 1)?;
        if last_recorded == 0 || snapshot < last_recorded {
            return None;
        }
        Some(snapshot - last_recorded)
    }
}

/// Whether a month section still accepts rewrites.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SectionState {
    /// Mutable; fully rewritten from upstream truth every cycle.
    Current,
    /// Frozen. Rows never change except the one-time final-day backfill.
    Archived,
}

/// A contiguous ledger block tagged to one calendar period.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonthSection {
    pub period: Period,
    pub state: SectionState,
    pub rows: Vec<LedgerRow>,
}

impl MonthSection {
    pub fn new_current(period: Period) -> Self {
        Self {
            period,
            state: SectionState::Current,
            rows: Vec::new(),
        }
    }

    pub fn label(&self) -> String {
        self.period.label()
    }

    /// Highest 1-based day with a positive value across all rows.
    pub fn max_data_day(&self) -> u32 {
        self.rows
            .iter()
            .flat_map(|r| r.days.iter().rposition(|&v| v > 0).map(|i| i as u32 + 1))
            .max()
            .unwrap_or(0)
    }

    pub fn find_member(&self, member_id: u64) -> Option<&LedgerRow> {
        self.rows.iter().find(|r| r.member_id == member_id)
    }
}

/// A group's full ledger: archived sections in append order, then the
/// current block. This is the canonical in-memory model every business rule
/// runs against, regardless of which on-disk format it was read from.
#[derive(Debug, Clone, Default)]
pub struct LedgerTable {
    pub archived: Vec<MonthSection>,
    pub current: Option<MonthSection>,
}

impl LedgerTable {
    /// The most recently archived section, if any.
    pub fn last_archived(&self) -> Option<&MonthSection> {
        self.archived.last()
    }

    /// Labels of every archived section, in append order. Used for the
    /// pre-write safety check against the previously stored table.
    pub fn archived_labels(&self) -> Vec<String> {
        self.archived.iter().map(MonthSection::label).collect()
    }
}
