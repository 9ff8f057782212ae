//! Calendar-boundary archival.
//!
//! Once the calendar rolls into a new month the stored current block has to
//! be frozen, but upstream sometimes delays or skips publishing the final
//! day's value. The close decision therefore has three tiers:
//!
//! 1. confirmed-complete: next-period data exists, the final day is
//!    derivable by fetch-back, close immediately;
//! 2. forced-complete fallback: ≥2 calendar days into the new period with a
//!    nearly full series means upstream silently skipped the final day;
//!    close with the final day marked unavailable;
//! 3. forced-complete safety net: ≥3 days in with a series at most two days
//!    short, close regardless so no block stays stuck as current forever.
//!
//! Closed sections are immutable afterwards, except one late backfill of the
//! end-of-period snapshot once next-period data finally shows up.

use std::collections::HashMap;

use chrono::{Datelike, NaiveDate};
use tracing::{debug, info, warn};

use crate::models::{LedgerTable, MonthSection, SectionState};
use crate::period::Period;

/// Which rule allowed a close.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseKind {
    /// Next-period data confirmed the series; final day derived by fetch-back.
    Confirmed,
    /// ≥2 days into the new period, series at least one short of full.
    Forced,
    /// ≥3 days into the new period, series at least two short of full.
    SafetyNet,
}

/// What a rollover attempt did to the table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RolloverOutcome {
    /// Current block already belongs to today's period.
    UpToDate,
    /// The old block was frozen and a fresh current block started.
    Closed { label: String, kind: CloseKind },
    /// The old period ended but is not safely closeable yet; the block keeps
    /// accumulating as current.
    PendingClose { reason: String },
}

/// Roll a group's table forward to `today`'s period if its current block
/// belongs to an earlier month and is safely closeable.
///
/// `next_first_values` maps member id to the first recorded value of the new
/// period (the fetch-back source). Pre-existing archived sections are never
/// reordered or rewritten; a newly closed section is appended after them.
pub fn roll_over(
    table: &mut LedgerTable,
    next_first_values: &HashMap<u64, u64>,
    today: NaiveDate,
) -> RolloverOutcome {
    let today_period = Period::of(today);

    let mut closed = match table.current.take() {
        None => {
            table.current = Some(MonthSection::new_current(today_period));
            return RolloverOutcome::UpToDate;
        }
        Some(section) if section.period == today_period => {
            table.current = Some(section);
            return RolloverOutcome::UpToDate;
        }
        Some(section) => section,
    };

    let expected = closed.period.day_count();
    let max_day = closed.max_data_day();
    let days_into = days_into_new_period(closed.period, today);
    let confirmed = next_first_values.values().any(|&v| v > 0);

    let kind = if confirmed {
        CloseKind::Confirmed
    } else if days_into >= 2 && max_day + 1 >= expected {
        CloseKind::Forced
    } else if days_into >= 3 && max_day + 2 >= expected {
        CloseKind::SafetyNet
    } else {
        let reason = format!(
            "period {} has {}/{} days recorded, {} day(s) into new period, no next-period data",
            closed.period, max_day, expected, days_into
        );
        debug!(reason, "holding close");
        table.current = Some(closed);
        return RolloverOutcome::PendingClose { reason };
    };

    // Freeze. The end-of-period snapshot is the new period's first recorded
    // value per member; rows without one keep None until the late backfill.
    let label = closed.label();
    closed.state = SectionState::Archived;
    let mut snapshots = 0;
    for row in &mut closed.rows {
        if let Some(&value) = next_first_values.get(&row.member_id) {
            if value > 0 {
                row.period_end_snapshot = Some(value);
                snapshots += 1;
            }
        }
    }
    if kind != CloseKind::Confirmed {
        warn!(
            label,
            ?kind,
            max_day,
            expected,
            "closing period without confirmed final-day data"
        );
    }
    info!(
        label,
        ?kind,
        rows = closed.rows.len(),
        snapshots,
        "archived month section"
    );

    table.archived.push(closed);
    table.current = Some(MonthSection::new_current(today_period));
    RolloverOutcome::Closed { label, kind }
}

/// Calendar days elapsed since the end of `period`, as seen from `today`.
/// Day 1 of the following month counts as 1.
fn days_into_new_period(period: Period, today: NaiveDate) -> u32 {
    let next_start = period.next().first_day();
    if today < next_start {
        return 0;
    }
    if Period::of(today) == period.next() {
        return today.day();
    }
    ((today - next_start).num_days() + 1).max(0) as u32
}

/// One-time late backfill: fill the end-of-period snapshot of the most
/// recently archived section for rows that closed without one, now that
/// next-period first-day data exists. Only `None` snapshots are touched;
/// archived values are never overwritten. Returns how many rows were filled.
pub fn backfill_final_day(
    table: &mut LedgerTable,
    next_first_values: &HashMap<u64, u64>,
    today: NaiveDate,
) -> usize {
    let last = match table.archived.last_mut() {
        Some(section) => section,
        None => return 0,
    };
    // Only the section immediately preceding today's period can be confirmed
    // by today's first-day values.
    if last.period.next() != Period::of(today) {
        return 0;
    }

    let mut filled = 0;
    for row in &mut last.rows {
        if row.period_end_snapshot.is_some() {
            continue;
        }
        if let Some(&value) = next_first_values.get(&row.member_id) {
            if value > 0 {
                row.period_end_snapshot = Some(value);
                filled += 1;
            }
        }
    }
    if filled > 0 {
        info!(label = %last.label(), filled, "backfilled final-day snapshots");
    }
    filled
}
