//! Versioned-schema reader and writer for ledger tables.
//!
//! Two on-disk shapes exist:
//!
//! - **Labeled** (current): section marker rows `## ARCHIVED <label>` /
//!   `## CURRENT <label>`, each followed by a header row and data rows,
//!   archived sections first in append order.
//! - **Legacy**: a single unlabeled header + data block from before section
//!   markers existed. The month it represents is inferred from how many day
//!   columns are populated; only a count that strongly implies a completed
//!   previous month is archived, anything else is conservatively treated as
//!   current so in-progress data is never misclassified as history.
//!
//! All input is normalized here, once, into [`LedgerTable`]; no business
//! rule ever branches on the stored format.

use chrono::NaiveDate;
use tracing::{debug, warn};

use crate::models::{LedgerRow, LedgerTable, MonthSection, SectionState};
use crate::period::Period;

use super::StoreError;

const MARKER_ARCHIVED: &str = "## ARCHIVED";
const MARKER_CURRENT: &str = "## CURRENT";

const FIXED_LEAD_COLUMNS: [&str; 2] = ["member_id", "display_name"];
const INTERNAL_COLUMNS: [&str; 5] = [
    "effective_start_day",
    "effective_target",
    "is_new_member",
    "period_end_snapshot",
    "possible_transfer",
];

// ============================================================================
// Writing
// ============================================================================

/// Render a table to grid rows: archived sections in append order, then the
/// current block.
pub fn to_rows(table: &LedgerTable) -> Vec<Vec<String>> {
    let mut rows = Vec::new();
    for section in &table.archived {
        push_section(&mut rows, section, MARKER_ARCHIVED);
    }
    if let Some(current) = &table.current {
        push_section(&mut rows, current, MARKER_CURRENT);
    }
    rows
}

fn push_section(rows: &mut Vec<Vec<String>>, section: &MonthSection, marker: &str) {
    let day_count = section.period.day_count() as usize;

    rows.push(vec![marker.to_string(), section.label()]);

    let mut header: Vec<String> = FIXED_LEAD_COLUMNS.iter().map(|s| s.to_string()).collect();
    for day in 1..=day_count {
        header.push(format!("Day{}", day));
    }
    header.extend(INTERNAL_COLUMNS.iter().map(|s| s.to_string()));
    rows.push(header);

    for row in &section.rows {
        let mut cells = vec![row.member_id.to_string(), row.display_name.clone()];
        for day in 0..day_count {
            let value = row.days.get(day).copied().unwrap_or(0);
            cells.push(if value == 0 { String::new() } else { value.to_string() });
        }
        cells.push(row.start_day.to_string());
        cells.push(row.effective_target.to_string());
        cells.push(bool_cell(row.is_new_member));
        cells.push(row.period_end_snapshot.map(|v| v.to_string()).unwrap_or_default());
        cells.push(bool_cell(row.possible_transfer));
        rows.push(cells);
    }
}

fn bool_cell(value: bool) -> String {
    if value { "TRUE".into() } else { "FALSE".into() }
}

// ============================================================================
// Reading
// ============================================================================

/// Normalize stored grid rows into the canonical table. `today` drives the
/// month inference for legacy input.
pub fn from_rows(rows: &[Vec<String>], today: NaiveDate) -> Result<LedgerTable, StoreError> {
    let rows: Vec<&Vec<String>> = rows.iter().filter(|r| !r.is_empty()).collect();
    if rows.is_empty() {
        return Ok(LedgerTable::default());
    }

    if rows[0][0] == MARKER_ARCHIVED || rows[0][0] == MARKER_CURRENT {
        read_labeled(&rows)
    } else {
        read_legacy(&rows, today)
    }
}

/// Archived-section labels present in raw grid rows, without a full parse.
/// The pre-write safety check runs on exactly this view of the old file.
pub fn archived_labels(rows: &[Vec<String>]) -> Vec<String> {
    rows.iter()
        .filter(|r| r.len() >= 2 && r[0] == MARKER_ARCHIVED)
        .map(|r| r[1].clone())
        .collect()
}

fn read_labeled(rows: &[&Vec<String>]) -> Result<LedgerTable, StoreError> {
    let mut table = LedgerTable::default();
    let mut i = 0;

    while i < rows.len() {
        let marker_row = rows[i];
        let (state, label) = match (marker_row[0].as_str(), marker_row.get(1)) {
            (MARKER_ARCHIVED, Some(label)) => (SectionState::Archived, label),
            (MARKER_CURRENT, Some(label)) => (SectionState::Current, label),
            _ => {
                return Err(StoreError::Corrupt(format!(
                    "expected section marker at row {}, found '{}'",
                    i, marker_row[0]
                )))
            }
        };
        let period = Period::parse_label(label)
            .ok_or_else(|| StoreError::Corrupt(format!("bad section label '{}'", label)))?;
        i += 1;

        let header = rows
            .get(i)
            .ok_or_else(|| StoreError::Corrupt(format!("section '{}' missing header", label)))?;
        let layout = Layout::from_header(header)?;
        i += 1;

        let mut section = MonthSection {
            period,
            state,
            rows: Vec::new(),
        };
        while i < rows.len() && !is_marker(rows[i]) {
            if let Some(row) = layout.parse_row(rows[i]) {
                section.rows.push(row);
            }
            i += 1;
        }

        match state {
            SectionState::Archived => table.archived.push(section),
            SectionState::Current => {
                if table.current.is_some() {
                    return Err(StoreError::Corrupt(
                        "multiple current sections in one table".into(),
                    ));
                }
                table.current = Some(section);
            }
        }
    }

    Ok(table)
}

fn read_legacy(rows: &[&Vec<String>], today: NaiveDate) -> Result<LedgerTable, StoreError> {
    let layout = Layout::from_header(rows[0])?;
    let parsed: Vec<LedgerRow> = rows[1..]
        .iter()
        .filter_map(|r| layout.parse_row(r))
        .collect();

    let populated_days = parsed
        .iter()
        .flat_map(|r| r.days.iter().rposition(|&v| v > 0).map(|i| i as u32 + 1))
        .max()
        .unwrap_or(0);

    let this_month = Period::of(today);
    let prev_month = this_month.prev();

    // A legacy block whose populated day count reaches the previous month's
    // length (minus the lagging final day) almost certainly is that completed
    // month. Anything shorter stays current.
    let completed_prev = populated_days + 1 >= prev_month.day_count();
    let (period, state) = if completed_prev {
        (prev_month, SectionState::Archived)
    } else {
        (this_month, SectionState::Current)
    };
    debug!(
        populated_days,
        inferred = %period,
        archived = completed_prev,
        "normalized legacy unlabeled table"
    );

    let section = MonthSection {
        period,
        state,
        rows: parsed,
    };
    let mut table = LedgerTable::default();
    match state {
        SectionState::Archived => table.archived.push(section),
        SectionState::Current => table.current = Some(section),
    }
    Ok(table)
}

fn is_marker(row: &[String]) -> bool {
    !row.is_empty() && (row[0] == MARKER_ARCHIVED || row[0] == MARKER_CURRENT)
}

/// Column positions resolved from a header row. Legacy headers may lack the
/// internal columns; those fields then take their defaults.
struct Layout {
    member_id: usize,
    display_name: usize,
    /// (column index, 1-based day number)
    day_columns: Vec<(usize, u32)>,
    start_day: Option<usize>,
    effective_target: Option<usize>,
    is_new_member: Option<usize>,
    period_end_snapshot: Option<usize>,
    possible_transfer: Option<usize>,
}

impl Layout {
    fn from_header(header: &[String]) -> Result<Self, StoreError> {
        let find = |name: &str| header.iter().position(|c| c.eq_ignore_ascii_case(name));

        let member_id = find("member_id")
            .ok_or_else(|| StoreError::Corrupt("header missing member_id column".into()))?;
        let display_name = find("display_name")
            .ok_or_else(|| StoreError::Corrupt("header missing display_name column".into()))?;

        let mut day_columns = Vec::new();
        for (idx, cell) in header.iter().enumerate() {
            if let Some(num) = cell.strip_prefix("Day") {
                if let Ok(day) = num.parse::<u32>() {
                    if day >= 1 {
                        day_columns.push((idx, day));
                    }
                }
            }
        }
        if day_columns.is_empty() {
            return Err(StoreError::Corrupt("header has no day columns".into()));
        }
        day_columns.sort_by_key(|&(_, day)| day);

        Ok(Self {
            member_id,
            display_name,
            day_columns,
            start_day: find("effective_start_day"),
            effective_target: find("effective_target"),
            is_new_member: find("is_new_member"),
            period_end_snapshot: find("period_end_snapshot"),
            possible_transfer: find("possible_transfer"),
        })
    }

    fn parse_row(&self, cells: &[String]) -> Option<LedgerRow> {
        let member_id: u64 = match cells.get(self.member_id)?.trim().parse() {
            Ok(id) => id,
            Err(_) => {
                warn!(cell = %cells[self.member_id], "skipping row with unparseable member id");
                return None;
            }
        };
        let display_name = cells.get(self.display_name)?.clone();

        let max_day = self.day_columns.last().map(|&(_, d)| d).unwrap_or(0);
        let mut days = vec![0u64; max_day as usize];
        for &(idx, day) in &self.day_columns {
            days[day as usize - 1] = parse_u64(cells.get(idx)).unwrap_or(0);
        }

        Some(LedgerRow {
            member_id,
            display_name,
            days,
            start_day: self
                .start_day
                .and_then(|i| parse_u64(cells.get(i)))
                .map(|v| v as u32)
                .unwrap_or(1),
            effective_target: self
                .effective_target
                .and_then(|i| parse_u64(cells.get(i)))
                .unwrap_or(0),
            is_new_member: self
                .is_new_member
                .map(|i| parse_bool(cells.get(i)))
                .unwrap_or(false),
            period_end_snapshot: self.period_end_snapshot.and_then(|i| parse_u64(cells.get(i))),
            possible_transfer: self
                .possible_transfer
                .map(|i| parse_bool(cells.get(i)))
                .unwrap_or(false),
        })
    }
}

fn parse_u64(cell: Option<&String>) -> Option<u64> {
    cell?.trim().parse().ok()
}

fn parse_bool(cell: Option<&String>) -> bool {
    matches!(
        cell.map(|s| s.trim()).unwrap_or(""),
        "TRUE" | "true" | "True" | "1"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_row(member_id: u64, days: Vec<u64>) -> LedgerRow {
        LedgerRow {
            member_id,
            display_name: format!("member-{member_id}"),
            days,
            start_day: 3,
            effective_target: 15000,
            is_new_member: true,
            period_end_snapshot: Some(1_070_000),
            possible_transfer: false,
        }
    }

    fn sample_table() -> LedgerTable {
        let mut days = vec![0u64; 31];
        days[0] = 100;
        days[30] = 5000;
        LedgerTable {
            archived: vec![MonthSection {
                period: Period::new(2025, 12),
                state: SectionState::Archived,
                rows: vec![sample_row(1, days)],
            }],
            current: Some(MonthSection {
                period: Period::new(2026, 1),
                state: SectionState::Current,
                rows: vec![sample_row(2, vec![0, 0, 1_000_000])],
            }),
        }
    }

    #[test]
    fn test_round_trip_labeled() {
        let table = sample_table();
        let rows = to_rows(&table);
        let parsed = from_rows(&rows, NaiveDate::from_ymd_opt(2026, 1, 15).unwrap()).unwrap();

        assert_eq!(parsed.archived.len(), 1);
        assert_eq!(parsed.archived[0].label(), "12/2025");
        assert_eq!(parsed.archived[0].state, SectionState::Archived);
        assert_eq!(parsed.archived[0].rows[0].days[30], 5000);
        assert_eq!(parsed.archived[0].rows[0].period_end_snapshot, Some(1_070_000));

        let current = parsed.current.unwrap();
        assert_eq!(current.label(), "01/2026");
        assert_eq!(current.rows[0].member_id, 2);
        assert_eq!(current.rows[0].days[2], 1_000_000);
        assert_eq!(current.rows[0].start_day, 3);
        assert!(current.rows[0].is_new_member);
    }

    #[test]
    fn test_archived_labels_from_raw_rows() {
        let rows = to_rows(&sample_table());
        assert_eq!(archived_labels(&rows), vec!["12/2025"]);
    }

    #[test]
    fn test_empty_table() {
        let parsed = from_rows(&[], NaiveDate::from_ymd_opt(2026, 1, 15).unwrap()).unwrap();
        assert!(parsed.archived.is_empty());
        assert!(parsed.current.is_none());
    }

    fn legacy_rows(day_values: &[(u32, u64)]) -> Vec<Vec<String>> {
        let mut header = vec!["member_id".to_string(), "display_name".to_string()];
        for day in 1..=31 {
            header.push(format!("Day{}", day));
        }
        let mut data = vec!["7".to_string(), "Old Hand".to_string()];
        data.extend(std::iter::repeat(String::new()).take(31));
        for &(day, value) in day_values {
            data[1 + day as usize] = value.to_string();
        }
        vec![header, data]
    }

    #[test]
    fn test_legacy_completed_month_is_archived() {
        // December 2025 has 31 days; data through day 30 strongly implies
        // the completed previous month.
        let values: Vec<(u32, u64)> = (1..=30).map(|d| (d, d as u64 * 100)).collect();
        let rows = legacy_rows(&values);
        let today = NaiveDate::from_ymd_opt(2026, 1, 2).unwrap();

        let table = from_rows(&rows, today).unwrap();
        assert!(table.current.is_none());
        assert_eq!(table.archived.len(), 1);
        assert_eq!(table.archived[0].label(), "12/2025");
    }

    #[test]
    fn test_legacy_partial_month_stays_current() {
        let rows = legacy_rows(&[(1, 100), (2, 250), (3, 400)]);
        let today = NaiveDate::from_ymd_opt(2026, 1, 4).unwrap();

        let table = from_rows(&rows, today).unwrap();
        assert!(table.archived.is_empty());
        let current = table.current.unwrap();
        assert_eq!(current.label(), "01/2026");
        assert_eq!(current.rows[0].days[2], 400);
        // Internal columns absent from the legacy header take defaults.
        assert_eq!(current.rows[0].start_day, 1);
        assert!(!current.rows[0].possible_transfer);
    }

    #[test]
    fn test_corrupt_header_rejected() {
        let rows = vec![vec!["not_a_header".to_string(), "x".to_string()]];
        let today = NaiveDate::from_ymd_opt(2026, 1, 4).unwrap();
        assert!(matches!(
            from_rows(&rows, today),
            Err(StoreError::Corrupt(_))
        ));
    }

    #[test]
    fn test_unparseable_member_rows_are_skipped() {
        let mut rows = to_rows(&sample_table());
        // Corrupt one data cell in the current section.
        let last = rows.len() - 1;
        rows[last][0] = "###".into();
        let parsed = from_rows(&rows, NaiveDate::from_ymd_opt(2026, 1, 15).unwrap()).unwrap();
        assert!(parsed.current.unwrap().rows.is_empty());
    }
}
