//! Calendar period helpers.
//!
//! A tracked period is one calendar month, labeled `"MM/YYYY"`. Ledger
//! sections, archive decisions and the cross-group transfer index all key off
//! these labels, so parsing and month arithmetic live in one place.

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

/// A calendar month, the unit of ledger archival.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Period {
    pub year: i32,
    pub month: u32,
}

impl Period {
    pub fn new(year: i32, month: u32) -> Self {
        Self { year, month }
    }

    /// The period a given date falls in.
    pub fn of(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }

    /// Parse a `"MM/YYYY"` label. Returns None for anything else.
    pub fn parse_label(label: &str) -> Option<Self> {
        let (m, y) = label.split_once('/')?;
        let month: u32 = m.trim().parse().ok()?;
        let year: i32 = y.trim().parse().ok()?;
        if !(1..=12).contains(&month) {
            return None;
        }
        Some(Self { year, month })
    }

    /// Render the canonical `"MM/YYYY"` label.
    pub fn label(&self) -> String {
        format!("{:02}/{}", self.month, self.year)
    }

    /// Number of days in this month (28-31).
    pub fn day_count(&self) -> u32 {
        let first = NaiveDate::from_ymd_opt(self.year, self.month, 1)
            .expect("month validated at construction");
        let next = self.next().first_day();
        (next - first).num_days() as u32
    }

    pub fn first_day(&self) -> NaiveDate {
        NaiveDate::from_ymd_opt(self.year, self.month, 1)
            .expect("month validated at construction")
    }

    pub fn prev(&self) -> Self {
        if self.month == 1 {
            Self { year: self.year - 1, month: 12 }
        } else {
            Self { year: self.year, month: self.month - 1 }
        }
    }

    pub fn next(&self) -> Self {
        if self.month == 12 {
            Self { year: self.year + 1, month: 1 }
        } else {
            Self { year: self.year, month: self.month + 1 }
        }
    }
}

impl std::fmt::Display for Period {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_label() {
        let p = Period::parse_label("01/2026").unwrap();
        assert_eq!(p, Period::new(2026, 1));
        assert_eq!(p.label(), "01/2026");

        assert!(Period::parse_label("13/2026").is_none());
        assert!(Period::parse_label("January 2026").is_none());
        assert!(Period::parse_label("").is_none());
    }

    #[test]
    fn test_day_count() {
        assert_eq!(Period::new(2026, 1).day_count(), 31);
        assert_eq!(Period::new(2026, 2).day_count(), 28);
        assert_eq!(Period::new(2024, 2).day_count(), 29); // leap year
        assert_eq!(Period::new(2026, 4).day_count(), 30);
    }

    #[test]
    fn test_prev_next_wrap_year() {
        assert_eq!(Period::new(2026, 1).prev(), Period::new(2025, 12));
        assert_eq!(Period::new(2025, 12).next(), Period::new(2026, 1));
        assert_eq!(Period::new(2026, 6).next(), Period::new(2026, 7));
    }

    #[test]
    fn test_of_date() {
        let d = NaiveDate::from_ymd_opt(2026, 2, 15).unwrap();
        assert_eq!(Period::of(d), Period::new(2026, 2));
    }
}
