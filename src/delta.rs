//! Daily gain derivation from cumulative counter series.
//!
//! Upstream publishes running totals, one slot per day, and overloads `0` to
//! mean both "not started yet" and "departed". The rules here turn that
//! ambiguous series into per-day gains without ever inventing a zero or a
//! negative gain:
//!
//! - a zero slot has no baseline (or marks a departure) and yields
//!   [`Gain::Invalid`], never 0;
//! - a negative difference means corrupted or reset data and also yields
//!   [`Gain::Invalid`];
//! - the final day of a period can only be derived once the series extends
//!   past the period's expected length, because upstream updates lag by one
//!   day ("fetch-back").

use serde::{Deserialize, Serialize};

/// A single day's derived gain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Gain {
    Valid(u64),
    /// No baseline for this day, a departure, or corrupted data.
    Invalid,
}

impl Gain {
    pub fn value(&self) -> Option<u64> {
        match self {
            Gain::Valid(v) => Some(*v),
            Gain::Invalid => None,
        }
    }

    pub fn is_positive(&self) -> bool {
        matches!(self, Gain::Valid(v) if *v > 0)
    }
}

/// Derive per-day gains from a cumulative series.
///
/// The result has one entry per input slot: entry `i` is the gain for day
/// `i + 1`, computed against the previous slot (day 1 is measured against an
/// implicit 0 baseline, so a member's first recorded total counts in full).
pub fn daily_gains(cumulative: &[u64]) -> Vec<Gain> {
    let mut gains = Vec::with_capacity(cumulative.len());
    let mut prev = 0u64;
    for &value in cumulative {
        if value == 0 {
            // Not joined yet, or a previously-positive series dropping to
            // zero (the member left). Either way there is no gain to report.
            gains.push(Gain::Invalid);
            // Keep prev: a later positive value after a dropout gap is still
            // measured against the last real total, not against zero.
            continue;
        }
        if value < prev {
            // Corrupted or reset upstream data. The baseline stays at the
            // last trustworthy total.
            gains.push(Gain::Invalid);
        } else {
            gains.push(Gain::Valid(value - prev));
            prev = value;
        }
    }
    gains
}

/// Fetch-back: derive the gain of a period's final day.
///
/// The value recorded on the final day still lags one day behind, so the true
/// end-of-period total only shows up in the next period's first recorded
/// value, at index `expected_len`. Until the series extends that far the
/// final day is not derivable.
pub fn final_day_gain(cumulative: &[u64], expected_len: usize) -> Option<u64> {
    if expected_len == 0 || cumulative.len() <= expected_len {
        return None;
    }
    let last = cumulative[expected_len - 1];
    let next_first = cumulative[expected_len];
    if last == 0 || next_first == 0 || next_first < last {
        return None;
    }
    Some(next_first - last)
}

/// Sum of all valid gains from `start_day` through `day` (1-based, inclusive).
pub fn gain_sum(gains: &[Gain], start_day: u32, day: u32) -> u64 {
    if start_day == 0 || day < start_day {
        return 0;
    }
    gains
        .iter()
        .skip(start_day as usize - 1)
        .take((day - start_day + 1) as usize)
        .filter_map(Gain::value)
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gains_basic_series() {
        let gains = daily_gains(&[100, 150, 150, 300]);
        assert_eq!(
            gains,
            vec![
                Gain::Valid(100),
                Gain::Valid(50),
                Gain::Valid(0),
                Gain::Valid(150),
            ]
        );
    }

    #[test]
    fn test_leading_zeros_are_invalid_not_zero() {
        // Late joiner: the first positive total counts in full.
        let gains = daily_gains(&[0, 0, 1_000_000, 1_040_000, 1_070_000]);
        assert_eq!(
            gains,
            vec![
                Gain::Invalid,
                Gain::Invalid,
                Gain::Valid(1_000_000),
                Gain::Valid(40_000),
                Gain::Valid(30_000),
            ]
        );
    }

    #[test]
    fn test_zero_after_positive_marks_departure() {
        let gains = daily_gains(&[5000, 0, 0]);
        assert_eq!(gains[0], Gain::Valid(5000));
        assert_eq!(gains[1], Gain::Invalid);
        assert_eq!(gains[2], Gain::Invalid);
    }

    #[test]
    fn test_negative_difference_is_invalid() {
        let gains = daily_gains(&[5000, 3000, 6000]);
        assert_eq!(gains[0], Gain::Valid(5000));
        assert_eq!(gains[1], Gain::Invalid);
        // After corruption the next diff is measured against the last real
        // baseline (5000), not the corrupted value.
        assert_eq!(gains[2], Gain::Valid(1000));
    }

    #[test]
    fn test_gain_sum_telescopes() {
        // Monotone non-decreasing series with no embedded zeros after the
        // first positive value: the sum of valid gains from start_day
        // through day d equals cumulative(d) - cumulative(start_day - 1).
        let series = [0u64, 0, 1000, 1500, 1500, 2200, 9000];
        let gains = daily_gains(&series);
        let start_day = 3u32;
        for day in start_day..=series.len() as u32 {
            let expected = series[day as usize - 1] - series[start_day as usize - 2];
            assert_eq!(gain_sum(&gains, start_day, day), expected, "day {}", day);
        }
    }

    #[test]
    fn test_final_day_needs_fetch_back() {
        // 31-day period: 31 recorded values alone are not enough.
        let mut series: Vec<u64> = (1..=31).map(|d| d * 1000).collect();
        assert_eq!(final_day_gain(&series, 31), None);

        // Next period's first value confirms the true end-of-period total.
        series.push(33_500);
        assert_eq!(final_day_gain(&series, 31), Some(2_500));
    }

    #[test]
    fn test_final_day_rejects_zero_and_negative() {
        let mut series = vec![100u64; 31];
        series.push(0);
        assert_eq!(final_day_gain(&series, 31), None);

        series[31] = 40; // below the last recorded value
        assert_eq!(final_day_gain(&series, 31), None);

        let mut departed = vec![0u64; 31];
        departed.push(500);
        assert_eq!(final_day_gain(&departed, 31), None);
    }
}
