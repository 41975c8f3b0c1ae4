//! Temporal helpers for billing-calendar arithmetic
//!
//! The reconciliation engine reasons about whole calendar months (billing
//! cycles), billing-day occurrences, and the processor's epoch-second
//! timestamps. All date arithmetic happens on naive civil dates at midnight;
//! conversion to the reporting timezone happens only at the edges, when
//! building Policy Service payment records or processor phase boundaries.

use chrono::{DateTime, Datelike, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;
use thiserror::Error;

/// Errors related to temporal operations
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TemporalError {
    #[error("Invalid day of month: {0} (expected 1-31)")]
    InvalidDayOfMonth(u32),
}

/// Number of days in the given month, accounting for leap years
fn days_in_month(year: i32, month: u32) -> u32 {
    let next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)
    };
    next.and_then(|d| d.pred_opt())
        .map(|d| d.day())
        .unwrap_or(28)
}

/// Adds whole calendar months, clamping the day to the target month's length
///
/// `2025-01-31 + 1 month == 2025-02-28`.
pub fn add_months(date: NaiveDate, months: i32) -> NaiveDate {
    let zero_based = date.year() * 12 + date.month() as i32 - 1 + months;
    let year = zero_based.div_euclid(12);
    let month = zero_based.rem_euclid(12) as u32 + 1;
    let day = date.day().min(days_in_month(year, month));
    NaiveDate::from_ymd_opt(year, month, day).expect("clamped day is always valid")
}

/// Whole-calendar-month difference between two dates
///
/// Counts the number of complete months elapsed from `from` to `to`; a
/// partial trailing month does not count. Negative when `to` precedes `from`.
pub fn months_between(from: NaiveDate, to: NaiveDate) -> i32 {
    let mut months =
        (to.year() - from.year()) * 12 + to.month() as i32 - from.month() as i32;
    if to.day() < from.day() && months > 0 {
        months -= 1;
    } else if to.day() > from.day() && months < 0 {
        months += 1;
    }
    months
}

/// Next occurrence of a day-of-month on or after the reference date
///
/// Days beyond the target month's length clamp to its final day. Fails for a
/// day outside 1-31.
pub fn next_occurrence(reference: NaiveDate, day: u32) -> Result<NaiveDate, TemporalError> {
    if !(1..=31).contains(&day) {
        return Err(TemporalError::InvalidDayOfMonth(day));
    }

    let clamped = day.min(days_in_month(reference.year(), reference.month()));
    let candidate = NaiveDate::from_ymd_opt(reference.year(), reference.month(), clamped)
        .expect("clamped day is always valid");

    if candidate < reference {
        let rolled = add_months(
            NaiveDate::from_ymd_opt(reference.year(), reference.month(), 1)
                .expect("first of month is always valid"),
            1,
        );
        let clamped = day.min(days_in_month(rolled.year(), rolled.month()));
        Ok(NaiveDate::from_ymd_opt(rolled.year(), rolled.month(), clamped)
            .expect("clamped day is always valid"))
    } else {
        Ok(candidate)
    }
}

/// Converts a processor epoch-second timestamp to the reporting timezone
pub fn local_timestamp(epoch_secs: i64, tz: Tz) -> DateTime<Tz> {
    Utc.timestamp_opt(epoch_secs, 0)
        .single()
        .unwrap_or_else(|| Utc.timestamp_opt(0, 0).unwrap())
        .with_timezone(&tz)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn test_add_months_clamps_to_month_end() {
        assert_eq!(add_months(d(2025, 1, 31), 1), d(2025, 2, 28));
        assert_eq!(add_months(d(2024, 1, 31), 1), d(2024, 2, 29));
        assert_eq!(add_months(d(2025, 12, 15), 1), d(2026, 1, 15));
    }

    #[test]
    fn test_months_between_exact() {
        assert_eq!(months_between(d(2025, 1, 15), d(2025, 6, 15)), 5);
    }

    #[test]
    fn test_months_between_partial_month_does_not_count() {
        assert_eq!(months_between(d(2025, 1, 20), d(2025, 6, 15)), 4);
    }

    #[test]
    fn test_months_between_negative() {
        assert_eq!(months_between(d(2025, 6, 15), d(2025, 1, 15)), -5);
    }

    #[test]
    fn test_next_occurrence_same_day() {
        assert_eq!(next_occurrence(d(2025, 3, 10), 10).unwrap(), d(2025, 3, 10));
    }

    #[test]
    fn test_next_occurrence_rolls_forward() {
        assert_eq!(next_occurrence(d(2025, 3, 20), 10).unwrap(), d(2025, 4, 10));
    }

    #[test]
    fn test_next_occurrence_clamps_short_month() {
        assert_eq!(next_occurrence(d(2025, 2, 1), 31).unwrap(), d(2025, 2, 28));
    }

    #[test]
    fn test_next_occurrence_rejects_invalid_day() {
        assert!(matches!(
            next_occurrence(d(2025, 2, 1), 0),
            Err(TemporalError::InvalidDayOfMonth(0))
        ));
        assert!(matches!(
            next_occurrence(d(2025, 2, 1), 32),
            Err(TemporalError::InvalidDayOfMonth(32))
        ));
    }

    #[test]
    fn test_local_timestamp_offset() {
        let ts = local_timestamp(1_700_000_000, chrono_tz::Africa::Johannesburg);
        // SAST is UTC+2 year-round
        assert_eq!(ts.offset().to_string(), "+02:00");
    }
}
