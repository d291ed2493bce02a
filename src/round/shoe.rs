//! Shoe and round numbering.

use chrono::{Datelike, NaiveDate};

/// First shoe number of a calendar day: `YYYY·10000 + DD·100 + 1`.
pub fn first_shoe_of(today: NaiveDate) -> i64 {
    i64::from(today.year()) * 10_000 + i64::from(today.day()) * 100 + 1
}

/// Next shoe number: the day's first shoe, unless the current shoe is
/// already at or beyond it.
pub fn next_shoe_no(current: i64, today: NaiveDate) -> i64 {
    (current + 1).max(first_shoe_of(today))
}

/// Human-readable round serial, e.g. `B01-20240101-007`.
pub fn round_sn(table_no: &str, shoe_no: i64, round_no: u32) -> String {
    format!("{table_no}-{shoe_no}-{round_no:03}")
}
