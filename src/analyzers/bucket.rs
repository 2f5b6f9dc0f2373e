//! Calendar bucketing of placed timestamps.
//!
//! A bucket is left-closed: it starts at midnight UTC of its first day and
//! ends just before the next bucket's first day.

use crate::config::Granularity;
use chrono::{DateTime, Datelike, Days, NaiveDate, Utc};

/// Truncates a UTC timestamp to the start of its bucket.
pub fn bucket_start(timestamp: DateTime<Utc>, granularity: Granularity) -> NaiveDate {
    let date = timestamp.date_naive();
    match granularity {
        Granularity::Day => date,
        Granularity::Week => {
            let since_monday = u64::from(date.weekday().num_days_from_monday());
            date.checked_sub_days(Days::new(since_monday)).unwrap_or(date)
        }
        Granularity::Month => date.with_day(1).unwrap_or(date),
    }
}

/// Human readable bucket name used on chart axes.
pub fn bucket_label(start: NaiveDate, granularity: Granularity) -> String {
    match granularity {
        Granularity::Day => start.format("%Y-%m-%d").to_string(),
        Granularity::Week => {
            let week = start.iso_week();
            format!("{}-W{:02}", week.year(), week.week())
        }
        Granularity::Month => start.format("%Y-%m").to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_day_bucket_is_left_closed_right_open() {
        let midnight = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();
        let just_before = Utc.with_ymd_and_hms(2024, 1, 1, 23, 59, 59).unwrap();

        assert_eq!(bucket_start(midnight, Granularity::Day), date(2024, 1, 2));
        assert_eq!(bucket_start(just_before, Granularity::Day), date(2024, 1, 1));
    }

    #[test]
    fn test_week_bucket_starts_on_monday() {
        // 2024-01-07 is a Sunday, 2024-01-08 a Monday
        let sunday = Utc.with_ymd_and_hms(2024, 1, 7, 18, 0, 0).unwrap();
        let monday = Utc.with_ymd_and_hms(2024, 1, 8, 0, 0, 0).unwrap();

        assert_eq!(bucket_start(sunday, Granularity::Week), date(2024, 1, 1));
        assert_eq!(bucket_start(monday, Granularity::Week), date(2024, 1, 8));
    }

    #[test]
    fn test_week_bucket_crosses_year_boundary() {
        let ts = Utc.with_ymd_and_hms(2021, 1, 2, 12, 0, 0).unwrap();
        let start = bucket_start(ts, Granularity::Week);

        assert_eq!(start, date(2020, 12, 28));
        assert_eq!(bucket_label(start, Granularity::Week), "2020-W53");
    }

    #[test]
    fn test_month_bucket() {
        let ts = Utc.with_ymd_and_hms(2024, 2, 29, 23, 59, 59).unwrap();
        let start = bucket_start(ts, Granularity::Month);

        assert_eq!(start, date(2024, 2, 1));
        assert_eq!(
            bucket_start(Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap(), Granularity::Month),
            date(2024, 3, 1)
        );
        assert_eq!(bucket_label(start, Granularity::Month), "2024-02");
    }
}
