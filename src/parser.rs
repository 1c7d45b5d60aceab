//! Crontab field parsing and next-fire-time computation
//!
//! A crontab schedule holds five pattern strings:
//! `minute` (0-59), `hour` (0-23), `day_of_week` (0-7, 0 and 7 = Sunday),
//! `day_of_month` (1-31), `month_of_year` (1-12).
//!
//! Each pattern supports:
//! - `*` - any value
//! - `,` - value list separator (e.g., `1,3,5`)
//! - `-` - range (e.g., `1-5`)
//! - `/` - step (e.g., `*/5` or `0-30/5`)
//!
//! All five fields must match for a minute boundary to fire.

use crate::types::{BeatError, Result};
use chrono::{Datelike, Duration, NaiveDateTime, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Maximum look-ahead when scanning for the next fire time.
///
/// Field combinations that never match (e.g. Feb 30) would otherwise scan
/// forever; exceeding the horizon is a `Config` error.
const MAX_SCAN_DAYS: i64 = 5 * 366;

fn default_star() -> String {
    "*".to_string()
}

/// A crontab schedule as stored: five raw pattern strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Crontab {
    #[serde(default = "default_star")]
    pub minute: String,
    #[serde(default = "default_star")]
    pub hour: String,
    #[serde(default = "default_star")]
    pub day_of_week: String,
    #[serde(default = "default_star")]
    pub day_of_month: String,
    #[serde(default = "default_star")]
    pub month_of_year: String,
}

impl Default for Crontab {
    fn default() -> Self {
        Self {
            minute: default_star(),
            hour: default_star(),
            day_of_week: default_star(),
            day_of_month: default_star(),
            month_of_year: default_star(),
        }
    }
}

impl std::fmt::Display for Crontab {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {} {} {} {} (m/h/dw/dM/MY)",
            self.minute, self.hour, self.day_of_week, self.day_of_month, self.month_of_year,
        )
    }
}

impl Crontab {
    /// Build a crontab schedule, validating every field pattern.
    pub fn new(
        minute: impl Into<String>,
        hour: impl Into<String>,
        day_of_week: impl Into<String>,
        day_of_month: impl Into<String>,
        month_of_year: impl Into<String>,
    ) -> Result<Self> {
        let crontab = Self {
            minute: minute.into(),
            hour: hour.into(),
            day_of_week: day_of_week.into(),
            day_of_month: day_of_month.into(),
            month_of_year: month_of_year.into(),
        };
        crontab.fields()?;
        Ok(crontab)
    }

    /// Parse the five patterns into allowed-value sets.
    pub fn fields(&self) -> Result<CronFields> {
        let minutes = parse_field(&self.minute, 0, 59, "minute")?;
        let hours = parse_field(&self.hour, 0, 23, "hour")?;
        let mut days_of_week = parse_field(&self.day_of_week, 0, 7, "day_of_week")?;
        let days_of_month = parse_field(&self.day_of_month, 1, 31, "day_of_month")?;
        let months = parse_field(&self.month_of_year, 1, 12, "month_of_year")?;

        // 7 is an alias for Sunday
        if days_of_week.remove(&7) {
            days_of_week.insert(0);
        }

        Ok(CronFields {
            minutes,
            hours,
            days_of_week,
            days_of_month,
            months,
        })
    }
}

/// Parsed allowed-value sets for a crontab schedule.
#[derive(Debug, Clone)]
pub struct CronFields {
    minutes: BTreeSet<u32>,
    hours: BTreeSet<u32>,
    days_of_week: BTreeSet<u32>,
    days_of_month: BTreeSet<u32>,
    months: BTreeSet<u32>,
}

impl CronFields {
    /// Check whether a (local) datetime lands on an allowed minute boundary.
    pub fn matches(&self, dt: &NaiveDateTime) -> bool {
        self.matches_date(dt.date())
            && self.hours.contains(&dt.hour())
            && self.minutes.contains(&dt.minute())
    }

    fn matches_date(&self, date: chrono::NaiveDate) -> bool {
        self.months.contains(&date.month())
            && self.days_of_month.contains(&date.day())
            && self
                .days_of_week
                .contains(&date.weekday().num_days_from_sunday())
    }

    /// Compute the next matching minute boundary strictly after `after`,
    /// scanning forward day-by-day and picking the first allowed hour and
    /// minute on each matching date.
    pub fn next_after(&self, after: NaiveDateTime) -> Result<NaiveDateTime> {
        let start = truncate_to_minute(after + Duration::minutes(1));
        let mut date = start.date();

        for _ in 0..=MAX_SCAN_DAYS {
            if self.matches_date(date) {
                let (from_hour, from_minute) = if date == start.date() {
                    (start.hour(), start.minute())
                } else {
                    (0, 0)
                };
                if let Some(time) = self.first_time_from(from_hour, from_minute) {
                    return Ok(date.and_time(time));
                }
            }
            date = date.succ_opt().ok_or_else(|| {
                BeatError::Config("crontab scan ran past the supported date range".to_string())
            })?;
        }

        Err(BeatError::Config(format!(
            "crontab fields never match within {} days: {} {} {} {} {}",
            MAX_SCAN_DAYS,
            self.describe_set(&self.minutes),
            self.describe_set(&self.hours),
            self.describe_set(&self.days_of_week),
            self.describe_set(&self.days_of_month),
            self.describe_set(&self.months),
        )))
    }

    /// First allowed (hour, minute) at or after the given time of day.
    fn first_time_from(&self, from_hour: u32, from_minute: u32) -> Option<NaiveTime> {
        for &hour in self.hours.range(from_hour..) {
            let min_minute = if hour == from_hour { from_minute } else { 0 };
            if let Some(&minute) = self.minutes.range(min_minute..).next() {
                return NaiveTime::from_hms_opt(hour, minute, 0);
            }
        }
        None
    }

    fn describe_set(&self, set: &BTreeSet<u32>) -> String {
        let values: Vec<String> = set.iter().map(|v| v.to_string()).collect();
        format!("{{{}}}", values.join(","))
    }
}

fn truncate_to_minute(dt: NaiveDateTime) -> NaiveDateTime {
    dt.date().and_time(
        NaiveTime::from_hms_opt(dt.hour(), dt.minute(), 0).unwrap_or_else(|| dt.time()),
    )
}

/// Parse a single crontab field pattern into its allowed-value set.
fn parse_field(field: &str, min: u32, max: u32, name: &str) -> Result<BTreeSet<u32>> {
    let mut values = BTreeSet::new();

    for part in field.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }

        // Step values (e.g., */5 or 0-30/5)
        let (range_part, step) = if let Some(idx) = part.find('/') {
            let step_str = &part[idx + 1..];
            let step: u32 = step_str.parse().map_err(|_| {
                BeatError::Config(format!("invalid step value '{step_str}' in {name}"))
            })?;
            if step == 0 {
                return Err(BeatError::Config(format!(
                    "step value cannot be 0 in {name}"
                )));
            }
            (&part[..idx], Some(step))
        } else {
            (part, None)
        };

        // The range part: *, N, or N-M
        let (start, end) = if range_part == "*" {
            (min, max)
        } else if let Some(idx) = range_part.find('-') {
            let start: u32 = range_part[..idx].parse().map_err(|_| {
                BeatError::Config(format!(
                    "invalid range start '{}' in {name}",
                    &range_part[..idx]
                ))
            })?;
            let end: u32 = range_part[idx + 1..].parse().map_err(|_| {
                BeatError::Config(format!(
                    "invalid range end '{}' in {name}",
                    &range_part[idx + 1..]
                ))
            })?;
            (start, end)
        } else {
            let value: u32 = range_part.parse().map_err(|_| {
                BeatError::Config(format!("invalid value '{range_part}' in {name}"))
            })?;
            (value, value)
        };

        if start < min || start > max || end < min || end > max {
            return Err(BeatError::Config(format!(
                "value out of range ({min}-{max}) in {name}: '{part}'"
            )));
        }
        if start > end {
            return Err(BeatError::Config(format!(
                "invalid range {start}-{end} in {name}"
            )));
        }

        let step = step.unwrap_or(1);
        let mut current = start;
        while current <= end {
            values.insert(current);
            current += step;
        }
    }

    if values.is_empty() {
        return Err(BeatError::Config(format!("no valid values in {name}")));
    }

    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn dt(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, mo, d)
            .unwrap()
            .and_hms_opt(h, mi, 0)
            .unwrap()
    }

    #[test]
    fn test_parse_every_minute() {
        let fields = Crontab::default().fields().unwrap();
        assert_eq!(fields.minutes.len(), 60);
        assert_eq!(fields.hours.len(), 24);
        assert_eq!(fields.days_of_week.len(), 7);
        assert_eq!(fields.days_of_month.len(), 31);
        assert_eq!(fields.months.len(), 12);
    }

    #[test]
    fn test_parse_specific_time() {
        let fields = Crontab::new("30", "2", "*", "*", "*").unwrap().fields().unwrap();
        assert_eq!(fields.minutes, BTreeSet::from([30]));
        assert_eq!(fields.hours, BTreeSet::from([2]));
    }

    #[test]
    fn test_parse_step() {
        let fields = Crontab::new("*/15", "*", "*", "*", "*").unwrap().fields().unwrap();
        assert_eq!(fields.minutes, BTreeSet::from([0, 15, 30, 45]));
    }

    #[test]
    fn test_parse_range_with_step() {
        let fields = Crontab::new("0-30/10", "*", "*", "*", "*").unwrap().fields().unwrap();
        assert_eq!(fields.minutes, BTreeSet::from([0, 10, 20, 30]));
    }

    #[test]
    fn test_parse_list() {
        let fields = Crontab::new("0", "0", "1,3,5", "*", "*").unwrap().fields().unwrap();
        assert_eq!(fields.days_of_week, BTreeSet::from([1, 3, 5]));
    }

    #[test]
    fn test_day_of_week_seven_is_sunday() {
        let fields = Crontab::new("0", "0", "7", "*", "*").unwrap().fields().unwrap();
        assert_eq!(fields.days_of_week, BTreeSet::from([0]));
    }

    #[test]
    fn test_parse_invalid_value() {
        assert!(Crontab::new("60", "*", "*", "*", "*").is_err());
        assert!(Crontab::new("*", "24", "*", "*", "*").is_err());
        assert!(Crontab::new("*", "*", "8", "*", "*").is_err());
        assert!(Crontab::new("*", "*", "*", "0", "*").is_err());
        assert!(Crontab::new("*", "*", "*", "*", "13").is_err());
    }

    #[test]
    fn test_parse_invalid_range() {
        assert!(Crontab::new("30-10", "*", "*", "*", "*").is_err());
    }

    #[test]
    fn test_parse_zero_step() {
        assert!(Crontab::new("*/0", "*", "*", "*", "*").is_err());
    }

    #[test]
    fn test_next_after_top_of_hour() {
        let fields = Crontab::new("0", "*", "*", "*", "*").unwrap().fields().unwrap();
        let next = fields.next_after(dt(2026, 2, 5, 10, 30)).unwrap();
        assert_eq!(next, dt(2026, 2, 5, 11, 0));
    }

    #[test]
    fn test_next_after_same_day() {
        let fields = Crontab::new("30", "14", "*", "*", "*").unwrap().fields().unwrap();
        let next = fields.next_after(dt(2026, 2, 5, 10, 0)).unwrap();
        assert_eq!(next, dt(2026, 2, 5, 14, 30));
    }

    #[test]
    fn test_next_after_rolls_to_next_day() {
        let fields = Crontab::new("0", "2", "*", "*", "*").unwrap().fields().unwrap();
        let next = fields.next_after(dt(2026, 2, 5, 10, 0)).unwrap();
        assert_eq!(next, dt(2026, 2, 6, 2, 0));
    }

    #[test]
    fn test_next_after_strictly_greater() {
        // An exactly-matching boundary must advance to the next one.
        let fields = Crontab::default().fields().unwrap();
        let after = dt(2026, 2, 5, 10, 30);
        let next = fields.next_after(after).unwrap();
        assert_eq!(next, dt(2026, 2, 5, 10, 31));
        assert!(next > after);
    }

    #[test]
    fn test_next_after_honors_weekday() {
        // Feb 2, 2026 is a Monday (day_of_week 1).
        let fields = Crontab::new("30", "14", "1", "*", "*").unwrap().fields().unwrap();
        let next = fields.next_after(dt(2026, 2, 3, 0, 0)).unwrap();
        assert_eq!(next, dt(2026, 2, 9, 14, 30));
        assert_eq!(next.weekday().num_days_from_sunday(), 1);
    }

    #[test]
    fn test_next_after_honors_month() {
        let fields = Crontab::new("0", "0", "*", "1", "6").unwrap().fields().unwrap();
        let next = fields.next_after(dt(2026, 2, 5, 10, 0)).unwrap();
        assert_eq!(next, dt(2026, 6, 1, 0, 0));
    }

    #[test]
    fn test_impossible_combination_is_config_error() {
        // February 30th never exists.
        let fields = Crontab::new("0", "0", "*", "30", "2").unwrap().fields().unwrap();
        let err = fields.next_after(dt(2026, 1, 1, 0, 0)).unwrap_err();
        assert!(matches!(err, BeatError::Config(_)));
    }

    #[test]
    fn test_matches_round_trip() {
        let fields = Crontab::new("*/10", "9-17", "*", "*", "*").unwrap().fields().unwrap();
        let mut t = dt(2026, 2, 5, 0, 0);
        for _ in 0..5 {
            t = fields.next_after(t).unwrap();
            assert!(fields.matches(&t), "computed boundary must match: {t}");
            assert!(t.minute() % 10 == 0);
            assert!((9..=17).contains(&t.hour()));
        }
    }

    #[test]
    fn test_display() {
        let crontab = Crontab::new("0", "4", "*", "*", "*").unwrap();
        assert_eq!(crontab.to_string(), "0 4 * * * (m/h/dw/dM/MY)");
    }
}
