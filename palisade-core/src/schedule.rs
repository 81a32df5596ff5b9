//! Cron-style schedules
//!
//! Backup jobs and recurring recovery tests fire on five-field cron
//! expressions (`minute hour day-of-month month day-of-week`, UTC). Each field
//! accepts `*`, single values, ranges (`1-5`), lists (`1,15,30`) and steps
//! (`*/15`, `0-30/10`). The aliases `@hourly`, `@daily`, `@midnight`,
//! `@weekly` and `@monthly` are also understood.

use chrono::{DateTime, Datelike, Duration, DurationRound, TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors that can occur while parsing a schedule
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ScheduleError {
    #[error("Schedule expression is empty")]
    Empty,

    #[error("Expected 5 fields, found {0}")]
    FieldCount(usize),

    #[error("Invalid {field} field: '{value}'")]
    InvalidField { field: &'static str, value: String },

    #[error("{field} value {value} outside {min}..={max}")]
    OutOfRange {
        field: &'static str,
        value: u32,
        min: u32,
        max: u32,
    },
}

/// Upper bound on search steps before giving up on an unsatisfiable schedule
/// (e.g. `0 0 31 2 *`).
const MAX_SEARCH_STEPS: usize = 20_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FieldSpec {
    name: &'static str,
    min: u32,
    max: u32,
}

const MINUTE: FieldSpec = FieldSpec {
    name: "minute",
    min: 0,
    max: 59,
};
const HOUR: FieldSpec = FieldSpec {
    name: "hour",
    min: 0,
    max: 23,
};
const DAY_OF_MONTH: FieldSpec = FieldSpec {
    name: "day-of-month",
    min: 1,
    max: 31,
};
const MONTH: FieldSpec = FieldSpec {
    name: "month",
    min: 1,
    max: 12,
};
// 7 is accepted as an alias for Sunday and folded onto 0.
const DAY_OF_WEEK: FieldSpec = FieldSpec {
    name: "day-of-week",
    min: 0,
    max: 7,
};

/// Set of permitted values for one field, as a bitmask.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FieldSet {
    bits: u64,
    restricted: bool,
}

impl FieldSet {
    fn contains(&self, value: u32) -> bool {
        self.bits & (1u64 << value) != 0
    }

    fn parse(raw: &str, spec: FieldSpec) -> Result<Self, ScheduleError> {
        let invalid = || ScheduleError::InvalidField {
            field: spec.name,
            value: raw.to_string(),
        };
        let mut bits = 0u64;

        for item in raw.split(',') {
            if item.is_empty() {
                return Err(invalid());
            }
            let (range, step) = match item.split_once('/') {
                Some((range, step)) => {
                    let step: u32 = step.parse().map_err(|_| invalid())?;
                    if step == 0 {
                        return Err(invalid());
                    }
                    (range, step)
                }
                None => (item, 1),
            };

            let (start, end) = if range == "*" {
                (spec.min, spec.max)
            } else if let Some((lo, hi)) = range.split_once('-') {
                (
                    Self::value(lo, spec, raw)?,
                    Self::value(hi, spec, raw)?,
                )
            } else {
                let v = Self::value(range, spec, raw)?;
                // `5/15` means "from 5 to the end of the range, every 15"
                if step > 1 {
                    (v, spec.max)
                } else {
                    (v, v)
                }
            };
            if start > end {
                return Err(invalid());
            }

            let mut v = start;
            while v <= end {
                bits |= 1u64 << v;
                v += step;
            }
        }

        if spec == DAY_OF_WEEK && bits & (1 << 7) != 0 {
            bits = (bits & !(1 << 7)) | 1;
        }

        Ok(Self {
            bits,
            restricted: raw != "*",
        })
    }

    fn value(raw: &str, spec: FieldSpec, field_raw: &str) -> Result<u32, ScheduleError> {
        let v: u32 = raw.parse().map_err(|_| ScheduleError::InvalidField {
            field: spec.name,
            value: field_raw.to_string(),
        })?;
        if v < spec.min || v > spec.max {
            return Err(ScheduleError::OutOfRange {
                field: spec.name,
                value: v,
                min: spec.min,
                max: spec.max,
            });
        }
        Ok(v)
    }
}

/// A parsed cron expression.
///
/// Serialized as its source expression.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CronSchedule {
    expression: String,
    minutes: FieldSet,
    hours: FieldSet,
    days_of_month: FieldSet,
    months: FieldSet,
    days_of_week: FieldSet,
}

impl CronSchedule {
    /// Parse a cron expression or alias
    pub fn parse(expression: &str) -> Result<Self, ScheduleError> {
        let trimmed = expression.trim();
        if trimmed.is_empty() {
            return Err(ScheduleError::Empty);
        }

        let expanded = match trimmed {
            "@hourly" => "0 * * * *",
            "@daily" | "@midnight" => "0 0 * * *",
            "@weekly" => "0 0 * * 0",
            "@monthly" => "0 0 1 * *",
            other => other,
        };

        let fields: Vec<&str> = expanded.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(ScheduleError::FieldCount(fields.len()));
        }

        Ok(Self {
            expression: trimmed.to_string(),
            minutes: FieldSet::parse(fields[0], MINUTE)?,
            hours: FieldSet::parse(fields[1], HOUR)?,
            days_of_month: FieldSet::parse(fields[2], DAY_OF_MONTH)?,
            months: FieldSet::parse(fields[3], MONTH)?,
            days_of_week: FieldSet::parse(fields[4], DAY_OF_WEEK)?,
        })
    }

    pub fn daily() -> Self {
        Self::parse("@daily").expect("alias is valid")
    }

    pub fn hourly() -> Self {
        Self::parse("@hourly").expect("alias is valid")
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// Compute the first firing strictly after `after`.
    ///
    /// Returns `None` when no firing exists within the search horizon.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let mut t = after.duration_trunc(Duration::minutes(1)).ok()? + Duration::minutes(1);

        for _ in 0..MAX_SEARCH_STEPS {
            if !self.months.contains(t.month()) {
                let (year, month) = if t.month() == 12 {
                    (t.year() + 1, 1)
                } else {
                    (t.year(), t.month() + 1)
                };
                t = Utc.with_ymd_and_hms(year, month, 1, 0, 0, 0).single()?;
                continue;
            }
            if !self.day_matches(&t) {
                t = (t + Duration::days(1)).duration_trunc(Duration::days(1)).ok()?;
                continue;
            }
            if !self.hours.contains(t.hour()) {
                t = (t + Duration::hours(1)).duration_trunc(Duration::hours(1)).ok()?;
                continue;
            }
            if !self.minutes.contains(t.minute()) {
                t += Duration::minutes(1);
                continue;
            }
            return Some(t);
        }

        None
    }

    /// Standard cron day semantics: when both day fields are restricted a
    /// day matches if either matches.
    fn day_matches(&self, t: &DateTime<Utc>) -> bool {
        let dom = self.days_of_month.contains(t.day());
        let dow = self
            .days_of_week
            .contains(t.weekday().num_days_from_sunday());

        match (self.days_of_month.restricted, self.days_of_week.restricted) {
            (true, true) => dom || dow,
            (true, false) => dom,
            (false, true) => dow,
            (false, false) => true,
        }
    }
}

impl fmt::Display for CronSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.expression)
    }
}

impl FromStr for CronSchedule {
    type Err = ScheduleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for CronSchedule {
    type Error = ScheduleError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<CronSchedule> for String {
    fn from(schedule: CronSchedule) -> Self {
        schedule.expression
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    #[test]
    fn test_daily_fires_at_midnight() {
        let schedule = CronSchedule::daily();
        assert_eq!(
            schedule.next_after(at(2024, 3, 10, 14, 30)),
            Some(at(2024, 3, 11, 0, 0))
        );
        // Exactly on a firing: next one is strictly later
        assert_eq!(
            schedule.next_after(at(2024, 3, 11, 0, 0)),
            Some(at(2024, 3, 12, 0, 0))
        );
    }

    #[test]
    fn test_step_minutes() {
        let schedule = CronSchedule::parse("*/15 * * * *").unwrap();
        assert_eq!(
            schedule.next_after(at(2024, 1, 1, 9, 1)),
            Some(at(2024, 1, 1, 9, 15))
        );
        assert_eq!(
            schedule.next_after(at(2024, 1, 1, 9, 45)),
            Some(at(2024, 1, 1, 10, 0))
        );
    }

    #[test]
    fn test_ranges_and_lists() {
        // 02:30 on weekdays
        let schedule = CronSchedule::parse("30 2 * * 1-5").unwrap();
        // 2024-03-09 is a Saturday
        assert_eq!(
            schedule.next_after(at(2024, 3, 9, 12, 0)),
            Some(at(2024, 3, 11, 2, 30))
        );

        let schedule = CronSchedule::parse("0 6,18 * * *").unwrap();
        assert_eq!(
            schedule.next_after(at(2024, 3, 9, 7, 0)),
            Some(at(2024, 3, 9, 18, 0))
        );
    }

    #[test]
    fn test_month_rollover() {
        let schedule = CronSchedule::parse("@monthly").unwrap();
        assert_eq!(
            schedule.next_after(at(2024, 12, 15, 0, 0)),
            Some(at(2025, 1, 1, 0, 0))
        );
    }

    #[test]
    fn test_sunday_alias() {
        let a = CronSchedule::parse("0 0 * * 7").unwrap();
        let b = CronSchedule::parse("0 0 * * 0").unwrap();
        let from = at(2024, 3, 6, 0, 0);
        assert_eq!(a.next_after(from), b.next_after(from));
    }

    #[test]
    fn test_unsatisfiable_schedule_returns_none() {
        let schedule = CronSchedule::parse("0 0 31 2 *").unwrap();
        assert_eq!(schedule.next_after(at(2024, 1, 1, 0, 0)), None);
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(CronSchedule::parse("  "), Err(ScheduleError::Empty));
        assert_eq!(
            CronSchedule::parse("* * *"),
            Err(ScheduleError::FieldCount(3))
        );
        assert!(matches!(
            CronSchedule::parse("61 * * * *"),
            Err(ScheduleError::OutOfRange { field: "minute", .. })
        ));
        assert!(matches!(
            CronSchedule::parse("*/0 * * * *"),
            Err(ScheduleError::InvalidField { .. })
        ));
        assert!(matches!(
            CronSchedule::parse("5-1 * * * *"),
            Err(ScheduleError::InvalidField { .. })
        ));
    }

    #[test]
    fn test_serde_uses_expression() {
        let schedule = CronSchedule::parse("@hourly").unwrap();
        let json = serde_json::to_string(&schedule).unwrap();
        assert_eq!(json, "\"@hourly\"");
        let back: CronSchedule = serde_json::from_str(&json).unwrap();
        assert_eq!(back, schedule);
    }
}
