//! Minimal cron expressions: five whitespace-separated fields
//! (minute, hour, day-of-month, month, day-of-week), each either a
//! single literal value or the `*` wildcard. Ranges, lists, and step
//! values are deliberately unsupported and rejected at parse time.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Duration, Timelike, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::SchedulerError;

/// How far `next_match` scans before concluding the expression is
/// unsatisfiable (covers a leap year).
pub const LOOKAHEAD_DAYS: i64 = 366;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CronField {
    Any,
    Exact(u8),
}

impl CronField {
    fn matches(self, value: u8) -> bool {
        match self {
            CronField::Any => true,
            CronField::Exact(v) => v == value,
        }
    }
}

impl fmt::Display for CronField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CronField::Any => write!(f, "*"),
            CronField::Exact(v) => write!(f, "{v}"),
        }
    }
}

/// A parsed, validated cron expression.
///
/// Day-of-week uses conventional cron numbering: 0 = Sunday through
/// 6 = Saturday. All evaluation is in UTC at whole-minute granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CronExpr {
    minute: CronField,
    hour: CronField,
    day: CronField,
    month: CronField,
    weekday: CronField,
}

impl CronExpr {
    /// Whether `t` (truncated to the minute) satisfies every field.
    pub fn matches(&self, t: DateTime<Utc>) -> bool {
        self.minute.matches(t.minute() as u8)
            && self.hour.matches(t.hour() as u8)
            && self.day.matches(t.day() as u8)
            && self.month.matches(t.month() as u8)
            && self.weekday.matches(t.weekday().num_days_from_sunday() as u8)
    }

    /// First matching instant strictly after `after`, scanning forward
    /// minute by minute. Returns `None` once the scan passes the
    /// [`LOOKAHEAD_DAYS`] horizon — unsatisfiable expressions are meant
    /// to be caught at submission, not discovered in the poll loop.
    pub fn next_match(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let mut t = after.with_second(0)?.with_nanosecond(0)? + Duration::minutes(1);
        let horizon = after + Duration::days(LOOKAHEAD_DAYS);
        while t <= horizon {
            if self.matches(t) {
                return Some(t);
            }
            t += Duration::minutes(1);
        }
        None
    }
}

fn parse_field(raw: &str, min: u8, max: u8, name: &str) -> Result<CronField, SchedulerError> {
    if raw == "*" {
        return Ok(CronField::Any);
    }
    if raw.chars().any(|c| matches!(c, '-' | ',' | '/')) {
        return Err(SchedulerError::InvalidSchedule(format!(
            "cron {name} field {raw:?}: ranges, lists and steps are not supported"
        )));
    }
    let value: u8 = raw.parse().map_err(|_| {
        SchedulerError::InvalidSchedule(format!(
            "cron {name} field {raw:?} is not a number or '*'"
        ))
    })?;
    if value < min || value > max {
        return Err(SchedulerError::InvalidSchedule(format!(
            "cron {name} field {value} out of range {min}-{max}"
        )));
    }
    Ok(CronField::Exact(value))
}

impl FromStr for CronExpr {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let fields: Vec<&str> = s.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(SchedulerError::InvalidSchedule(format!(
                "cron expression {s:?} must have 5 fields, got {}",
                fields.len()
            )));
        }
        Ok(Self {
            minute: parse_field(fields[0], 0, 59, "minute")?,
            hour: parse_field(fields[1], 0, 23, "hour")?,
            day: parse_field(fields[2], 1, 31, "day-of-month")?,
            month: parse_field(fields[3], 1, 12, "month")?,
            weekday: parse_field(fields[4], 0, 6, "day-of-week")?,
        })
    }
}

impl fmt::Display for CronExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {} {}",
            self.minute, self.hour, self.day, self.month, self.weekday
        )
    }
}

impl Serialize for CronExpr {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for CronExpr {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
