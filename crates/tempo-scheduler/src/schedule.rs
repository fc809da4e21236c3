use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::cron::CronExpr;
use crate::error::{Result, SchedulerError};

/// Defines when and how often a job should run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Schedule {
    /// Run exactly once at the given UTC instant. A past instant fires
    /// at the first poll after submission.
    Once { at: DateTime<Utc> },

    /// Run repeatedly with a fixed interval in milliseconds, starting
    /// at `start` (submission time if unset) and never past `end`.
    Interval {
        every_ms: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        start: Option<DateTime<Utc>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        end: Option<DateTime<Utc>>,
    },

    /// Run according to a [`CronExpr`] (single literals or wildcards
    /// per field).
    Cron { expr: CronExpr },
}

/// Compute the next UTC due time for `schedule`.
///
/// `last_run` is the start time of the most recent execution, or `None`
/// before the first one. Returns `None` when the schedule is exhausted
/// and the job should be retired.
pub fn compute_next_run(
    schedule: &Schedule,
    last_run: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    match schedule {
        Schedule::Once { at } => match last_run {
            None => Some(*at),
            Some(_) => None,
        },

        Schedule::Interval {
            every_ms,
            start,
            end,
        } => {
            let due = match last_run {
                None => start.unwrap_or(now),
                Some(last) => last + Duration::milliseconds(*every_ms as i64),
            };
            match end {
                Some(end) if due > *end => None,
                _ => Some(due),
            }
        }

        Schedule::Cron { expr } => expr.next_match(last_run.unwrap_or(now)),
    }
}

/// Submission-time validation: malformed or unsatisfiable schedules are
/// rejected here, never surfaced later as a runtime failure.
pub fn validate_schedule(schedule: &Schedule, now: DateTime<Utc>) -> Result<()> {
    match schedule {
        Schedule::Once { .. } => Ok(()),

        Schedule::Interval {
            every_ms,
            start,
            end,
        } => {
            if *every_ms == 0 {
                return Err(SchedulerError::InvalidSchedule(
                    "interval must be at least 1ms".to_string(),
                ));
            }
            if let (Some(start), Some(end)) = (start, end) {
                if start > end {
                    return Err(SchedulerError::InvalidSchedule(format!(
                        "interval start {start} is after end {end}"
                    )));
                }
            }
            Ok(())
        }

        Schedule::Cron { expr } => {
            // The 366-day scan bounds the cost; anything that never
            // matches inside it (e.g. "0 0 30 2 *") is unsatisfiable.
            if expr.next_match(now).is_none() {
                return Err(SchedulerError::InvalidSchedule(format!(
                    "cron expression \"{expr}\" never matches within the lookahead window"
                )));
            }
            Ok(())
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
