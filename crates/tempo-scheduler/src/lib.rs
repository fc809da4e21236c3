//! `tempo-scheduler` — in-process job scheduling engine.
//!
//! # Overview
//!
//! Jobs live in an in-memory registry behind one coordinating lock. The
//! [`engine::SchedulerEngine`] polls a time-and-priority ordered ready
//! queue every 100ms (configurable), gates dispatch on prerequisite
//! completion, hands due jobs to a bounded worker pool, and reschedules
//! or retries (exponential backoff) based on the reported outcome.
//!
//! # Schedule variants
//!
//! | Variant    | Behaviour                                              |
//! |------------|--------------------------------------------------------|
//! | `Once`     | Single fire at an absolute UTC instant                 |
//! | `Interval` | Repeat every N ms, with optional start/end bounds      |
//! | `Cron`     | 5-field expression, single literals or `*` per field   |

pub mod cron;
pub mod engine;
pub mod error;
pub mod schedule;
pub mod task;
pub mod types;

mod deps;
mod executor;
mod queue;

pub use cron::CronExpr;
pub use engine::{SchedulerEngine, SchedulerHandle};
pub use error::{Result, SchedulerError};
pub use schedule::{compute_next_run, validate_schedule, Schedule};
pub use task::{CancellationToken, JobTask, TaskContext, TaskError};
pub use types::{
    JobId, JobResult, JobSnapshot, JobSpec, JobStatus, Priority, DEFAULT_MAX_RETRIES,
};
