use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::schedule::Schedule;
use crate::task::JobTask;

/// Unique job identifier (UUID v4, assigned at submission).
pub type JobId = Uuid;

/// Retry budget applied when a [`JobSpec`] does not set its own.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Dispatch precedence for jobs sharing a due time.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting in the ready queue for its next due time.
    Scheduled,
    /// An execution attempt is currently in flight.
    Running,
    /// Finished successfully and the schedule is exhausted.
    Completed,
    /// Retries exhausted with no further occurrence.
    Failed,
    /// Explicitly cancelled; no future executions.
    Cancelled,
    /// Held out of the ready queue until resumed.
    Paused,
}

impl JobStatus {
    /// Terminal states admit no further automatic transition.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobStatus::Scheduled => "scheduled",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
            JobStatus::Paused => "paused",
        };
        write!(f, "{s}")
    }
}

/// Outcome record of one execution attempt, appended to the job's
/// history (newest last).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    pub job_id: JobId,
    /// `Completed` or `Failed`; cancelled attempts are discarded, not
    /// recorded.
    pub status: JobStatus,
    pub finished_at: DateTime<Utc>,
    pub error: Option<String>,
    pub duration_ms: u64,
}

/// Everything needed to submit a job.
///
/// Built with [`JobSpec::new`] plus the chainable setters; unset fields
/// keep their defaults (`Medium` priority, [`DEFAULT_MAX_RETRIES`], no
/// dependencies).
pub struct JobSpec {
    pub name: String,
    pub schedule: Schedule,
    pub task: Arc<dyn JobTask>,
    pub priority: Priority,
    pub max_retries: u32,
    pub depends_on: Vec<JobId>,
}

impl JobSpec {
    pub fn new(name: impl Into<String>, schedule: Schedule, task: Arc<dyn JobTask>) -> Self {
        Self {
            name: name.into(),
            schedule,
            task,
            priority: Priority::default(),
            max_retries: DEFAULT_MAX_RETRIES,
            depends_on: Vec::new(),
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_dependencies(mut self, depends_on: Vec<JobId>) -> Self {
        self.depends_on = depends_on;
        self
    }
}

/// Point-in-time view of a registered job, as returned by
/// [`crate::SchedulerHandle::list_jobs`].
#[derive(Debug, Clone, Serialize)]
pub struct JobSnapshot {
    pub id: JobId,
    pub name: String,
    pub status: JobStatus,
    pub priority: Priority,
    pub next_run: Option<DateTime<Utc>>,
    pub last_run: Option<DateTime<Utc>>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub depends_on: Vec<JobId>,
    pub created_at: DateTime<Utc>,
}
