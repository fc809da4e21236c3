use thiserror::Error;

use crate::types::{JobId, JobStatus};

/// Errors that can occur within the scheduler subsystem.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// The provided schedule definition is invalid or unsatisfiable.
    #[error("Invalid schedule: {0}")]
    InvalidSchedule(String),

    /// No job with the given ID exists in the registry.
    #[error("Job not found: {id}")]
    JobNotFound { id: JobId },

    /// A `depends_on` entry references a job the scheduler has never seen.
    #[error("Unknown dependency: {id}")]
    UnknownDependency { id: JobId },

    /// Adding the edge would make the dependency graph cyclic.
    #[error("Dependency cycle: {prerequisite} already depends on {job}")]
    DependencyCycle { job: JobId, prerequisite: JobId },

    /// The requested lifecycle transition is not allowed from the
    /// job's current status.
    #[error("Invalid transition: {from} -> {to}")]
    InvalidTransition { from: JobStatus, to: JobStatus },
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
