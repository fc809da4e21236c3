//! The task seam: what the scheduler runs, and how a running task
//! learns it should stop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::types::JobId;

/// Cooperative cancellation flag shared between the scheduler and a
/// running task. Cancellation is never forced: a task that ignores the
/// token runs to completion and its result is discarded.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Per-attempt execution context handed to [`JobTask::run`].
#[derive(Clone, Debug)]
pub struct TaskContext {
    pub job_id: JobId,
    /// 1-based attempt number; 1 is the initial attempt, 2+ are retries.
    pub attempt: u32,
    pub cancellation: CancellationToken,
}

/// How a task body reports failure.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("task failed: {0}")]
    Failed(String),

    /// The task observed its cancellation token and stopped early.
    #[error("task cancelled")]
    Cancelled,
}

/// A unit of work. Implementations must be cheap to share (`Arc`) and
/// re-entrant across attempts; the scheduler guarantees a given job is
/// never run concurrently with itself.
#[async_trait]
pub trait JobTask: Send + Sync {
    async fn run(&self, ctx: &TaskContext) -> std::result::Result<(), TaskError>;
}
