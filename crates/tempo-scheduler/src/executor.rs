//! Bounded worker pool.
//!
//! A fixed number of semaphore permits caps concurrency; each dispatch
//! runs the task body inside an inner `tokio::spawn` so a panicking
//! task surfaces as a `JoinError` and becomes a failed outcome instead
//! of taking the worker down. Outcomes flow back to the engine over an
//! mpsc channel and are applied under the engine's coordinating lock.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

use crate::task::{CancellationToken, JobTask, TaskContext, TaskError};
use crate::types::JobId;

/// How one execution attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AttemptOutcome {
    Completed,
    Failed,
    Cancelled,
}

/// Report sent from a worker back to the engine when an attempt ends.
#[derive(Debug, Clone)]
pub(crate) struct ExecutionOutcome {
    pub job_id: JobId,
    pub attempt: u32,
    pub outcome: AttemptOutcome,
    pub error: Option<String>,
    pub duration_ms: u64,
    pub finished_at: DateTime<Utc>,
}

/// Why a dispatch was refused. The engine re-queues on all of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DispatchError {
    /// Every worker slot is busy.
    Saturated,
    /// The job already has an execution in flight.
    Overlapping,
    /// The pool has stopped accepting work.
    ShuttingDown,
}

struct RunningTask {
    token: CancellationToken,
    /// Forcibly stops the task body. The worker wrapper survives the
    /// abort and still reports an outcome.
    abort: AbortHandle,
}

struct PoolInner {
    workers: usize,
    semaphore: Arc<Semaphore>,
    running: DashMap<JobId, RunningTask>,
    outcome_tx: mpsc::Sender<ExecutionOutcome>,
    accepting: AtomicBool,
}

/// Cloneable handle to the shared pool state.
#[derive(Clone)]
pub(crate) struct ExecutorPool {
    inner: Arc<PoolInner>,
}

impl ExecutorPool {
    pub fn new(workers: usize, outcome_tx: mpsc::Sender<ExecutionOutcome>) -> Self {
        let workers = workers.max(1);
        Self {
            inner: Arc::new(PoolInner {
                workers,
                semaphore: Arc::new(Semaphore::new(workers)),
                running: DashMap::new(),
                outcome_tx,
                accepting: AtomicBool::new(true),
            }),
        }
    }

    /// Start an execution attempt, or say why it can't start right now.
    /// Must be called from within a tokio runtime.
    pub fn try_dispatch(
        &self,
        job_id: JobId,
        attempt: u32,
        task: Arc<dyn JobTask>,
    ) -> Result<(), DispatchError> {
        let inner = &self.inner;
        if !inner.accepting.load(Ordering::SeqCst) {
            return Err(DispatchError::ShuttingDown);
        }
        if self.is_running(&job_id) {
            return Err(DispatchError::Overlapping);
        }
        let permit = match inner.semaphore.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => return Err(DispatchError::Saturated),
        };

        let token = CancellationToken::new();
        let ctx = TaskContext {
            job_id,
            attempt,
            cancellation: token.clone(),
        };
        let started = Instant::now();
        let body = tokio::spawn(async move { task.run(&ctx).await });
        inner.running.insert(
            job_id,
            RunningTask {
                token,
                abort: body.abort_handle(),
            },
        );

        let pool = Arc::clone(inner);
        tokio::spawn(async move {
            let _permit = permit;
            let (outcome, error) = match body.await {
                Ok(Ok(())) => (AttemptOutcome::Completed, None),
                Ok(Err(TaskError::Cancelled)) => (AttemptOutcome::Cancelled, None),
                Ok(Err(TaskError::Failed(msg))) => (AttemptOutcome::Failed, Some(msg)),
                Err(join_err) if join_err.is_panic() => (
                    AttemptOutcome::Failed,
                    Some(format!("task panicked: {join_err}")),
                ),
                Err(join_err) => (
                    AttemptOutcome::Failed,
                    Some(format!("task aborted: {join_err}")),
                ),
            };
            let report = ExecutionOutcome {
                job_id,
                attempt,
                outcome,
                error,
                duration_ms: started.elapsed().as_millis() as u64,
                finished_at: Utc::now(),
            };
            pool.running.remove(&job_id);
            if pool.outcome_tx.send(report).await.is_err() {
                warn!(job_id = %job_id, "outcome channel closed; result dropped");
            }
        });
        Ok(())
    }

    /// Trip the cancellation token of a running job. Best-effort: the
    /// task decides whether (and when) to honor it.
    pub fn cancel(&self, job_id: &JobId) -> bool {
        match self.inner.running.get(job_id) {
            Some(entry) => {
                entry.token.cancel();
                debug!(job_id = %job_id, "cancellation requested for running task");
                true
            }
            None => false,
        }
    }

    pub fn is_running(&self, job_id: &JobId) -> bool {
        self.inner.running.contains_key(job_id)
    }

    pub fn running_count(&self) -> usize {
        self.inner.running.len()
    }

    /// Stop intake, wait up to `grace` for in-flight work to drain,
    /// then abort whatever is left. Aborted workers still report an
    /// outcome, so the drain is retried once after the abort.
    pub async fn shutdown(&self, grace: Duration) {
        self.inner.accepting.store(false, Ordering::SeqCst);
        let workers = self.inner.workers as u32;
        let drained =
            tokio::time::timeout(grace, self.inner.semaphore.acquire_many(workers)).await;
        if matches!(drained, Ok(Ok(_))) {
            info!("executor pool drained");
            return;
        }

        warn!(
            count = self.running_count(),
            "executor pool drain timed out; aborting remaining tasks"
        );
        for entry in self.inner.running.iter() {
            entry.token.cancel();
            entry.abort.abort();
        }
        let reaped =
            tokio::time::timeout(grace, self.inner.semaphore.acquire_many(workers)).await;
        if !matches!(reaped, Ok(Ok(_))) {
            warn!("some workers did not stop within the grace period");
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use uuid::Uuid;

    struct SleepTask {
        ms: u64,
    }

    #[async_trait]
    impl JobTask for SleepTask {
        async fn run(&self, _ctx: &TaskContext) -> Result<(), TaskError> {
            tokio::time::sleep(Duration::from_millis(self.ms)).await;
            Ok(())
        }
    }

    struct PanicTask;

    #[async_trait]
    impl JobTask for PanicTask {
        async fn run(&self, _ctx: &TaskContext) -> Result<(), TaskError> {
            panic!("boom");
        }
    }

    struct CooperativeTask;

    #[async_trait]
    impl JobTask for CooperativeTask {
        async fn run(&self, ctx: &TaskContext) -> Result<(), TaskError> {
            for _ in 0..200 {
                if ctx.cancellation.is_cancelled() {
                    return Err(TaskError::Cancelled);
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn reports_completion() {
        let (tx, mut rx) = mpsc::channel(8);
        let pool = ExecutorPool::new(2, tx);
        let id = Uuid::new_v4();
        pool.try_dispatch(id, 1, Arc::new(SleepTask { ms: 10 })).unwrap();

        let outcome = rx.recv().await.unwrap();
        assert_eq!(outcome.job_id, id);
        assert_eq!(outcome.attempt, 1);
        assert_eq!(outcome.outcome, AttemptOutcome::Completed);
        assert!(!pool.is_running(&id));
    }

    #[tokio::test]
    async fn saturation_rejects_excess_dispatch() {
        let (tx, mut rx) = mpsc::channel(8);
        let pool = ExecutorPool::new(1, tx);
        pool.try_dispatch(Uuid::new_v4(), 1, Arc::new(SleepTask { ms: 200 }))
            .unwrap();

        let err = pool
            .try_dispatch(Uuid::new_v4(), 1, Arc::new(SleepTask { ms: 10 }))
            .unwrap_err();
        assert_eq!(err, DispatchError::Saturated);

        // Slot frees up once the first task finishes.
        rx.recv().await.unwrap();
        assert!(pool
            .try_dispatch(Uuid::new_v4(), 1, Arc::new(SleepTask { ms: 10 }))
            .is_ok());
    }

    #[tokio::test]
    async fn same_job_cannot_overlap_itself() {
        let (tx, _rx) = mpsc::channel(8);
        let pool = ExecutorPool::new(4, tx);
        let id = Uuid::new_v4();
        pool.try_dispatch(id, 1, Arc::new(SleepTask { ms: 200 })).unwrap();

        let err = pool
            .try_dispatch(id, 2, Arc::new(SleepTask { ms: 10 }))
            .unwrap_err();
        assert_eq!(err, DispatchError::Overlapping);
    }

    #[tokio::test]
    async fn panic_becomes_failed_outcome() {
        let (tx, mut rx) = mpsc::channel(8);
        let pool = ExecutorPool::new(1, tx);
        let id = Uuid::new_v4();
        pool.try_dispatch(id, 1, Arc::new(PanicTask)).unwrap();

        let outcome = rx.recv().await.unwrap();
        assert_eq!(outcome.outcome, AttemptOutcome::Failed);
        assert!(outcome.error.unwrap().contains("panicked"));
        // The pool survives: a new dispatch still works.
        assert!(pool
            .try_dispatch(Uuid::new_v4(), 1, Arc::new(SleepTask { ms: 5 }))
            .is_ok());
    }

    #[tokio::test]
    async fn cancel_trips_cooperative_task() {
        let (tx, mut rx) = mpsc::channel(8);
        let pool = ExecutorPool::new(1, tx);
        let id = Uuid::new_v4();
        pool.try_dispatch(id, 1, Arc::new(CooperativeTask)).unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(pool.cancel(&id));

        let outcome = rx.recv().await.unwrap();
        assert_eq!(outcome.outcome, AttemptOutcome::Cancelled);
    }

    #[tokio::test]
    async fn shutdown_stops_intake_and_aborts_stragglers() {
        let (tx, _rx) = mpsc::channel(8);
        let pool = ExecutorPool::new(1, tx);
        let id = Uuid::new_v4();
        // Ignores its token, so only the grace timeout can end it.
        pool.try_dispatch(id, 1, Arc::new(SleepTask { ms: 60_000 }))
            .unwrap();

        pool.shutdown(Duration::from_millis(50)).await;
        assert_eq!(pool.running_count(), 0);
        assert_eq!(
            pool.try_dispatch(Uuid::new_v4(), 1, Arc::new(SleepTask { ms: 5 }))
                .unwrap_err(),
            DispatchError::ShuttingDown
        );
    }
}
