//! Dependency gating: a job may only execute once every prerequisite's
//! latest terminal outcome is `Completed`.

use std::collections::{HashMap, HashSet};

use crate::error::{Result, SchedulerError};
use crate::types::{JobId, JobStatus};

#[derive(Debug, Default)]
pub(crate) struct DependencyTracker {
    /// job id -> its prerequisite job ids ("depends on" edges).
    prereqs: HashMap<JobId, HashSet<JobId>>,
    /// Latest terminal outcome per job. Kept after a job is purged so
    /// dependents of an already-finished prerequisite still run.
    outcomes: HashMap<JobId, JobStatus>,
}

impl DependencyTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a job and its initial prerequisite set.
    pub fn add_job(&mut self, id: JobId, prereqs: HashSet<JobId>) {
        self.prereqs.insert(id, prereqs);
    }

    /// Whether the tracker has ever seen this id (live or finished).
    pub fn is_known(&self, id: &JobId) -> bool {
        self.prereqs.contains_key(id) || self.outcomes.contains_key(id)
    }

    /// Add `prerequisite` to `job`'s set, rejecting edges that would
    /// close a cycle in the dependency graph.
    pub fn add_dependency(&mut self, job: JobId, prerequisite: JobId) -> Result<()> {
        if job == prerequisite || self.depends_transitively(prerequisite, job) {
            return Err(SchedulerError::DependencyCycle { job, prerequisite });
        }
        self.prereqs.entry(job).or_default().insert(prerequisite);
        Ok(())
    }

    /// True iff every prerequisite of `id` has completed successfully.
    pub fn can_execute(&self, id: &JobId) -> bool {
        match self.prereqs.get(id) {
            None => true,
            Some(prereqs) => prereqs
                .iter()
                .all(|p| self.outcomes.get(p) == Some(&JobStatus::Completed)),
        }
    }

    /// Record the latest terminal outcome of a job.
    pub fn record_outcome(&mut self, id: JobId, status: JobStatus) {
        debug_assert!(status.is_terminal());
        self.outcomes.insert(id, status);
    }

    /// Forget a purged job's edges. Its recorded outcome is retained.
    pub fn remove_job(&mut self, id: &JobId) {
        self.prereqs.remove(id);
    }

    /// Current prerequisite set, for snapshots.
    pub fn prerequisites(&self, id: &JobId) -> Vec<JobId> {
        self.prereqs
            .get(id)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Depth-first walk over "depends on" edges: does `from`
    /// transitively depend on `target`?
    fn depends_transitively(&self, from: JobId, target: JobId) -> bool {
        let mut stack = vec![from];
        let mut seen = HashSet::new();
        while let Some(id) = stack.pop() {
            if id == target {
                return true;
            }
            if !seen.insert(id) {
                continue;
            }
            if let Some(prereqs) = self.prereqs.get(&id) {
                stack.extend(prereqs.iter().copied());
            }
        }
        false
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn tracker_with(ids: &[JobId]) -> DependencyTracker {
        let mut tracker = DependencyTracker::new();
        for id in ids {
            tracker.add_job(*id, HashSet::new());
        }
        tracker
    }

    #[test]
    fn no_prerequisites_means_ready() {
        let id = Uuid::new_v4();
        let tracker = tracker_with(&[id]);
        assert!(tracker.can_execute(&id));
    }

    #[test]
    fn gated_until_prerequisite_completes() {
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let mut tracker = tracker_with(&[a, b]);
        tracker.add_dependency(b, a).unwrap();

        assert!(!tracker.can_execute(&b));
        tracker.record_outcome(a, JobStatus::Completed);
        assert!(tracker.can_execute(&b));
    }

    #[test]
    fn failed_prerequisite_does_not_unlock() {
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let mut tracker = tracker_with(&[a, b]);
        tracker.add_dependency(b, a).unwrap();

        tracker.record_outcome(a, JobStatus::Failed);
        assert!(!tracker.can_execute(&b));
        // A later successful occurrence unblocks the dependent.
        tracker.record_outcome(a, JobStatus::Completed);
        assert!(tracker.can_execute(&b));
    }

    #[test]
    fn self_dependency_is_a_cycle() {
        let a = Uuid::new_v4();
        let mut tracker = tracker_with(&[a]);
        assert!(matches!(
            tracker.add_dependency(a, a),
            Err(SchedulerError::DependencyCycle { .. })
        ));
    }

    #[test]
    fn two_node_cycle_is_rejected() {
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let mut tracker = tracker_with(&[a, b]);
        tracker.add_dependency(b, a).unwrap();
        assert!(matches!(
            tracker.add_dependency(a, b),
            Err(SchedulerError::DependencyCycle { .. })
        ));
    }

    #[test]
    fn transitive_cycle_is_rejected() {
        let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let mut tracker = tracker_with(&[a, b, c]);
        tracker.add_dependency(b, a).unwrap();
        tracker.add_dependency(c, b).unwrap();
        assert!(matches!(
            tracker.add_dependency(a, c),
            Err(SchedulerError::DependencyCycle { .. })
        ));
    }

    #[test]
    fn outcome_survives_job_removal() {
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let mut tracker = tracker_with(&[a, b]);
        tracker.add_dependency(b, a).unwrap();

        tracker.record_outcome(a, JobStatus::Completed);
        tracker.remove_job(&a);
        assert!(tracker.is_known(&a));
        assert!(tracker.can_execute(&b));
    }
}
