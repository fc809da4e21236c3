//! Time-and-priority ordered ready queue.
//!
//! A min-heap of [`ReadyEntry`] keyed by (due time ascending, priority
//! descending, insertion order). Cancel/pause removal is lazy: the
//! side map tracks each job's live entry sequence number, and stale
//! heap entries are discarded when they surface at the top.

use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap};

use chrono::{DateTime, Utc};

use crate::types::{JobId, Priority};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ReadyEntry {
    pub due: DateTime<Utc>,
    pub priority: Priority,
    /// Monotonic insertion counter; the final, deterministic tie-break.
    pub seq: u64,
    pub job_id: JobId,
}

impl Ord for ReadyEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Least = dispatched first: earliest due, then highest
        // priority, then earliest insertion.
        self.due
            .cmp(&other.due)
            .then_with(|| other.priority.cmp(&self.priority))
            .then_with(|| self.seq.cmp(&other.seq))
    }
}

impl PartialOrd for ReadyEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Default)]
pub(crate) struct ReadyQueue {
    heap: BinaryHeap<Reverse<ReadyEntry>>,
    /// job id -> seq of its one live entry. Entries absent here are
    /// tombstones awaiting lazy removal.
    live: HashMap<JobId, u64>,
    next_seq: u64,
}

impl ReadyQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `job_id` at `due`. Any previous live entry for the same
    /// job is tombstoned, preserving the at-most-once invariant.
    pub fn insert(&mut self, job_id: JobId, due: DateTime<Utc>, priority: Priority) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.live.insert(job_id, seq);
        self.heap.push(Reverse(ReadyEntry {
            due,
            priority,
            seq,
            job_id,
        }));
    }

    /// Tombstone the live entry for `job_id`, if any.
    pub fn remove(&mut self, job_id: &JobId) -> bool {
        self.live.remove(job_id).is_some()
    }

    pub fn contains(&self, job_id: &JobId) -> bool {
        self.live.contains_key(job_id)
    }

    /// Live (non-tombstoned) entry count.
    pub fn len(&self) -> usize {
        self.live.len()
    }

    /// Pop the highest-precedence entry whose due time has arrived,
    /// discarding tombstones encountered along the way.
    pub fn pop_due(&mut self, now: DateTime<Utc>) -> Option<ReadyEntry> {
        loop {
            let entry = match self.heap.pop() {
                Some(Reverse(entry)) => entry,
                None => return None,
            };
            if self.live.get(&entry.job_id) != Some(&entry.seq) {
                continue; // tombstone
            }
            if entry.due > now {
                // Not due yet; put it back and stop.
                self.heap.push(Reverse(entry));
                return None;
            }
            self.live.remove(&entry.job_id);
            return Some(entry);
        }
    }

}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
