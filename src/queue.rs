//! The per-worker pending-job queue.
//!
//! A plain `VecDeque` under a spin lock. The owning thread pushes and pops at
//! the back, so it drains its own recursively spawned children depth-first
//! (LIFO, cache-warm). Thieves take from the front, which is FIFO relative to
//! the producer and hands them the oldest, coarsest-grained work. Jobs never
//! execute while the lock is held.

use crate::job::JobRef;
use crate::sync::SpinLock;
use std::collections::VecDeque;

pub(crate) struct WorkQueue {
    jobs: SpinLock<VecDeque<JobRef>>,
}

impl WorkQueue {
    pub fn new() -> Self {
        WorkQueue {
            jobs: SpinLock::new(VecDeque::new()),
        }
    }

    /// Owner-side push to the back.
    pub fn push(&self, job: JobRef) {
        self.jobs.lock().push_back(job);
    }

    /// Owner-side pop from the back (LIFO).
    pub fn pop(&self) -> Option<JobRef> {
        self.jobs.lock().pop_back()
    }

    /// Thief-side pop from the front (FIFO).
    pub fn steal(&self) -> Option<JobRef> {
        self.jobs.lock().pop_front()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.lock().is_empty()
    }
}
