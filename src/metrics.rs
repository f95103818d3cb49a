//! Optional scheduler counters, compiled in with the `metrics` feature.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Atomic counters updated on the scheduler's hot paths.
#[derive(Debug)]
pub struct Metrics {
    /// Jobs handed to `submit_job`.
    pub jobs_submitted: AtomicU64,
    /// Jobs executed to completion (including panicked ones).
    pub jobs_executed: AtomicU64,
    /// Steal scans that returned a job.
    pub steal_hits: AtomicU64,
    /// Steal scans that came back empty.
    pub steal_misses: AtomicU64,
    /// Times a worker went to sleep.
    pub sleeps: AtomicU64,
    /// Sleepers woken by a submission.
    pub wakeups: AtomicU64,
    start_time: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            jobs_submitted: AtomicU64::new(0),
            jobs_executed: AtomicU64::new(0),
            steal_hits: AtomicU64::new(0),
            steal_misses: AtomicU64::new(0),
            sleeps: AtomicU64::new(0),
            wakeups: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    /// Returns a consistent-enough snapshot of the current values.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            jobs_submitted: self.jobs_submitted.load(Ordering::Relaxed),
            jobs_executed: self.jobs_executed.load(Ordering::Relaxed),
            steal_hits: self.steal_hits.load(Ordering::Relaxed),
            steal_misses: self.steal_misses.load(Ordering::Relaxed),
            sleeps: self.sleeps.load(Ordering::Relaxed),
            wakeups: self.wakeups.load(Ordering::Relaxed),
            elapsed_seconds: self.start_time.elapsed().as_secs_f64(),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time view of the scheduler counters.
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub jobs_submitted: u64,
    pub jobs_executed: u64,
    pub steal_hits: u64,
    pub steal_misses: u64,
    pub sleeps: u64,
    pub wakeups: u64,
    pub elapsed_seconds: f64,
}

impl MetricsSnapshot {
    /// Executed-job throughput since scheduler startup.
    pub fn jobs_per_second(&self) -> f64 {
        if self.elapsed_seconds > 0.0 {
            self.jobs_executed as f64 / self.elapsed_seconds
        } else {
            0.0
        }
    }

    /// Jobs submitted but not yet executed.
    pub fn jobs_in_flight(&self) -> i64 {
        self.jobs_submitted as i64 - self.jobs_executed as i64
    }
}
