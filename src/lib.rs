//! # Jobforge - Work-Stealing Job Scheduler
//!
//! A fine-grained job scheduler for engine-style workloads: user code
//! submits small units of work, a fixed pool of worker threads executes
//! them, and idle workers steal from busy ones to balance load.
//!
//! ## Architecture
//!
//! - **Jobs**: a function pointer plus an opaque parameter block, allocated
//!   together in a single self-describing block
//! - **Job IDs**: monotonically increasing completion tokens tracked in a
//!   compacting bitmap window bounded by in-flight work
//! - **Per-thread queues**: each participating thread owns a deque; it pops
//!   its own work LIFO while thieves steal the oldest entries FIFO
//! - **Sleep/wake**: workers that find nothing anywhere park on a signal and
//!   are woken one at a time by submissions
//!
//! Jobs can be linked to a parent so that waiting on the parent joins the
//! whole subtree; completion propagates through an atomically decremented
//! outstanding count.
//!
//! ## Example
//!
//! ```no_run
//! use jobforge::JobSystem;
//!
//! let jobs = JobSystem::new();
//!
//! let id = jobs.spawn(|| {
//!     println!("hello from a worker thread");
//! });
//!
//! jobs.wait_job(id);
//! ```

mod id_map;
mod job;
pub mod job_system;
#[cfg(feature = "metrics")]
pub mod metrics;
mod queue;
mod sync;
mod worker;

use serde::{Deserialize, Serialize};

/// Strategy for pinning pool worker threads to CPU cores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PinningStrategy {
    /// No pinning (standard OS scheduling).
    #[default]
    None,
    /// Linear pinning (worker i -> logical processor i).
    Linear,
}

pub use id_map::{JobId, INVALID_JOB_ID};
pub use job::JobFn;
pub use job_system::{JobSystem, SchedulerConfig};
