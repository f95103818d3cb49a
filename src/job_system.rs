//! The public scheduler interface.
//!
//! [`JobSystem`] owns the shared scheduler state and the pool of worker
//! threads. All scheduling state hangs off one explicit object with a
//! controlled lifetime, so independent schedulers can coexist in a process
//! and tests can spin instances up and down freely.

use crate::id_map::{JobId, INVALID_JOB_ID};
use crate::job::{self, JobFn, JobHeader, JobRef};
use crate::worker::{worker_main, Shared};
use crate::PinningStrategy;
use log::debug;
use serde::{Deserialize, Serialize};
use std::mem;
use std::ptr::NonNull;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Configuration for a [`JobSystem`].
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Number of pool threads to spawn. Defaults to available logical
    /// processors minus one, since the thread that creates the scheduler
    /// participates whenever it waits.
    pub worker_threads: Option<usize>,
    /// CPU affinity for pool threads.
    pub pinning: PinningStrategy,
}

/// A work-stealing job scheduler.
///
/// Jobs are created with [`new_job`](Self::new_job) (or the typed
/// [`spawn`](Self::spawn)), submitted exactly once, and joined through their
/// [`JobId`] with [`wait_job`](Self::wait_job). Submission always pushes onto
/// the calling thread's own queue; idle workers steal to balance load.
///
/// Every scheduler operation is infallible: contract violations (double
/// submit, double finish) trip debug assertions, and allocation failure
/// aborts, matching the engine-wide allocation policy.
pub struct JobSystem {
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
}

impl JobSystem {
    /// Creates a scheduler with the default configuration.
    pub fn new() -> Self {
        Self::with_config(SchedulerConfig::default())
    }

    /// Creates a scheduler with `worker_threads` pool threads.
    pub fn with_workers(worker_threads: usize) -> Self {
        Self::with_config(SchedulerConfig {
            worker_threads: Some(worker_threads),
            ..SchedulerConfig::default()
        })
    }

    pub fn with_config(config: SchedulerConfig) -> Self {
        let shared = Arc::new(Shared::new());
        let worker_count = config.worker_threads.unwrap_or_else(|| {
            let processors = thread::available_parallelism().map(|n| n.get()).unwrap_or(2);
            processors.saturating_sub(1).max(1)
        });

        let mut workers = Vec::with_capacity(worker_count);
        for index in 0..worker_count {
            let shared = Arc::clone(&shared);
            let pinning = config.pinning;
            let handle = thread::Builder::new()
                .name(format!("job-worker-{index}"))
                .spawn(move || worker_main(shared, index, pinning))
                .expect("failed to spawn job worker thread");
            workers.push(handle);
        }
        debug!("job system started with {worker_count} pool workers");

        let system = JobSystem { shared, workers };
        // Consume ID 0 so no submitted job ever carries the invalid ID.
        let reserved = system.allocate_job_id();
        debug_assert_eq!(reserved, INVALID_JOB_ID);
        system.finish_job_id(reserved);
        system
    }

    /// Allocates a job ID without submitting any job, usable as a manual
    /// synchronization point that other threads [`wait_job`](Self::wait_job)
    /// on. Every ID allocated here must eventually be passed to
    /// [`finish_job_id`](Self::finish_job_id), or the completion window stops
    /// sliding and holds memory.
    pub fn allocate_job_id(&self) -> JobId {
        self.shared.ids.lock().allocate()
    }

    /// Marks a manually allocated ID finished, resuming all waiters.
    ///
    /// Only for IDs from [`allocate_job_id`](Self::allocate_job_id); IDs
    /// returned by [`submit_job`](Self::submit_job) are finished by the
    /// scheduler when the job completes.
    pub fn finish_job_id(&self, id: JobId) {
        self.shared.ids.lock().finish(id);
    }

    /// `true` once `id` has been finished. `INVALID_JOB_ID` always reads
    /// finished. Probing IDs that were never allocated reads unfinished.
    pub fn is_job_finished(&self, id: JobId) -> bool {
        self.shared.ids.lock().is_finished(id)
    }

    /// Creates an unsubmitted job and returns its uninitialized parameter
    /// block, `param_size` bytes at `param_alignment`. The caller fills the
    /// block and hands it to [`submit_job`](Self::submit_job).
    ///
    /// Linking a `parent` makes every wait on the parent's ID also wait for
    /// this job. A job that is created but never submitted is leaked; the
    /// scheduler takes ownership only at submission.
    ///
    /// # Safety
    /// `param_alignment` must be a power of two. `parent`, when present,
    /// must be the parameter block of a job that is unsubmitted or currently
    /// running on this thread, so its completion cannot race the link.
    pub unsafe fn new_job(
        &self,
        func: JobFn,
        param_size: usize,
        param_alignment: usize,
        parent: Option<NonNull<u8>>,
    ) -> NonNull<u8> {
        job::allocate_job(func, param_size, param_alignment, parent)
    }

    /// Submits a previously created job. Assigns its ID, pushes it onto the
    /// calling thread's queue, and wakes at most one sleeping worker.
    ///
    /// # Safety
    /// `params` must come from [`new_job`](Self::new_job) on this scheduler,
    /// with its parameter block initialized, and must not have been
    /// submitted before. The scheduler owns the allocation from here on.
    pub unsafe fn submit_job(&self, params: NonNull<u8>) -> JobId {
        let header = JobHeader::from_params(params.as_ptr());
        debug_assert_eq!((*header).id, INVALID_JOB_ID, "job submitted twice");
        let id = self.shared.ids.lock().allocate();
        (*header).id = id;

        let ctx = self.shared.current_context();
        ctx.queue.push(JobRef(header));
        #[cfg(feature = "metrics")]
        self.shared
            .metrics
            .jobs_submitted
            .fetch_add(1, Ordering::Relaxed);
        self.shared.wake_one();
        id
    }

    /// The ID assigned to a job, or `INVALID_JOB_ID` before submission.
    ///
    /// # Safety
    /// `params` must be a live parameter block from
    /// [`new_job`](Self::new_job) whose completion has not been observed.
    pub unsafe fn get_current_job_id(&self, params: NonNull<u8>) -> JobId {
        let header = JobHeader::from_params(params.as_ptr());
        (*header).id
    }

    /// Blocks until `id` is finished, executing other pending jobs while it
    /// waits. `INVALID_JOB_ID` returns immediately.
    ///
    /// The caller helps drain the graph rather than idling, so a foreign
    /// thread waiting here becomes a temporary participant in the stealing
    /// pool. Because the helper may pick up unrelated jobs, wait latency is
    /// bounded by system load, not by the awaited job alone.
    pub fn wait_job(&self, id: JobId) {
        if id == INVALID_JOB_ID {
            return;
        }
        while !self.is_job_finished(id) {
            // consume_job yields the processor when nothing is runnable.
            if let Some(job) = self.shared.consume_job() {
                self.shared.execute_job(job);
            }
        }
    }

    /// Creates, initializes, and submits a job from a closure.
    ///
    /// The closure is moved into the parameter block and runs exactly once
    /// on some participating thread.
    pub fn spawn<F>(&self, work: F) -> JobId
    where
        F: FnOnce() + Send + 'static,
    {
        unsafe {
            let params = self.new_job(
                run_closure::<F>,
                mem::size_of::<F>(),
                mem::align_of::<F>(),
                None,
            );
            params.as_ptr().cast::<F>().write(work);
            self.submit_job(params)
        }
    }

    /// Like [`spawn`](Self::spawn), but links the job under `parent` so
    /// waits on the parent's ID also cover it.
    ///
    /// # Safety
    /// Same contract as the `parent` argument of [`new_job`](Self::new_job):
    /// the parent must be unsubmitted or currently running on this thread.
    pub unsafe fn spawn_child<F>(&self, parent: NonNull<u8>, work: F) -> JobId
    where
        F: FnOnce() + Send + 'static,
    {
        let params = self.new_job(
            run_closure::<F>,
            mem::size_of::<F>(),
            mem::align_of::<F>(),
            Some(parent),
        );
        params.as_ptr().cast::<F>().write(work);
        self.submit_job(params)
    }

    /// Number of pool worker threads.
    pub fn num_workers(&self) -> usize {
        self.workers.len()
    }

    /// Chunks currently held by the completion window; bounded by IDs in
    /// flight, not by lifetime totals.
    pub fn id_window_chunks(&self) -> usize {
        self.shared.ids.lock().window_chunks()
    }

    #[cfg(feature = "metrics")]
    pub fn metrics(&self) -> crate::metrics::MetricsSnapshot {
        self.shared.metrics.snapshot()
    }

    /// Stops the pool: sets the exiting flag, wakes every sleeper, and joins
    /// all pool threads. Jobs still queued and unexecuted at this point are
    /// leaked, so drain with [`wait_job`](Self::wait_job) first.
    ///
    /// Reports workers that panicked outside of job execution; job panics
    /// themselves are contained and never fail shutdown.
    pub fn shutdown(mut self) -> Result<(), String> {
        self.close();
        let mut panicked = 0;
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                panicked += 1;
            }
        }
        self.shared.contexts.lock().clear();
        if panicked > 0 {
            Err(format!("{panicked} worker thread(s) panicked"))
        } else {
            Ok(())
        }
    }

    fn close(&self) {
        if self.shared.exiting.swap(true, Ordering::AcqRel) {
            return;
        }
        debug!("job system shutting down");
        self.shared.wake_all();
    }
}

impl Drop for JobSystem {
    fn drop(&mut self) {
        self.close();
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
        self.shared.contexts.lock().clear();
    }
}

impl Default for JobSystem {
    fn default() -> Self {
        Self::new()
    }
}

unsafe fn run_closure<F: FnOnce()>(params: *mut u8) {
    let work = params.cast::<F>().read();
    work();
}
