//! Worker contexts, the steal loop, and the worker thread lifecycle.
//!
//! Every participating thread — pool workers and any foreign thread that
//! touches a scheduling API — owns a [`WorkerContext`] holding its pending
//! queue, a wake signal, and a liveness flag. Contexts live in a registry
//! shared by all participants; a thief that finds a dead context with an
//! empty queue reaps it on the spot.

use crate::id_map::{IdMap, INVALID_JOB_ID};
use crate::job::{release_job, JobHeader, JobRef};
use crate::queue::WorkQueue;
use crate::sync::{SpinLock, WakeSignal};
use crate::PinningStrategy;
use log::{debug, error};
use rand::Rng;
use std::any::Any;
use std::cell::RefCell;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

pub(crate) struct WorkerContext {
    pub queue: WorkQueue,
    pub wake: WakeSignal,
    /// Set by the owning thread's exit hook. A dead context with an empty
    /// queue is removed from the registry by the next thief that sees it.
    pub dead: AtomicBool,
}

impl WorkerContext {
    fn new() -> Self {
        WorkerContext {
            queue: WorkQueue::new(),
            wake: WakeSignal::new(),
            dead: AtomicBool::new(false),
        }
    }
}

/// Shared scheduler state, passed to every worker by `Arc`. One instance per
/// [`JobSystem`](crate::JobSystem), so independent schedulers can coexist.
pub(crate) struct Shared {
    /// Keys this scheduler's thread-local context slots.
    scheduler_id: u64,
    pub ids: SpinLock<IdMap>,
    /// Registry of every participating thread's context.
    pub contexts: SpinLock<Vec<Arc<WorkerContext>>>,
    /// Workers that found nothing anywhere and are blocked on their signal.
    pub sleepers: SpinLock<Vec<Arc<WorkerContext>>>,
    pub exiting: AtomicBool,
    #[cfg(feature = "metrics")]
    pub metrics: crate::metrics::Metrics,
}

static NEXT_SCHEDULER_ID: AtomicU64 = AtomicU64::new(1);

/// Per-thread handle to a context; its drop is the thread-exit hook that
/// marks the context dead for lazy reaping.
struct ThreadSlot {
    scheduler_id: u64,
    ctx: Arc<WorkerContext>,
}

impl Drop for ThreadSlot {
    fn drop(&mut self) {
        self.ctx.dead.store(true, Ordering::Release);
    }
}

thread_local! {
    static THREAD_CONTEXTS: RefCell<Vec<ThreadSlot>> = const { RefCell::new(Vec::new()) };
}

impl Shared {
    pub fn new() -> Self {
        Shared {
            scheduler_id: NEXT_SCHEDULER_ID.fetch_add(1, Ordering::Relaxed),
            ids: SpinLock::new(IdMap::new()),
            contexts: SpinLock::new(Vec::new()),
            sleepers: SpinLock::new(Vec::new()),
            exiting: AtomicBool::new(false),
            #[cfg(feature = "metrics")]
            metrics: crate::metrics::Metrics::new(),
        }
    }

    /// This thread's context for this scheduler, created and registered on
    /// first use. Foreign threads become participants through this path.
    pub fn current_context(&self) -> Arc<WorkerContext> {
        THREAD_CONTEXTS.with(|slots| {
            let mut slots = slots.borrow_mut();
            if let Some(slot) = slots.iter().find(|s| s.scheduler_id == self.scheduler_id) {
                return Arc::clone(&slot.ctx);
            }
            let ctx = Arc::new(WorkerContext::new());
            self.contexts.lock().push(Arc::clone(&ctx));
            slots.push(ThreadSlot {
                scheduler_id: self.scheduler_id,
                ctx: Arc::clone(&ctx),
            });
            ctx
        })
    }

    /// Attempts to steal one job from another participant.
    ///
    /// Scans every known context once, wrapping from a random start so
    /// thieves don't pile onto the same victim. Lock order is fixed: the
    /// registry lock is taken first, then one candidate queue at a time.
    fn steal(&self, current: &Arc<WorkerContext>) -> Option<JobRef> {
        let mut contexts = self.contexts.lock();
        if contexts.is_empty() {
            return None;
        }
        let start = rand::thread_rng().gen_range(0..contexts.len());
        let mut i = 0;
        while i < contexts.len() {
            let index = (start + i) % contexts.len();
            if Arc::ptr_eq(&contexts[index], current) {
                i += 1;
                continue;
            }
            let candidate = Arc::clone(&contexts[index]);
            if candidate.dead.load(Ordering::Acquire) && candidate.queue.is_empty() {
                // Only the owning thread pushes to a queue, and the owner is
                // gone; the queue stays empty forever. Reap it.
                contexts.remove(index);
                debug!("reaped dead worker context");
                continue;
            }
            match candidate.queue.steal() {
                Some(job) => {
                    #[cfg(feature = "metrics")]
                    self.metrics.steal_hits.fetch_add(1, Ordering::Relaxed);
                    return Some(job);
                }
                None => i += 1,
            }
        }
        #[cfg(feature = "metrics")]
        self.metrics.steal_misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// One scheduling attempt: local pop, then steal, else yield.
    pub fn consume_job(&self) -> Option<JobRef> {
        let ctx = self.current_context();
        if let Some(job) = ctx.queue.pop() {
            return Some(job);
        }
        match self.steal(&ctx) {
            Some(job) => Some(job),
            None => {
                thread::yield_now();
                None
            }
        }
    }

    /// Runs a job to completion and propagates the finish chain. A panicking
    /// job is logged and still finished, so waiters cannot wedge.
    pub fn execute_job(&self, job: JobRef) {
        let header = job.0;
        let result = unsafe {
            let func = (*header).func;
            let params = JobHeader::params(header);
            panic::catch_unwind(AssertUnwindSafe(|| func(params)))
        };
        if let Err(payload) = result {
            error!(
                "job {} panicked: {}",
                unsafe { (*header).id },
                panic_message(payload.as_ref())
            );
        }
        self.finish_job(header);
        #[cfg(feature = "metrics")]
        self.metrics.jobs_executed.fetch_add(1, Ordering::Relaxed);
    }

    /// Decrements the outstanding count and, on zero, finishes the job's ID,
    /// frees its allocation, and walks up the parent chain. Iterative rather
    /// than recursive: parent chains mirror the spawn graph's depth, but an
    /// adversarial chain should not cost stack.
    fn finish_job(&self, header: *mut JobHeader) {
        let mut current = header;
        loop {
            unsafe {
                if (*current).unfinished.fetch_sub(1, Ordering::AcqRel) != 1 {
                    break;
                }
                let parent = (*current).parent;
                let id = (*current).id;
                debug_assert_ne!(id, INVALID_JOB_ID, "finishing a job that was never submitted");
                self.ids.lock().finish(id);
                release_job(current);
                if parent.is_null() {
                    break;
                }
                current = parent;
            }
        }
    }

    /// Blocks the calling worker until a submitter or shutdown wakes it.
    ///
    /// Registration is re-checked: a submission racing with the failed scan
    /// may have landed after we looked but before we were visible on the
    /// sleep list, and shutdown may have drained the list in the same
    /// window. Either way we must not block.
    pub fn sleep(&self, ctx: &Arc<WorkerContext>) {
        self.sleepers.lock().push(Arc::clone(ctx));
        if self.exiting.load(Ordering::Acquire) || self.any_work_pending() {
            let mut sleepers = self.sleepers.lock();
            if let Some(pos) = sleepers.iter().position(|s| Arc::ptr_eq(s, ctx)) {
                sleepers.remove(pos);
                return;
            }
            drop(sleepers);
            // Someone already claimed our slot; its trigger is in flight.
            // Absorb it so the binary signal stays balanced.
            ctx.wake.wait();
            return;
        }
        #[cfg(feature = "metrics")]
        self.metrics.sleeps.fetch_add(1, Ordering::Relaxed);
        ctx.wake.wait();
    }

    fn any_work_pending(&self) -> bool {
        let contexts = self.contexts.lock();
        contexts.iter().any(|c| !c.queue.is_empty())
    }

    /// Pops one sleeper, if any, and triggers its signal. One submission
    /// wakes at most one worker.
    pub fn wake_one(&self) {
        let sleeper = self.sleepers.lock().pop();
        if let Some(ctx) = sleeper {
            #[cfg(feature = "metrics")]
            self.metrics.wakeups.fetch_add(1, Ordering::Relaxed);
            ctx.wake.trigger();
        }
    }

    /// Wakes every registered sleeper; used at shutdown so no worker blocks
    /// process exit.
    pub fn wake_all(&self) {
        let sleepers: Vec<Arc<WorkerContext>> = self.sleepers.lock().drain(..).collect();
        for ctx in sleepers {
            ctx.wake.trigger();
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "non-string panic payload"
    }
}

/// Pool worker entry point: pop local, steal, or sleep, until shutdown.
pub(crate) fn worker_main(shared: Arc<Shared>, index: usize, pinning: PinningStrategy) {
    if pinning == PinningStrategy::Linear {
        if let Some(core_ids) = core_affinity::get_core_ids() {
            if index < core_ids.len() {
                core_affinity::set_for_current(core_ids[index]);
            }
        }
    }
    debug!("job worker {index} started");

    let ctx = shared.current_context();
    while !shared.exiting.load(Ordering::Acquire) {
        match shared.consume_job() {
            Some(job) => shared.execute_job(job),
            None => shared.sleep(&ctx),
        }
    }
    debug!("job worker {index} exiting");
}
