//! Low-level synchronization primitives used by the scheduler.
//!
//! Queue and registry critical sections are a handful of pointer moves, so
//! they sit behind a spin lock rather than an OS mutex. The wake signal is
//! the one place an idle worker genuinely blocks in the kernel.

use crossbeam::utils::Backoff;
use std::cell::UnsafeCell;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex, PoisonError};

/// A test-and-test-and-set spin lock with exponential backoff.
///
/// Must never be held across a call that executes a job or blocks; every
/// critical section in this crate is a short queue or list mutation.
pub(crate) struct SpinLock<T> {
    locked: AtomicBool,
    value: UnsafeCell<T>,
}

unsafe impl<T: Send> Send for SpinLock<T> {}
unsafe impl<T: Send> Sync for SpinLock<T> {}

impl<T> SpinLock<T> {
    pub fn new(value: T) -> Self {
        SpinLock {
            locked: AtomicBool::new(false),
            value: UnsafeCell::new(value),
        }
    }

    pub fn lock(&self) -> SpinGuard<'_, T> {
        let backoff = Backoff::new();
        loop {
            if self
                .locked
                .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
            {
                return SpinGuard { lock: self };
            }
            // Spin on the cached value before retrying the RMW.
            while self.locked.load(Ordering::Relaxed) {
                backoff.snooze();
            }
        }
    }
}

pub(crate) struct SpinGuard<'a, T> {
    lock: &'a SpinLock<T>,
}

impl<T> Deref for SpinGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.lock.value.get() }
    }
}

impl<T> DerefMut for SpinGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.value.get() }
    }
}

impl<T> Drop for SpinGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.locked.store(false, Ordering::Release);
    }
}

/// A binary auto-reset signal.
///
/// `trigger` latches the signal and wakes one waiter; `wait` blocks until the
/// signal is latched, then clears it. A trigger that arrives before the wait
/// is never lost, which is what the sleep/wake protocol relies on.
pub(crate) struct WakeSignal {
    raised: Mutex<bool>,
    condvar: Condvar,
}

impl WakeSignal {
    pub fn new() -> Self {
        WakeSignal {
            raised: Mutex::new(false),
            condvar: Condvar::new(),
        }
    }

    pub fn trigger(&self) {
        let mut raised = self.raised.lock().unwrap_or_else(PoisonError::into_inner);
        *raised = true;
        self.condvar.notify_one();
    }

    pub fn wait(&self) {
        let mut raised = self.raised.lock().unwrap_or_else(PoisonError::into_inner);
        while !*raised {
            raised = self
                .condvar
                .wait(raised)
                .unwrap_or_else(PoisonError::into_inner);
        }
        *raised = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_spin_lock_mutual_exclusion() {
        let lock = Arc::new(SpinLock::new(0u64));
        let mut handles = Vec::new();

        for _ in 0..8 {
            let lock = Arc::clone(&lock);
            handles.push(thread::spawn(move || {
                for _ in 0..10_000 {
                    *lock.lock() += 1;
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(*lock.lock(), 80_000);
    }

    #[test]
    fn test_signal_trigger_before_wait() {
        let signal = WakeSignal::new();
        signal.trigger();
        // The latch must survive until the wait.
        signal.wait();
    }

    #[test]
    fn test_signal_wakes_blocked_waiter() {
        let signal = Arc::new(WakeSignal::new());
        let signal_clone = Arc::clone(&signal);

        let waiter = thread::spawn(move || {
            signal_clone.wait();
        });

        thread::sleep(Duration::from_millis(50));
        signal.trigger();
        waiter.join().unwrap();
    }

    #[test]
    fn test_signal_auto_reset() {
        let signal = Arc::new(WakeSignal::new());
        signal.trigger();
        signal.wait();

        // The signal is cleared now; a second trigger is needed for a
        // second wait to return.
        let signal_clone = Arc::clone(&signal);
        let waiter = thread::spawn(move || {
            signal_clone.wait();
        });
        thread::sleep(Duration::from_millis(50));
        assert!(!waiter.is_finished());
        signal.trigger();
        waiter.join().unwrap();
    }
}
