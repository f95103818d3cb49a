//! Parent/child join semantics exercised through the raw header API.
//!
//! The job system never guarantees parent-before-children ordering; the only
//! join point is the parent's outstanding count, observed through its job ID.

use jobforge::JobSystem;
use std::mem;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

struct ParentParams {
    system: *const JobSystem,
    counter: *const AtomicUsize,
    children: usize,
    child_sleep_ms: u64,
}

struct ChildParams {
    counter: *const AtomicUsize,
    sleep_ms: u64,
}

unsafe fn child_body(params: *mut u8) {
    let p = unsafe { params.cast::<ChildParams>().read() };
    if p.sleep_ms > 0 {
        std::thread::sleep(Duration::from_millis(p.sleep_ms));
    }
    unsafe { (*p.counter).fetch_add(1, Ordering::Relaxed) };
}

unsafe fn parent_body(params: *mut u8) {
    let p = unsafe { params.cast::<ParentParams>().read() };
    let system = unsafe { &*p.system };
    for _ in 0..p.children {
        unsafe {
            let child = system.new_job(
                child_body,
                mem::size_of::<ChildParams>(),
                mem::align_of::<ChildParams>(),
                Some(NonNull::new_unchecked(params)),
            );
            child.as_ptr().cast::<ChildParams>().write(ChildParams {
                counter: p.counter,
                sleep_ms: p.child_sleep_ms,
            });
            system.submit_job(child);
        }
    }
}

unsafe fn submit_parent(
    system: &JobSystem,
    counter: &AtomicUsize,
    children: usize,
    child_sleep_ms: u64,
) -> jobforge::JobId {
    unsafe {
        let params = system.new_job(
            parent_body,
            mem::size_of::<ParentParams>(),
            mem::align_of::<ParentParams>(),
            None,
        );
        params.as_ptr().cast::<ParentParams>().write(ParentParams {
            system,
            counter,
            children,
            child_sleep_ms,
        });
        system.submit_job(params)
    }
}

#[test]
fn test_parent_joins_all_children() {
    let system = JobSystem::with_workers(4);
    let counter = AtomicUsize::new(0);
    const CHILDREN: usize = 1_000;

    let parent_id = unsafe { submit_parent(&system, &counter, CHILDREN, 0) };

    system.wait_job(parent_id);
    assert_eq!(counter.load(Ordering::SeqCst), CHILDREN);
    assert!(system.is_job_finished(parent_id));
    system.shutdown().expect("shutdown failed");
}

#[test]
fn test_parent_not_finished_while_children_run() {
    let system = JobSystem::with_workers(2);
    let counter = AtomicUsize::new(0);

    // Children sleep long enough that the parent cannot possibly be
    // finished by the time we check.
    let parent_id = unsafe { submit_parent(&system, &counter, 4, 50) };
    assert!(!system.is_job_finished(parent_id));

    system.wait_job(parent_id);
    assert_eq!(counter.load(Ordering::SeqCst), 4);
    system.shutdown().expect("shutdown failed");
}

#[test]
fn test_spawn_child_closure_joins() {
    let system = JobSystem::with_workers(2);
    let counter = AtomicUsize::new(0);

    // The closure layer over the same parent link: the parent body links
    // children through spawn_child while it runs.
    struct Params {
        system: *const JobSystem,
        counter: *const AtomicUsize,
    }

    unsafe fn body(params: *mut u8) {
        let p = unsafe { params.cast::<Params>().read() };
        let system = unsafe { &*p.system };
        let counter_addr = p.counter as usize;
        for _ in 0..100 {
            unsafe {
                system.spawn_child(NonNull::new_unchecked(params), move || {
                    let counter = &*(counter_addr as *const AtomicUsize);
                    counter.fetch_add(1, Ordering::Relaxed);
                });
            }
        }
    }

    let parent_id = unsafe {
        let params = system.new_job(body, mem::size_of::<Params>(), mem::align_of::<Params>(), None);
        params.as_ptr().cast::<Params>().write(Params {
            system: &system,
            counter: &counter,
        });
        system.submit_job(params)
    };

    system.wait_job(parent_id);
    assert_eq!(counter.load(Ordering::SeqCst), 100);
    system.shutdown().expect("shutdown failed");
}
