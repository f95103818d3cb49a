use jobforge::{JobSystem, INVALID_JOB_ID};
use std::collections::HashSet;
use std::thread;
use std::time::Duration;

#[test]
fn test_ids_never_repeat_across_threads() {
    let system = JobSystem::with_workers(0);
    const THREADS: usize = 8;
    const IDS_PER_THREAD: usize = 1_000;

    let mut all_ids = Vec::new();
    thread::scope(|scope| {
        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let system = &system;
                scope.spawn(move || {
                    let ids: Vec<_> = (0..IDS_PER_THREAD)
                        .map(|_| system.allocate_job_id())
                        .collect();
                    // Monotonic from each thread's point of view.
                    for pair in ids.windows(2) {
                        assert!(pair[0] < pair[1]);
                    }
                    ids
                })
            })
            .collect();
        for handle in handles {
            all_ids.extend(handle.join().unwrap());
        }
    });

    let distinct: HashSet<_> = all_ids.iter().copied().collect();
    assert_eq!(distinct.len(), THREADS * IDS_PER_THREAD);

    // Leave the map clean so the window can slide.
    for id in all_ids {
        system.finish_job_id(id);
    }
    system.shutdown().expect("shutdown failed");
}

#[test]
fn test_finish_is_observable_only_after_the_call() {
    let system = JobSystem::with_workers(1);
    let id = system.allocate_job_id();
    assert_ne!(id, INVALID_JOB_ID);

    for _ in 0..100 {
        assert!(!system.is_job_finished(id));
    }
    system.finish_job_id(id);
    assert!(system.is_job_finished(id));
    system.shutdown().expect("shutdown failed");
}

#[test]
fn test_manual_id_as_synchronization_point() {
    let system = JobSystem::with_workers(1);
    let id = system.allocate_job_id();

    thread::scope(|scope| {
        let system = &system;
        scope.spawn(move || {
            thread::sleep(Duration::from_millis(50));
            system.finish_job_id(id);
        });
        // No job carries this ID; the wait is purely on the manual finish.
        system.wait_job(id);
        assert!(system.is_job_finished(id));
    });
    system.shutdown().expect("shutdown failed");
}

#[test]
fn test_completion_window_stays_bounded() {
    let system = JobSystem::with_workers(2);

    // Sequential submit-and-wait: the window must slide behind us instead
    // of growing with the total number of IDs ever issued.
    for _ in 0..20_000 {
        let id = system.spawn(|| {});
        system.wait_job(id);
    }

    assert!(
        system.id_window_chunks() <= 4,
        "completion window held {} chunks after 20k sequential jobs",
        system.id_window_chunks()
    );
    system.shutdown().expect("shutdown failed");
}
