#![allow(missing_docs)]
#![cfg(feature = "loom")]

use cts::{PoolConfig, TaskPool, TaskSystem, TaskSystemError};
use loom::sync::{
    Arc,
    atomic::{AtomicBool, AtomicUsize, Ordering},
};

/// Explores schedules with at most two preemptions.
fn model<F>(f: F)
where
    F: Fn() + Sync + Send + 'static,
{
    let mut builder = loom::model::Builder::new();
    builder.preemption_bound = Some(2);
    builder.check(f);
}

fn counters(n: usize) -> Arc<Vec<AtomicUsize>> {
    Arc::new((0..n).map(|_| AtomicUsize::new(0)).collect())
}

#[test]
fn loom_run_executes_every_subtask_once() {
    model(|| {
        let pool = TaskPool::start(&PoolConfig::with_threads(2)).unwrap();
        let hits = counters(2);

        let h = Arc::clone(&hits);
        pool.run(
            Box::new(move |i: usize, _: usize| {
                h[i].fetch_add(1, Ordering::Relaxed);
            }),
            2,
        )
        .unwrap();

        for hit in hits.iter() {
            assert_eq!(hit.load(Ordering::Relaxed), 1);
        }
        let report = pool.shutdown();
        assert!(report.discarded.is_empty());
    });
}

#[test]
fn loom_dependent_observes_dependency_writes() {
    model(|| {
        let pool = TaskPool::start(&PoolConfig::with_threads(1)).unwrap();
        let written = Arc::new(AtomicBool::new(false));
        let observed = Arc::new(AtomicBool::new(false));

        let w = Arc::clone(&written);
        let a = pool
            .run_async_with_deps(
                Box::new(move |_: usize, _: usize| w.store(true, Ordering::Relaxed)),
                1,
                &[],
            )
            .unwrap();
        let (w, o) = (Arc::clone(&written), Arc::clone(&observed));
        pool.run_async_with_deps(
            Box::new(move |_: usize, _: usize| {
                // Relaxed on purpose: the ledger lock must provide the ordering.
                o.store(w.load(Ordering::Relaxed), Ordering::Relaxed);
            }),
            1,
            &[a],
        )
        .unwrap();

        pool.sync().unwrap();
        assert!(observed.load(Ordering::Relaxed));
        let _report = pool.shutdown();
    });
}

#[test]
fn loom_shutdown_request_releases_concurrent_sync() {
    model(|| {
        // Only the pool handle is shared; `shutdown` needs it back by value.
        let pool = std::sync::Arc::new(TaskPool::start(&PoolConfig::with_threads(1)).unwrap());
        let executed = Arc::new(AtomicUsize::new(0));

        let e = Arc::clone(&executed);
        let id = pool
            .run_async_with_deps(
                Box::new(move |_: usize, _: usize| {
                    e.fetch_add(1, Ordering::Relaxed);
                }),
                2,
                &[],
            )
            .unwrap();

        let p = std::sync::Arc::clone(&pool);
        let syncer = loom::thread::spawn(move || p.sync());
        pool.request_shutdown();
        let synced = syncer.join().unwrap();

        let report = std::sync::Arc::try_unwrap(pool).unwrap().shutdown();
        let executed = executed.load(Ordering::Relaxed);
        assert_eq!(executed + report.unclaimed_subtasks, 2);
        if executed == 2 {
            assert!(report.discarded.is_empty());
            assert_eq!(synced, Ok(()));
        } else {
            assert_eq!(report.discarded, vec![id]);
            assert_eq!(synced, Err(TaskSystemError::Abandoned(vec![id])));
        }
    });
}
