//! Dependency-aware bulk task execution on a fixed pool of worker threads.
//!
//! A *task* is one bulk job made of `N` independently executable subtasks,
//! described by a [`Runnable`]. Tasks can be submitted synchronously
//! ([`TaskSystem::run`]) or asynchronously with a list of earlier tasks that
//! must finish first ([`TaskSystem::run_async_with_deps`]); [`TaskSystem::sync`]
//! is a barrier over everything submitted so far.
//!
//! The crate ships the four classic strategies behind the same trait:
//! - [`Serial`]: everything on the calling thread.
//! - [`ParallelSpawn`]: fresh scoped threads for every call.
//! - [`TaskPool`] with [`IdlePolicy::Spin`]: persistent workers that poll
//!   while idle.
//! - [`TaskPool`] with [`IdlePolicy::Sleep`]: persistent workers that block
//!   on a condition variable while idle.
//!
//! The pool keeps a ledger with one entry per issued id. Dependencies are
//! resolved against that table, never against queue position, so a task can
//! depend on anything submitted before it, however long ago it finished.
//! Unknown ids and dependency cycles are rejected at submission time.
//!
//! Quick start:
//! 1. Build a pool with [`TaskPool::start`] (or pick a strategy by name with
//!    [`strategy_by_name`]).
//! 2. Submit work: closures `Fn(usize, usize)` implement [`Runnable`]
//!    (annotate both parameters so the closure type is known).
//! 3. Call [`TaskSystem::sync`] to wait for asynchronous work, then
//!    [`TaskPool::shutdown`] to join the workers.
//!
//! ```no_run
//! use cts::{PoolConfig, TaskPool, TaskSystem};
//! use std::sync::{
//!     Arc,
//!     atomic::{AtomicUsize, Ordering},
//! };
//!
//! let pool = TaskPool::start(&PoolConfig::with_threads(4))?;
//! let sum = Arc::new(AtomicUsize::new(0));
//!
//! let s = Arc::clone(&sum);
//! let a = pool.run_async_with_deps(
//!     Box::new(move |i: usize, _: usize| {
//!         s.fetch_add(i, Ordering::Relaxed);
//!     }),
//!     10,
//!     &[],
//! )?;
//! let s = Arc::clone(&sum);
//! pool.run_async_with_deps(
//!     Box::new(move |_: usize, _: usize| assert_eq!(s.load(Ordering::Relaxed), 45)),
//!     1,
//!     &[a],
//! )?;
//! pool.sync()?;
//! let _report = pool.shutdown();
//! # Ok::<(), cts::TaskSystemError>(())
//! ```

/// Pool configuration: worker count, idle policy and thread naming.
pub mod config;
/// Error types returned by submissions and barriers.
pub mod error;
mod ledger;
/// The persistent worker pool.
pub mod pool;
mod stats;
mod sync;
/// The `Runnable` work interface.
pub mod task;
/// The `TaskSystem` interface and the eager strategies.
pub mod system;
/// Task identifiers.
pub mod types;
mod utils;

pub use crate::{
    config::{IdlePolicy, PoolConfig},
    error::{DependencyError, SubtaskFault, TaskSystemError},
    pool::{ShutdownReport, TaskPool},
    stats::PoolStatsSnapshot,
    system::{ParallelSpawn, Serial, TaskSystem, strategy_by_name},
    task::Runnable,
    types::TaskId,
};
