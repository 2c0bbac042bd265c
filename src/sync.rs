#[cfg(feature = "loom")]
mod imp {
    pub(crate) use loom::{
        sync::{Arc, Condvar, Mutex, MutexGuard},
        thread::{JoinHandle, yield_now},
    };

    /// `loom` threads cannot be named; the name is only used for diagnostics.
    #[allow(clippy::unnecessary_wraps)]
    pub(crate) fn spawn_named<F>(_name: String, f: F) -> std::io::Result<JoinHandle<()>>
    where
        F: FnOnce() + Send + 'static,
    {
        Ok(loom::thread::spawn(f))
    }
}

#[cfg(not(feature = "loom"))]
mod imp {
    pub(crate) use std::{
        sync::{Arc, Condvar, Mutex, MutexGuard},
        thread::{JoinHandle, yield_now},
    };

    pub(crate) fn spawn_named<F>(name: String, f: F) -> std::io::Result<JoinHandle<()>>
    where
        F: FnOnce() + Send + 'static,
    {
        std::thread::Builder::new().name(name).spawn(f)
    }
}

pub(crate) use imp::*;
use std::sync::PoisonError;

/// Lock `mutex`, ignoring poisoning.
///
/// User code never runs while one of the crate's locks is held, so a poisoned
/// lock cannot guard a half-updated invariant.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Block on `condvar`, ignoring poisoning (see [`lock`]).
pub(crate) fn wait<'a, T>(condvar: &Condvar, guard: MutexGuard<'a, T>) -> MutexGuard<'a, T> {
    condvar.wait(guard).unwrap_or_else(PoisonError::into_inner)
}
