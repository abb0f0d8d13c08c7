//! Synchronization helpers shared by the searcher and its callers.
//!
//! [`StopFlag`] lets another thread interrupt a running search. [`LockToken`]
//! encodes the lock order used by the parallel search: a worker may hold at
//! most one node lock at a time and never takes the coordinator lock while
//! holding one.

use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A thread-safe flag asking a running search to stop.
///
/// The search polls it at the same sampled points where it checks the clock,
/// so stopping is cooperative. Once set, the searcher returns the result of
/// the last fully completed iteration.
#[derive(Clone, Debug, Default)]
pub struct StopFlag(Arc<AtomicBool>);

impl StopFlag {
    #[must_use]
    pub fn new() -> Self {
        StopFlag(Arc::new(AtomicBool::new(false)))
    }

    #[inline]
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    /// Request the search to stop.
    #[inline]
    pub fn stop(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    /// Clear a previous stop request.
    #[inline]
    pub fn reset(&self) {
        self.0.store(false, Ordering::Relaxed);
    }
}

impl From<Arc<AtomicBool>> for StopFlag {
    fn from(arc: Arc<AtomicBool>) -> Self {
        StopFlag(arc)
    }
}

/// Per-worker permission to take locks.
///
/// Locking a search node or the coordinator requires `&mut LockToken`, and
/// the returned guard keeps the token borrowed. The borrow checker therefore
/// rejects holding two node locks at once, or taking the coordinator lock
/// while a node lock is held.
///
/// The token is `!Send` so that it stays with the worker that created it.
#[derive(Debug)]
pub(crate) struct LockToken {
    _not_send: PhantomData<*const ()>,
}

impl LockToken {
    pub(crate) fn new() -> Self {
        LockToken {
            _not_send: PhantomData,
        }
    }
}
