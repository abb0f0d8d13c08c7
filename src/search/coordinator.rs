//! Coordination between the master and the helper workers.
//!
//! The coordinator owns every node pool, the list of published nodes that
//! idle workers may help with, and the iteration barrier. Its lock is never
//! taken while a node lock is held; [`LockToken`] enforces that.

use std::marker::PhantomData;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};

use once_cell::sync::OnceCell;
use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::game::Position;
use crate::moves::Move;
use crate::sync::LockToken;

use super::node::{Assignment, Claim, MoveSource, NodeId, SearchNode};
use super::pool::NodePool;
use super::stats::SearchStats;

/// Pool index reserved for root nodes.
pub(crate) const ROOT_POOL: u32 = 0;

pub(crate) struct CoordinatorState {
    search_done: bool,
    iteration_going: bool,
    did_timeout: bool,
    num_waiting: usize,
    num_helpers: usize,
    free_pools: Vec<u32>,
    /// Published nodes, oldest first, with the epoch they were published at
    public: Vec<(NodeId, u64)>,
    /// Bumped on every publication
    generation: u64,
    stats: SearchStats,
}

pub(crate) struct CoordinatorGuard<'a, 't> {
    inner: MutexGuard<'a, CoordinatorState>,
    _token: PhantomData<&'t mut LockToken>,
}

impl Deref for CoordinatorGuard<'_, '_> {
    type Target = CoordinatorState;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl DerefMut for CoordinatorGuard<'_, '_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.inner
    }
}

/// Work found on a published node.
pub(crate) struct PublicWork<P> {
    pub assignment: Assignment<P>,
    pub move_history: Vec<Move>,
    pub copy_killers_from: Option<usize>,
}

pub(crate) struct WorkCoordinator<P> {
    pools: Vec<OnceCell<NodePool<P>>>,
    max_f_depth: usize,
    state: Mutex<CoordinatorState>,
    /// Helpers wait here between iterations
    iteration_cv: Condvar,
    /// The master waits here for every helper to go idle
    master_cv: Condvar,
    /// Idle workers wait here for new publications
    work_cv: Condvar,
    terminated: AtomicBool,
}

impl<P: Position> WorkCoordinator<P> {
    /// Coordinator for `num_threads` workers and main-search depths up to
    /// `max_f_depth`.
    pub(crate) fn new(num_threads: usize, max_f_depth: usize) -> Self {
        // A worker may abandon a pool at every depth it visits.
        let num_pools = num_threads + num_threads * (max_f_depth + 1);
        WorkCoordinator {
            pools: (0..=num_pools).map(|_| OnceCell::new()).collect(),
            max_f_depth,
            state: Mutex::new(CoordinatorState {
                search_done: false,
                iteration_going: false,
                did_timeout: false,
                num_waiting: 0,
                num_helpers: 0,
                free_pools: (1..=num_pools as u32).rev().collect(),
                public: Vec::new(),
                generation: 0,
                stats: SearchStats::default(),
            }),
            iteration_cv: Condvar::new(),
            master_cv: Condvar::new(),
            work_cv: Condvar::new(),
            terminated: AtomicBool::new(false),
        }
    }

    pub(crate) fn lock<'a, 't>(&'a self, _token: &'t mut LockToken) -> CoordinatorGuard<'a, 't> {
        CoordinatorGuard {
            inner: self.state.lock(),
            _token: PhantomData,
        }
    }

    #[inline]
    pub(crate) fn max_f_depth(&self) -> usize {
        self.max_f_depth
    }

    pub(crate) fn pool(&self, id: u32) -> Option<&NodePool<P>> {
        let cell = self.pools.get(id as usize)?;
        let max_f_depth = if id == ROOT_POOL { 0 } else { self.max_f_depth };
        Some(cell.get_or_init(|| NodePool::new(id, max_f_depth)))
    }

    #[inline]
    pub(crate) fn node(&self, id: NodeId) -> Option<&SearchNode<P>> {
        self.pool(id.pool)?.node(id.slot)
    }

    #[inline]
    pub(crate) fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::Acquire)
    }

    pub(crate) fn did_timeout(&self, token: &mut LockToken) -> bool {
        self.lock(token).did_timeout
    }

    // ========================================================================
    // POOLS
    // ========================================================================

    pub(crate) fn acquire_pool(&self, token: &mut LockToken) -> Option<u32> {
        self.lock(token).free_pools.pop()
    }

    pub(crate) fn release_pool(&self, token: &mut LockToken, id: u32) {
        if id != ROOT_POOL {
            self.lock(token).free_pools.push(id);
        }
    }

    /// Slot for a root node.
    pub(crate) fn acquire_root(&self) -> Option<NodeId> {
        self.pool(ROOT_POOL)?.acquire(0)
    }

    /// Nodes currently allocated across all pools.
    pub(crate) fn nodes_in_use(&self) -> usize {
        self.pools
            .iter()
            .filter_map(OnceCell::get)
            .map(NodePool::num_used)
            .sum()
    }

    pub(crate) fn num_free_pools(&self, token: &mut LockToken) -> usize {
        self.lock(token).free_pools.len()
    }

    // ========================================================================
    // PUBLICATION
    // ========================================================================

    /// Make a node's remaining moves available to idle workers.
    pub(crate) fn publicize(&self, token: &mut LockToken, id: NodeId, epoch: u64) {
        let Some(node) = self.node(id) else { return };
        let mut state = self.lock(token);
        if node.is_public() {
            return;
        }
        node.set_public(true);
        state.public.push((id, epoch));
        state.generation += 1;
        self.work_cv.notify_all();
    }

    pub(crate) fn depublicize(&self, token: &mut LockToken, id: NodeId) {
        let Some(node) = self.node(id) else { return };
        let mut state = self.lock(token);
        if !node.is_public() {
            return;
        }
        node.set_public(false);
        state.public.retain(|&(n, _)| n != id);
    }

    pub(crate) fn num_public(&self, token: &mut LockToken) -> usize {
        self.lock(token).public.len()
    }

    /// Whether `id` or any ancestor is aborted. If so, the abort is
    /// propagated down to `id`. Ancestors of a live node are themselves
    /// live, so the walk never touches a recycled slot.
    pub(crate) fn check_aborted(&self, id: NodeId) -> bool {
        let mut depth = 0;
        let mut current = Some(id);
        let mut found = false;
        while let Some(c) = current {
            let Some(node) = self.node(c) else { break };
            if node.is_aborted() {
                found = true;
                break;
            }
            current = node.parent();
            depth += 1;
        }
        if !found {
            return false;
        }
        let mut current = Some(id);
        for _ in 0..depth {
            let Some(node) = current.and_then(|c| self.node(c)) else { break };
            node.set_aborted();
            current = node.parent();
        }
        true
    }

    /// Claim a move on the most recently published node that has work left.
    /// Blocks until work appears, the iteration ends or the search is
    /// terminated; returns `None` in the latter cases.
    pub(crate) fn get_public_work(
        &self,
        token: &mut LockToken,
        src: &MoveSource<'_, P>,
        stats: &mut SearchStats,
    ) -> Option<PublicWork<P>> {
        loop {
            let (snapshot, generation) = {
                let state = self.lock(token);
                if self.is_terminated() || !state.iteration_going {
                    return None;
                }
                let snapshot: Vec<_> = state.public.iter().rev().copied().collect();
                (snapshot, state.generation)
            };

            for (id, epoch) in snapshot {
                let Some(node) = self.node(id) else { continue };
                let mut guard = node.lock(token);
                if guard.epoch() != epoch || !node.is_public() {
                    continue;
                }
                let aborted = self.check_aborted(id);
                let Some(data) = guard.as_mut() else { continue };
                match data.get_work(aborted, src) {
                    Claim::Work { index, mv } => {
                        stats.public_work_requests += 1;
                        return Some(PublicWork {
                            assignment: data.assignment(id, index, mv),
                            move_history: data.move_history.clone(),
                            copy_killers_from: data.copy_killers_from,
                        });
                    }
                    Claim::Aborted => stats.thread_aborts += 1,
                    Claim::Exhausted => {}
                }
            }

            let mut state = self.lock(token);
            if state.generation == generation && state.iteration_going && !self.is_terminated() {
                self.work_cv.wait(&mut state.inner);
            }
        }
    }

    // ========================================================================
    // ITERATIONS
    // ========================================================================

    pub(crate) fn set_num_helpers(&self, token: &mut LockToken, n: usize) {
        self.lock(token).num_helpers = n;
    }

    pub(crate) fn begin_iteration(&self, token: &mut LockToken) {
        let mut state = self.lock(token);
        state.iteration_going = true;
        self.iteration_cv.notify_all();
    }

    /// Called by whichever worker finishes the root.
    pub(crate) fn end_iteration_internal(&self, token: &mut LockToken) {
        let mut state = self.lock(token);
        state.iteration_going = false;
        self.work_cv.notify_all();
    }

    /// Master side of the barrier: wait until every helper is idle.
    pub(crate) fn end_iteration(&self, token: &mut LockToken) {
        let mut state = self.lock(token);
        state.iteration_going = false;
        self.work_cv.notify_all();
        while state.num_waiting < state.num_helpers {
            self.master_cv.wait(&mut state.inner);
        }
    }

    /// Stop the running iteration and any later ones.
    pub(crate) fn timeout(&self, token: &mut LockToken) {
        let mut state = self.lock(token);
        state.iteration_going = false;
        state.did_timeout = true;
        self.terminated.store(true, Ordering::Release);
        self.work_cv.notify_all();
    }

    /// Release the helpers for good.
    pub(crate) fn finish(&self, token: &mut LockToken) {
        let mut state = self.lock(token);
        state.search_done = true;
        self.iteration_cv.notify_all();
        self.work_cv.notify_all();
    }

    /// Helper side of the barrier. Returns true when the helper should run
    /// an iteration, false when the search is over.
    pub(crate) fn wait_for_iteration(&self, token: &mut LockToken) -> bool {
        let mut state = self.lock(token);
        loop {
            if state.search_done {
                return false;
            }
            if state.iteration_going {
                return true;
            }
            state.num_waiting += 1;
            if state.num_waiting == state.num_helpers {
                self.master_cv.notify_all();
            }
            self.iteration_cv.wait(&mut state.inner);
            state.num_waiting -= 1;
        }
    }

    pub(crate) fn add_stats(&self, token: &mut LockToken, stats: &SearchStats) {
        self.lock(token).stats += *stats;
    }

    pub(crate) fn stats(&self, token: &mut LockToken) -> SearchStats {
        self.lock(token).stats
    }
}
