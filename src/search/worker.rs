//! Per-thread search context and the work loop.
//!
//! Every search thread, master included, owns a [`Worker`]. It holds the
//! thread's game history, PV stacks, quiescence move buffers, statistics
//! and its current node pool. Workers only communicate through nodes, the
//! shared tables and the coordinator.

use crate::eval::{maybe_flip, Eval, DEPTH_DIV, LOSE};
use crate::game::{Evaluator, GameHistory, MoveScorer, Position, TerminalSolver};
use crate::moves::Move;
use crate::sync::{LockToken, StopFlag};
use crate::tt::TranspositionTable;

use super::constants::{PV_ARRAY_SIZE, TIME_CHECK_PERIOD};
use super::coordinator::{PublicWork, WorkCoordinator, ROOT_POOL};
use super::main_search::{m_search, m_search_done, Expansion};
use super::node::{Assignment, Claim, MoveSource, NodeId, Report};
use super::ordering::{HistoryTable, KillerTable};
use super::params::SearchParams;
use super::stats::SearchStats;
use super::time::SearchClock;

/// State shared by every worker of one search.
pub(crate) struct SearchShared<'a, P: Position> {
    pub params: &'a SearchParams,
    pub tt: &'a TranspositionTable,
    pub history: &'a HistoryTable,
    /// One killer table per worker, indexed by worker id
    pub killers: &'a [KillerTable],
    pub evaluator: &'a dyn Evaluator<P>,
    pub solver: Option<&'a dyn TerminalSolver<P>>,
    pub scorer: Option<&'a dyn MoveScorer<P>>,
    pub clock: &'a SearchClock,
    pub stop: &'a StopFlag,
    pub coordinator: WorkCoordinator<P>,
    pub root_turn: usize,
}

impl<P: Position> SearchShared<'_, P> {
    pub(crate) fn move_source(&self) -> MoveSource<'_, P> {
        MoveSource {
            history: self.history,
            scorer: self.scorer,
        }
    }

    /// Static evaluation, with the configured random perturbation mixed in.
    pub(crate) fn evaluate(&self, pos: &P, alpha: Eval, beta: Eval) -> Eval {
        let eval = self.evaluator.evaluate(pos, alpha, beta);
        if !self.params.randomize || self.params.rand_delta <= 0 {
            return eval;
        }
        eval + eval_noise(pos.situation_hash(), self.params.rand_seed, self.params.rand_delta)
    }
}

/// Sum of three values uniform in `[-delta, delta]`, derived from the hash.
fn eval_noise(hash: u64, seed: u64, delta: i32) -> Eval {
    let d = u64::from(delta.unsigned_abs()) * 2 + 1;
    let mut h = hash.wrapping_mul(0xC849_B092_32AF_C387);
    h ^= h >> 32;
    h = h.wrapping_add(seed);
    h ^= 0x7331_F00D_CAFE_BABE;
    h = h.wrapping_mul(0x25AF_E4F5_6782_19C1);
    h ^= h >> 32;

    let low = h % (d * d);
    let high = (h >> 32) % d;
    let noise = (low % d) as i32 + (low / d) as i32 + high as i32;
    noise - 3 * delta
}

/// A move list with ordering scores, reused across quiescence frames.
#[derive(Default)]
pub(crate) struct MoveBuffer {
    pub moves: Vec<Move>,
    pub scores: Vec<i32>,
}

pub(crate) struct Worker<'s, 'a, P: Position> {
    pub id: usize,
    pub shared: &'s SearchShared<'a, P>,
    pub token: LockToken,
    pub history: GameHistory<P>,
    pub stats: SearchStats,
    pool: Option<u32>,
    current: Option<Assignment<P>>,
    pv: Vec<Vec<Move>>,
    buffers: Vec<MoveBuffer>,
    time_check_counter: u32,
}

impl<'s, 'a, P: Position> Worker<'s, 'a, P> {
    pub(crate) fn new(id: usize, shared: &'s SearchShared<'a, P>, history: GameHistory<P>) -> Self {
        Worker {
            id,
            shared,
            token: LockToken::new(),
            history,
            stats: SearchStats::default(),
            pool: None,
            current: None,
            pv: Vec::new(),
            buffers: Vec::new(),
            time_check_counter: 0,
        }
    }

    #[inline]
    pub(crate) fn killers(&self) -> &'s KillerTable {
        &self.shared.killers[self.id]
    }

    #[inline]
    pub(crate) fn pool(&self) -> Option<u32> {
        self.pool
    }

    pub(crate) fn set_assignment(&mut self, assignment: Assignment<P>) {
        self.current = Some(assignment);
    }

    // ========================================================================
    // PV STACK
    // ========================================================================

    fn pv_slot(&mut self, f_depth: usize) -> &mut Vec<Move> {
        if self.pv.len() <= f_depth {
            self.pv.resize_with(f_depth + 1, Vec::new);
        }
        &mut self.pv[f_depth]
    }

    /// PV found at `f_depth`, empty if none was recorded.
    pub(crate) fn pv(&self, f_depth: usize) -> &[Move] {
        self.pv.get(f_depth).map_or(&[], Vec::as_slice)
    }

    pub(crate) fn end_pv(&mut self, f_depth: usize) {
        self.pv_slot(f_depth).clear();
    }

    pub(crate) fn set_pv(&mut self, f_depth: usize, pv: &[Move]) {
        let slot = self.pv_slot(f_depth);
        slot.clear();
        slot.extend(pv.iter().take(PV_ARRAY_SIZE));
    }

    /// PV at `f_depth` becomes `mv` followed by the PV at `f_depth + 1`.
    pub(crate) fn copy_extend_pv(&mut self, f_depth: usize, mv: Move) {
        self.pv_slot(f_depth + 1);
        let (head, tail) = self.pv.split_at_mut(f_depth + 1);
        super::node::copy_extend_pv(&mut head[f_depth], mv, &tail[0]);
    }

    // ========================================================================
    // MOVE BUFFERS
    // ========================================================================

    pub(crate) fn take_buffer(&mut self, f_depth: usize) -> MoveBuffer {
        if self.buffers.len() <= f_depth {
            self.buffers.resize_with(f_depth + 1, MoveBuffer::default);
        }
        let mut buf = std::mem::take(&mut self.buffers[f_depth]);
        buf.moves.clear();
        buf.scores.clear();
        buf
    }

    pub(crate) fn return_buffer(&mut self, f_depth: usize, buf: MoveBuffer) {
        if let Some(slot) = self.buffers.get_mut(f_depth) {
            *slot = buf;
        }
    }

    // ========================================================================
    // TIME
    // ========================================================================

    /// Sampled clock and stop-flag check. Returns true once the search is
    /// terminated.
    pub(crate) fn try_check_time(&mut self) -> bool {
        self.add_time_check_nodes(1);
        self.shared.coordinator.is_terminated()
    }

    /// Count `n` visited nodes towards the next sampled time check.
    pub(crate) fn add_time_check_nodes(&mut self, n: u32) {
        self.time_check_counter = self.time_check_counter.saturating_add(n);
        let shared = self.shared;
        if self.time_check_counter >= TIME_CHECK_PERIOD && shared.clock.is_interruptible() {
            self.time_check_counter = 0;
            if shared.clock.is_over() || shared.stop.is_stopped() {
                shared.coordinator.timeout(&mut self.token);
            }
        }
    }

    // ========================================================================
    // HISTORY SYNC
    // ========================================================================

    /// Replay the per-turn moves leading from the root to a node, starting at
    /// the first turn that differs from what this worker last searched.
    pub(crate) fn sync_history(&mut self, move_history: &[Move]) {
        let root_turn = self.shared.root_turn;
        let Some(first_diff) = move_history
            .iter()
            .enumerate()
            .position(|(i, &mv)| self.history.turn_move(root_turn + i) != mv)
        else {
            return;
        };
        for (i, &mv) in move_history.iter().enumerate().skip(first_diff) {
            if let Err(err) = self.history.report_turn_move(root_turn + i, mv) {
                log::warn!("worker {} failed to replay history: {err}", self.id);
                return;
            }
        }
    }

    /// Per-turn moves from the root to the position this worker just reached.
    pub(crate) fn path_from_root(&self, pos: &P) -> Vec<Move> {
        let root_turn = self.shared.root_turn;
        // A turn only counts once it has a step.
        let end = pos.turn_number() + usize::from(pos.step() != 0);
        (root_turn..end).map(|t| self.history.turn_move(t)).collect()
    }

    fn sync_distant(&mut self, work: &PublicWork<P>) {
        match work.copy_killers_from {
            Some(from) if from == self.id => {}
            Some(from) => {
                if let Some(other) = self.shared.killers.get(from) {
                    self.killers().copy_from(other);
                }
            }
            None => self.killers().clear(),
        }
        self.sync_history(&work.move_history);
    }

    // ========================================================================
    // NODES
    // ========================================================================

    /// Free a finished node. A foreign pool that becomes empty goes back to
    /// the coordinator.
    pub(crate) fn free_node(&mut self, id: NodeId) {
        let shared = self.shared;
        let coordinator = &shared.coordinator;
        let Some(node) = coordinator.node(id) else { return };
        node.lock(&mut self.token).clear();
        let Some(pool) = coordinator.pool(id.pool) else { return };
        let now_empty = pool.release(id.slot);
        if now_empty && id.pool != ROOT_POOL && Some(id.pool) != self.pool {
            log::trace!("worker {} returns pool {}", self.id, id.pool);
            coordinator.release_pool(&mut self.token, id.pool);
        }
    }

    /// Claim the first move of a node this worker just created. Returns the
    /// node's changed-player flag if it has no work.
    fn claim_new(&mut self, id: NodeId) -> Result<(), bool> {
        let shared = self.shared;
        let coordinator = &shared.coordinator;
        let src = shared.move_source();
        let Some(node) = coordinator.node(id) else { return Err(false) };
        let aborted = coordinator.check_aborted(id);
        let mut guard = node.lock(&mut self.token);
        let Some(data) = guard.as_mut() else { return Err(false) };
        match data.get_work(aborted, &src) {
            Claim::Work { index, mv } => {
                self.current = Some(data.assignment(id, index, mv));
                Ok(())
            }
            Claim::Aborted => {
                self.stats.thread_aborts += 1;
                Err(data.changed_player)
            }
            Claim::Exhausted => Err(data.changed_player),
        }
    }

    // ========================================================================
    // WORK LOOP
    // ========================================================================

    /// Search until the iteration ends or the search is terminated.
    pub(crate) fn main_loop(&mut self) {
        let shared = self.shared;
        let coordinator = &shared.coordinator;
        self.pool = coordinator.acquire_pool(&mut self.token);
        if self.pool.is_none() {
            log::warn!("worker {} found no free node pool", self.id);
            self.current = None;
            return;
        }

        loop {
            if coordinator.is_terminated() {
                break;
            }
            if self.current.is_some() {
                self.work();
                continue;
            }
            let src = shared.move_source();
            match coordinator.get_public_work(&mut self.token, &src, &mut self.stats) {
                Some(work) => {
                    self.sync_distant(&work);
                    self.current = Some(work.assignment);
                }
                None => break,
            }
        }

        self.current = None;
        if let Some(pool) = self.pool.take() {
            coordinator.release_pool(&mut self.token, pool);
        }
        coordinator.add_stats(&mut self.token, &self.stats);
        self.stats.reset();
    }

    /// Search the current assignment, then propagate results up the tree
    /// for as long as this worker completes nodes.
    fn work(&mut self) {
        let Some(assignment) = self.current.take() else { return };
        let shared = self.shared;
        let coordinator = &shared.coordinator;

        let mut node_id = assignment.node;
        let mut move_idx = assignment.index;
        let mut mv = assignment.mv;
        let mut result = match m_search(self, &assignment) {
            Expansion::Eval(eval) => eval,
            Expansion::Child(child) => match self.claim_new(child) {
                Ok(()) => return,
                Err(changed) => {
                    self.free_node(child);
                    maybe_flip(LOSE - 1, changed)
                }
            },
        };

        loop {
            if coordinator.is_terminated() {
                return;
            }
            let Some(node) = coordinator.node(node_id) else { return };
            let aborted = coordinator.check_aborted(node_id);
            let src = shared.move_source();

            let mut guard = node.lock(&mut self.token);
            let Some(data) = guard.as_mut() else { return };
            let f_depth = data.f_depth;
            let child_pv = self.pv.get(f_depth + 1).map_or(&[][..], Vec::as_slice);
            let report = data.report_result(aborted, result, move_idx, mv, child_pv);
            if report == Report::BetaCut {
                self.stats.beta_cuts += 1;
            }
            if data.is_root() && !matches!(report, Report::Discarded | Report::BetaCut) {
                if report == Report::Improved {
                    log::debug!(
                        "root depth {} move {}/{} improved to {result} pv {:?}",
                        data.r_depth4 / DEPTH_DIV,
                        data.num_done,
                        data.num_moves(),
                        data.pv
                    );
                }
                shared
                    .clock
                    .update_desired_time(result, data.r_depth4 / DEPTH_DIV, data.num_done, data.num_moves());
            }

            let mut aborted = aborted || node.is_aborted();
            let cut_here = data.needs_abort(aborted);
            if cut_here {
                self.stats.aborted_branches += data.wasted_branches(move_idx) as u64;
                node.set_aborted();
                aborted = true;
            }

            match data.get_work(aborted, &src) {
                Claim::Work { index, mv } => {
                    self.current = Some(data.assignment(node_id, index, mv));
                    let publish = !node.is_public() && data.num_done >= 1;
                    let epoch = guard.epoch();
                    drop(guard);
                    if publish {
                        coordinator.publicize(&mut self.token, node_id, epoch);
                    }
                    return;
                }
                Claim::Aborted if !cut_here => self.stats.thread_aborts += 1,
                Claim::Aborted | Claim::Exhausted => {}
            }

            if !data.is_done(aborted) {
                let from_own = Some(node_id.pool) == self.pool;
                drop(guard);
                if from_own {
                    self.pool = coordinator.acquire_pool(&mut self.token);
                    log::trace!("worker {} disowned pool {}", self.id, node_id.pool);
                    if self.pool.is_none() {
                        log::warn!("worker {} found no free node pool", self.id);
                    }
                }
                return;
            }

            let is_root = data.is_root();
            let parent = data.parent;
            let parent_move_index = data.parent_move_index;
            let parent_move = data.parent_move;
            let changed = data.changed_player;
            drop(guard);
            coordinator.depublicize(&mut self.token, node_id);

            if is_root {
                coordinator.end_iteration_internal(&mut self.token);
                return;
            }

            let mut next_result = match m_search_done(self, node_id) {
                Expansion::Eval(eval) => eval,
                Expansion::Child(research) => match self.claim_new(research) {
                    Ok(()) => {
                        self.free_node(node_id);
                        return;
                    }
                    Err(_) => {
                        self.free_node(research);
                        LOSE - 1
                    }
                },
            };
            next_result = maybe_flip(next_result, changed);

            self.free_node(node_id);
            let Some(parent) = parent else { return };
            result = next_result;
            move_idx = parent_move_index;
            mv = parent_move;
            node_id = parent;
        }
    }

    /// Helper thread body: run iterations until the search is finished.
    pub(crate) fn run_helper(&mut self) {
        let shared = self.shared;
        while shared.coordinator.wait_for_iteration(&mut self.token) {
            self.main_loop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eval_noise_is_bounded_and_deterministic() {
        for hash in [0u64, 1, 0xDEAD_BEEF, u64::MAX] {
            let a = eval_noise(hash, 7, 5);
            assert_eq!(a, eval_noise(hash, 7, 5));
            assert!((-15..=15).contains(&a));
        }
    }

    #[test]
    fn test_eval_noise_depends_on_seed() {
        let differs = (0..64u64).any(|h| eval_noise(h, 1, 20) != eval_noise(h, 2, 20));
        assert!(differs);
    }
}
