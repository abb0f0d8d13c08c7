//! Search nodes: the unit of work shared between workers.
//!
//! A node holds everything needed to resume searching a position from any
//! thread: bounds, the lazily generated move list, claim and completion
//! counters, the best result so far and its principal variation. All of
//! that lives behind the node's own lock. The abort and publication flags
//! and the parent link are atomics so that they can be read without it.

use std::marker::PhantomData;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::{Mutex, MutexGuard};

use crate::eval::{Bound, Eval, LOSE};
use crate::game::{MoveScorer, Position};
use crate::moves::Move;
use crate::sync::LockToken;

use super::constants::{HASH_SCORE, KILLER_SCORE, MOVEWEIGHTS_SCALE, PV_ARRAY_SIZE};
use super::ordering::{select_best, HistoryTable};

/// Location of a node: pool index and slot within the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct NodeId {
    pub pool: u32,
    pub slot: u32,
}

const NO_NODE: u64 = u64::MAX;

impl NodeId {
    #[inline]
    fn pack(id: Option<NodeId>) -> u64 {
        id.map_or(NO_NODE, |id| (u64::from(id.pool) << 32) | u64::from(id.slot))
    }

    #[inline]
    fn unpack(bits: u64) -> Option<NodeId> {
        if bits == NO_NODE {
            return None;
        }
        Some(NodeId {
            pool: (bits >> 32) as u32,
            slot: bits as u32,
        })
    }
}

/// Expected node type, used by move ordering heuristics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum NodeType {
    Root,
    Pv,
    Cut,
    All,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SearchMode {
    /// Full-window search; the result is final.
    Normal,
    /// Null-window search at reduced depth; may need a re-search.
    Reduced,
}

/// Move-index cutoffs for reductions and pruning. Moves at or beyond a
/// threshold get the corresponding treatment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Thresholds {
    pub pvs: usize,
    pub r1: usize,
    pub r2: usize,
    pub prune: usize,
}

impl Thresholds {
    pub(crate) const NONE: Thresholds = Thresholds {
        pvs: usize::MAX,
        r1: usize::MAX,
        r2: usize::MAX,
        prune: usize::MAX,
    };

    pub(crate) fn reduction(&self, idx: usize) -> MoveReduction {
        if idx >= self.prune {
            MoveReduction::Pruned
        } else if idx >= self.r2 {
            MoveReduction::Reduced(2)
        } else if idx >= self.r1 {
            MoveReduction::Reduced(1)
        } else if idx >= self.pvs {
            MoveReduction::Reduced(0)
        } else {
            MoveReduction::Full
        }
    }
}

/// How a claimed move should be searched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MoveReduction {
    Pruned,
    /// Null window, reduced by this many steps
    Reduced(i32),
    Full,
}

/// Sources of in-tree move ordering.
pub(crate) struct MoveSource<'a, P> {
    pub history: &'a HistoryTable,
    pub scorer: Option<&'a dyn MoveScorer<P>>,
}

/// Link from a new node to the node it was expanded from.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ParentLink {
    pub id: NodeId,
    pub node_type: NodeType,
    pub move_index: usize,
}

/// Everything needed to initialize a node.
pub(crate) struct NodeInit<P> {
    pub pos: P,
    pub parent: Option<ParentLink>,
    pub parent_move: Move,
    pub move_history: Vec<Move>,
    pub mode: SearchMode,
    pub changed_player: bool,
    pub f_depth: usize,
    pub c_depth: i32,
    pub r_depth4: i32,
    pub alpha: Eval,
    pub beta: Eval,
    pub hash_move: Move,
    pub killer_move: Move,
    pub copy_killers_from: Option<usize>,
}

/// Outcome of asking a node for work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Claim {
    Work { index: usize, mv: Move },
    /// Aborted or already cut off
    Aborted,
    Exhausted,
}

/// Outcome of reporting a move's result to a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Report {
    /// The node is aborted or cut; the result was discarded
    Discarded,
    BetaCut,
    Improved,
    Unchanged,
}

/// A claimed move together with the node data the search needs.
#[derive(Debug, Clone)]
pub(crate) struct Assignment<P> {
    pub node: NodeId,
    pub index: usize,
    pub mv: Move,
    pub pos: P,
    pub node_type: NodeType,
    pub f_depth: usize,
    pub c_depth: i32,
    pub r_depth4: i32,
    pub alpha: Eval,
    pub beta: Eval,
    pub reduction: MoveReduction,
    /// Hash or killer move, which may be illegal here
    pub speculative: bool,
}

/// State of an initialized node.
#[derive(Debug)]
pub(crate) struct NodeData<P> {
    pub pos: P,
    pub parent: Option<NodeId>,
    pub parent_move_index: usize,
    pub parent_move: Move,
    pub move_history: Vec<Move>,
    pub mode: SearchMode,
    pub node_type: NodeType,
    pub changed_player: bool,
    pub f_depth: usize,
    pub c_depth: i32,
    pub r_depth4: i32,
    pub alpha: Eval,
    pub beta: Eval,
    pub best_eval: Eval,
    pub best_move: Move,
    pub best_flag: Bound,
    pub best_index: Option<usize>,
    pub moves: Vec<Move>,
    pub scores: Vec<i32>,
    moves_ungenerated: bool,
    num_special: usize,
    pub num_started: usize,
    pub num_done: usize,
    pub thresholds: Thresholds,
    pub pv: Vec<Move>,
    pub copy_killers_from: Option<usize>,
}

impl<P: Position> NodeData<P> {
    pub(crate) fn new(init: NodeInit<P>) -> Self {
        let node_type = match init.parent {
            None => NodeType::Root,
            Some(p) if p.move_index == 0 && matches!(p.node_type, NodeType::Root | NodeType::Pv) => NodeType::Pv,
            Some(p) if p.node_type != NodeType::All => NodeType::All,
            Some(_) => NodeType::Cut,
        };

        let mut moves = Vec::new();
        let mut scores = Vec::new();
        if !init.hash_move.is_none() {
            moves.push(init.hash_move);
            scores.push(HASH_SCORE);
        }
        if !init.killer_move.is_none() && init.killer_move != init.hash_move {
            moves.push(init.killer_move);
            scores.push(KILLER_SCORE);
        }
        let num_special = moves.len();

        NodeData {
            pos: init.pos,
            parent: init.parent.map(|p| p.id),
            parent_move_index: init.parent.map_or(0, |p| p.move_index),
            parent_move: init.parent_move,
            move_history: init.move_history,
            mode: init.mode,
            node_type,
            changed_player: init.changed_player,
            f_depth: init.f_depth,
            c_depth: init.c_depth,
            r_depth4: init.r_depth4,
            alpha: init.alpha,
            beta: init.beta,
            best_eval: LOSE - 1,
            best_move: Move::NONE,
            best_flag: Bound::Alpha,
            best_index: None,
            moves,
            scores,
            moves_ungenerated: true,
            num_special,
            num_started: 0,
            num_done: 0,
            thresholds: Thresholds::NONE,
            pv: Vec::new(),
            copy_killers_from: init.copy_killers_from,
        }
    }

    #[inline]
    pub(crate) fn num_moves(&self) -> usize {
        self.moves.len()
    }

    #[inline]
    pub(crate) fn is_root(&self) -> bool {
        self.node_type == NodeType::Root
    }

    /// Install the ordered root move list.
    pub(crate) fn set_root_moves(&mut self, moves: &[Move], thresholds: Thresholds) {
        self.moves.clear();
        self.moves.extend_from_slice(moves);
        self.scores.clear();
        self.scores.resize(moves.len(), LOSE - 1);
        self.thresholds = thresholds;
        self.moves_ungenerated = false;
        self.num_special = 0;
    }

    /// Generate the remaining moves behind the hash and killer moves.
    pub(crate) fn add_msearch_moves(&mut self, src: &MoveSource<'_, P>) {
        self.moves_ungenerated = false;
        let num_special = self.moves.len();

        let mut generated = Vec::new();
        self.pos.generate_moves(&mut generated);
        if self.pos.step() != 0 && self.pos.position_changed() {
            generated.push(Move::PASS);
        }

        let mut gen_scores = vec![0; generated.len()];
        src.history.add_scores(self.c_depth, &generated, &mut gen_scores);
        match src.scorer {
            Some(scorer) => {
                for (mv, s) in generated.iter().zip(gen_scores.iter_mut()) {
                    *s += (MOVEWEIGHTS_SCALE * scorer.score(&self.pos, *mv)) as i32;
                }
            }
            None => {
                for (mv, s) in generated.iter().zip(gen_scores.iter_mut()) {
                    *s += mv.num_steps() as i32;
                }
            }
        }

        for (mv, s) in generated.into_iter().zip(gen_scores) {
            if self.moves[..num_special].contains(&mv) {
                continue;
            }
            self.moves.push(mv);
            self.scores.push(s);
        }
        self.thresholds = Thresholds::NONE;
    }

    /// Claim the next move. `aborted` is the result of the abort check
    /// along the parent chain.
    pub(crate) fn get_work(&mut self, aborted: bool, src: &MoveSource<'_, P>) -> Claim {
        if aborted || self.best_flag == Bound::Beta {
            return Claim::Aborted;
        }
        let idx = self.num_started;
        if idx >= self.num_moves() && self.moves_ungenerated {
            self.add_msearch_moves(src);
        }
        if idx >= self.num_moves() {
            return Claim::Exhausted;
        }
        if !self.is_root() {
            select_best(&mut self.moves, &mut self.scores, idx);
        }
        self.num_started += 1;
        Claim::Work {
            index: idx,
            mv: self.moves[idx],
        }
    }

    /// Snapshot of this node for searching the claimed move.
    pub(crate) fn assignment(&self, node: NodeId, index: usize, mv: Move) -> Assignment<P> {
        Assignment {
            node,
            index,
            mv,
            pos: self.pos.clone(),
            node_type: self.node_type,
            f_depth: self.f_depth,
            c_depth: self.c_depth,
            r_depth4: self.r_depth4,
            alpha: self.alpha,
            beta: self.beta,
            reduction: self.thresholds.reduction(index),
            speculative: index < self.num_special,
        }
    }

    /// Record the result of move `idx`. Bounds only ever tighten and the
    /// flag only moves from alpha to exact to beta.
    pub(crate) fn report_result(&mut self, aborted: bool, eval: Eval, idx: usize, mv: Move, child_pv: &[Move]) -> Report {
        self.num_done += 1;
        if aborted || self.best_flag == Bound::Beta {
            return Report::Discarded;
        }

        if eval >= self.beta {
            self.best_move = mv;
            self.best_eval = eval;
            self.best_flag = Bound::Beta;
            self.best_index = Some(idx);
            copy_extend_pv(&mut self.pv, mv, child_pv);
            return Report::BetaCut;
        }

        if eval > self.best_eval {
            self.best_move = mv;
            self.best_eval = eval;
            self.best_index = Some(idx);
            if eval > self.alpha {
                self.alpha = eval;
                self.best_flag = Bound::Exact;
                copy_extend_pv(&mut self.pv, mv, child_pv);
                if self.is_root() {
                    if let Some(s) = self.scores.get_mut(idx) {
                        *s = eval;
                    }
                }
                return Report::Improved;
            }
        }
        Report::Unchanged
    }

    /// Every claimed move has reported, and either all moves were searched
    /// or the node was aborted.
    pub(crate) fn is_done(&self, aborted: bool) -> bool {
        self.num_started == self.num_done && (self.num_done == self.num_moves() || aborted)
    }

    pub(crate) fn needs_abort(&self, already_aborted: bool) -> bool {
        !already_aborted && self.best_flag == Bound::Beta
    }

    /// Moves started from `cut_index` on, counting the one that cut.
    pub(crate) fn wasted_branches(&self, cut_index: usize) -> usize {
        self.num_started.saturating_sub(cut_index)
    }
}

/// Replace `pv` by `mv` followed by `child`.
pub(crate) fn copy_extend_pv(pv: &mut Vec<Move>, mv: Move, child: &[Move]) {
    pv.clear();
    pv.push(mv);
    let room = PV_ARRAY_SIZE - 1;
    pv.extend(child.iter().take(room));
}

// ============================================================================
// NODE
// ============================================================================

/// A node slot inside a pool.
pub(crate) struct SearchNode<P> {
    id: NodeId,
    aborted: AtomicBool,
    public: AtomicBool,
    parent: AtomicU64,
    /// Bumped on every initialization, so stale references can be detected
    epoch: AtomicU64,
    data: Mutex<Option<NodeData<P>>>,
}

/// Lock on a node's data. Holding it keeps the worker's [`LockToken`] borrowed.
pub(crate) struct NodeGuard<'a, 't, P> {
    inner: MutexGuard<'a, Option<NodeData<P>>>,
    node: &'a SearchNode<P>,
    _token: PhantomData<&'t mut LockToken>,
}

impl<P> Deref for NodeGuard<'_, '_, P> {
    type Target = Option<NodeData<P>>;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl<P> DerefMut for NodeGuard<'_, '_, P> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.inner
    }
}

impl<P> NodeGuard<'_, '_, P> {
    /// Initialize the node, replacing whatever it held.
    pub(crate) fn install(&mut self, data: NodeData<P>) {
        self.node.parent.store(NodeId::pack(data.parent), Ordering::Release);
        self.node.aborted.store(false, Ordering::Release);
        self.node.epoch.fetch_add(1, Ordering::AcqRel);
        *self.inner = Some(data);
    }

    /// Return the node to the uninitialized state.
    pub(crate) fn clear(&mut self) -> Option<NodeData<P>> {
        self.node.parent.store(NO_NODE, Ordering::Release);
        self.node.aborted.store(false, Ordering::Release);
        self.inner.take()
    }

    #[inline]
    pub(crate) fn epoch(&self) -> u64 {
        self.node.epoch.load(Ordering::Acquire)
    }
}

impl<P> SearchNode<P> {
    pub(crate) fn new(id: NodeId) -> Self {
        SearchNode {
            id,
            aborted: AtomicBool::new(false),
            public: AtomicBool::new(false),
            parent: AtomicU64::new(NO_NODE),
            epoch: AtomicU64::new(0),
            data: Mutex::new(None),
        }
    }

    #[inline]
    pub(crate) fn id(&self) -> NodeId {
        self.id
    }

    pub(crate) fn lock<'a, 't>(&'a self, _token: &'t mut LockToken) -> NodeGuard<'a, 't, P> {
        NodeGuard {
            inner: self.data.lock(),
            node: self,
            _token: PhantomData,
        }
    }

    #[inline]
    pub(crate) fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::Acquire)
    }

    /// Abort flags only ever go from false to true while a node is live.
    #[inline]
    pub(crate) fn set_aborted(&self) {
        self.aborted.store(true, Ordering::Release);
    }

    #[inline]
    pub(crate) fn parent(&self) -> Option<NodeId> {
        NodeId::unpack(self.parent.load(Ordering::Acquire))
    }

    #[inline]
    pub(crate) fn is_public(&self) -> bool {
        self.public.load(Ordering::Acquire)
    }

    /// Only called with the coordinator lock held.
    #[inline]
    pub(crate) fn set_public(&self, public: bool) {
        self.public.store(public, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample::RaceBoard;

    fn root_init(pos: RaceBoard) -> NodeInit<RaceBoard> {
        NodeInit {
            pos,
            parent: None,
            parent_move: Move::NONE,
            move_history: Vec::new(),
            mode: SearchMode::Normal,
            changed_player: true,
            f_depth: 0,
            c_depth: 0,
            r_depth4: 16,
            alpha: LOSE - 1,
            beta: 1000,
            hash_move: Move::NONE,
            killer_move: Move::NONE,
            copy_killers_from: Some(0),
        }
    }

    fn child_init(pos: RaceBoard, parent_type: NodeType, move_index: usize) -> NodeInit<RaceBoard> {
        NodeInit {
            parent: Some(ParentLink {
                id: NodeId { pool: 1, slot: 0 },
                node_type: parent_type,
                move_index,
            }),
            f_depth: 1,
            ..root_init(pos)
        }
    }

    fn source(history: &HistoryTable) -> MoveSource<'_, RaceBoard> {
        MoveSource {
            history,
            scorer: None,
        }
    }

    #[test]
    fn test_node_id_packing() {
        let id = NodeId { pool: 7, slot: 3 };
        assert_eq!(NodeId::unpack(NodeId::pack(Some(id))), Some(id));
        assert_eq!(NodeId::unpack(NodeId::pack(None)), None);
    }

    #[test]
    fn test_node_types() {
        let pos = RaceBoard::start();
        assert_eq!(NodeData::new(root_init(pos.clone())).node_type, NodeType::Root);
        assert_eq!(NodeData::new(child_init(pos.clone(), NodeType::Root, 0)).node_type, NodeType::Pv);
        assert_eq!(NodeData::new(child_init(pos.clone(), NodeType::Pv, 1)).node_type, NodeType::All);
        assert_eq!(NodeData::new(child_init(pos.clone(), NodeType::Cut, 0)).node_type, NodeType::All);
        assert_eq!(NodeData::new(child_init(pos, NodeType::All, 0)).node_type, NodeType::Cut);
    }

    #[test]
    fn test_special_moves_come_first_and_are_not_repeated() {
        let pos = RaceBoard::start();
        let mut all = Vec::new();
        pos.generate_moves(&mut all);
        assert!(all.len() >= 2);

        let mut init = child_init(pos, NodeType::Pv, 0);
        init.hash_move = all[1];
        init.killer_move = all[0];
        let mut node = NodeData::new(init);
        assert_eq!(node.num_moves(), 2);

        let history = HistoryTable::new();
        let src = source(&history);
        let mut claimed = Vec::new();
        while let Claim::Work { mv, .. } = node.get_work(false, &src) {
            claimed.push(mv);
        }
        assert_eq!(claimed[0], all[1]);
        assert_eq!(claimed[1], all[0]);
        assert_eq!(claimed.len(), all.len());
        assert_eq!(node.num_started, all.len());
    }

    #[test]
    fn test_report_result_bounds_and_flags() {
        let mut node = NodeData::new(root_init(RaceBoard::start()));
        node.set_root_moves(&[Move(2), Move(3), Move(4)], Thresholds::NONE);
        let history = HistoryTable::new();
        let src = source(&history);
        for _ in 0..3 {
            assert!(matches!(node.get_work(false, &src), Claim::Work { .. }));
        }

        assert_eq!(node.report_result(false, -50, 0, Move(2), &[]), Report::Improved);
        assert_eq!(node.alpha, -50);
        assert_eq!(node.best_flag, Bound::Exact);
        assert_eq!(node.scores[0], -50);

        assert_eq!(node.report_result(false, -80, 1, Move(3), &[]), Report::Unchanged);
        assert_eq!(node.alpha, -50);
        assert!(!node.is_done(false));

        assert_eq!(node.report_result(false, 2000, 2, Move(4), &[Move(9)]), Report::BetaCut);
        assert_eq!(node.best_flag, Bound::Beta);
        assert_eq!(node.pv, vec![Move(4), Move(9)]);
        assert!(node.needs_abort(false));
        assert!(node.is_done(false));
    }

    #[test]
    fn test_wasted_branches_count_from_the_cutting_move() {
        let mut node = NodeData::new(root_init(RaceBoard::start()));
        node.set_root_moves(&[Move(2), Move(3), Move(4), Move(5)], Thresholds::NONE);
        let history = HistoryTable::new();
        let src = source(&history);
        for _ in 0..4 {
            assert!(matches!(node.get_work(false, &src), Claim::Work { .. }));
        }

        // Move 1 cuts while moves 0 and 3 are still running.
        assert_eq!(node.report_result(false, -20, 2, Move(4), &[]), Report::Improved);
        assert_eq!(node.report_result(false, 2000, 1, Move(3), &[]), Report::BetaCut);
        assert!(node.needs_abort(false));
        assert_eq!(node.wasted_branches(1), 3);
        assert_eq!(node.wasted_branches(4), 0);
    }

    #[test]
    fn test_results_after_beta_are_discarded() {
        let mut node = NodeData::new(root_init(RaceBoard::start()));
        node.set_root_moves(&[Move(2), Move(3), Move(4)], Thresholds::NONE);
        let history = HistoryTable::new();
        let src = source(&history);
        for _ in 0..3 {
            let _ = node.get_work(false, &src);
        }
        node.report_result(false, 5000, 1, Move(3), &[]);
        let before = (node.best_eval, node.best_move, node.best_flag, node.pv.clone());

        assert_eq!(node.report_result(false, 9000, 2, Move(4), &[]), Report::Discarded);
        assert_eq!(node.report_result(true, 9000, 0, Move(2), &[]), Report::Discarded);
        assert_eq!((node.best_eval, node.best_move, node.best_flag, node.pv.clone()), before);
        assert_eq!(node.get_work(false, &src), Claim::Aborted);
        assert!(node.is_done(true));
    }

    #[test]
    fn test_aborted_node_waits_for_claimed_moves() {
        let mut node = NodeData::new(root_init(RaceBoard::start()));
        node.set_root_moves(&[Move(2), Move(3), Move(4)], Thresholds::NONE);
        let history = HistoryTable::new();
        let src = source(&history);
        let _ = node.get_work(false, &src);
        let _ = node.get_work(false, &src);
        node.report_result(false, 10, 0, Move(2), &[]);
        assert!(!node.is_done(true));
        node.report_result(true, 10, 1, Move(3), &[]);
        assert!(node.is_done(true));
        assert!(!node.is_done(false));
    }

    #[test]
    fn test_thresholds() {
        let t = Thresholds {
            pvs: 2,
            r1: 4,
            r2: 6,
            prune: 8,
        };
        assert_eq!(t.reduction(0), MoveReduction::Full);
        assert_eq!(t.reduction(2), MoveReduction::Reduced(0));
        assert_eq!(t.reduction(5), MoveReduction::Reduced(1));
        assert_eq!(t.reduction(7), MoveReduction::Reduced(2));
        assert_eq!(t.reduction(8), MoveReduction::Pruned);
        assert_eq!(Thresholds::NONE.reduction(1000), MoveReduction::Full);
    }

    #[test]
    fn test_copy_extend_pv_is_bounded() {
        let mut pv = Vec::new();
        let child = vec![Move(5); PV_ARRAY_SIZE * 2];
        copy_extend_pv(&mut pv, Move(2), &child);
        assert_eq!(pv.len(), PV_ARRAY_SIZE);
        assert_eq!(pv[0], Move(2));
    }
}
