//! Root of the search: full-turn move enumeration, root ordering and
//! pruning, and the iterative-deepening loop.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::eval::{is_trustworthy_terminal, Eval, DEPTH_DIV, LOSE, WIN};
use crate::game::{check_game_end, GameHistory, MoveScorer, Position, TerminalSolver};
use crate::moves::Move;
use crate::tt::ExistsHashTable;

use super::constants::{
    PVS_MIN, PVS_PROP, QDEPTH_EVAL, QDEPTH_START, ROOT_PRUNE_MAX_DEPTH, ROOT_R1_PROP, ROOT_R2_PROP, TIME_PREV_FACTOR,
};
use super::node::{Claim, NodeData, NodeInit, SearchMode, Thresholds};
use super::ordering::insertion_sort;
use super::params::{RootPrune, SearchParams};
use super::quiescence::{q_search, QState};
use super::stats::SearchStats;
use super::worker::Worker;

// ============================================================================
// ROOT MOVES
// ============================================================================

/// Every distinct way to spend up to `max_steps` steps of the current turn.
///
/// Step orders reaching the same position are generated once. With
/// `solver`, an immediately winning turn is returned alone.
pub(crate) fn gen_full_moves<P: Position>(
    pos: &P,
    history: &GameHistory<P>,
    max_steps: i32,
    solver: Option<&dyn TerminalSolver<P>>,
    exists: &mut ExistsHashTable,
) -> Vec<Move> {
    if let Some(winning) = solver.and_then(|s| s.winning_full_move(pos)) {
        return vec![winning];
    }
    exists.clear();
    let mut out = Vec::new();
    let mut gen = FullMoveGen {
        root_hash: pos.position_hash(),
        history,
        exists,
        out: &mut out,
    };
    gen.expand(pos, Move::NONE, 0, max_steps);
    out
}

struct FullMoveGen<'a, P> {
    root_hash: u64,
    history: &'a GameHistory<P>,
    exists: &'a mut ExistsHashTable,
    out: &'a mut Vec<Move>,
}

impl<P: Position> FullMoveGen<'_, P> {
    fn expand(&mut self, pos: &P, so_far: Move, ns_so_far: usize, max_steps: i32) {
        if ns_so_far > 0 && pos.position_hash() == self.root_hash {
            return;
        }
        let hash = pos.situation_hash();
        if self.exists.contains(hash) {
            return;
        }
        self.exists.record(hash);

        let turn_over = ns_so_far > 0 && pos.step() == 0;
        let game_over = pos.step() != 0 && check_game_end(pos, self.history, ns_so_far as i32).is_some();
        if max_steps <= 0 || turn_over || game_over {
            self.out.push(so_far);
            return;
        }

        let mut moves = Vec::new();
        pos.generate_moves(&mut moves);
        if pos.step() != 0 {
            moves.push(Move::PASS);
        }
        for mv in moves {
            let mut next = pos.clone();
            if !next.apply_move(mv) {
                // Passing without having changed anything is not a move.
                if mv != Move::PASS {
                    log::warn!("generated illegal move {mv} at turn {} step {}", pos.turn_number(), pos.step());
                }
                continue;
            }
            let ns = mv.num_steps();
            self.expand(&next, so_far.concat(mv, ns_so_far), ns_so_far + ns, max_steps - ns as i32);
        }
    }
}

/// Root move list with the ordering values of the last iteration.
pub(crate) struct RootMoves {
    pub moves: Vec<Move>,
    pub scores: Vec<i32>,
}

impl RootMoves {
    /// Generate and order the root moves: optionally shuffled, then stably
    /// sorted by the move scorer when it is used for ordering.
    pub(crate) fn generate<P: Position>(
        pos: &P,
        history: &GameHistory<P>,
        max_steps: i32,
        params: &SearchParams,
        solver: Option<&dyn TerminalSolver<P>>,
        scorer: Option<&dyn MoveScorer<P>>,
        exists: &mut ExistsHashTable,
    ) -> Self {
        let solver = solver.filter(|_| params.goal_tree);
        let mut moves = gen_full_moves(pos, history, max_steps, solver, exists);
        if params.randomize {
            let mut rng = StdRng::seed_from_u64(params.rand_seed);
            moves.shuffle(&mut rng);
        }
        if let Some(scorer) = scorer.filter(|_| !params.prune_unscored) {
            let mut rated: Vec<(Move, f64)> = moves.iter().map(|&mv| (mv, scorer.score(pos, mv))).collect();
            rated.sort_by(|a, b| b.1.total_cmp(&a.1));
            moves = rated.into_iter().map(|(mv, _)| mv).collect();
        }
        let scores = vec![LOSE - 1; moves.len()];
        RootMoves { moves, scores }
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.moves.len()
    }

    #[inline]
    pub(crate) fn is_empty(&self) -> bool {
        self.moves.is_empty()
    }
}

/// Move-index thresholds for reducing and pruning root moves.
pub(crate) fn root_thresholds(params: &SearchParams, has_scorer: bool, n: usize, r_depth4: i32) -> Thresholds {
    let mut t = Thresholds {
        pvs: n,
        r1: n,
        r2: n,
        prune: n,
    };
    if params.pvs {
        t.pvs = (PVS_PROP * n as f64) as usize + PVS_MIN;
    }
    if !has_scorer && !params.prune_unscored {
        return t;
    }
    let min = params.root_min_dont_prune;
    match params.root_prune {
        RootPrune::Off => {}
        RootPrune::Fancy => {
            let d = (r_depth4 / DEPTH_DIV).clamp(0, ROOT_PRUNE_MAX_DEPTH as i32) as usize;
            t.r1 = (ROOT_R1_PROP[d] * n as f64) as usize + min;
            t.r2 = (ROOT_R2_PROP[d] * n as f64) as usize + min;
        }
        RootPrune::Fixed { keep_prop, soft: true } => {
            t.r1 = (keep_prop * n.saturating_sub(min) as f64) as usize + min;
        }
        RootPrune::Fixed { keep_prop, soft: false } => {
            t.prune = (keep_prop * n.saturating_sub(10) as f64) as usize + min;
        }
    }
    t
}

// ============================================================================
// ITERATIONS
// ============================================================================

/// Best result accepted so far.
#[derive(Debug, Clone)]
pub(crate) struct RootOutcome {
    pub eval: Eval,
    pub pv: Vec<Move>,
    /// Completed depth in steps, fractional for a partial iteration
    pub depth: f64,
    pub stats: SearchStats,
}

impl RootOutcome {
    pub(crate) fn game_over(eval: Eval) -> Self {
        RootOutcome {
            eval,
            pv: Vec::new(),
            depth: 0.0,
            stats: SearchStats::default(),
        }
    }
}

struct Iteration {
    done: usize,
    total: usize,
    eval: Eval,
    pv: Vec<Move>,
}

/// Search every root move to `r_depth4` with all workers.
fn fsearch<P: Position>(master: &mut Worker<'_, '_, P>, root: &P, root_moves: &mut RootMoves, r_depth4: i32) -> Option<Iteration> {
    let shared = master.shared;
    let coordinator = &shared.coordinator;
    root_moves.scores.fill(LOSE - 1);

    let Some(id) = coordinator.acquire_root() else {
        log::warn!("no free root node");
        return None;
    };
    let node = coordinator.node(id)?;
    let thresholds = root_thresholds(shared.params, shared.scorer.is_some(), root_moves.len(), r_depth4);
    let init = NodeInit {
        pos: root.clone(),
        parent: None,
        parent_move: master.history.turn_move(root.turn_number()),
        move_history: master.path_from_root(root),
        mode: SearchMode::Normal,
        changed_player: root.step() == 0,
        f_depth: 0,
        c_depth: 0,
        r_depth4,
        alpha: LOSE - 1,
        beta: WIN - 1,
        hash_move: Move::NONE,
        killer_move: Move::NONE,
        copy_killers_from: Some(master.id),
    };

    let src = shared.move_source();
    let first = {
        let mut guard = node.lock(&mut master.token);
        guard.install(NodeData::new(init));
        guard.as_mut().and_then(|data| {
            data.set_root_moves(&root_moves.moves, thresholds);
            match data.get_work(false, &src) {
                Claim::Work { index, mv } => Some(data.assignment(id, index, mv)),
                Claim::Aborted | Claim::Exhausted => None,
            }
        })
    };
    if let Some(assignment) = first {
        master.set_assignment(assignment);
        coordinator.begin_iteration(&mut master.token);
        master.main_loop();
        coordinator.end_iteration(&mut master.token);
    }

    coordinator.depublicize(&mut master.token, id);
    let data = node.lock(&mut master.token).clear();
    master.free_node(id);
    let data = data?;

    let total = data.num_moves();
    shared.clock.set_base_eval(data.best_eval);
    shared.clock.update_desired_time(data.best_eval, r_depth4 / DEPTH_DIV + 1, 0, total);

    if data.num_done == total {
        root_moves.scores.copy_from_slice(&data.scores[..total]);
        insertion_sort(&mut root_moves.moves, &mut root_moves.scores);
    }
    Some(Iteration {
        done: data.num_done,
        total,
        eval: data.best_eval,
        pv: data.pv,
    })
}

/// Run one iteration and adopt its result if it is usable. Returns true if
/// the result was adopted.
fn run_iteration<P: Position>(
    master: &mut Worker<'_, '_, P>,
    root: &P,
    root_moves: &mut RootMoves,
    depth: i32,
    best: &mut RootOutcome,
    on_iteration: &mut dyn FnMut(&RootOutcome),
) -> bool {
    let shared = master.shared;
    let Some(it) = fsearch(master, root, root_moves, depth * DEPTH_DIV) else {
        return false;
    };
    if it.done == 0 || (it.done < it.total && !shared.params.allow_partial_search) {
        return false;
    }
    best.eval = it.eval;
    best.pv = it.pv;
    best.depth = f64::from(depth - 1) + it.done as f64 / it.total as f64;
    best.stats = shared.coordinator.stats(&mut master.token);
    best.stats.depth = best.depth;
    best.stats.time_taken = shared.clock.elapsed();
    log::debug!(
        "depth {:.2} eval {} time {:.2}/{:.2} pv {:?}",
        best.depth,
        best.eval,
        best.stats.time_taken,
        shared.clock.desired(),
        best.pv
    );
    on_iteration(best);
    true
}

/// Iterative deepening to `depth` steps. The first iteration always
/// completes; later ones stop on timeout, a trusted terminal eval, or when
/// the next iteration is not expected to finish.
pub(crate) fn iterative_deepening<P: Position>(
    master: &mut Worker<'_, '_, P>,
    root: &P,
    depth: i32,
    exists: &mut ExistsHashTable,
    on_iteration: &mut dyn FnMut(&RootOutcome),
) -> RootOutcome {
    let shared = master.shared;
    let step = root.step();
    let start_depth = depth.min(4 - i32::from(step));
    let mut root_moves = RootMoves::generate(
        root,
        &master.history,
        start_depth,
        shared.params,
        shared.solver,
        shared.scorer,
        exists,
    );
    let mut best = RootOutcome::game_over(LOSE - 1);
    if root_moves.is_empty() {
        log::warn!("no legal moves at the root");
        best.eval = LOSE;
        return best;
    }

    shared.clock.set_interruptible(false);
    run_iteration(master, root, &mut root_moves, start_depth, &mut best, on_iteration);
    shared.clock.set_interruptible(true);
    if is_trustworthy_terminal(best.eval, step, 0, start_depth * DEPTH_DIV) {
        return best;
    }

    for d in start_depth + 1..=depth {
        shared.history.decay();
        run_iteration(master, root, &mut root_moves, d, &mut best, on_iteration);

        if shared.coordinator.did_timeout(&mut master.token) {
            break;
        }
        if is_trustworthy_terminal(best.eval, step, 0, d * DEPTH_DIV) {
            break;
        }
        let used = shared.clock.elapsed();
        if shared.params.stop_early && shared.clock.desired() - used < used * TIME_PREV_FACTOR {
            break;
        }
    }
    best
}

/// Quiescence search of the root itself, for depths of zero or below.
pub(crate) fn direct_q_search<P: Position>(master: &mut Worker<'_, '_, P>, root: &P, depth: i32) -> RootOutcome {
    let shared = master.shared;
    let start = QDEPTH_START[usize::from(root.step())];
    let q_depth = usize::try_from(-depth).map_or(start, |d| d.max(start)).min(QDEPTH_EVAL);

    shared.clock.set_interruptible(false);
    let eval = q_search(master, root, 0, 0, q_depth, LOSE - 1, WIN - 1, QState::MainLeaf);
    shared.clock.set_interruptible(true);

    let pv = master.pv(0).to_vec();
    shared.coordinator.add_stats(&mut master.token, &master.stats);
    master.stats.reset();
    let depth = -(q_depth as f64);
    let mut stats = shared.coordinator.stats(&mut master.token);
    stats.depth = depth;
    stats.time_taken = shared.clock.elapsed();
    RootOutcome { eval, pv, depth, stats }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample::RaceBoard;

    #[test]
    fn test_full_moves_are_distinct_and_bounded() {
        let board = RaceBoard::start();
        let history = GameHistory::new(&board);
        let mut exists = ExistsHashTable::new(12).unwrap();

        let one = gen_full_moves(&board, &history, 1, None, &mut exists);
        let mut single = Vec::new();
        board.generate_moves(&mut single);
        assert_eq!(one.len(), single.len());

        let two = gen_full_moves(&board, &history, 2, None, &mut exists);
        assert!(two.len() > one.len());
        let mut finals: Vec<u64> = two
            .iter()
            .map(|&mv| {
                let mut b = board.clone();
                assert!(b.apply_move(mv));
                b.situation_hash()
            })
            .collect();
        finals.sort_unstable();
        finals.dedup();
        assert_eq!(finals.len(), two.len());
        assert!(two.iter().all(|mv| mv.num_steps() <= 2));
    }

    #[test]
    fn test_thresholds() {
        let params = SearchParams::default();
        assert_eq!(root_thresholds(&params, false, 30, 16).r1, 30);

        let pvs = SearchParams::default().with_pvs(true);
        assert_eq!(root_thresholds(&pvs, false, 100, 16).pvs, 10);

        let fixed = SearchParams::default()
            .with_prune_unscored(true)
            .with_root_prune(RootPrune::Fixed {
                keep_prop: 0.5,
                soft: false,
            });
        let t = root_thresholds(&fixed, false, 50, 16);
        assert_eq!(t.prune, 30);
        assert_eq!(t.r1, 50);

        let fancy = SearchParams::default().with_root_prune(RootPrune::Fancy);
        let t = root_thresholds(&fancy, true, 100, 8 * DEPTH_DIV);
        assert_eq!(t.r1, 23);
        assert_eq!(t.r2, 40);
    }
}
