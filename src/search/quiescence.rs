//! Quiescence search.
//!
//! Runs single-threaded below the main search horizon. Level 0 looks at the
//! full tactical set and may pass, level 1 only at captures with a null
//! step, and level 2 evaluates statically.

use crate::eval::{can_eval_cutoff, is_terminal, Bound, Eval, LOSE, WIN};
use crate::game::{check_game_end_quiescence, Position, TacticalSet};
use crate::moves::{Move, Step};

use super::constants::{KILLER_SCORE, Q0_PASS_BONUS, QDEPTH_EVAL, QDEPTH_NEXT};
use super::ordering::select_best;
use super::worker::Worker;

/// How quiescence was entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum QState {
    /// Directly from the main search, whose game-end checks already ran
    MainLeaf,
    /// From another quiescence node
    Q,
}

#[derive(Debug, Clone, Copy)]
struct QBest {
    eval: Eval,
    mv: Move,
    index: usize,
    flag: Bound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tried {
    Continue,
    Cutoff,
    Illegal,
}

/// Search `pos` with quiescence level `q_depth`. Returns an eval from the
/// perspective of the side to move; the PV is left at `f_depth`.
#[allow(clippy::too_many_arguments)]
pub(crate) fn q_search<P: Position>(
    w: &mut Worker<'_, '_, P>,
    pos: &P,
    f_depth: usize,
    c_depth: i32,
    q_depth: usize,
    mut alpha: Eval,
    beta: Eval,
    state: QState,
) -> Eval {
    let shared = w.shared;
    w.end_pv(f_depth);
    if w.try_check_time() {
        return alpha;
    }

    if state == QState::Q {
        if let Some(eval) = check_game_end_quiescence(pos, c_depth) {
            return eval;
        }
    }
    if WIN - c_depth - 1 <= alpha {
        return alpha;
    }
    if LOSE + c_depth + 1 >= beta {
        return beta;
    }

    if state == QState::Q && shared.params.goal_tree {
        if let Some(solver) = shared.solver {
            let steps_left = 4 - u32::from(pos.step());
            if let Some(dist) = solver.forced_win_distance(pos, pos.side_to_move(), steps_left) {
                if dist <= 4 {
                    return WIN - c_depth - dist as i32;
                }
            }
        }
    }

    let hash = pos.situation_hash();
    let depth4 = -(q_depth as i32);
    let mut hash_move = Move::NONE;
    if let Some(hit) = shared.tt.lookup(hash, c_depth) {
        if hit.depth4 >= depth4 && can_eval_cutoff(alpha, beta, hit.eval, hit.bound) {
            w.stats.q_hash_cuts += 1;
            return hit.eval;
        }
        hash_move = hit.mv;
        if hash_move == Move::QPASS && QDEPTH_NEXT.get(q_depth) != Some(&QDEPTH_EVAL) {
            hash_move = Move::NONE;
        }
    }

    if q_depth >= QDEPTH_EVAL || !shared.params.q_enable {
        if beta < 0 && is_terminal(beta) {
            return beta;
        }
        if alpha > 0 && is_terminal(alpha) {
            return alpha;
        }
        w.stats.eval_calls += 1;
        let eval = shared.evaluate(pos, alpha, beta);
        shared.tt.record(hash, c_depth, depth4, eval, Bound::Exact, Move::NONE);
        return eval;
    }

    let mut best = QBest {
        eval: LOSE - 1,
        mv: Move::NONE,
        index: 0,
        flag: Bound::Alpha,
    };

    if !hash_move.is_none() {
        let tried = try_move(w, pos, hash_move, 0, &mut best, f_depth, c_depth, q_depth, &mut alpha, beta);
        if tried == Tried::Cutoff {
            w.stats.best_move_count += 1;
            shared.tt.record(hash, c_depth, depth4, best.eval, Bound::Beta, best.mv);
            w.killers().record(pos.step(), c_depth, w.pv(f_depth));
            shared.history.record(c_depth, best.mv);
            return best.eval;
        }
    }

    let lose_steps_max = beta - (LOSE + c_depth);
    if lose_steps_max <= 0 {
        return LOSE + c_depth;
    }

    let mut buf = w.take_buffer(f_depth);
    if let Some(solver) = shared.solver {
        if let Some(steps) = solver.steps_to_lose(pos, lose_steps_max, &mut buf.moves) {
            if steps < 9 {
                w.return_buffer(f_depth, buf);
                return LOSE + c_depth + steps;
            }
        }
    }
    if buf.moves.is_empty() {
        if q_depth == 0 {
            pos.generate_tactical_moves(TacticalSet::Full, &mut buf.moves);
            if pos.step() != 0 && pos.position_changed() {
                buf.moves.push(Move::PASS);
            }
        } else {
            pos.generate_tactical_moves(TacticalSet::Captures, &mut buf.moves);
            buf.moves.push(Move::QPASS);
        }
    }
    buf.scores.clear();
    buf.scores.resize(buf.moves.len(), 0);
    shared.history.add_scores(c_depth, &buf.moves, &mut buf.scores);

    // The killer is a whole turn; boost the generated move that starts it.
    let killer = w.killers().get(pos.step(), c_depth);
    if !killer.is_none() && killer != hash_move {
        let prefix = buf
            .moves
            .iter()
            .enumerate()
            .filter(|(_, mv)| mv.is_prefix_of(killer))
            .max_by_key(|(_, mv)| mv.num_steps())
            .map(|(i, _)| i);
        if let Some(i) = prefix {
            buf.scores[i] = KILLER_SCORE;
        }
    }

    let mut skipped_hash = 0;
    for m in 0..buf.moves.len() {
        select_best(&mut buf.moves, &mut buf.scores, m);
        let mv = buf.moves[m];
        if mv == hash_move {
            skipped_hash = 1;
            continue;
        }
        // The hash move took index 0.
        let index = m + usize::from(!hash_move.is_none()) - skipped_hash;
        match try_move(w, pos, mv, index, &mut best, f_depth, c_depth, q_depth, &mut alpha, beta) {
            Tried::Continue => {}
            Tried::Illegal => {
                w.stats.illegal_moves += 1;
                log::warn!("skipping illegal quiescence move {mv} at turn {} step {}", pos.turn_number(), pos.step());
            }
            Tried::Cutoff => {
                w.return_buffer(f_depth, buf);
                w.stats.best_move_sum += best.index as u64;
                w.stats.best_move_count += 1;
                shared.tt.record(hash, c_depth, depth4, best.eval, Bound::Beta, best.mv);
                w.killers().record(pos.step(), c_depth, w.pv(f_depth));
                shared.history.record(c_depth, best.mv);
                return best.eval;
            }
        }
    }
    w.return_buffer(f_depth, buf);

    shared.tt.record(hash, c_depth, depth4, best.eval, best.flag, best.mv);
    if best.flag != Bound::Alpha {
        shared.history.record(c_depth, best.mv);
    }
    if best.flag == Bound::Exact {
        w.killers().record(pos.step(), c_depth, w.pv(f_depth));
    }
    w.stats.best_move_sum += best.index as u64;
    w.stats.best_move_count += 1;
    best.eval
}

/// Window shift for a level-0 move of `ns` steps that passes, by the
/// number of steps it gave up.
fn pass_bonus(mv: Move, ns: usize) -> Eval {
    mv.steps()
        .position(|step| step == Step::PASS)
        .and_then(|s| ns.checked_sub(s))
        .and_then(|passed| Q0_PASS_BONUS.get(passed).copied())
        .unwrap_or(0)
}

/// Only a bare pass gets its bonus back. Captures that pass afterwards keep
/// the shifted eval.
fn restore_pass_bonus(mv: Move, bonus: Eval, eval: Eval) -> Eval {
    if mv == Move::PASS && !is_terminal(eval) {
        eval + bonus
    } else {
        eval
    }
}

/// Play `mv` and search the result one level down, updating `best` and
/// `alpha`.
#[allow(clippy::too_many_arguments)]
fn try_move<P: Position>(
    w: &mut Worker<'_, '_, P>,
    pos: &P,
    mv: Move,
    index: usize,
    best: &mut QBest,
    f_depth: usize,
    c_depth: i32,
    q_depth: usize,
    alpha: &mut Eval,
    beta: Eval,
) -> Tried {
    let eval = if mv == Move::QPASS {
        q_search(w, pos, f_depth + 1, c_depth, QDEPTH_EVAL, *alpha, beta, QState::Q)
    } else {
        let mut next = pos.clone();
        if !next.apply_move(mv) {
            return Tried::Illegal;
        }
        if next.position_hash() == next.turn_start_hash() {
            return Tried::Continue;
        }
        let changed = next.side_to_move() != pos.side_to_move();
        let ns = if changed {
            4 - usize::from(pos.step())
        } else {
            usize::from(next.step() - pos.step())
        };

        // Passing early at level 0 forgoes steps; the window shifts by the
        // bonus so that the pass is judged fairly against stepping on.
        let bonus = if q_depth == 0 && next.step() == 0 { pass_bonus(mv, ns) } else { 0 };
        let (mut lo, mut hi) = (*alpha, beta);
        if bonus != 0 {
            if !is_terminal(lo) {
                lo -= bonus;
            }
            if !is_terminal(hi) {
                hi -= bonus;
            }
        }

        w.stats.q_nodes += 1;
        let next_q = if changed { QDEPTH_NEXT[q_depth] } else { q_depth };
        let c_next = c_depth + ns as i32;
        let mut eval = if changed {
            -q_search(w, &next, f_depth + 1, c_next, next_q, -hi, -lo, QState::Q)
        } else {
            q_search(w, &next, f_depth + 1, c_next, next_q, lo, hi, QState::Q)
        };
        if q_depth == 0 {
            eval = restore_pass_bonus(mv, bonus, eval);
        }
        eval
    };

    if eval >= beta {
        w.copy_extend_pv(f_depth, mv);
        w.stats.beta_cuts += 1;
        *best = QBest {
            eval,
            mv,
            index,
            flag: Bound::Beta,
        };
        return Tried::Cutoff;
    }
    if eval > best.eval {
        best.eval = eval;
        best.mv = mv;
        best.index = index;
        if eval > *alpha {
            *alpha = eval;
            best.flag = Bound::Exact;
            w.copy_extend_pv(f_depth, mv);
        }
    }
    Tried::Continue
}
