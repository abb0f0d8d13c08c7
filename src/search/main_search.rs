//! Main-search expansion and node completion.
//!
//! [`m_search`] plays one claimed move and either resolves it immediately
//! (cutoffs, terminal positions, quiescence at the horizon) or creates the
//! child node for the worker to search. [`m_search_done`] runs when a node
//! completes and turns it into a result for its parent.

use crate::eval::{can_eval_cutoff, can_terminal_eval_cutoff, maybe_flip, Bound, Eval, DEPTH_DIV, LOSE, WIN};
use crate::game::{check_game_end, Position};
use crate::moves::Move;

use super::constants::QDEPTH_START;
use super::node::{Assignment, MoveReduction, NodeData, NodeId, NodeInit, ParentLink, SearchMode};
use super::quiescence::{q_search, QState};
use super::worker::Worker;

/// What became of a move or a finished node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Expansion {
    /// Resolved, from the perspective of the position the move was played in
    Eval(Eval),
    /// A child node was created and must be searched
    Child(NodeId),
}

/// Steps consumed going from `before` to `after`.
#[inline]
fn steps_taken<P: Position>(before: &P, after: &P) -> i32 {
    if after.side_to_move() != before.side_to_move() {
        4 - i32::from(before.step())
    } else {
        i32::from(after.step()) - i32::from(before.step())
    }
}

/// Expand the claimed move `a.mv`.
pub(crate) fn m_search<P: Position>(w: &mut Worker<'_, '_, P>, a: &Assignment<P>) -> Expansion {
    let shared = w.shared;
    let f_depth = a.f_depth + 1;
    w.end_pv(f_depth);

    let reduction = match a.reduction {
        MoveReduction::Pruned => return Expansion::Eval(LOSE - 1),
        MoveReduction::Reduced(r) => r,
        MoveReduction::Full => -1,
    };
    if reduction > 0 && a.r_depth4 / DEPTH_DIV - 1 - reduction < 0 {
        return Expansion::Eval(LOSE - 1);
    }

    let mut pos = a.pos.clone();
    if !pos.apply_move(a.mv) {
        if !a.speculative {
            w.stats.illegal_moves += 1;
            log::warn!(
                "skipping illegal move {} at turn {} step {}",
                a.mv,
                a.pos.turn_number(),
                a.pos.step()
            );
        }
        return Expansion::Eval(LOSE - 1);
    }
    if pos.position_hash() == pos.turn_start_hash() {
        return Expansion::Eval(LOSE - 1);
    }

    let changed = pos.side_to_move() != a.pos.side_to_move();
    let ns = steps_taken(&a.pos, &pos);
    w.history.report_move(&pos, a.mv, a.pos.step());
    w.stats.m_nodes += 1;

    let c_depth = a.c_depth + ns;
    let r_depth4 = a.r_depth4 - (ns + reduction.max(0)) * DEPTH_DIV;
    let old_beta = if reduction >= 0 { a.alpha + 1 } else { a.beta };
    let (alpha, beta) = if changed { (-old_beta, -a.alpha) } else { (a.alpha, old_beta) };
    let resolved = |eval: Eval| Expansion::Eval(maybe_flip(eval, changed));

    if w.try_check_time() {
        return resolved(alpha);
    }
    if let Some(eval) = check_game_end(&pos, &w.history, c_depth) {
        return resolved(eval);
    }
    if WIN - c_depth - 1 <= alpha {
        return resolved(alpha);
    }
    if LOSE + c_depth + 1 >= beta {
        return resolved(beta);
    }

    if pos.step() == 0 && shared.params.goal_tree {
        if let Some(solver) = shared.solver {
            if let Some(dist) = solver.forced_win_distance(&pos, pos.side_to_move(), 4) {
                if dist <= 4 {
                    return resolved(WIN - c_depth - dist as i32);
                }
            }
        }
    }

    if r_depth4 <= 0 {
        let q_depth = QDEPTH_START[usize::from(pos.step())];
        let eval = q_search(w, &pos, f_depth, c_depth, q_depth, alpha, beta, QState::MainLeaf);
        return resolved(eval);
    }

    let hash = pos.situation_hash();
    let mut hash_move = Move::NONE;
    if let Some(hit) = shared.tt.lookup(hash, c_depth) {
        if hit.depth4 > 0
            && c_depth >= 4
            && ((hit.depth4 >= r_depth4 && can_eval_cutoff(alpha, beta, hit.eval, hit.bound))
                || can_terminal_eval_cutoff(alpha, beta, pos.step(), c_depth, hit.depth4, hit.eval, hit.bound))
        {
            w.stats.m_hash_cuts += 1;
            return resolved(hit.eval);
        }
        hash_move = hit.mv;
        if (hit.depth4 <= 0 && hash_move == Move::PASS) || hash_move == Move::QPASS {
            hash_move = Move::NONE;
        }
    }
    // A pass is only a legal hash move mid-turn after the position changed.
    if hash_move == Move::PASS && (pos.step() == 0 || !pos.position_changed()) {
        hash_move = Move::NONE;
    }
    let killer_move = w.killers().get(pos.step(), c_depth);

    let move_history = w.path_from_root(&pos);
    let init = NodeInit {
        pos,
        parent: Some(ParentLink {
            id: a.node,
            node_type: a.node_type,
            move_index: a.index,
        }),
        parent_move: a.mv,
        move_history,
        mode: if reduction >= 0 { SearchMode::Reduced } else { SearchMode::Normal },
        changed_player: changed,
        f_depth,
        c_depth,
        r_depth4,
        alpha,
        beta,
        hash_move,
        killer_move,
        copy_killers_from: Some(w.id),
    };
    match install_child(w, init) {
        Some(child) => Expansion::Child(child),
        None => resolved(alpha),
    }
}

/// Put a new node into this worker's pool at its fDepth.
fn install_child<P: Position>(w: &mut Worker<'_, '_, P>, init: NodeInit<P>) -> Option<NodeId> {
    let shared = w.shared;
    let coordinator = &shared.coordinator;
    let f_depth = init.f_depth;
    let slot = w
        .pool()
        .and_then(|id| coordinator.pool(id))
        .and_then(|pool| pool.acquire(f_depth));
    let Some(id) = slot else {
        log::warn!("worker {} has no free node at depth {f_depth}", w.id);
        return None;
    };
    let node = coordinator.node(id)?;
    node.lock(&mut w.token).install(NodeData::new(init));
    Some(id)
}

/// Finish a completed node: record it in the tables and produce its result,
/// or a full-width re-search when a reduced search failed high.
pub(crate) fn m_search_done<P: Position>(w: &mut Worker<'_, '_, P>, id: NodeId) -> Expansion {
    let shared = w.shared;
    let coordinator = &shared.coordinator;
    let aborted = coordinator.check_aborted(id);
    let Some(node) = coordinator.node(id) else {
        return Expansion::Eval(LOSE - 1);
    };
    let Some(done) = node.lock(&mut w.token).clear() else {
        return Expansion::Eval(LOSE - 1);
    };
    // A node aborted from above has incomplete bounds and its parent
    // discards the result. Its own beta cut is still sound.
    if aborted && done.best_flag != Bound::Beta {
        return Expansion::Eval(LOSE - 1);
    }

    let step = done.pos.step();
    shared.tt.record(
        done.pos.situation_hash(),
        done.c_depth,
        done.r_depth4,
        done.best_eval,
        done.best_flag,
        done.best_move,
    );
    if done.best_flag != Bound::Alpha {
        shared.history.record(done.c_depth, done.best_move);
    }
    if matches!(done.best_flag, Bound::Beta | Bound::Exact) {
        w.killers().record(step, done.c_depth, &done.pv);
    }
    if done.c_depth > 0 {
        w.stats.best_move_sum += done.best_index.unwrap_or(0) as u64;
        w.stats.best_move_count += 1;
    }

    if done.mode == SearchMode::Normal {
        w.set_pv(done.f_depth, &done.pv);
        return Expansion::Eval(done.best_eval);
    }

    let Some(parent_id) = done.parent else {
        return Expansion::Eval(done.best_eval);
    };
    let Some(parent) = coordinator.node(parent_id) else {
        return Expansion::Eval(LOSE - 1);
    };
    let (p_alpha, p_beta, p_r_depth4, p_node_type, p_pos) = {
        let guard = parent.lock(&mut w.token);
        let Some(p) = guard.as_ref() else {
            return Expansion::Eval(LOSE - 1);
        };
        (p.alpha, p.beta, p.r_depth4, p.node_type, p.pos.clone())
    };

    let changed = done.changed_player;
    // The null window failed low as hoped: the move is no better than alpha.
    if (!changed && done.best_flag == Bound::Alpha) || (changed && done.best_flag == Bound::Beta) {
        return Expansion::Eval(maybe_flip(p_alpha, changed));
    }

    let ns = steps_taken(&p_pos, &done.pos);
    let (alpha, beta) = if changed { (-p_beta, -p_alpha) } else { (p_alpha, p_beta) };
    let init = NodeInit {
        pos: done.pos,
        parent: Some(ParentLink {
            id: parent_id,
            node_type: p_node_type,
            move_index: done.parent_move_index,
        }),
        parent_move: done.parent_move,
        move_history: done.move_history,
        mode: SearchMode::Normal,
        changed_player: changed,
        f_depth: done.f_depth,
        c_depth: done.c_depth,
        r_depth4: p_r_depth4 - ns * DEPTH_DIV,
        alpha,
        beta,
        hash_move: done.best_move,
        killer_move: Move::NONE,
        copy_killers_from: Some(w.id),
    };
    log::trace!(
        "worker {} re-searching move {} at depth {}",
        w.id,
        done.parent_move,
        done.f_depth
    );
    match install_child(w, init) {
        Some(research) => Expansion::Child(research),
        None => Expansion::Eval(LOSE - 1),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample::RaceBoard;

    #[test]
    fn test_steps_taken_within_and_across_turns() {
        let start = RaceBoard::start();
        let mut moves = Vec::new();
        start.generate_moves(&mut moves);
        let single = moves
            .iter()
            .copied()
            .find(|mv| mv.num_steps() == 1)
            .expect("start position has single steps");
        let mut after = start.clone();
        assert!(after.apply_move(single));
        assert_eq!(steps_taken(&start, &after), 1);

        let mut passed = after.clone();
        assert!(passed.apply_move(Move::PASS));
        assert_eq!(steps_taken(&after, &passed), 3);
    }
}
