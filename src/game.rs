//! The game layer the search is generic over.
//!
//! A game supplies a [`Position`] type with legality-checked move application,
//! terminal predicates and move generation. Evaluation, terminal solving and
//! move scoring are separate traits so that they can be swapped without
//! touching the rules. [`GameHistory`] tracks turn boundaries for repetition
//! detection and for replaying a node's path onto a worker's history.

use std::fmt;

use crate::error::SearchError;
use crate::eval::{Eval, LOSE, WIN};
use crate::moves::Move;

/// One of the two players.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Side {
    Gold,
    Silver,
}

impl Side {
    #[inline]
    #[must_use]
    pub const fn opponent(self) -> Side {
        match self {
            Side::Gold => Side::Silver,
            Side::Silver => Side::Gold,
        }
    }

    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            Side::Gold => 0,
            Side::Silver => 1,
        }
    }
}

/// Which tactical moves quiescence search asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TacticalSet {
    /// Captures plus tactical defenses and attacks.
    Full,
    /// Captures only.
    Captures,
}

/// A game position with turns of up to four steps.
///
/// Positions are values: the search clones them at every recursion boundary
/// and never mutates a position another frame still refers to.
pub trait Position: Clone + Send + Sync + fmt::Debug {
    fn side_to_move(&self) -> Side;

    /// Steps already taken in the current turn, `0..=3`.
    fn step(&self) -> u8;

    /// Monotonic turn counter, increasing by one whenever the side to move changes.
    fn turn_number(&self) -> usize;

    /// Hash of the piece placement only.
    fn position_hash(&self) -> u64;

    /// Hash of placement, side to move and step.
    fn situation_hash(&self) -> u64;

    /// Placement hash at the start of the most recently begun turn. It is
    /// refreshed by the first step of the next turn, so right after a turn
    /// ends it still describes the start of the turn that just ended.
    fn turn_start_hash(&self) -> u64;

    /// Apply `mv` if it is legal, returning `false` (with `self` in an
    /// unspecified state) otherwise. A pass is legal only mid-turn after the
    /// placement changed. A qpass is a no-op.
    fn apply_move(&mut self, mv: Move) -> bool;

    /// Apply a move already known to be legal.
    fn apply_move_raw(&mut self, mv: Move);

    /// `side` has reached its goal.
    fn is_goal(&self, side: Side) -> bool;

    /// `side` has lost every piece it needs to keep playing.
    fn is_eliminated(&self, side: Side) -> bool;

    /// `side` would have no legal step if it were to move now.
    fn has_no_legal_moves(&self, side: Side) -> bool;

    /// Ordinary moves for the side to move, excluding passes. Moves may span
    /// several steps when the game has compound actions.
    fn generate_moves(&self, out: &mut Vec<Move>);

    /// Tactical moves for quiescence search, excluding passes.
    fn generate_tactical_moves(&self, set: TacticalSet, out: &mut Vec<Move>);

    /// Placement changed since the turn began.
    #[inline]
    fn position_changed(&self) -> bool {
        self.position_hash() != self.turn_start_hash()
    }
}

/// Static evaluation from the point of view of the side to move.
///
/// Must be deterministic. Returned values should stay strictly inside
/// `(LOSE_TERMINAL, WIN_TERMINAL)` unless they are genuine win/loss claims.
pub trait Evaluator<P: Position>: Send + Sync {
    fn evaluate(&self, pos: &P, alpha: Eval, beta: Eval) -> Eval;
}

impl<P: Position, F> Evaluator<P> for F
where
    F: Fn(&P, Eval, Eval) -> Eval + Send + Sync,
{
    fn evaluate(&self, pos: &P, alpha: Eval, beta: Eval) -> Eval {
        self(pos, alpha, beta)
    }
}

/// Cheap exact solvers consulted before generic recursion.
pub trait TerminalSolver<P: Position>: Send + Sync {
    /// Steps `side` needs to force a win (goal or elimination) using at most
    /// `max_steps` steps of the current turn, if such a win exists.
    fn forced_win_distance(&self, pos: &P, side: Side, max_steps: u32) -> Option<u32>;

    /// A complete turn that wins immediately, used to short-circuit root
    /// move generation.
    fn winning_full_move(&self, _pos: &P) -> Option<Move> {
        None
    }

    /// Steps until the side to move loses by force, if it cannot prevent it
    /// within `max_steps`. May push the only defending moves into `defenses`.
    fn steps_to_lose(&self, _pos: &P, _max_steps: i32, _defenses: &mut Vec<Move>) -> Option<i32> {
        None
    }
}

/// Move-ordering model, used only to rank and prune candidates.
pub trait MoveScorer<P: Position>: Send + Sync {
    /// Higher is searched earlier. `mv` is played from `pos`.
    fn score(&self, pos: &P, mv: Move) -> f64;
}

// ============================================================================
// GAME HISTORY
// ============================================================================

#[derive(Clone, Debug)]
struct TurnRecord<P> {
    start: P,
    situation_hash: u64,
    mv: Move,
}

/// Start position and move of every turn from some initial turn onward.
#[derive(Clone, Debug)]
pub struct GameHistory<P> {
    min_turn: usize,
    turns: Vec<TurnRecord<P>>,
}

impl<P: Position> GameHistory<P> {
    /// History beginning at `pos`.
    #[must_use]
    pub fn new(pos: &P) -> Self {
        GameHistory {
            min_turn: pos.turn_number(),
            turns: vec![TurnRecord {
                start: pos.clone(),
                situation_hash: pos.situation_hash(),
                mv: Move::NONE,
            }],
        }
    }

    /// History of playing `moves` from `pos`.
    pub fn from_moves(pos: &P, moves: &[Move]) -> Result<Self, SearchError> {
        let mut history = GameHistory::new(pos);
        let mut current = pos.clone();
        for &mv in moves {
            let last_step = current.step();
            if !current.apply_move(mv) {
                return Err(SearchError::IllegalHistoryMove {
                    turn: current.turn_number(),
                    mv,
                });
            }
            history.report_move(&current, mv, last_step);
        }
        Ok(history)
    }

    #[inline]
    #[must_use]
    pub fn min_turn(&self) -> usize {
        self.min_turn
    }

    #[inline]
    #[must_use]
    pub fn max_turn(&self) -> usize {
        self.min_turn + self.turns.len() - 1
    }

    fn record(&self, turn: usize) -> Option<&TurnRecord<P>> {
        turn.checked_sub(self.min_turn).and_then(|i| self.turns.get(i))
    }

    fn record_mut(&mut self, turn: usize) -> Option<&mut TurnRecord<P>> {
        turn.checked_sub(self.min_turn)
            .and_then(move |i| self.turns.get_mut(i))
    }

    /// Steps played so far in `turn`, or [`Move::NONE`].
    #[must_use]
    pub fn turn_move(&self, turn: usize) -> Move {
        self.record(turn).map_or(Move::NONE, |r| r.mv)
    }

    /// Position at the start of `turn`.
    #[must_use]
    pub fn turn_start(&self, turn: usize) -> Option<&P> {
        self.record(turn).map(|r| &r.start)
    }

    #[must_use]
    pub fn turn_situation_hash(&self, turn: usize) -> Option<u64> {
        self.record(turn).map(|r| r.situation_hash)
    }

    /// Drop every turn after `turn`.
    pub fn truncate(&mut self, turn: usize) {
        let keep = turn.saturating_sub(self.min_turn) + 1;
        self.turns.truncate(keep.max(1));
    }

    /// Record that `mv`, begun at step `last_step`, produced `after`.
    /// Everything recorded after the turn of `after` is discarded.
    pub fn report_move(&mut self, after: &P, mv: Move, last_step: u8) {
        let turn = after.turn_number();
        let changed_turn = after.step() == 0;
        let old_turn = if changed_turn { turn.saturating_sub(1) } else { turn };

        self.truncate(turn);
        if changed_turn {
            let record = TurnRecord {
                start: after.clone(),
                situation_hash: after.situation_hash(),
                mv: Move::NONE,
            };
            match turn.checked_sub(self.min_turn) {
                Some(i) if i < self.turns.len() => self.turns[i] = record,
                Some(_) => self.turns.push(record),
                None => return,
            }
        }
        if let Some(r) = self.record_mut(old_turn) {
            r.mv = r.mv.concat(mv, usize::from(last_step));
        }
    }

    /// Record `mv` as everything played in `turn` so far. If `mv` completes the
    /// turn, the start of the following turn is derived by replaying it.
    /// Later turns are discarded.
    pub fn report_turn_move(&mut self, turn: usize, mv: Move) -> Result<(), SearchError> {
        let Some(record) = self.record_mut(turn) else {
            return Err(SearchError::TurnOutOfRange {
                turn,
                min: self.min_turn,
                max: self.max_turn(),
            });
        };
        record.mv = mv;
        let mut next = record.start.clone();
        if !next.apply_move(mv) {
            return Err(SearchError::IllegalHistoryMove { turn, mv });
        }
        self.truncate(turn);
        if next.step() != 0 {
            return Ok(());
        }
        self.turns.push(TurnRecord {
            situation_hash: next.situation_hash(),
            start: next,
            mv: Move::NONE,
        });
        Ok(())
    }

    /// `pos`, at the start of a turn, occurred twice before with the same side to move.
    #[must_use]
    pub fn is_third_repetition(&self, pos: &P) -> bool {
        if pos.step() != 0 {
            return false;
        }
        let hash = pos.situation_hash();
        let first_step = self.turns.first().map_or(0, |r| r.start.step());
        let start = self.min_turn + usize::from(first_step > 0);

        let mut count = 0;
        let mut turn = pos.turn_number();
        while turn >= start + 2 {
            turn -= 2;
            if self.turn_situation_hash(turn) == Some(hash) {
                count += 1;
                if count >= 2 {
                    return true;
                }
            }
        }
        false
    }
}

// ============================================================================
// GAME END RULES
// ============================================================================

/// Win/loss eval if the game is over at `pos`, reached `c_depth` steps from
/// the root, or `None` if play continues.
pub fn check_game_end<P: Position>(pos: &P, history: &GameHistory<P>, c_depth: i32) -> Option<Eval> {
    let pla = pos.side_to_move();
    let opp = pla.opponent();
    if pos.step() == 0 {
        if pos.is_goal(opp) {
            return Some(LOSE + c_depth);
        }
        if pos.is_goal(pla) {
            return Some(WIN - c_depth);
        }
        if pos.is_eliminated(pla) {
            return Some(LOSE + c_depth);
        }
        if pos.is_eliminated(opp) {
            return Some(WIN - c_depth);
        }
        if pos.has_no_legal_moves(pla) {
            return Some(LOSE + c_depth);
        }
        if c_depth > 0 && history.is_third_repetition(pos) {
            return Some(WIN - c_depth);
        }
        None
    } else {
        mid_turn_game_end(pos, c_depth, true)
    }
}

/// Quiescence variant of [`check_game_end`]. It skips the legal-move and
/// repetition tests, since quiescence passes may leave positions unchanged.
pub fn check_game_end_quiescence<P: Position>(pos: &P, c_depth: i32) -> Option<Eval> {
    let pla = pos.side_to_move();
    let opp = pla.opponent();
    if pos.step() == 0 {
        if pos.is_goal(opp) {
            return Some(LOSE + c_depth);
        }
        if pos.is_goal(pla) {
            return Some(WIN - c_depth);
        }
        if pos.is_eliminated(pla) {
            return Some(LOSE + c_depth);
        }
        if pos.is_eliminated(opp) {
            return Some(WIN - c_depth);
        }
        None
    } else {
        mid_turn_game_end(pos, c_depth, false)
    }
}

fn mid_turn_game_end<P: Position>(pos: &P, c_depth: i32, check_immobilized: bool) -> Option<Eval> {
    let pla = pos.side_to_move();
    let opp = pla.opponent();
    if pos.is_goal(pla) || pos.is_eliminated(opp) {
        return Some(WIN - c_depth);
    }
    if check_immobilized
        && pos.has_no_legal_moves(opp)
        && pos.position_changed()
        && !pos.is_goal(opp)
        && !pos.is_eliminated(pla)
    {
        return Some(WIN - c_depth);
    }
    None
}
