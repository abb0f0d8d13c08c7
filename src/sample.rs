//! A small race game implementing the game traits.
//!
//! Two sides race pieces across a 6x6 board. Each turn a side takes up to
//! four steps, moving one piece one square forward or sideways into an empty
//! square, or diagonally forward onto an enemy piece to capture it. A side
//! wins by reaching the far rank, by eliminating every enemy piece, or when
//! the opponent cannot move. It exists to drive the searcher in tests,
//! benchmarks and documentation.

use std::fmt;

use once_cell::sync::Lazy;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::eval::Eval;
use crate::game::{Evaluator, MoveScorer, Position, Side, TacticalSet, TerminalSolver};
use crate::moves::{Move, Step, STEPS_PER_TURN};

pub const FILES: usize = 6;
pub const RANKS: usize = 6;
pub const SQUARES: usize = FILES * RANKS;

const NUM_DIRS: usize = 5;

struct ZobristKeys {
    pieces: [[u64; SQUARES]; 2],
    side: [u64; 2],
    step: [u64; STEPS_PER_TURN],
}

static ZOBRIST: Lazy<ZobristKeys> = Lazy::new(|| {
    let mut rng = StdRng::seed_from_u64(0x5EED_0F_2ACE);
    let mut pieces = [[0u64; SQUARES]; 2];
    for side in &mut pieces {
        for key in side.iter_mut() {
            *key = rng.gen();
        }
    }
    ZobristKeys {
        pieces,
        side: [rng.gen(), rng.gen()],
        step: [rng.gen(), rng.gen(), rng.gen(), rng.gen()],
    }
});

/// Direction of a step, relative to the moving side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dir {
    Forward,
    East,
    West,
    CaptureEast,
    CaptureWest,
}

impl Dir {
    const ALL: [Dir; NUM_DIRS] = [
        Dir::Forward,
        Dir::East,
        Dir::West,
        Dir::CaptureEast,
        Dir::CaptureWest,
    ];

    fn index(self) -> usize {
        match self {
            Dir::Forward => 0,
            Dir::East => 1,
            Dir::West => 2,
            Dir::CaptureEast => 3,
            Dir::CaptureWest => 4,
        }
    }

    fn is_capture(self) -> bool {
        matches!(self, Dir::CaptureEast | Dir::CaptureWest)
    }
}

/// Encodes moving the piece on `(file, rank)` in direction `dir`.
#[must_use]
pub fn step_of(file: usize, rank: usize, dir: Dir) -> Step {
    let sq = rank * FILES + file;
    Step((usize::from(Step::FIRST_ORDINARY) + sq * NUM_DIRS + dir.index()) as u8)
}

fn decode_step(step: Step) -> Option<(usize, Dir)> {
    let v = usize::from(step.value()).checked_sub(usize::from(Step::FIRST_ORDINARY))?;
    let sq = v / NUM_DIRS;
    (sq < SQUARES).then(|| (sq, Dir::ALL[v % NUM_DIRS]))
}

fn goal_rank(side: Side) -> usize {
    match side {
        Side::Gold => RANKS - 1,
        Side::Silver => 0,
    }
}

/// Target square of `dir` from `sq` for `side`, if on the board.
fn target(sq: usize, side: Side, dir: Dir) -> Option<usize> {
    let file = (sq % FILES) as isize;
    let rank = (sq / FILES) as isize;
    let fwd = match side {
        Side::Gold => 1,
        Side::Silver => -1,
    };
    let (df, dr) = match dir {
        Dir::Forward => (0, fwd),
        Dir::East => (1, 0),
        Dir::West => (-1, 0),
        Dir::CaptureEast => (1, fwd),
        Dir::CaptureWest => (-1, fwd),
    };
    let (f, r) = (file + df, rank + dr);
    if (0..FILES as isize).contains(&f) && (0..RANKS as isize).contains(&r) {
        Some(r as usize * FILES + f as usize)
    } else {
        None
    }
}

/// Race game position.
#[derive(Clone, PartialEq, Eq)]
pub struct RaceBoard {
    cells: [Option<Side>; SQUARES],
    counts: [u8; 2],
    to_move: Side,
    step: u8,
    turn: usize,
    pos_hash: u64,
    start_hash: u64,
}

impl RaceBoard {
    /// Empty board, Gold to move.
    #[must_use]
    pub fn empty() -> Self {
        RaceBoard {
            cells: [None; SQUARES],
            counts: [0; 2],
            to_move: Side::Gold,
            step: 0,
            turn: 0,
            pos_hash: 0,
            start_hash: 0,
        }
    }

    /// Gold fills the first rank, Silver the last.
    #[must_use]
    pub fn start() -> Self {
        let gold: Vec<_> = (0..FILES).map(|f| (f, 0)).collect();
        let silver: Vec<_> = (0..FILES).map(|f| (f, RANKS - 1)).collect();
        RaceBoard::from_pieces(&gold, &silver, Side::Gold)
    }

    /// Board with the given `(file, rank)` pieces at the start of `to_move`'s turn.
    #[must_use]
    pub fn from_pieces(gold: &[(usize, usize)], silver: &[(usize, usize)], to_move: Side) -> Self {
        let mut board = RaceBoard::empty();
        for &(f, r) in gold {
            board.put(r * FILES + f, Side::Gold);
        }
        for &(f, r) in silver {
            board.put(r * FILES + f, Side::Silver);
        }
        board.to_move = to_move;
        board.start_hash = board.pos_hash;
        board
    }

    fn put(&mut self, sq: usize, side: Side) {
        if self.cells[sq].is_none() {
            self.cells[sq] = Some(side);
            self.counts[side.index()] += 1;
            self.pos_hash ^= ZOBRIST.pieces[side.index()][sq];
        }
    }

    fn remove(&mut self, sq: usize) {
        if let Some(side) = self.cells[sq].take() {
            self.counts[side.index()] -= 1;
            self.pos_hash ^= ZOBRIST.pieces[side.index()][sq];
        }
    }

    #[must_use]
    pub fn piece_at(&self, file: usize, rank: usize) -> Option<Side> {
        self.cells.get(rank * FILES + file).copied().flatten()
    }

    #[must_use]
    pub fn piece_count(&self, side: Side) -> usize {
        usize::from(self.counts[side.index()])
    }

    fn is_step_legal_for(&self, side: Side, sq: usize, dir: Dir) -> bool {
        if self.cells[sq] != Some(side) {
            return false;
        }
        match target(sq, side, dir) {
            Some(t) if dir.is_capture() => self.cells[t] == Some(side.opponent()),
            Some(t) => self.cells[t].is_none(),
            None => false,
        }
    }

    fn end_turn(&mut self) {
        self.to_move = self.to_move.opponent();
        self.step = 0;
        self.turn += 1;
    }

    /// Returns false without touching the board if the step is illegal.
    fn make_step(&mut self, s: Step) -> bool {
        if s == Step::QPASS {
            return true;
        }
        if s == Step::PASS {
            if self.step == 0 || !self.position_changed() {
                return false;
            }
            self.end_turn();
            return true;
        }
        let Some((sq, dir)) = decode_step(s) else {
            return false;
        };
        if !self.is_step_legal_for(self.to_move, sq, dir) {
            return false;
        }
        if self.step == 0 {
            self.start_hash = self.pos_hash;
        }
        let side = self.to_move;
        if let Some(t) = target(sq, side, dir) {
            if dir.is_capture() {
                self.remove(t);
            }
            self.remove(sq);
            self.put(t, side);
        }
        self.step += 1;
        if usize::from(self.step) == STEPS_PER_TURN {
            self.end_turn();
        }
        true
    }

    fn push_steps(&self, side: Side, captures_only: bool, out: &mut Vec<Move>) {
        for sq in 0..SQUARES {
            if self.cells[sq] != Some(side) {
                continue;
            }
            for dir in Dir::ALL {
                if captures_only && !dir.is_capture() {
                    continue;
                }
                if self.is_step_legal_for(side, sq, dir) {
                    let file = sq % FILES;
                    let rank = sq / FILES;
                    out.push(Move::from_step(step_of(file, rank, dir)));
                }
            }
        }
    }

    /// Ranks `side`'s most advanced piece still has to cover with a clear
    /// straight path, if any piece has one.
    fn clear_run(&self, side: Side) -> Option<u32> {
        let goal = goal_rank(side);
        (0..SQUARES)
            .filter(|&sq| self.cells[sq] == Some(side))
            .filter_map(|sq| {
                let mut cur = sq;
                let mut dist = 0;
                while cur / FILES != goal {
                    cur = target(cur, side, Dir::Forward)?;
                    if self.cells[cur].is_some() {
                        return None;
                    }
                    dist += 1;
                }
                Some(dist)
            })
            .min()
    }
}

impl fmt::Debug for RaceBoard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "RaceBoard(turn {}, {:?} to move, step {})",
            self.turn, self.to_move, self.step
        )?;
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for RaceBoard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for rank in (0..RANKS).rev() {
            for file in 0..FILES {
                let c = match self.cells[rank * FILES + file] {
                    Some(Side::Gold) => 'G',
                    Some(Side::Silver) => 's',
                    None => '.',
                };
                write!(f, "{c}")?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

impl Position for RaceBoard {
    fn side_to_move(&self) -> Side {
        self.to_move
    }

    fn step(&self) -> u8 {
        self.step
    }

    fn turn_number(&self) -> usize {
        self.turn
    }

    fn position_hash(&self) -> u64 {
        self.pos_hash
    }

    fn situation_hash(&self) -> u64 {
        self.pos_hash ^ ZOBRIST.side[self.to_move.index()] ^ ZOBRIST.step[usize::from(self.step)]
    }

    fn turn_start_hash(&self) -> u64 {
        self.start_hash
    }

    fn apply_move(&mut self, mv: Move) -> bool {
        if mv.is_none() {
            return false;
        }
        let start_turn = self.turn;
        for s in mv.steps() {
            if self.turn != start_turn {
                // Steps left over after the turn already ended.
                return false;
            }
            if !self.make_step(s) {
                return false;
            }
            if s.is_pass() {
                break;
            }
        }
        true
    }

    fn apply_move_raw(&mut self, mv: Move) {
        for s in mv.steps() {
            if !self.make_step(s) || s.is_pass() {
                break;
            }
        }
    }

    fn is_goal(&self, side: Side) -> bool {
        let rank = goal_rank(side);
        (0..FILES).any(|f| self.cells[rank * FILES + f] == Some(side))
    }

    fn is_eliminated(&self, side: Side) -> bool {
        self.counts[side.index()] == 0
    }

    fn has_no_legal_moves(&self, side: Side) -> bool {
        (0..SQUARES).all(|sq| Dir::ALL.iter().all(|&d| !self.is_step_legal_for(side, sq, d)))
    }

    fn generate_moves(&self, out: &mut Vec<Move>) {
        self.push_steps(self.to_move, false, out);
    }

    fn generate_tactical_moves(&self, set: TacticalSet, out: &mut Vec<Move>) {
        let side = self.to_move;
        self.push_steps(side, true, out);
        if set == TacticalSet::Full {
            // Forward steps into the two ranks before the goal.
            let goal = goal_rank(side);
            for sq in 0..SQUARES {
                if !self.is_step_legal_for(side, sq, Dir::Forward) {
                    continue;
                }
                if let Some(t) = target(sq, side, Dir::Forward) {
                    if (t / FILES).abs_diff(goal) <= 2 {
                        out.push(Move::from_step(step_of(sq % FILES, sq / FILES, Dir::Forward)));
                    }
                }
            }
        }
    }
}

// ============================================================================
// SAMPLE EVALUATION, SOLVER AND SCORER
// ============================================================================

/// Material plus squared advancement, from the side to move.
#[derive(Debug, Clone, Copy, Default)]
pub struct RaceEval;

impl RaceEval {
    fn side_score(board: &RaceBoard, side: Side) -> Eval {
        let goal = goal_rank(side) as i32;
        (0..SQUARES)
            .filter(|&sq| board.cells[sq] == Some(side))
            .map(|sq| {
                let progress = RANKS as i32 - 1 - ((sq / FILES) as i32 - goal).abs();
                1000 + progress * progress * 40
            })
            .sum()
    }
}

impl Evaluator<RaceBoard> for RaceEval {
    fn evaluate(&self, pos: &RaceBoard, _alpha: Eval, _beta: Eval) -> Eval {
        let pla = pos.side_to_move();
        RaceEval::side_score(pos, pla) - RaceEval::side_score(pos, pla.opponent())
    }
}

/// Finds straight unobstructed runs to the goal.
#[derive(Debug, Clone, Copy, Default)]
pub struct RaceSolver;

impl TerminalSolver<RaceBoard> for RaceSolver {
    fn forced_win_distance(&self, pos: &RaceBoard, side: Side, max_steps: u32) -> Option<u32> {
        if side != pos.side_to_move() {
            return None;
        }
        if pos.piece_count(side.opponent()) == 0 {
            return Some(0);
        }
        pos.clear_run(side).filter(|&d| d <= max_steps)
    }

    fn winning_full_move(&self, pos: &RaceBoard) -> Option<Move> {
        let side = pos.side_to_move();
        let budget = (STEPS_PER_TURN - usize::from(pos.step)) as u32;
        let dist = pos.clear_run(side).filter(|&d| d > 0 && d <= budget)?;
        let goal = goal_rank(side);
        let sq = (0..SQUARES).find(|&sq| {
            pos.cells[sq] == Some(side)
                && (sq / FILES).abs_diff(goal) as u32 == dist
                && (1..=dist as usize).all(|k| {
                    let r = if side == Side::Gold { sq / FILES + k } else { sq / FILES - k };
                    pos.cells[r * FILES + sq % FILES].is_none()
                })
        })?;
        let steps: Vec<Step> = (0..dist as usize)
            .map(|k| {
                let r = if side == Side::Gold { sq / FILES + k } else { sq / FILES - k };
                step_of(sq % FILES, r, Dir::Forward)
            })
            .collect();
        Some(Move::from_steps(&steps))
    }
}

/// Prefers forward steps and captures.
#[derive(Debug, Clone, Copy, Default)]
pub struct AdvanceScorer;

impl MoveScorer<RaceBoard> for AdvanceScorer {
    fn score(&self, _pos: &RaceBoard, mv: Move) -> f64 {
        mv.steps()
            .filter_map(decode_step)
            .map(|(_, dir)| match dir {
                Dir::Forward => 1.0,
                Dir::CaptureEast | Dir::CaptureWest => 2.0,
                Dir::East | Dir::West => 0.0,
            })
            .sum()
    }
}
