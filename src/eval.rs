//! Evaluation sentinels, bound flags and the cutoff predicates shared by the
//! main search, quiescence search and transposition table.

/// Search evaluation, from the point of view of the side to move.
pub type Eval = i32;

/// Win right now. `WIN - n` is a win found `n` steps from the search root.
pub const WIN: Eval = 1_000_000;
/// Loss right now. `LOSE + n` is a loss `n` steps from the search root.
pub const LOSE: Eval = -WIN;

/// Evals at or beyond these are game-theoretic (win/loss in some number of steps).
pub const WIN_TERMINAL: Eval = WIN - 99_999;
pub const LOSE_TERMINAL: Eval = LOSE + 99_999;

/// Known win or loss at an unknown distance.
pub const WIN_INDEFINITE: Eval = WIN - 1000;
pub const LOSE_INDEFINITE: Eval = LOSE + 1000;

/// Sub-steps in a turn, and the quarter units of remaining depth per step.
pub const DEPTH_DIV: i32 = 4;

/// Extra trust slack for terminal evals, keyed by the sub-step at which
/// quiescence search would start.
pub const WL_TRUST_RDEPTH_OFFSET: [i32; 4] = [8, 11, 10, 9];

/// Bound type of a search result.
///
/// `Alpha` means the true value is at most the stored eval (fail low),
/// `Beta` means it is at least the stored eval (fail high).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Bound {
    #[default]
    None,
    Alpha,
    Beta,
    Exact,
}

impl Bound {
    /// Two-bit encoding used by the transposition table.
    #[inline]
    #[must_use]
    pub const fn to_u8(self) -> u8 {
        match self {
            Bound::None => 0,
            Bound::Alpha => 1,
            Bound::Beta => 2,
            Bound::Exact => 3,
        }
    }

    #[inline]
    #[must_use]
    pub const fn from_u8(value: u8) -> Self {
        match value & 0x3 {
            1 => Bound::Alpha,
            2 => Bound::Beta,
            3 => Bound::Exact,
            _ => Bound::None,
        }
    }
}

/// True for win/loss evals at a known or indefinite distance.
#[inline]
#[must_use]
pub const fn is_terminal(eval: Eval) -> bool {
    eval <= LOSE_TERMINAL || eval >= WIN_TERMINAL
}

/// True for evals at or beyond the absolute win/loss marks. These come from
/// illegal or unsearched lines and are never cached.
#[inline]
#[must_use]
pub const fn is_illegality(eval: Eval) -> bool {
    eval <= LOSE || eval >= WIN
}

/// Negates `eval` when the side to move changed between two positions.
#[inline]
#[must_use]
pub const fn maybe_flip(eval: Eval, flip: bool) -> Eval {
    if flip {
        -eval
    } else {
        eval
    }
}

/// Whether a stored `(eval, bound)` already settles the window `(alpha, beta)`.
#[inline]
#[must_use]
pub fn can_eval_cutoff(alpha: Eval, beta: Eval, eval: Eval, bound: Bound) -> bool {
    match bound {
        Bound::Exact => true,
        Bound::Alpha => eval <= alpha,
        Bound::Beta => eval >= beta,
        Bound::None => false,
    }
}

/// Whether a terminal eval found with `r_depth4` quarter-steps of remaining
/// depth, at `c_depth` steps from the root and sub-step `step`, can be relied on.
///
/// Terminal results are only found reliably by the main search and the first
/// couple of quiescence levels. A claimed win or loss further away than that
/// horizon may be an artifact of the incomplete quiescence move sets.
#[must_use]
pub fn is_trustworthy_terminal(eval: Eval, step: u8, c_depth: i32, r_depth4: i32) -> bool {
    if !is_terminal(eval) || r_depth4 < 0 {
        return false;
    }
    let wl_dist = if eval < 0 { eval - LOSE } else { WIN - eval };
    let steps_left = r_depth4 / DEPTH_DIV;
    let total = c_depth + steps_left;
    let qstart_step = ((i32::from(step) + steps_left) % DEPTH_DIV) as usize;
    wl_dist <= total + WL_TRUST_RDEPTH_OFFSET[qstart_step]
}

/// Terminal-eval variant of [`can_eval_cutoff`], independent of stored depth.
#[inline]
#[must_use]
pub fn can_terminal_eval_cutoff(
    alpha: Eval,
    beta: Eval,
    step: u8,
    c_depth: i32,
    r_depth4: i32,
    eval: Eval,
    bound: Bound,
) -> bool {
    is_trustworthy_terminal(eval, step, c_depth, r_depth4) && can_eval_cutoff(alpha, beta, eval, bound)
}
