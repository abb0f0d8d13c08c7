//! Parallel alpha-beta search for board games whose turns consist of up to
//! four ordered steps.
//!
//! The game itself stays outside the crate: implement [`Position`] and
//! [`Evaluator`] (optionally [`TerminalSolver`] and [`MoveScorer`]) and hand
//! them to a [`Searcher`]. The [`sample`] module contains a small race game
//! wired up this way.

pub mod error;
pub mod eval;
pub mod game;
pub mod moves;
pub mod sample;
pub mod search;
pub mod sync;
pub mod tt;

pub use error::SearchError;
pub use eval::{Bound, Eval, LOSE, WIN};
pub use game::{Evaluator, GameHistory, MoveScorer, Position, Side, TacticalSet, TerminalSolver};
pub use moves::{Move, Step};
pub use search::{
    RootPrune, SearchConfig, SearchInfoCallback, SearchIterationInfo, SearchParams, SearchResult, SearchStats, Searcher,
    TimeBounds, TimeControl,
};
pub use sync::StopFlag;
pub use tt::{ExistsHashTable, TranspositionTable};
