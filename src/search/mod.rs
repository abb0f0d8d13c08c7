//! Parallel alpha-beta search over multi-step turns.
//!
//! Features:
//! - Iterative deepening with an uninterruptible first iteration
//! - Shared search tree: idle workers steal moves from published nodes
//! - Late-move reductions and pruning at the root, with re-search
//! - Quiescence search with a three-level tactical state machine
//! - Move ordering (hash move, killers, history, optional move scorer)
//! - Lock-free transposition table shared by all workers
//! - Time management from a game clock, with an external stop flag

mod constants;
mod coordinator;
mod main_search;
mod node;
mod ordering;
mod params;
mod pool;
mod quiescence;
mod root;
mod stats;
mod time;
mod worker;

#[cfg(test)]
mod tests;

use std::sync::Arc;
use std::thread;

use crate::error::SearchError;
use crate::eval::{Eval, LOSE};
use crate::game::{check_game_end, Evaluator, GameHistory, MoveScorer, Position, TerminalSolver};
use crate::moves::{Move, Step};
use crate::sync::{LockToken, StopFlag};
use crate::tt::{ExistsHashTable, TranspositionTable};

pub use constants::{AUTO_DEPTH, MAX_NOMINAL_DEPTH, MAX_THREADS};
pub use ordering::{HistoryTable, KillerTable};
pub use params::{RootPrune, SearchParams};
pub use stats::SearchStats;
pub use time::{TimeBounds, TimeControl};

use constants::{MAX_MSEARCH_DEPTH_OVER_NOMINAL, MAX_SEARCH_TIME, QMAX_CDEPTH, SEARCH_STACK_SIZE};
use coordinator::WorkCoordinator;
use root::RootOutcome;
use time::SearchClock;
use worker::{SearchShared, Worker};

/// Callback invoked after every adopted iteration.
pub type SearchInfoCallback = Arc<dyn Fn(&SearchIterationInfo) + Send + Sync>;

/// Information about a completed search iteration.
#[derive(Debug, Clone)]
pub struct SearchIterationInfo {
    /// Depth in steps, fractional when a partial iteration was adopted
    pub depth: f64,
    pub eval: Eval,
    pub pv: Vec<Move>,
    pub nodes: u64,
    pub time_secs: f64,
    /// Time the searcher currently plans to use
    pub desired_secs: f64,
}

/// Limits for one search.
#[derive(Clone)]
pub struct SearchConfig {
    /// Nominal depth in steps. Zero or negative runs quiescence only.
    pub depth: i32,
    pub time: TimeBounds,
    /// Optional callback for iteration info
    pub info_callback: Option<SearchInfoCallback>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        SearchConfig {
            depth: AUTO_DEPTH,
            time: TimeBounds::unlimited(),
            info_callback: None,
        }
    }
}

impl SearchConfig {
    /// Create a depth-limited search config
    #[must_use]
    pub fn depth(depth: i32) -> Self {
        SearchConfig {
            depth,
            ..Default::default()
        }
    }

    /// Create a search config limited to a fixed number of seconds
    #[must_use]
    pub fn time(seconds: f64) -> Self {
        SearchConfig {
            time: TimeBounds::fixed(seconds),
            ..Default::default()
        }
    }

    /// Set the time bounds
    #[must_use]
    pub fn with_time_bounds(mut self, time: TimeBounds) -> Self {
        self.time = time;
        self
    }

    /// Set the nominal depth
    #[must_use]
    pub fn with_depth(mut self, depth: i32) -> Self {
        self.depth = depth;
        self
    }

    /// Attach a callback for iteration info reporting.
    #[must_use]
    pub fn with_info_callback(mut self, callback: SearchInfoCallback) -> Self {
        self.info_callback = Some(callback);
        self
    }

    pub fn validate(&self) -> Result<(), SearchError> {
        if self.depth > MAX_NOMINAL_DEPTH {
            return Err(SearchError::DepthTooLarge {
                depth: self.depth,
                max: MAX_NOMINAL_DEPTH,
            });
        }
        Ok(())
    }
}

/// Result of a search.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SearchResult {
    /// Eval from the perspective of the side to move at the root
    pub eval: Eval,
    /// The rest of the root turn, or [`Move::NONE`] if the game is over
    pub best_move: Move,
    /// Principal variation, one entry per searched move
    pub pv: Vec<Move>,
    /// Completed depth in steps
    pub depth: f64,
    pub stats: SearchStats,
}

impl SearchResult {
    fn from_outcome(outcome: RootOutcome) -> Self {
        SearchResult {
            eval: outcome.eval,
            best_move: outcome.pv.first().copied().unwrap_or(Move::NONE),
            pv: outcome.pv,
            depth: outcome.depth,
            stats: outcome.stats,
        }
    }

    /// Every step of the principal variation in order, passes included.
    #[must_use]
    pub fn pv_steps(&self) -> Vec<Step> {
        self.pv.iter().flat_map(|mv| mv.steps()).collect()
    }
}

/// Multi-threaded searcher.
///
/// Owns the tables that persist between searches of one game. Every call to
/// [`Searcher::search`] starts its worker threads, runs iterative deepening
/// and joins them again.
pub struct Searcher<P: Position> {
    params: SearchParams,
    evaluator: Box<dyn Evaluator<P>>,
    solver: Option<Box<dyn TerminalSolver<P>>>,
    scorer: Option<Box<dyn MoveScorer<P>>>,
    tt: TranspositionTable,
    history: HistoryTable,
    exists: ExistsHashTable,
    stop: StopFlag,
    stats: SearchStats,
}

impl<P: Position> Searcher<P> {
    pub fn new(params: SearchParams, evaluator: impl Evaluator<P> + 'static) -> Result<Self, SearchError> {
        params.validate()?;
        Ok(Searcher {
            tt: TranspositionTable::new(params.main_hash_exp)?,
            exists: ExistsHashTable::new(params.fullmove_hash_exp)?,
            history: HistoryTable::new(),
            evaluator: Box::new(evaluator),
            solver: None,
            scorer: None,
            stop: StopFlag::new(),
            stats: SearchStats::default(),
            params,
        })
    }

    /// Consult `solver` for goal and elimination shortcuts.
    #[must_use]
    pub fn with_solver(mut self, solver: impl TerminalSolver<P> + 'static) -> Self {
        self.solver = Some(Box::new(solver));
        self
    }

    /// Order (and, with root pruning, prune) moves with `scorer`.
    #[must_use]
    pub fn with_scorer(mut self, scorer: impl MoveScorer<P> + 'static) -> Self {
        self.scorer = Some(Box::new(scorer));
        self
    }

    #[must_use]
    pub fn params(&self) -> &SearchParams {
        &self.params
    }

    /// Statistics of the last search.
    #[must_use]
    pub fn stats(&self) -> &SearchStats {
        &self.stats
    }

    /// Flag that interrupts a running search from another thread. It is
    /// cleared at the start of every search.
    #[must_use]
    pub fn stop_flag(&self) -> StopFlag {
        self.stop.clone()
    }

    pub fn interrupt(&self) {
        self.stop.stop();
    }

    #[must_use]
    pub fn hashfull(&self) -> u32 {
        self.tt.hashfull()
    }

    /// Search with budgets derived from a game clock.
    pub fn search_by_time_control(
        &mut self,
        pos: &P,
        history: &GameHistory<P>,
        tc: &TimeControl,
        config: SearchConfig,
    ) -> Result<SearchResult, SearchError> {
        let bounds = tc.time_bounds(MAX_SEARCH_TIME);
        self.search(pos, history, config.with_time_bounds(bounds))
    }

    /// Search `pos`. `history` holds the game so far; if `pos` is in the
    /// middle of a turn it must include the steps already played in it.
    ///
    /// Never fails once the configuration is valid: on timeout or stop the
    /// result of the last completed iteration is returned.
    pub fn search(&mut self, pos: &P, history: &GameHistory<P>, config: SearchConfig) -> Result<SearchResult, SearchError> {
        config.validate()?;
        self.stop.reset();
        let clock = SearchClock::new(config.time);
        let depth = config.depth;

        self.tt.clear();
        self.history.ensure_depth(depth.max(0));
        self.history.clear();

        if let Some(eval) = check_game_end(pos, history, 0) {
            log::debug!("game already over at the root: {eval}");
            let mut outcome = RootOutcome::game_over(eval);
            outcome.stats.time_taken = clock.elapsed();
            self.stats = outcome.stats;
            return Ok(SearchResult::from_outcome(outcome));
        }

        let max_f_depth = (depth.max(0) + MAX_MSEARCH_DEPTH_OVER_NOMINAL) as usize;
        let max_c_depth = max_f_depth + QMAX_CDEPTH as usize;
        let num_threads = self.params.num_threads;
        let killers: Vec<KillerTable> = (0..num_threads).map(|_| KillerTable::new(max_c_depth + 1)).collect();

        let shared = SearchShared {
            params: &self.params,
            tt: &self.tt,
            history: &self.history,
            killers: &killers,
            evaluator: self.evaluator.as_ref(),
            solver: self.solver.as_deref(),
            scorer: self.scorer.as_deref(),
            clock: &clock,
            stop: &self.stop,
            coordinator: WorkCoordinator::new(num_threads, max_f_depth),
            root_turn: pos.turn_number(),
        };
        let exists = &mut self.exists;
        let callback = config.info_callback.clone();
        let mut on_iteration = |outcome: &RootOutcome| {
            if let Some(cb) = &callback {
                cb(&SearchIterationInfo {
                    depth: outcome.depth,
                    eval: outcome.eval,
                    pv: outcome.pv.clone(),
                    nodes: outcome.stats.total_nodes(),
                    time_secs: outcome.stats.time_taken,
                    desired_secs: clock.desired(),
                });
            }
        };

        let mut outcome = run_workers(&shared, pos, history, depth, exists, &mut on_iteration);
        if outcome.eval < LOSE {
            // Nothing was ever adopted; report a loss rather than the sentinel.
            outcome.eval = LOSE;
        }
        let mut token = LockToken::new();
        let mut stats = shared.coordinator.stats(&mut token);
        stats.depth = outcome.depth;
        stats.time_taken = clock.elapsed();
        outcome.stats = stats;
        self.stats = stats;
        log::debug!(
            "search done: depth {:.2} eval {} nodes {} time {:.2}",
            outcome.depth,
            outcome.eval,
            stats.total_nodes(),
            stats.time_taken
        );
        Ok(SearchResult::from_outcome(outcome))
    }
}

/// Run one search with `shared`: helpers on scoped threads, the master on
/// the calling thread.
fn run_workers<P: Position>(
    shared: &SearchShared<'_, P>,
    pos: &P,
    history: &GameHistory<P>,
    depth: i32,
    exists: &mut ExistsHashTable,
    on_iteration: &mut dyn FnMut(&RootOutcome),
) -> RootOutcome {
    let num_threads = shared.params.num_threads;
    thread::scope(|scope| {
        let mut num_helpers = 0;
        for id in 1..num_threads {
            let history = history.clone();
            let spawned = thread::Builder::new()
                .name(format!("search-{id}"))
                .stack_size(SEARCH_STACK_SIZE)
                .spawn_scoped(scope, move || {
                    Worker::new(id, shared, history).run_helper();
                });
            match spawned {
                Ok(_) => num_helpers += 1,
                Err(err) => log::warn!("failed to spawn search worker {id}: {err}"),
            }
        }

        let mut master = Worker::new(0, shared, history.clone());
        shared.coordinator.set_num_helpers(&mut master.token, num_helpers);
        let outcome = if depth <= 0 {
            root::direct_q_search(&mut master, pos, depth)
        } else {
            root::iterative_deepening(&mut master, pos, depth, exists, on_iteration)
        };
        shared.coordinator.finish(&mut master.token);
        outcome
    })
}
