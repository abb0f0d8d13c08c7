//! Search tests on the sample race game.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use stepsearch::sample::{step_of, AdvanceScorer, Dir, RaceBoard, RaceEval, RaceSolver};
use stepsearch::{
    Eval, Evaluator, GameHistory, Move, Position, RootPrune, SearchConfig, SearchError, SearchParams, Searcher, Side,
    Step, TacticalSet, TimeBounds, LOSE, WIN,
};

fn params(threads: usize) -> SearchParams {
    SearchParams::default()
        .with_threads(threads)
        .with_hash_exp(16)
        .with_fullmove_hash_exp(14)
}

fn searcher(threads: usize) -> Searcher<RaceBoard> {
    Searcher::new(params(threads), RaceEval)
        .expect("valid params")
        .with_solver(RaceSolver)
}

/// Two pieces each, far apart, so that searches stay small.
fn sparse() -> RaceBoard {
    RaceBoard::from_pieces(&[(1, 0), (4, 1)], &[(1, 5), (4, 4)], Side::Gold)
}

fn assert_playable(pos: &RaceBoard, mv: Move) {
    let mut next = pos.clone();
    assert!(next.apply_move(mv), "best move {mv} is illegal in {pos:?}");
    assert_ne!(next.position_hash(), pos.turn_start_hash());
}

/// Gold walks a clear file to the goal in two steps.
#[test]
fn finds_clear_run_to_goal() {
    let pos = RaceBoard::from_pieces(&[(0, 3), (3, 0)], &[(5, 5), (4, 4)], Side::Gold);
    let history = GameHistory::new(&pos);

    for threads in [1, 3] {
        let mut s = searcher(threads);
        let result = s.search(&pos, &history, SearchConfig::depth(4)).expect("search");
        assert!(result.eval >= WIN - 4, "eval {} with {threads} threads", result.eval);

        let mut after = pos.clone();
        assert!(after.apply_move(result.best_move));
        assert!(after.is_goal(Side::Gold));
    }

    let result = searcher(1).search(&pos, &history, SearchConfig::depth(8)).expect("search");
    assert_eq!(result.eval, WIN - 2);
    assert_eq!(result.pv_steps().len(), 2);
}

/// Every route to the goal within one turn goes through a capture.
#[test]
fn captures_through_a_blockade() {
    let pos = RaceBoard::from_pieces(&[(0, 3), (5, 0)], &[(0, 4), (1, 4), (2, 4)], Side::Gold);
    let history = GameHistory::new(&pos);
    let mut s = searcher(2);
    let result = s.search(&pos, &history, SearchConfig::depth(4)).expect("search");
    assert!(result.eval >= WIN - 4, "eval {}", result.eval);

    let mut after = pos.clone();
    assert!(after.apply_move(result.best_move));
    assert!(after.is_goal(Side::Gold));
    assert_eq!(after.piece_count(Side::Silver), 2);
}

#[test]
fn single_thread_search_is_deterministic() {
    let pos = sparse();
    let history = GameHistory::new(&pos);
    let a = searcher(1).search(&pos, &history, SearchConfig::depth(5)).expect("search");
    let b = searcher(1).search(&pos, &history, SearchConfig::depth(5)).expect("search");
    assert_eq!(a.eval, b.eval);
    assert_eq!(a.best_move, b.best_move);
    assert_eq!(a.pv, b.pv);
    assert_eq!(a.stats.total_nodes(), b.stats.total_nodes());
}

#[test]
fn multithreaded_search_returns_legal_move() {
    let pos = RaceBoard::start();
    let history = GameHistory::new(&pos);
    let mut s = searcher(4);
    let result = s.search(&pos, &history, SearchConfig::depth(5)).expect("search");
    assert_playable(&pos, result.best_move);
    assert!(result.eval > LOSE && result.eval < WIN);
    assert!(s.stats().total_nodes() > 0);
}

#[test]
fn iterations_deepen_monotonically() {
    let pos = sparse();
    let history = GameHistory::new(&pos);
    let depths = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&depths);
    let config = SearchConfig::depth(6).with_info_callback(Arc::new(move |info| {
        seen.lock().push(info.depth);
    }));

    let result = searcher(2).search(&pos, &history, config).expect("search");
    let depths = depths.lock();
    assert!(!depths.is_empty());
    assert!(depths.windows(2).all(|w| w[0] < w[1]), "depths {depths:?}");
    assert!((depths[depths.len() - 1] - result.depth).abs() < f64::EPSILON);
    // Iterations start from a full turn.
    assert!(depths[0] >= 4.0);
}

#[test]
fn respects_time_limit() {
    let pos = sparse();
    let history = GameHistory::new(&pos);
    let bounds = TimeBounds {
        hard_min: 0.1,
        optimistic: 0.2,
        hard_max: 0.4,
    };
    let mut s = searcher(2);
    let start = Instant::now();
    let result = s
        .search(&pos, &history, SearchConfig::default().with_time_bounds(bounds))
        .expect("search");
    let elapsed = start.elapsed().as_secs_f64();

    // Time checks are sampled, so allow a little past the hard maximum.
    assert!(elapsed < bounds.hard_max + 1.0, "searched {elapsed:.2}s");
    assert!(result.depth >= 4.0);
    assert_playable(&pos, result.best_move);
}

#[test]
fn stop_flag_interrupts_search() {
    let pos = RaceBoard::start();
    let history = GameHistory::new(&pos);
    let mut s = searcher(2);
    let stop = s.stop_flag();

    let stopper = thread::spawn(move || {
        thread::sleep(Duration::from_millis(200));
        stop.stop();
    });
    let start = Instant::now();
    let result = s.search(&pos, &history, SearchConfig::depth(40)).expect("search");
    stopper.join().expect("stopper thread");

    assert!(start.elapsed() < Duration::from_secs(30));
    assert!(result.depth < 40.0);
    assert_playable(&pos, result.best_move);
}

#[test]
fn finished_game_is_reported_without_searching() {
    let pos = RaceBoard::from_pieces(&[(2, 2)], &[], Side::Gold);
    let history = GameHistory::new(&pos);
    let mut s = searcher(2);
    let result = s.search(&pos, &history, SearchConfig::depth(4)).expect("search");
    assert_eq!(result.eval, WIN);
    assert_eq!(result.best_move, Move::NONE);
    assert!(result.pv.is_empty());
}

#[test]
fn quiescence_only_for_nonpositive_depth() {
    let pos = sparse();
    let history = GameHistory::new(&pos);
    let mut s = searcher(1);
    for depth in [0, -1, -5] {
        let result = s.search(&pos, &history, SearchConfig::depth(depth)).expect("search");
        assert!(result.depth <= 0.0);
        assert!(result.eval > LOSE && result.eval < WIN);
    }
}

#[test]
fn searches_from_the_middle_of_a_turn() {
    let start = sparse();
    let first = Move::from_step(step_of(1, 0, Dir::Forward));
    let history = GameHistory::from_moves(&start, &[first]).expect("legal");
    let mut pos = start.clone();
    assert!(pos.apply_move(first));
    assert_eq!(pos.step(), 1);

    let mut s = searcher(2);
    let result = s.search(&pos, &history, SearchConfig::depth(4)).expect("search");
    assert!(result.best_move.num_steps() <= 3);
    assert_playable(&pos, result.best_move);
}

#[test]
fn root_pruning_with_scorer_still_finds_moves() {
    let pos = RaceBoard::start();
    let history = GameHistory::new(&pos);
    let policies = [
        RootPrune::Fancy,
        RootPrune::Fixed { keep_prop: 0.5, soft: true },
        RootPrune::Fixed { keep_prop: 0.3, soft: false },
    ];
    for prune in policies {
        let p = params(2).with_root_prune(prune).with_pvs(true);
        let mut s = Searcher::new(p, RaceEval)
            .expect("valid params")
            .with_solver(RaceSolver)
            .with_scorer(AdvanceScorer);
        let result = s.search(&pos, &history, SearchConfig::depth(5)).expect("search");
        assert_playable(&pos, result.best_move);
    }
}

#[test]
fn root_shuffle_is_reproducible_with_seed() {
    let pos = sparse();
    let history = GameHistory::new(&pos);
    let run = || {
        let p = params(1).with_root_shuffle(true).with_randomization(20, 7);
        let mut s = Searcher::new(p, RaceEval).expect("valid params").with_solver(RaceSolver);
        s.search(&pos, &history, SearchConfig::depth(4)).expect("search")
    };
    let a = run();
    let b = run();
    assert_eq!(a.best_move, b.best_move);
    assert_eq!(a.eval, b.eval);
}

#[test]
fn rejects_invalid_configuration() {
    assert!(matches!(
        Searcher::new(params(0), RaceEval),
        Err(SearchError::InvalidThreadCount { requested: 0, .. })
    ));
    assert!(matches!(
        Searcher::new(params(1).with_hash_exp(2), RaceEval),
        Err(SearchError::InvalidHashExp { exp: 2, .. })
    ));

    let pos = sparse();
    let history = GameHistory::new(&pos);
    let err = searcher(1)
        .search(&pos, &history, SearchConfig::depth(10_000))
        .unwrap_err();
    assert!(matches!(err, SearchError::DepthTooLarge { depth: 10_000, .. }));
}

/// A step from off the board, which no race position accepts.
const STRAY: Move = Move::from_step(Step::new(0xEE));

/// Race board whose generators also emit an illegal move.
#[derive(Clone, Debug)]
struct StrayBoard {
    board: RaceBoard,
    in_moves: bool,
    in_tactical: bool,
}

impl Position for StrayBoard {
    fn side_to_move(&self) -> Side {
        self.board.side_to_move()
    }

    fn step(&self) -> u8 {
        self.board.step()
    }

    fn turn_number(&self) -> usize {
        self.board.turn_number()
    }

    fn position_hash(&self) -> u64 {
        self.board.position_hash()
    }

    fn situation_hash(&self) -> u64 {
        self.board.situation_hash()
    }

    fn turn_start_hash(&self) -> u64 {
        self.board.turn_start_hash()
    }

    fn apply_move(&mut self, mv: Move) -> bool {
        self.board.apply_move(mv)
    }

    fn apply_move_raw(&mut self, mv: Move) {
        self.board.apply_move_raw(mv);
    }

    fn is_goal(&self, side: Side) -> bool {
        self.board.is_goal(side)
    }

    fn is_eliminated(&self, side: Side) -> bool {
        self.board.is_eliminated(side)
    }

    fn has_no_legal_moves(&self, side: Side) -> bool {
        self.board.has_no_legal_moves(side)
    }

    fn generate_moves(&self, out: &mut Vec<Move>) {
        self.board.generate_moves(out);
        if self.in_moves {
            out.push(STRAY);
        }
    }

    fn generate_tactical_moves(&self, set: TacticalSet, out: &mut Vec<Move>) {
        self.board.generate_tactical_moves(set, out);
        if self.in_tactical {
            out.push(STRAY);
        }
    }
}

fn stray_search(in_moves: bool, in_tactical: bool, depth: i32) -> (StrayBoard, stepsearch::SearchResult) {
    let pos = StrayBoard {
        board: sparse(),
        in_moves,
        in_tactical,
    };
    let history = GameHistory::new(&pos);
    let eval = |p: &StrayBoard, alpha: Eval, beta: Eval| RaceEval.evaluate(&p.board, alpha, beta);
    let mut s = Searcher::new(params(1), eval).expect("valid params");
    let result = s.search(&pos, &history, SearchConfig::depth(depth)).expect("search");
    (pos, result)
}

#[test]
fn illegal_generated_moves_are_skipped() {
    let (pos, result) = stray_search(true, false, 6);
    assert!(result.stats.illegal_moves > 0);
    assert_ne!(result.best_move, STRAY);
    assert!(result.pv.iter().all(|&mv| mv != STRAY));
    assert_playable(&pos.board, result.best_move);
}

#[test]
fn illegal_tactical_moves_are_skipped() {
    let (_, result) = stray_search(false, true, 0);
    assert!(result.stats.illegal_moves > 0);
    assert!(result.eval > LOSE && result.eval < WIN);

    let (pos, result) = stray_search(false, true, 4);
    assert!(result.stats.illegal_moves > 0);
    assert_playable(&pos.board, result.best_move);
}

#[cfg(feature = "serde")]
#[test]
fn result_serializes_to_json() {
    let pos = sparse();
    let history = GameHistory::new(&pos);
    let result = searcher(1).search(&pos, &history, SearchConfig::depth(4)).expect("search");
    let json = serde_json::to_string(&result).expect("serialize");
    let back: stepsearch::SearchResult = serde_json::from_str(&json).expect("deserialize");
    assert_eq!(back.best_move, result.best_move);
    assert_eq!(back.eval, result.eval);
    assert_eq!(back.pv, result.pv);
}
