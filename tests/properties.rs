//! Property-based tests using proptest.

use proptest::prelude::*;
use rand::prelude::*;
use rand::Rng;

use stepsearch::sample::RaceBoard;
use stepsearch::search::{HistoryTable, KillerTable};
use stepsearch::{Bound, GameHistory, Move, Position, Side, Step, TranspositionTable, LOSE, WIN};

/// Strategy for an ordinary (non-pass) step
fn step_strategy() -> impl Strategy<Value = Step> {
    (Step::FIRST_ORDINARY..0xF0u8).prop_map(Step::new)
}

fn bound_strategy() -> impl Strategy<Value = Bound> {
    prop_oneof![Just(Bound::Alpha), Just(Bound::Beta), Just(Bound::Exact)]
}

/// Play `num_steps` random legal single steps from the start position.
fn random_playout(seed: u64, num_steps: usize) -> (RaceBoard, Vec<Move>) {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut pos = RaceBoard::start();
    let mut played = Vec::new();
    for _ in 0..num_steps {
        let mut moves = Vec::new();
        pos.generate_moves(&mut moves);
        if moves.is_empty() || pos.is_goal(Side::Gold) || pos.is_goal(Side::Silver) {
            break;
        }
        let mv = moves[rng.gen_range(0..moves.len())];
        if pos.apply_move(mv) {
            played.push(mv);
        }
    }
    (pos, played)
}

proptest! {
    /// Property: ordinary evals come back exactly as stored
    #[test]
    fn prop_tt_roundtrip(
        hash in 1u64..,
        c_depth in 0i32..64,
        depth4 in -2i32..200,
        eval in -50_000i32..50_000,
        bound in bound_strategy(),
        steps in prop::collection::vec(step_strategy(), 1..=4),
    ) {
        let tt = TranspositionTable::new(12).expect("tt");
        let mv = Move::from_steps(&steps);
        tt.record(hash, c_depth, depth4, eval, bound, mv);
        let hit = tt.lookup(hash, c_depth).expect("entry present");
        prop_assert_eq!(hit.eval, eval);
        prop_assert_eq!(hit.depth4, depth4);
        prop_assert_eq!(hit.bound, bound);
        prop_assert_eq!(hit.mv, mv);
        prop_assert!(tt.lookup(hash ^ 1, c_depth).is_none());
    }

    /// Property: terminal evals keep their distance from the node that stored them
    #[test]
    fn prop_tt_terminal_distance(
        hash in 1u64..,
        c_store in 0i32..40,
        c_load in 0i32..40,
        k in 1i32..40,
        win in any::<bool>(),
    ) {
        let tt = TranspositionTable::new(12).expect("tt");
        let eval = if win { WIN - c_store - k } else { LOSE + c_store + k };
        tt.record(hash, c_store, 8, eval, Bound::Exact, Move::NONE);
        let hit = tt.lookup(hash, c_load).expect("entry present");
        let expected = if win { WIN - c_load - k } else { LOSE + c_load + k };
        prop_assert_eq!(hit.eval, expected);
    }

    /// Property: concatenating two partial moves equals building the joined move
    #[test]
    fn prop_concat_matches_from_steps(
        steps in prop::collection::vec(step_strategy(), 2..=4),
        split in 1usize..4,
    ) {
        let split = split.min(steps.len() - 1);
        let head = Move::from_steps(&steps[..split]);
        let tail = Move::from_steps(&steps[split..]);
        let joined = head.concat(tail, split);
        prop_assert_eq!(joined, Move::from_steps(&steps));
        prop_assert!(head.is_prefix_of(joined));
        prop_assert_eq!(joined.num_steps(), steps.len());
        prop_assert_eq!(joined.steps().collect::<Vec<_>>(), steps);
    }

    /// Property: a killer joins single-step PV moves into at most one turn
    #[test]
    fn prop_killer_joins_one_turn(
        steps in prop::collection::vec(step_strategy(), 1..=8),
        c_depth in 0i32..12,
    ) {
        let killers = KillerTable::new(16);
        let pv: Vec<Move> = steps.iter().map(|&s| Move::from_step(s)).collect();
        killers.record(0, c_depth, &pv);
        let killer = killers.get(0, c_depth);
        let n = steps.len().min(4);
        prop_assert_eq!(killer, Move::from_steps(&steps[..n]));
        prop_assert_eq!(killers.get(1, c_depth), Move::NONE);
    }

    /// Property: history scores stay within their scale
    #[test]
    fn prop_history_scores_bounded(
        records in prop::collection::vec((0i32..8, step_strategy()), 1..200),
        probe in step_strategy(),
    ) {
        let mut history = HistoryTable::new();
        history.ensure_depth(4);
        for (c, s) in &records {
            history.record(*c, Move::from_step(*s));
        }
        for c in 0..8 {
            let score = history.score(c, Move::from_step(probe));
            prop_assert!((0..=10_000).contains(&score));
        }
    }

    /// Property: replaying each recorded turn from its start reaches the next start
    #[test]
    fn prop_history_replays_playout(seed in any::<u64>(), num_steps in 1usize..40) {
        let (end, played) = random_playout(seed, num_steps);
        let start = RaceBoard::start();
        let history = GameHistory::from_moves(&start, &played).expect("legal playout");
        prop_assert_eq!(history.max_turn(), end.turn_number());

        let mut pos = start;
        for turn in history.min_turn()..=history.max_turn() {
            prop_assert_eq!(history.turn_start(turn), Some(&pos));
            let mv = history.turn_move(turn);
            if mv.is_none() {
                break;
            }
            prop_assert!(pos.apply_move(mv));
        }
        prop_assert_eq!(pos.situation_hash(), end.situation_hash());
    }
}
