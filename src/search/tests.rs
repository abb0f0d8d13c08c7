use super::node::{NodeData, NodeGuard, NodeId, NodeInit, NodeType, ParentLink, SearchMode};
use super::*;
use crate::eval::WIN;
use crate::game::Side;
use crate::sample::{RaceBoard, RaceEval, RaceSolver};

struct Inspection {
    outcome: RootOutcome,
    nodes_in_use: usize,
    num_public: usize,
    did_timeout: bool,
}

/// Run a search on `pos` by hand and look at the coordinator afterwards.
fn search_and_inspect(pos: &RaceBoard, params: SearchParams, depth: i32, bounds: TimeBounds) -> Inspection {
    let history = GameHistory::new(pos);
    let tt = TranspositionTable::new(params.main_hash_exp).expect("tt");
    let mut exists = ExistsHashTable::new(params.fullmove_hash_exp).expect("exists table");
    let mut table = HistoryTable::new();
    table.ensure_depth(depth);

    let max_f_depth = (depth.max(0) + MAX_MSEARCH_DEPTH_OVER_NOMINAL) as usize;
    let killers: Vec<KillerTable> = (0..params.num_threads)
        .map(|_| KillerTable::new(max_f_depth + QMAX_CDEPTH as usize + 1))
        .collect();
    let clock = SearchClock::new(bounds);
    let stop = StopFlag::new();
    let evaluator = RaceEval;
    let solver = RaceSolver;

    let shared = SearchShared {
        params: &params,
        tt: &tt,
        history: &table,
        killers: &killers,
        evaluator: &evaluator,
        solver: Some(&solver),
        scorer: None,
        clock: &clock,
        stop: &stop,
        coordinator: WorkCoordinator::new(params.num_threads, max_f_depth),
        root_turn: pos.turn_number(),
    };
    let outcome = run_workers(&shared, pos, &history, depth, &mut exists, &mut |_| {});

    let mut token = LockToken::new();
    Inspection {
        outcome,
        nodes_in_use: shared.coordinator.nodes_in_use(),
        num_public: shared.coordinator.num_public(&mut token),
        did_timeout: shared.coordinator.did_timeout(&mut token),
    }
}

fn small_params(threads: usize) -> SearchParams {
    SearchParams::default()
        .with_threads(threads)
        .with_hash_exp(16)
        .with_fullmove_hash_exp(14)
}

fn root_init(pos: RaceBoard) -> NodeInit<RaceBoard> {
    NodeInit {
        pos,
        parent: None,
        parent_move: Move::NONE,
        move_history: Vec::new(),
        mode: SearchMode::Normal,
        changed_player: true,
        f_depth: 0,
        c_depth: 0,
        r_depth4: 8,
        alpha: LOSE - 1,
        beta: WIN - 1,
        hash_move: Move::NONE,
        killer_move: Move::NONE,
        copy_killers_from: None,
    }
}

fn install(guard: &mut NodeGuard<'_, '_, RaceBoard>, init: NodeInit<RaceBoard>) {
    guard.install(NodeData::new(init));
}

#[test]
fn test_completed_search_releases_every_node() {
    for threads in [1, 3] {
        let result = search_and_inspect(&RaceBoard::start(), small_params(threads), 4, TimeBounds::unlimited());
        assert!(!result.did_timeout);
        assert_eq!(result.nodes_in_use, 0, "{threads} threads left nodes allocated");
        assert_eq!(result.num_public, 0, "{threads} threads left nodes public");
        assert!(!result.outcome.pv.is_empty());
        assert!(result.outcome.eval > LOSE && result.outcome.eval < WIN);
        assert!((result.outcome.depth - 4.0).abs() < f64::EPSILON);
    }
}

#[test]
fn test_quiescence_only_search_returns_without_iterations() {
    let result = search_and_inspect(&RaceBoard::start(), small_params(2), 0, TimeBounds::unlimited());
    assert_eq!(result.nodes_in_use, 0);
    assert!(result.outcome.depth <= 0.0);
    assert!(result.outcome.eval > LOSE && result.outcome.eval < WIN);
}

#[test]
fn test_winning_run_is_found_by_every_thread_count() {
    // Gold has a clear two-step run up the a-file.
    let pos = RaceBoard::from_pieces(&[(0, 3), (3, 0)], &[(5, 5), (4, 4)], Side::Gold);
    for threads in [1, 2, 4] {
        let result = search_and_inspect(&pos, small_params(threads), 4, TimeBounds::unlimited());
        assert!(result.outcome.eval >= WIN - 4, "eval {} with {threads} threads", result.outcome.eval);
        assert_eq!(result.nodes_in_use, 0);
    }
}

#[test]
fn test_pool_acquire_and_release() {
    let coordinator: WorkCoordinator<RaceBoard> = WorkCoordinator::new(2, 3);
    let mut token = LockToken::new();
    let free = coordinator.num_free_pools(&mut token);

    let id = coordinator.acquire_pool(&mut token).expect("free pool");
    assert_ne!(id, 0);
    assert_eq!(coordinator.num_free_pools(&mut token), free - 1);

    let pool = coordinator.pool(id).expect("pool exists");
    let node = pool.acquire(2).expect("slot");
    assert_eq!(coordinator.nodes_in_use(), 1);
    assert!(pool.release(node.slot));
    coordinator.release_pool(&mut token, id);
    assert_eq!(coordinator.num_free_pools(&mut token), free);

    // The root pool never goes back on the free list.
    coordinator.release_pool(&mut token, 0);
    assert_eq!(coordinator.num_free_pools(&mut token), free);
}

#[test]
fn test_abort_propagates_down_the_parent_chain() {
    let coordinator: WorkCoordinator<RaceBoard> = WorkCoordinator::new(1, 4);
    let mut token = LockToken::new();
    let pool_id = coordinator.acquire_pool(&mut token).expect("pool");
    let pool = coordinator.pool(pool_id).expect("pool exists");

    let ids: Vec<NodeId> = (0..3).map(|d| pool.acquire(d).expect("slot")).collect();
    for (d, &id) in ids.iter().enumerate() {
        let node = coordinator.node(id).expect("node");
        let mut guard = node.lock(&mut token);
        let mut init = root_init(RaceBoard::start());
        init.f_depth = d;
        if d > 0 {
            init.parent = Some(ParentLink {
                id: ids[d - 1],
                node_type: NodeType::Pv,
                move_index: 0,
            });
        }
        install(&mut guard, init);
    }

    let leaf = ids[2];
    assert!(!coordinator.check_aborted(leaf));

    coordinator.node(ids[0]).expect("root").set_aborted();
    assert!(coordinator.check_aborted(leaf));
    for &id in &ids {
        assert!(coordinator.node(id).expect("node").is_aborted());
    }
}

#[test]
fn test_public_nodes_are_listed_once() {
    let coordinator: WorkCoordinator<RaceBoard> = WorkCoordinator::new(1, 2);
    let mut token = LockToken::new();
    let root = coordinator.acquire_root().expect("root slot");
    let epoch = {
        let node = coordinator.node(root).expect("node");
        let mut guard = node.lock(&mut token);
        install(&mut guard, root_init(RaceBoard::start()));
        guard.epoch()
    };

    coordinator.publicize(&mut token, root, epoch);
    coordinator.publicize(&mut token, root, epoch);
    assert_eq!(coordinator.num_public(&mut token), 1);
    coordinator.depublicize(&mut token, root);
    assert_eq!(coordinator.num_public(&mut token), 0);
}
