//! Search constants.
//!
//! Contains the fixed limits and ordering priorities used by the parallel
//! alpha-beta search.

use crate::eval::Eval;

// ============================================================================
// SEARCH LIMITS
// ============================================================================

/// Maximum number of worker threads
pub const MAX_THREADS: usize = 16;

/// Longest principal variation kept per recursion depth
pub const PV_ARRAY_SIZE: usize = 64;

/// Main search may run this many turns past the nominal depth (extensions)
pub const MAX_MSEARCH_DEPTH_OVER_NOMINAL: i32 = 3;

/// Quiescence may add this many steps past the main search
pub const QMAX_CDEPTH: i32 = 8;

/// Depth used when only a time limit is given
pub const AUTO_DEPTH: i32 = 96;

/// Deepest nominal depth accepted by the searcher
pub const MAX_NOMINAL_DEPTH: i32 = 256;

/// Upper bound on a single search in seconds, used when no hard limit is set
pub const MAX_SEARCH_TIME: f64 = 3.0 * 86400.0;

/// Nodes visited between clock checks, per worker
pub const TIME_CHECK_PERIOD: u32 = 4096;

/// Search thread stack size (32 MB to handle deep recursion)
pub const SEARCH_STACK_SIZE: usize = 32 * 1024 * 1024;

// ============================================================================
// MOVE ORDERING PRIORITIES
// ============================================================================
// Higher scores = tried earlier. Ordered: hash move > killer > history/scorer

/// Hash move (from transposition table) - highest priority
pub const HASH_SCORE: i32 = 0x3FFF_FFFF;

/// Killer move (first turn of a PV that cut at the same depth)
pub const KILLER_SCORE: i32 = 20000;

/// Rows of the history table beyond the nominal depth
pub const HISTORY_EXTRA_ROWS: usize = 8;

/// History rows are capped at this nominal depth
pub const HISTORY_MAX_DEPTH: usize = 64;

/// Buckets per history row: first step, plus first step with the direction
/// of the second
pub const HISTORY_LEN: usize = 1280;

/// History scores are scaled into `0..=HISTORY_SCORE_MAX`
pub const HISTORY_SCORE_MAX: i64 = 10000;

/// Multiplier applied to move-scorer outputs in the main search
pub const MOVEWEIGHTS_SCALE: f64 = 50.0;

// ============================================================================
// QUIESCENCE STATES
// ============================================================================

/// Quiescence state on entry, by sub-step
pub const QDEPTH_START: [usize; 4] = [1, 0, 0, 0];

/// Quiescence state after the side to move changes
pub const QDEPTH_NEXT: [usize; 3] = [1, 2, 2];

/// Quiescence state that evaluates statically
pub const QDEPTH_EVAL: usize = 2;

/// Bonus for passing at quiescence level 0, by steps forgone
pub const Q0_PASS_BONUS: [Eval; 5] = [0, 100, 200, 300, 400];

// ============================================================================
// ROOT PRUNING
// ============================================================================

/// Deepest row of the fancy root pruning tables
pub const ROOT_PRUNE_MAX_DEPTH: usize = 16;

/// Proportion of root moves kept before a one-turn reduction, by depth
pub const ROOT_R1_PROP: [f64; ROOT_PRUNE_MAX_DEPTH + 1] = [
    1.0, 1.0, 1.0, 1.0, 1.0, 0.200, 0.170, 0.150, 0.130, 0.115, 0.110, 0.105, 0.100, 0.100,
    0.100, 0.100, 0.100,
];

/// Proportion of root moves kept before a two-turn reduction, by depth
pub const ROOT_R2_PROP: [f64; ROOT_PRUNE_MAX_DEPTH + 1] = [
    1.0, 1.0, 1.0, 1.0, 1.0, 1.000, 0.400, 0.350, 0.300, 0.270, 0.255, 0.240, 0.230, 0.230,
    0.230, 0.230, 0.230,
];

/// Proportion of root moves searched with a full window when PVS is enabled
pub const PVS_PROP: f64 = 0.05;

/// Minimum number of root moves searched with a full window under PVS
pub const PVS_MIN: usize = 5;

// ============================================================================
// TIME
// ============================================================================

/// Stop early if the next iteration is expected to need more than this
/// multiple of the time used so far
pub const TIME_PREV_FACTOR: f64 = 0.0;
