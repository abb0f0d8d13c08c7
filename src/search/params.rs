use crate::error::SearchError;
use crate::tt::{
    DEFAULT_FULLMOVE_HASH_EXP, DEFAULT_MAIN_HASH_EXP, MAX_EXISTS_HASH_EXP, MAX_HASH_EXP, MIN_HASH_EXP,
};

use super::constants::MAX_THREADS;

/// How root moves beyond the best-ordered ones are reduced or dropped.
///
/// Root pruning only applies when a move scorer is installed, or when
/// [`SearchParams::prune_unscored`] is set.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum RootPrune {
    /// Search every root move at full depth.
    Off,
    /// Depth-dependent proportions of moves are reduced by one or two turns.
    Fancy,
    /// Keep the first `keep_prop` of the moves beyond the unpruned minimum.
    /// With `soft`, the rest are reduced by one turn instead of dropped.
    Fixed { keep_prop: f64, soft: bool },
}

#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SearchParams {
    pub num_threads: usize,
    pub main_hash_exp: u32,
    pub fullmove_hash_exp: u32,
    pub q_enable: bool,
    pub goal_tree: bool,
    pub allow_partial_search: bool,
    pub stop_early: bool,
    pub randomize: bool,
    pub rand_delta: i32,
    pub rand_seed: u64,
    pub root_prune: RootPrune,
    pub root_min_dont_prune: usize,
    pub prune_unscored: bool,
    pub pvs: bool,
}

impl Default for SearchParams {
    fn default() -> Self {
        SearchParams {
            num_threads: 1,
            main_hash_exp: DEFAULT_MAIN_HASH_EXP,
            fullmove_hash_exp: DEFAULT_FULLMOVE_HASH_EXP,
            q_enable: true,
            goal_tree: true,
            allow_partial_search: false,
            stop_early: false,
            randomize: false,
            rand_delta: 0,
            rand_seed: 0,
            root_prune: RootPrune::Off,
            root_min_dont_prune: 10,
            prune_unscored: false,
            pvs: false,
        }
    }
}

impl SearchParams {
    /// Set the number of worker threads
    #[must_use]
    pub fn with_threads(mut self, num_threads: usize) -> Self {
        self.num_threads = num_threads;
        self
    }

    /// Set the main transposition table size as a power of two
    #[must_use]
    pub fn with_hash_exp(mut self, exp: u32) -> Self {
        self.main_hash_exp = exp;
        self
    }

    /// Set the root deduplication table size as a power of two
    #[must_use]
    pub fn with_fullmove_hash_exp(mut self, exp: u32) -> Self {
        self.fullmove_hash_exp = exp;
        self
    }

    /// Enable or disable quiescence search
    #[must_use]
    pub fn with_quiescence(mut self, enable: bool) -> Self {
        self.q_enable = enable;
        self
    }

    /// Enable or disable terminal solver shortcuts
    #[must_use]
    pub fn with_goal_tree(mut self, enable: bool) -> Self {
        self.goal_tree = enable;
        self
    }

    /// Allow an interrupted iteration to replace the previous result
    #[must_use]
    pub fn with_partial_search(mut self, allow: bool) -> Self {
        self.allow_partial_search = allow;
        self
    }

    /// Skip the next iteration when it is not expected to finish in time
    #[must_use]
    pub fn with_stop_early(mut self, enable: bool) -> Self {
        self.stop_early = enable;
        self
    }

    /// Shuffle root moves before ordering them
    #[must_use]
    pub fn with_root_shuffle(mut self, enable: bool) -> Self {
        self.randomize = enable;
        self
    }

    /// Add up to `±3 * delta` of deterministic noise to leaf evaluations
    #[must_use]
    pub fn with_randomization(mut self, delta: i32, seed: u64) -> Self {
        self.rand_delta = delta.max(0);
        self.rand_seed = seed;
        self
    }

    /// Set the root pruning policy
    #[must_use]
    pub fn with_root_prune(mut self, prune: RootPrune) -> Self {
        self.root_prune = prune;
        self
    }

    /// Never prune or reduce the first `n` root moves
    #[must_use]
    pub fn with_root_min_dont_prune(mut self, n: usize) -> Self {
        self.root_min_dont_prune = n;
        self
    }

    /// Apply root pruning even without a move scorer
    #[must_use]
    pub fn with_prune_unscored(mut self, enable: bool) -> Self {
        self.prune_unscored = enable;
        self
    }

    /// Search late root moves with a null window first
    #[must_use]
    pub fn with_pvs(mut self, enable: bool) -> Self {
        self.pvs = enable;
        self
    }

    /// Check that the parameters describe a searcher that can be built.
    pub fn validate(&self) -> Result<(), SearchError> {
        if self.num_threads == 0 || self.num_threads > MAX_THREADS {
            return Err(SearchError::InvalidThreadCount {
                requested: self.num_threads,
                max: MAX_THREADS,
            });
        }
        if !(MIN_HASH_EXP..=MAX_HASH_EXP).contains(&self.main_hash_exp) {
            return Err(SearchError::InvalidHashExp {
                exp: self.main_hash_exp,
                min: MIN_HASH_EXP,
                max: MAX_HASH_EXP,
            });
        }
        if !(1..=MAX_EXISTS_HASH_EXP).contains(&self.fullmove_hash_exp) {
            return Err(SearchError::InvalidHashExp {
                exp: self.fullmove_hash_exp,
                min: 1,
                max: MAX_EXISTS_HASH_EXP,
            });
        }
        Ok(())
    }
}
