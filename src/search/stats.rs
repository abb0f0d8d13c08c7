use std::ops::AddAssign;

/// Counters gathered during a search.
///
/// Each worker keeps its own copy and the coordinator sums them with `+=`
/// when the worker retires.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SearchStats {
    /// Moves expanded by the main search
    pub m_nodes: u64,
    /// Moves expanded by quiescence search
    pub q_nodes: u64,
    pub eval_calls: u64,
    pub m_hash_cuts: u64,
    pub q_hash_cuts: u64,
    pub beta_cuts: u64,
    /// Times a worker found its node aborted or already cut
    pub thread_aborts: u64,
    /// Nodes aborted because a sibling produced a beta cutoff
    pub aborted_branches: u64,
    /// Times an idle worker asked the coordinator for work
    pub public_work_requests: u64,
    /// Generated moves rejected by the position as illegal
    pub illegal_moves: u64,
    pub best_move_sum: u64,
    pub best_move_count: u64,
    /// Wall-clock seconds
    pub time_taken: f64,
    /// Completed depth, fractional when a partial iteration was kept
    pub depth: f64,
}

impl SearchStats {
    #[inline]
    #[must_use]
    pub fn total_nodes(&self) -> u64 {
        self.m_nodes + self.q_nodes
    }

    /// Average index of the best move among ordered moves, a measure of
    /// move-ordering quality.
    #[must_use]
    pub fn avg_best_move_index(&self) -> f64 {
        if self.best_move_count == 0 {
            return 0.0;
        }
        self.best_move_sum as f64 / self.best_move_count as f64
    }

    #[must_use]
    pub fn nodes_per_second(&self) -> u64 {
        if self.time_taken <= 0.0 {
            return 0;
        }
        (self.total_nodes() as f64 / self.time_taken) as u64
    }

    pub fn reset(&mut self) {
        *self = SearchStats::default();
    }
}

impl AddAssign for SearchStats {
    fn add_assign(&mut self, other: SearchStats) {
        self.m_nodes += other.m_nodes;
        self.q_nodes += other.q_nodes;
        self.eval_calls += other.eval_calls;
        self.m_hash_cuts += other.m_hash_cuts;
        self.q_hash_cuts += other.q_hash_cuts;
        self.beta_cuts += other.beta_cuts;
        self.thread_aborts += other.thread_aborts;
        self.aborted_branches += other.aborted_branches;
        self.public_work_requests += other.public_work_requests;
        self.illegal_moves += other.illegal_moves;
        self.best_move_sum += other.best_move_sum;
        self.best_move_count += other.best_move_count;
        // Workers run concurrently, so time and depth are not summed.
        self.time_taken = self.time_taken.max(other.time_taken);
        self.depth = self.depth.max(other.depth);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_assign_merges_counters() {
        let mut a = SearchStats {
            m_nodes: 10,
            q_nodes: 5,
            best_move_sum: 3,
            best_move_count: 2,
            time_taken: 1.5,
            ..Default::default()
        };
        let b = SearchStats {
            m_nodes: 1,
            q_nodes: 2,
            best_move_sum: 1,
            best_move_count: 2,
            time_taken: 0.5,
            ..Default::default()
        };
        a += b;
        assert_eq!(a.m_nodes, 11);
        assert_eq!(a.total_nodes(), 18);
        assert!((a.avg_best_move_index() - 1.0).abs() < 1e-9);
        assert!((a.time_taken - 1.5).abs() < 1e-9);
    }

    #[test]
    fn test_rates_handle_zero() {
        let stats = SearchStats::default();
        assert_eq!(stats.nodes_per_second(), 0);
        assert_eq!(stats.avg_best_move_index(), 0.0);
    }
}
