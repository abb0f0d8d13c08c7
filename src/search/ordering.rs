//! Move-ordering tables: per-worker killers and the shared history table.
//!
//! Both tables are written concurrently without locks. Their contents only
//! influence move order, so a torn or lost update costs a little ordering
//! quality and nothing else.

use std::sync::atomic::{AtomicI64, AtomicU32, AtomicUsize, Ordering};

use crate::moves::{Move, Step, STEPS_PER_TURN};

use super::constants::{HISTORY_EXTRA_ROWS, HISTORY_LEN, HISTORY_MAX_DEPTH, HISTORY_SCORE_MAX};

// ============================================================================
// KILLERS
// ============================================================================

/// One worker's killer moves, indexed by steps from the root.
///
/// Only the owning worker records into it. Other workers read it when they
/// join a node whose path the owner searched.
pub struct KillerTable {
    moves: Vec<AtomicU32>,
    len: AtomicUsize,
}

impl KillerTable {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        KillerTable {
            moves: (0..capacity).map(|_| AtomicU32::new(Move::NONE.bits())).collect(),
            len: AtomicUsize::new(0),
        }
    }

    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.moves.len()
    }

    /// Killer at `c_depth`, only for nodes at the start of a turn.
    /// The move may be illegal in the position it is tried in.
    #[must_use]
    pub fn get(&self, step: u8, c_depth: i32) -> Move {
        if step != 0 || c_depth < 0 {
            return Move::NONE;
        }
        let c = c_depth as usize;
        if c >= self.len.load(Ordering::Relaxed) {
            return Move::NONE;
        }
        self.moves
            .get(c)
            .map_or(Move::NONE, |m| Move(m.load(Ordering::Relaxed)))
    }

    /// Record the first turn of `pv` as the killer at `c_depth`.
    ///
    /// Consecutive PV moves are joined until they make up a whole turn. A PV
    /// starting with a pass clears the slot.
    pub fn record(&self, step: u8, c_depth: i32, pv: &[Move]) {
        if step != 0 || pv.is_empty() || c_depth < 0 {
            return;
        }
        let c = c_depth as usize;
        let Some(slot) = self.moves.get(c) else {
            return;
        };
        let len = self.len.load(Ordering::Relaxed);
        if len <= c {
            for m in &self.moves[len..c] {
                m.store(Move::NONE.bits(), Ordering::Relaxed);
            }
            self.len.store(c + 1, Ordering::Relaxed);
        }

        let mut mv = pv[0];
        if mv == Move::PASS || mv == Move::QPASS {
            slot.store(Move::NONE.bits(), Ordering::Relaxed);
            return;
        }
        let mut ns = mv.num_real_steps();
        for &next in &pv[1..] {
            if ns >= STEPS_PER_TURN || next == Move::PASS || next == Move::QPASS {
                break;
            }
            mv = mv.concat(next, ns);
            ns = mv.num_real_steps();
        }
        slot.store(mv.bits(), Ordering::Relaxed);
    }

    /// Replace this table's contents with `other`'s.
    pub fn copy_from(&self, other: &KillerTable) {
        let len = other.len.load(Ordering::Relaxed).min(self.capacity());
        for (dst, src) in self.moves.iter().zip(&other.moves).take(len) {
            dst.store(src.load(Ordering::Relaxed), Ordering::Relaxed);
        }
        self.len.store(len, Ordering::Relaxed);
    }

    pub fn clear(&self) {
        self.len.store(0, Ordering::Relaxed);
    }
}

// ============================================================================
// HISTORY
// ============================================================================

struct HistoryRow {
    counts: Vec<AtomicI64>,
    max: AtomicI64,
}

impl HistoryRow {
    fn new() -> Self {
        HistoryRow {
            counts: (0..HISTORY_LEN).map(|_| AtomicI64::new(0)).collect(),
            max: AtomicI64::new(0),
        }
    }
}

/// Counts of best moves by steps from the root, shared by all workers.
pub struct HistoryTable {
    rows: Vec<HistoryRow>,
}

impl Default for HistoryTable {
    fn default() -> Self {
        Self::new()
    }
}

#[inline]
fn history_index(mv: Move) -> usize {
    let step0 = mv.step(0);
    if mv.num_steps() <= 1 {
        return usize::from(step0.value());
    }
    let step1 = mv.step(1);
    if step1 == Step::PASS || step1 == Step::QPASS {
        return usize::from(step0.value());
    }
    usize::from(step0.value()) + usize::from(step1.value() >> 6) * 256 + 256
}

impl HistoryTable {
    #[must_use]
    pub fn new() -> Self {
        HistoryTable { rows: Vec::new() }
    }

    #[inline]
    #[must_use]
    pub fn rows(&self) -> usize {
        self.rows.len()
    }

    /// Make sure rows exist for a search of nominal `depth` turns.
    pub fn ensure_depth(&mut self, depth: i32) {
        let depth = (depth.max(0) as usize).min(HISTORY_MAX_DEPTH);
        while self.rows.len() < depth + HISTORY_EXTRA_ROWS {
            self.rows.push(HistoryRow::new());
        }
    }

    pub fn clear(&self) {
        for row in &self.rows {
            row.max.store(0, Ordering::Relaxed);
            for c in &row.counts {
                c.store(0, Ordering::Relaxed);
            }
        }
    }

    /// Shrink every count, between iterations.
    pub fn decay(&self) {
        for row in &self.rows {
            let max = row.max.load(Ordering::Relaxed);
            row.max.store((max + 1) / 2, Ordering::Relaxed);
            for c in &row.counts {
                let v = c.load(Ordering::Relaxed);
                c.store((v + 1) / 6, Ordering::Relaxed);
            }
        }
    }

    /// Count `mv` as a best move at `c_depth`.
    pub fn record(&self, c_depth: i32, mv: Move) {
        if mv.is_none() || c_depth < 0 {
            return;
        }
        let Some(row) = self.rows.get(c_depth as usize) else {
            return;
        };
        let val = row.counts[history_index(mv)].fetch_add(1, Ordering::Relaxed) + 1;
        row.max.fetch_max(val, Ordering::Relaxed);
    }

    /// Score of `mv` at `c_depth` in `0..=HISTORY_SCORE_MAX`.
    #[must_use]
    pub fn score(&self, c_depth: i32, mv: Move) -> i32 {
        if c_depth < 0 {
            return 0;
        }
        let Some(row) = self.rows.get(c_depth as usize) else {
            return 0;
        };
        let max = row.max.load(Ordering::Relaxed);
        if max <= 0 {
            return 0;
        }
        let s = row.counts[history_index(mv)].load(Ordering::Relaxed).min(max);
        (s * HISTORY_SCORE_MAX / max) as i32
    }

    /// Add history scores for `moves` to `scores`.
    pub fn add_scores(&self, c_depth: i32, moves: &[Move], scores: &mut [i32]) {
        for (mv, s) in moves.iter().zip(scores.iter_mut()) {
            *s += self.score(c_depth, *mv);
        }
    }
}

// ============================================================================
// SELECTION
// ============================================================================

/// Swap the highest-scored move in `idx..` into position `idx`.
pub(crate) fn select_best(moves: &mut [Move], scores: &mut [i32], idx: usize) {
    let n = moves.len().min(scores.len());
    if idx >= n {
        return;
    }
    let mut best = idx;
    for i in idx + 1..n {
        if scores[i] > scores[best] {
            best = i;
        }
    }
    moves.swap(idx, best);
    scores.swap(idx, best);
}

/// Stable sort of `moves` by descending `scores`.
pub(crate) fn insertion_sort(moves: &mut [Move], scores: &mut [i32]) {
    let n = moves.len().min(scores.len());
    for i in 1..n {
        let mut j = i;
        while j > 0 && scores[j] > scores[j - 1] {
            moves.swap(j, j - 1);
            scores.swap(j, j - 1);
            j -= 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mv(steps: &[u8]) -> Move {
        let steps: Vec<Step> = steps.iter().map(|&s| Step::new(s)).collect();
        Move::from_steps(&steps)
    }

    #[test]
    fn test_killer_joins_pv_into_one_turn() {
        let killers = KillerTable::new(16);
        let pv = [mv(&[10, 11]), mv(&[12]), mv(&[13, 14]), mv(&[20])];
        killers.record(0, 3, &pv);
        assert_eq!(killers.get(0, 3), mv(&[10, 11, 12, 13]));
        // Only the start of a turn has killers.
        assert_eq!(killers.get(1, 3), Move::NONE);
        // Lower depths were cleared when the table grew.
        assert_eq!(killers.get(0, 2), Move::NONE);
    }

    #[test]
    fn test_killer_stops_at_pass() {
        let killers = KillerTable::new(8);
        killers.record(0, 0, &[mv(&[10]), Move::PASS, mv(&[30])]);
        assert_eq!(killers.get(0, 0), mv(&[10]));

        killers.record(0, 0, &[Move::PASS]);
        assert_eq!(killers.get(0, 0), Move::NONE);
    }

    #[test]
    fn test_killer_copy_from() {
        let a = KillerTable::new(8);
        let b = KillerTable::new(8);
        a.record(0, 2, &[mv(&[5, 6, 7, 8])]);
        b.copy_from(&a);
        assert_eq!(b.get(0, 2), mv(&[5, 6, 7, 8]));
        a.clear();
        assert_eq!(a.get(0, 2), Move::NONE);
        assert_eq!(b.get(0, 2), mv(&[5, 6, 7, 8]));
    }

    #[test]
    fn test_killer_out_of_range() {
        let killers = KillerTable::new(4);
        killers.record(0, 10, &[mv(&[5])]);
        assert_eq!(killers.get(0, 10), Move::NONE);
    }

    #[test]
    fn test_history_index_range() {
        assert_eq!(history_index(mv(&[7])), 7);
        assert_eq!(history_index(mv(&[7, 0])), 7);
        assert_eq!(history_index(mv(&[7, 200])), 7 + 3 * 256 + 256);
        assert!(history_index(mv(&[254, 254, 254, 254])) < HISTORY_LEN);
    }

    #[test]
    fn test_history_scoring_and_decay() {
        let mut history = HistoryTable::new();
        history.ensure_depth(2);
        assert_eq!(history.rows(), 2 + HISTORY_EXTRA_ROWS);

        let a = mv(&[10]);
        let b = mv(&[20]);
        for _ in 0..4 {
            history.record(1, a);
        }
        history.record(1, b);
        assert_eq!(history.score(1, a), HISTORY_SCORE_MAX as i32);
        assert_eq!(history.score(1, b), (HISTORY_SCORE_MAX / 4) as i32);
        assert_eq!(history.score(0, a), 0);

        history.decay();
        // (4 + 1) / 6 == 0, max (4 + 1) / 2 == 2
        assert_eq!(history.score(1, a), 0);

        history.clear();
        assert_eq!(history.score(1, b), 0);
    }

    #[test]
    fn test_history_ignores_rows_out_of_range() {
        let mut history = HistoryTable::new();
        history.ensure_depth(0);
        history.record(100, mv(&[3]));
        assert_eq!(history.score(100, mv(&[3])), 0);
    }

    #[test]
    fn test_select_best_and_sort() {
        let mut moves = vec![mv(&[2]), mv(&[3]), mv(&[4]), mv(&[5])];
        let mut scores = vec![1, 9, 3, 9];
        select_best(&mut moves, &mut scores, 0);
        assert_eq!(moves[0], mv(&[3]));
        assert_eq!(scores[0], 9);

        insertion_sort(&mut moves, &mut scores);
        assert_eq!(scores, vec![9, 9, 3, 1]);
        // Stable among equal scores.
        assert_eq!(moves[0], mv(&[3]));
        assert_eq!(moves[1], mv(&[5]));
    }
}
