//! Time management for the iterative-deepening driver.
//!
//! [`TimeControl`] describes a per-move plus reserve clock and converts it
//! into three budgets: a hard minimum, an optimistic target and a hard
//! maximum. While searching, [`SearchClock`] moves the desired time between
//! the hard limits depending on how the search is going.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use parking_lot::Mutex;

use crate::eval::{is_terminal, Eval, LOSE};

use super::constants::MAX_SEARCH_TIME;

/// Reserve kept back on top of one per-move allotment
const TIME_RESERVE_MIN: f64 = 8.0;
const TIME_RESERVE_PERMOVE_FACTOR: f64 = 1.0;
/// Share of reserve surplus spent on one move
const TIME_RESERVE_POS_PROP: f64 = 0.12;
/// Share of reserve deficit recovered on one move
const TIME_RESERVE_NEG_PROP: f64 = 0.16;
/// Share of the per-move time used as a baseline
const TIME_PERMOVE_PROP: f64 = 0.95;
/// Never plan less than this share of the per-move time
const TIME_FORCED_PROP: f64 = 0.75;
/// Seconds lost to communication
const TIME_LAG_ALLOWANCE: f64 = 1.0;
/// Seconds kept free below the absolute per-move limit
const PER_MOVE_MAX_ALLOWANCE: f64 = 5.0;
/// Minimum planned search time in seconds
const TIME_MIN: f64 = 3.0;

/// A game clock, in whole seconds except for the running reserve.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TimeControl {
    /// Seconds granted per move
    pub per_move: i32,
    /// Percent of unused per-move time added to the reserve
    pub percent: i32,
    pub reserve_start: i32,
    pub reserve_max: i32,
    /// Seconds used so far in the game
    pub game_current: i32,
    pub game_max: i32,
    /// Absolute limit for one move
    pub per_move_max: i32,
    /// Seconds already spent on the current move
    pub already_used: i32,
    pub reserve_current: f64,
}

impl Default for TimeControl {
    fn default() -> Self {
        TimeControl {
            per_move: 30,
            percent: 100,
            reserve_start: 90,
            reserve_max: 180,
            game_current: 0,
            game_max: 86400,
            per_move_max: 86400,
            already_used: 0,
            reserve_current: 90.0,
        }
    }
}

/// Time budget of one search, in seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TimeBounds {
    /// Search at least this long, to avoid overflowing the reserve
    pub hard_min: f64,
    /// Planned search time before adjustments
    pub optimistic: f64,
    /// Never search longer than this
    pub hard_max: f64,
}

impl TimeBounds {
    /// The same limit for all three bounds.
    #[must_use]
    pub fn fixed(seconds: f64) -> Self {
        TimeBounds {
            hard_min: seconds,
            optimistic: seconds,
            hard_max: seconds,
        }
    }

    /// No time limit.
    #[must_use]
    pub fn unlimited() -> Self {
        TimeBounds::fixed(MAX_SEARCH_TIME)
    }

    /// Replace a non-positive hard maximum by an effectively infinite one.
    #[must_use]
    pub fn normalized(self) -> Self {
        if self.hard_max <= 0.0 {
            TimeBounds::unlimited()
        } else {
            self
        }
    }
}

impl TimeControl {
    /// Budgets for the next move, capped at `max_seconds`.
    #[must_use]
    pub fn time_bounds(&self, max_seconds: f64) -> TimeBounds {
        let per_move = f64::from(self.per_move);
        let used = f64::from(self.already_used);
        let reserve = self.reserve_current;

        let reserve_delta = reserve - (TIME_RESERVE_PERMOVE_FACTOR * per_move + TIME_RESERVE_MIN);
        let reserve_prop = if reserve_delta < 0.0 {
            TIME_RESERVE_NEG_PROP
        } else {
            TIME_RESERVE_POS_PROP
        };
        let mut time_to_search = (per_move - used) * TIME_PERMOVE_PROP + reserve_delta * reserve_prop;

        if time_to_search < TIME_FORCED_PROP * per_move {
            time_to_search = TIME_FORCED_PROP * per_move;
        }
        time_to_search -= TIME_LAG_ALLOWANCE;

        let max_from_tc = f64::from(self.per_move_max - self.already_used).min(per_move - used + reserve);
        if time_to_search > max_from_tc - PER_MOVE_MAX_ALLOWANCE {
            time_to_search = max_from_tc - PER_MOVE_MAX_ALLOWANCE;
        }
        if time_to_search < TIME_MIN {
            time_to_search = TIME_MIN;
        }
        if time_to_search > max_seconds {
            time_to_search = max_seconds;
        }

        let mut hard_min = if self.reserve_max <= 0 {
            0.0
        } else {
            reserve + per_move - used - f64::from(self.reserve_max - 1)
        };
        let hard_max = max_from_tc - PER_MOVE_MAX_ALLOWANCE;
        if hard_min > hard_max {
            hard_min = hard_max;
        }
        let optimistic = time_to_search.max(hard_min).min(hard_max);

        TimeBounds {
            hard_min,
            optimistic,
            hard_max,
        }
    }
}

// ============================================================================
// DESIRED TIME
// ============================================================================

/// Spend more time when the eval dropped since the search began.
fn eval_drop_factor(base_eval: Eval, current_eval: Eval) -> f64 {
    if is_terminal(base_eval) || is_terminal(current_eval) {
        return 1.0;
    }
    let diff = f64::from(current_eval - base_eval);
    if diff > -300.0 {
        1.0
    } else if diff > -600.0 {
        1.0 + (-300.0 - diff) / 300.0 * 0.1
    } else if diff > -1300.0 {
        1.1 + (-600.0 - diff) / 350.0 * 0.1
    } else if diff > -2200.0 {
        1.3 + (-1300.0 - diff) / 450.0 * 0.1
    } else {
        1.5
    }
}

/// Spend more time early in an iteration, less once most root moves are done.
fn moves_done_factor(done: usize, total: usize) -> f64 {
    if total == 0 {
        return 1.0;
    }
    if done == 0 {
        return 1.1;
    }
    const BANDS: [(usize, usize, usize, f64); 12] = [
        (2, 2, 1000, 1.25),
        (3, 4, 1000, 1.2),
        (4, 1, 100, 1.16),
        (5, 2, 100, 1.12),
        (6, 3, 100, 1.09),
        (7, 5, 100, 1.06),
        (8, 7, 100, 1.03),
        (9, 10, 100, 1.0),
        (10, 20, 100, 0.94),
        (11, 35, 100, 0.90),
        (12, 50, 100, 0.88),
        (13, 80, 100, 0.86),
    ];
    BANDS
        .iter()
        .find(|&&(base, num, den, _)| done <= base + total * num / den)
        .map_or(0.87, |&(_, _, _, factor)| factor)
}

fn depth_factor(depth: i32) -> f64 {
    match depth {
        i32::MIN..=5 => 1.22,
        6 => 1.16,
        7 => 1.09,
        8 => 1.08,
        9 => 1.02,
        10 => 1.0,
        _ => 0.98,
    }
}

#[derive(Debug, Clone, Copy)]
struct ClockTimes {
    bounds: TimeBounds,
    desired: f64,
    base_eval: Eval,
}

/// Wall clock and time budget shared by all workers of one search.
pub(crate) struct SearchClock {
    start: Instant,
    times: Mutex<ClockTimes>,
    /// Cleared while the first iteration runs, which must always complete.
    interruptible: AtomicBool,
}

impl SearchClock {
    pub(crate) fn new(bounds: TimeBounds) -> Self {
        let bounds = bounds.normalized();
        SearchClock {
            start: Instant::now(),
            times: Mutex::new(ClockTimes {
                bounds,
                desired: bounds.optimistic,
                base_eval: LOSE,
            }),
            interruptible: AtomicBool::new(true),
        }
    }

    /// Seconds since the search began.
    #[inline]
    pub(crate) fn elapsed(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }

    pub(crate) fn desired(&self) -> f64 {
        self.times.lock().desired
    }

    pub(crate) fn bounds(&self) -> TimeBounds {
        self.times.lock().bounds
    }

    #[inline]
    pub(crate) fn is_interruptible(&self) -> bool {
        self.interruptible.load(Ordering::Relaxed)
    }

    pub(crate) fn set_interruptible(&self, interruptible: bool) {
        self.interruptible.store(interruptible, Ordering::Relaxed);
    }

    pub(crate) fn is_over(&self) -> bool {
        self.elapsed() > self.desired()
    }

    /// Eval against which later drops are measured.
    pub(crate) fn set_base_eval(&self, eval: Eval) {
        self.times.lock().base_eval = eval;
    }

    /// Recompute the desired time after `done` of `total` root moves at
    /// nominal `depth` produced `current_eval`.
    pub(crate) fn update_desired_time(&self, current_eval: Eval, depth: i32, done: usize, total: usize) {
        let mut times = self.times.lock();
        if current_eval < 0 && is_terminal(current_eval) {
            times.desired = times.bounds.hard_max;
            return;
        }
        let factor = eval_drop_factor(times.base_eval, current_eval)
            * moves_done_factor(done, total)
            * depth_factor(depth);
        times.desired = (times.bounds.optimistic * factor)
            .max(times.bounds.hard_min)
            .min(times.bounds.hard_max);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::WIN;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_default_time_control_bounds() {
        let tc = TimeControl::default();
        let b = tc.time_bounds(MAX_SEARCH_TIME);
        // delta = 90 - 38 = 52; 30 * 0.95 + 52 * 0.12 - 1 = 33.74
        assert!(close(b.optimistic, 33.74));
        // min(86400, 30 + 90) - 5
        assert!(close(b.hard_max, 115.0));
        // 90 + 30 - 179
        assert!(close(b.hard_min, -59.0));
    }

    #[test]
    fn test_low_reserve_still_plans_forced_share() {
        let tc = TimeControl {
            reserve_current: 0.0,
            ..TimeControl::default()
        };
        let b = tc.time_bounds(MAX_SEARCH_TIME);
        // 0.75 * 30 - 1
        assert!(close(b.optimistic, 21.5));
        assert!(close(b.hard_max, 25.0));
    }

    #[test]
    fn test_max_seconds_caps_optimistic() {
        let b = TimeControl::default().time_bounds(10.0);
        assert!(close(b.optimistic, 10.0));
        assert!(b.hard_max > 10.0);
    }

    #[test]
    fn test_hard_min_never_exceeds_hard_max() {
        let tc = TimeControl {
            reserve_current: 500.0,
            reserve_max: 10,
            per_move_max: 20,
            ..TimeControl::default()
        };
        let b = tc.time_bounds(MAX_SEARCH_TIME);
        assert!(b.hard_min <= b.hard_max);
        assert!(b.optimistic >= b.hard_min && b.optimistic <= b.hard_max);
    }

    #[test]
    fn test_factors() {
        assert!(close(eval_drop_factor(0, -100), 1.0));
        assert!(close(eval_drop_factor(0, -450), 1.05));
        assert!(close(eval_drop_factor(0, -5000), 1.5));
        assert!(close(eval_drop_factor(LOSE, -5000), 1.0));

        assert!(close(moves_done_factor(0, 0), 1.0));
        assert!(close(moves_done_factor(0, 50), 1.1));
        assert!(close(moves_done_factor(1, 50), 1.25));
        assert!(close(moves_done_factor(10, 10), 1.0));
        assert!(close(moves_done_factor(50, 10), 0.87));

        assert!(close(depth_factor(3), 1.22));
        assert!(close(depth_factor(10), 1.0));
        assert!(close(depth_factor(40), 0.98));
    }

    #[test]
    fn test_clock_desired_time_is_clamped() {
        let clock = SearchClock::new(TimeBounds {
            hard_min: 1.0,
            optimistic: 2.0,
            hard_max: 2.2,
        });
        clock.set_base_eval(0);
        clock.update_desired_time(-5000, 3, 0, 10);
        assert!(close(clock.desired(), 2.2));

        clock.update_desired_time(LOSE + 10, 3, 0, 10);
        assert!(close(clock.desired(), 2.2));

        clock.update_desired_time(0, 12, 10, 10);
        assert!(close(clock.desired(), 2.0 * 0.98));
    }

    #[test]
    fn test_losing_terminal_eval_uses_hard_max() {
        let clock = SearchClock::new(TimeBounds {
            hard_min: 1.0,
            optimistic: 2.0,
            hard_max: 50.0,
        });
        clock.set_base_eval(0);

        // Even the largest drop stays well short of the hard maximum.
        clock.update_desired_time(-5000, 3, 0, 10);
        assert!(close(clock.desired(), 2.0 * 1.5 * 1.1 * 1.22));

        clock.update_desired_time(WIN - 12, 3, 0, 10);
        assert!(clock.desired() < 50.0);

        clock.update_desired_time(LOSE + 12, 3, 5, 10);
        assert!(close(clock.desired(), 50.0));
        assert!(!clock.is_over());
    }

    #[test]
    fn test_unlimited_bounds() {
        let clock = SearchClock::new(TimeBounds::fixed(0.0));
        assert!(close(clock.bounds().hard_max, MAX_SEARCH_TIME));
        assert!(!clock.is_over());
    }
}
