//! Compact step and move encoding.
//!
//! A turn consists of up to four ordered steps. A [`Move`] packs up to four
//! one-byte [`Step`]s into a `u32`, least significant byte first, with unused
//! steps filled by [`Step::NONE`]. The meaning of ordinary step values belongs
//! to the game; the search only relies on the reserved values below.

use std::fmt;

/// Maximum number of steps in a single turn.
pub const STEPS_PER_TURN: usize = 4;

/// A single atomic game action, encoded in one byte.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Step(pub u8);

impl Step {
    /// Ends the turn early.
    pub const PASS: Step = Step(0);
    /// Quiescence null step: hands the turn back without changing anything.
    pub const QPASS: Step = Step(1);
    /// Absent step, used to fill unused slots of a [`Move`].
    pub const NONE: Step = Step(0xFF);

    /// Smallest value a game may use for an ordinary step.
    pub const FIRST_ORDINARY: u8 = 2;

    #[inline]
    #[must_use]
    pub const fn new(value: u8) -> Self {
        Step(value)
    }

    #[inline]
    #[must_use]
    pub const fn value(self) -> u8 {
        self.0
    }

    /// True for pass and qpass.
    #[inline]
    #[must_use]
    pub const fn is_pass(self) -> bool {
        self.0 == Step::PASS.0 || self.0 == Step::QPASS.0
    }

    #[inline]
    #[must_use]
    pub const fn is_none(self) -> bool {
        self.0 == Step::NONE.0
    }
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Step::PASS => write!(f, "pass"),
            Step::QPASS => write!(f, "qpass"),
            Step::NONE => write!(f, "-"),
            Step(v) => write!(f, "s{v}"),
        }
    }
}

/// Up to four steps packed into a `u32`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Move(pub u32);

impl Move {
    /// "No move". Every step slot is empty.
    pub const NONE: Move = Move(0xFFFF_FFFF);
    /// A bare pass that ends the turn.
    pub const PASS: Move = Move(0xFFFF_FF00);
    /// A bare quiescence pass.
    pub const QPASS: Move = Move(0xFFFF_FF01);

    /// Raw encoding.
    #[inline]
    #[must_use]
    pub const fn bits(self) -> u32 {
        self.0
    }

    #[inline]
    #[must_use]
    pub const fn is_none(self) -> bool {
        self.0 == Move::NONE.0
    }

    /// Move consisting of one step.
    #[inline]
    #[must_use]
    pub const fn from_step(step: Step) -> Self {
        Move(0xFFFF_FF00 | step.0 as u32)
    }

    /// Builds a move from up to four steps. Extra steps are ignored.
    #[must_use]
    pub fn from_steps(steps: &[Step]) -> Self {
        steps
            .iter()
            .take(STEPS_PER_TURN)
            .enumerate()
            .fold(Move::NONE, |m, (i, s)| m.with_step(i, *s))
    }

    /// Step at index `idx` (0..4). Out of range indices return [`Step::NONE`].
    #[inline]
    #[must_use]
    pub const fn step(self, idx: usize) -> Step {
        if idx >= STEPS_PER_TURN {
            return Step::NONE;
        }
        Step(((self.0 >> (idx * 8)) & 0xFF) as u8)
    }

    #[inline]
    #[must_use]
    fn with_step(self, idx: usize, step: Step) -> Self {
        let shift = idx * 8;
        Move((self.0 & !(0xFF << shift)) | (u32::from(step.0) << shift))
    }

    /// Number of encoded steps, counting passes as one step.
    #[inline]
    #[must_use]
    pub const fn num_steps(self) -> usize {
        if self.0 & 0xFF == 0xFF {
            0
        } else if self.0 & 0xFF00 == 0xFF00 {
            1
        } else if self.0 & 0x00FF_0000 == 0x00FF_0000 {
            2
        } else if self.0 & 0xFF00_0000 == 0xFF00_0000 {
            3
        } else {
            4
        }
    }

    /// Number of steps the move consumes from the turn. A trailing pass or
    /// qpass ends the turn, so such a move always consumes all four.
    #[must_use]
    pub fn num_real_steps(self) -> usize {
        let ns = self.num_steps();
        if ns == 0 {
            return 0;
        }
        if self.step(ns - 1).is_pass() {
            STEPS_PER_TURN
        } else {
            ns
        }
    }

    /// Replaces everything from step `idx` onward with the steps of `suffix`.
    #[inline]
    #[must_use]
    pub fn concat(self, suffix: Move, idx: usize) -> Self {
        if idx == 0 {
            return suffix;
        }
        if idx >= STEPS_PER_TURN {
            return self;
        }
        let shift = idx * 8;
        let prefix = self.0 & ((1u32 << shift) - 1);
        Move(prefix | (suffix.0 << shift))
    }

    /// True if every step of `self` matches the corresponding step of `other`.
    #[must_use]
    pub fn is_prefix_of(self, other: Move) -> bool {
        let ns = self.num_steps();
        (0..ns).all(|i| self.step(i) == other.step(i))
    }

    /// Drops every pass and qpass step, keeping the remaining steps in order.
    #[must_use]
    pub fn strip_passes(self) -> Self {
        let mut out = Move::NONE;
        let mut n = 0;
        for i in 0..self.num_steps() {
            let s = self.step(i);
            if !s.is_pass() {
                out = out.with_step(n, s);
                n += 1;
            }
        }
        out
    }

    /// Iterates over the encoded steps.
    pub fn steps(self) -> impl Iterator<Item = Step> {
        (0..self.num_steps()).map(move |i| self.step(i))
    }
}

impl Default for Move {
    fn default() -> Self {
        Move::NONE
    }
}

impl fmt::Debug for Move {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            return write!(f, "Move(none)");
        }
        write!(f, "Move(")?;
        for (i, s) in self.steps().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{s:?}")?;
        }
        write!(f, ")")
    }
}

impl fmt::Display for Move {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}", self.0)
    }
}
