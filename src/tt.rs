//! Transposition table and full-move deduplication table.
//!
//! The transposition table is shared by every search thread without locks.
//! Each slot is a pair of `AtomicU64`s holding `(hash ^ data, data)`. A reader
//! that races with a writer may observe the key of one store and the data of
//! another; the XOR check then fails and the probe is treated as a miss, so
//! `Relaxed` ordering is enough. Writes always overwrite: newer wins.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::SearchError;
use crate::eval::{is_illegality, Bound, Eval, LOSE, LOSE_TERMINAL, WIN, WIN_TERMINAL};
use crate::moves::Move;

/// Default size exponent of the main table (2^24 slots).
pub const DEFAULT_MAIN_HASH_EXP: u32 = 24;
/// Default size exponent of the full-move deduplication table.
pub const DEFAULT_FULLMOVE_HASH_EXP: u32 = 21;

pub const MIN_HASH_EXP: u32 = 10;
pub const MAX_HASH_EXP: u32 = 40;
/// Three indices of this many bits must fit in one 64-bit hash.
pub const MAX_EXISTS_HASH_EXP: u32 = 21;

/// Remaining depth in quarter steps is stored in 9 signed bits.
const DEPTH4_MIN: i32 = -256;
const DEPTH4_MAX: i32 = 255;

/// Unpacked transposition table hit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TtHit {
    pub mv: Move,
    pub eval: Eval,
    /// Remaining depth in quarter steps. Non-positive values are quiescence
    /// levels negated.
    pub depth4: i32,
    pub bound: Bound,
}

/// Packed entry format (64 bits):
/// - bits 0-1:   bound flag (0 = empty)
/// - bits 2-10:  depth4 (9-bit two's complement)
/// - bits 11-31: eval (21-bit two's complement)
/// - bits 32-63: move
fn pack_entry(mv: Move, eval: Eval, depth4: i32, bound: Bound) -> u64 {
    let depth4 = depth4.clamp(DEPTH4_MIN, DEPTH4_MAX);
    let sub: u32 =
        ((eval as u32) << 11) | (((depth4 as u32) & 0x1FF) << 2) | u32::from(bound.to_u8());
    (u64::from(mv.bits()) << 32) | u64::from(sub)
}

fn unpack_entry(data: u64) -> TtHit {
    let sub = data as u32;
    TtHit {
        mv: Move((data >> 32) as u32),
        eval: (sub as i32) >> 11,
        depth4: ((sub << 21) as i32) >> 23,
        bound: Bound::from_u8((sub & 0x3) as u8),
    }
}

/// Distance from root-relative to node-relative terminal evals.
fn rebase_for_store(eval: Eval, c_depth: i32) -> Eval {
    if eval >= WIN_TERMINAL {
        WIN - (WIN - eval - c_depth).max(0)
    } else if eval <= LOSE_TERMINAL {
        LOSE + (eval - LOSE - c_depth).max(0)
    } else {
        eval
    }
}

fn rebase_for_lookup(eval: Eval, c_depth: i32) -> Eval {
    if eval >= WIN_TERMINAL {
        eval - c_depth
    } else if eval <= LOSE_TERMINAL {
        eval + c_depth
    } else {
        eval
    }
}

struct TtSlot {
    key_xor: AtomicU64,
    data: AtomicU64,
}

impl TtSlot {
    fn new() -> Self {
        TtSlot {
            key_xor: AtomicU64::new(0),
            data: AtomicU64::new(0),
        }
    }

    fn store(&self, hash: u64, packed: u64) {
        self.data.store(packed, Ordering::Relaxed);
        self.key_xor.store(hash ^ packed, Ordering::Relaxed);
    }

    fn probe(&self, hash: u64) -> Option<u64> {
        let data = self.data.load(Ordering::Relaxed);
        let key_xor = self.key_xor.load(Ordering::Relaxed);
        // An empty flag never verifies, even for hash 0 against a zeroed slot.
        if key_xor ^ data == hash && (data & 0x3) != 0 {
            Some(data)
        } else {
            None
        }
    }

    fn clear(&self) {
        self.data.store(0, Ordering::Relaxed);
        self.key_xor.store(0, Ordering::Relaxed);
    }
}

/// Lock-free, fixed-size, always-replace transposition table keyed by the
/// situation hash.
pub struct TranspositionTable {
    slots: Box<[TtSlot]>,
    exp: u32,
    mask: u64,
}

impl TranspositionTable {
    /// Table with `2^exp` slots.
    pub fn new(exp: u32) -> Result<Self, SearchError> {
        if !(MIN_HASH_EXP..=MAX_HASH_EXP).contains(&exp) {
            return Err(SearchError::InvalidHashExp {
                exp,
                min: MIN_HASH_EXP,
                max: MAX_HASH_EXP,
            });
        }
        let size = 1usize << exp;
        let slots = (0..size).map(|_| TtSlot::new()).collect::<Vec<_>>();
        Ok(TranspositionTable {
            slots: slots.into_boxed_slice(),
            exp,
            mask: (size as u64) - 1,
        })
    }

    /// Largest exponent whose table fits in `bytes`, never below the minimum.
    #[must_use]
    pub fn exp_for_memory(bytes: u64) -> u32 {
        let slot_size = std::mem::size_of::<TtSlot>() as u64;
        let mut exp = MIN_HASH_EXP;
        while exp < MAX_HASH_EXP && (slot_size << (exp + 1)) <= bytes {
            exp += 1;
        }
        exp
    }

    #[inline]
    #[must_use]
    pub fn exp(&self) -> u32 {
        self.exp
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    #[inline]
    fn slot(&self, hash: u64) -> &TtSlot {
        &self.slots[(hash & self.mask) as usize]
    }

    /// Zero every slot. Not meant to race with a search.
    pub fn clear(&self) {
        for slot in self.slots.iter() {
            slot.clear();
        }
    }

    /// Store a search result for the node with situation hash `hash` searched
    /// `c_depth` steps from the root with `depth4` quarter steps remaining.
    ///
    /// Illegality evals are dropped. Terminal evals are stored relative to the
    /// node so the entry stays valid when reached at another distance.
    pub fn record(&self, hash: u64, c_depth: i32, depth4: i32, eval: Eval, bound: Bound, mv: Move) {
        if is_illegality(eval) || bound == Bound::None {
            return;
        }
        let eval = rebase_for_store(eval, c_depth);
        self.slot(hash).store(hash, pack_entry(mv, eval, depth4, bound));
    }

    /// Look up `hash` for a node `c_depth` steps from the root. A torn or
    /// foreign entry is a miss.
    #[must_use]
    pub fn lookup(&self, hash: u64, c_depth: i32) -> Option<TtHit> {
        self.slot(hash).probe(hash).map(|data| {
            let mut hit = unpack_entry(data);
            hit.eval = rebase_for_lookup(hit.eval, c_depth);
            hit
        })
    }

    /// Fraction of used slots per mille, sampled over the first thousand.
    #[must_use]
    pub fn hashfull(&self) -> u32 {
        let sample = self.slots.len().min(1000);
        let used = self.slots[..sample]
            .iter()
            .filter(|s| s.data.load(Ordering::Relaxed) != 0)
            .count();
        (used * 1000 / sample.max(1)) as u32
    }
}

/// Membership-only table probed at three indices derived from one hash.
///
/// Used single-threaded while enumerating full moves at the root, to skip
/// positions already reached through a different step order. Overwrites are
/// silent, so a lookup may occasionally miss a position recorded earlier.
pub struct ExistsHashTable {
    slots: Vec<u64>,
    exp: u32,
    mask: u64,
}

impl ExistsHashTable {
    pub fn new(exp: u32) -> Result<Self, SearchError> {
        if !(1..=MAX_EXISTS_HASH_EXP).contains(&exp) {
            return Err(SearchError::InvalidHashExp {
                exp,
                min: 1,
                max: MAX_EXISTS_HASH_EXP,
            });
        }
        let size = 1usize << exp;
        let mut table = ExistsHashTable {
            slots: vec![0; size],
            exp,
            mask: (size as u64) - 1,
        };
        table.clear();
        Ok(table)
    }

    #[inline]
    fn indices(&self, hash: u64) -> [usize; 3] {
        [
            (hash & self.mask) as usize,
            ((hash >> self.exp) & self.mask) as usize,
            ((hash >> (2 * self.exp)) & self.mask) as usize,
        ]
    }

    /// Forget everything. Slot zero gets a value that no hash mapping to it can equal.
    pub fn clear(&mut self) {
        self.slots.fill(0);
        self.slots[0] = u64::MAX;
    }

    pub fn record(&mut self, hash: u64) {
        for idx in self.indices(hash) {
            self.slots[idx] = hash;
        }
    }

    #[must_use]
    pub fn contains(&self, hash: u64) -> bool {
        self.indices(hash).iter().all(|&idx| self.slots[idx] == hash)
    }
}
