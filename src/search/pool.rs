//! Fixed-capacity node pools.
//!
//! A worker owns one pool at a time and creates every node it expands in
//! it, two slots per main-search depth. A worker that finishes a node
//! another worker created frees the slot in the creator's pool. The pool
//! goes back to the coordinator once its last node is freed.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use super::node::{NodeId, SearchNode};

pub(crate) struct NodePool<P> {
    id: u32,
    nodes: Vec<SearchNode<P>>,
    used: Vec<AtomicBool>,
    num_used: AtomicUsize,
}

impl<P> NodePool<P> {
    /// Pool able to hold nodes at main-search depths `0..=max_f_depth`.
    pub(crate) fn new(id: u32, max_f_depth: usize) -> Self {
        let capacity = (max_f_depth + 1) * 2;
        NodePool {
            id,
            nodes: (0..capacity)
                .map(|slot| SearchNode::new(NodeId { pool: id, slot: slot as u32 }))
                .collect(),
            used: (0..capacity).map(|_| AtomicBool::new(false)).collect(),
            num_used: AtomicUsize::new(0),
        }
    }

    #[inline]
    pub(crate) fn id(&self) -> u32 {
        self.id
    }

    #[inline]
    pub(crate) fn node(&self, slot: u32) -> Option<&SearchNode<P>> {
        self.nodes.get(slot as usize)
    }

    #[inline]
    pub(crate) fn num_used(&self) -> usize {
        self.num_used.load(Ordering::Acquire)
    }

    #[inline]
    pub(crate) fn is_empty(&self) -> bool {
        self.num_used() == 0
    }

    /// Reserve a slot for a node at `f_depth`.
    ///
    /// Only the owning worker acquires, so the two slots of a depth are
    /// contended only with concurrent frees.
    pub(crate) fn acquire(&self, f_depth: usize) -> Option<NodeId> {
        let base = f_depth * 2;
        let slot = (base..base + 2)
            .filter(|&s| s < self.used.len())
            .find(|&s| {
                self.used[s]
                    .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
            })?;
        self.num_used.fetch_add(1, Ordering::AcqRel);
        Some(NodeId {
            pool: self.id,
            slot: slot as u32,
        })
    }

    /// Release `slot`. Returns true if the pool is now empty.
    pub(crate) fn release(&self, slot: u32) -> bool {
        let slot = slot as usize;
        debug_assert!(self.used[slot].load(Ordering::Acquire));
        self.used[slot].store(false, Ordering::Release);
        self.num_used.fetch_sub(1, Ordering::AcqRel) == 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_two_slots_per_depth() {
        let pool: NodePool<()> = NodePool::new(3, 2);
        let a = pool.acquire(1).expect("first slot");
        let b = pool.acquire(1).expect("second slot");
        assert_eq!((a.slot, b.slot), (2, 3));
        assert_eq!(a.pool, 3);
        assert!(pool.acquire(1).is_none());
        assert!(pool.acquire(3).is_none());
        assert_eq!(pool.num_used(), 2);

        assert!(!pool.release(a.slot));
        assert!(pool.release(b.slot));
        assert!(pool.is_empty());
    }
}
