use std::cmp::Ordering;
use std::collections::BinaryHeap;

use tokio::time::Instant;

/// Min-heap of fire times. Equal times pop in insertion order.
#[derive(Debug)]
pub struct FireQueue<T> {
    heap: BinaryHeap<Slot<T>>,
    seq: u64,
}

#[derive(Debug)]
struct Slot<T> {
    run_at: Instant,
    seq: u64,
    item: T,
}

impl<T> PartialEq for Slot<T> {
    fn eq(&self, other: &Self) -> bool {
        self.run_at == other.run_at && self.seq == other.seq
    }
}

impl<T> Eq for Slot<T> {}

impl<T> PartialOrd for Slot<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Slot<T> {
    // Reversed: BinaryHeap is a max-heap.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .run_at
            .cmp(&self.run_at)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl<T> Default for FireQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> FireQueue<T> {
    pub fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            seq: 0,
        }
    }

    pub fn push(&mut self, run_at: Instant, item: T) {
        self.seq += 1;
        self.heap.push(Slot {
            run_at,
            seq: self.seq,
            item,
        });
    }

    /// Earliest fire time, if any.
    pub fn peek_time(&self) -> Option<Instant> {
        self.heap.peek().map(|slot| slot.run_at)
    }

    /// Pop the earliest entry if it is due at `now`.
    pub fn pop_due(&mut self, now: Instant) -> Option<(Instant, T)> {
        if self.peek_time()? > now {
            return None;
        }
        self.heap.pop().map(|slot| (slot.run_at, slot.item))
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn clear(&mut self) {
        self.heap.clear();
    }

    /// Drop every entry for which `keep` returns false.
    pub fn retain(&mut self, mut keep: impl FnMut(&T) -> bool) {
        self.heap.retain(|slot| keep(&slot.item));
    }
}
