use std::fmt;

use thiserror::Error;

use crate::Ticks;

/// Error returned by [`TimerQueue::push`] when the queue is at capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("timer queue is full")]
pub struct QueueFull;

/// A bounded min-heap of `(deadline, key, payload)` entries.
///
/// Entries are ordered by wrap-aware deadline (see [`Ticks::diff`]), with
/// ties broken by insertion order, so two entries pushed for the same instant
/// pop in FIFO order. `K` is the identity the queue can be searched by (the
/// event loop uses its task ids here); a given key is expected to be present
/// at most once.
///
/// The heap is hand-rolled rather than `std::collections::BinaryHeap` because
/// the scheduler needs [`remove`](TimerQueue::remove) by key and a stable
/// FIFO tie-break, neither of which the standard heap offers.
pub struct TimerQueue<K, V> {
    entries: Vec<Entry<K, V>>,
    capacity: usize,
    seq: u64,
}

struct Entry<K, V> {
    deadline: Ticks,
    seq: u64,
    key: K,
    value: V,
}

impl<K, V> Entry<K, V> {
    fn sorts_before(&self, other: &Self) -> bool {
        match self.deadline.diff(other.deadline) {
            0 => self.seq < other.seq,
            d => d < 0,
        }
    }
}

impl<K: Copy + PartialEq, V> TimerQueue<K, V> {
    /// An empty queue holding at most `capacity` entries.
    pub fn with_capacity(capacity: usize) -> Self {
        TimerQueue {
            entries: Vec::with_capacity(capacity),
            capacity,
            seq: 0,
        }
    }

    /// Number of queued entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the queue holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether any entry carries `key`.
    pub fn contains(&self, key: K) -> bool {
        self.entries.iter().any(|entry| entry.key == key)
    }

    /// Insert an entry, failing when the queue is at capacity.
    pub fn push(&mut self, deadline: Ticks, key: K, value: V) -> Result<(), QueueFull> {
        if self.entries.len() == self.capacity {
            return Err(QueueFull);
        }
        let seq = self.seq;
        self.seq += 1;
        self.entries.push(Entry {
            deadline,
            seq,
            key,
            value,
        });
        self.sift_up(self.entries.len() - 1);
        Ok(())
    }

    /// The earliest deadline in the queue, without removing it.
    pub fn peek_time(&self) -> Option<Ticks> {
        self.entries.first().map(|entry| entry.deadline)
    }

    /// Remove and return the earliest entry.
    pub fn pop(&mut self) -> Option<(Ticks, K, V)> {
        if self.entries.is_empty() {
            return None;
        }
        let entry = self.entries.swap_remove(0);
        if !self.entries.is_empty() {
            self.sift_down(0);
        }
        Some((entry.deadline, entry.key, entry.value))
    }

    /// Drop every entry carrying `key`. No error if none is present.
    pub fn remove(&mut self, key: K) {
        while let Some(pos) = self.entries.iter().position(|entry| entry.key == key) {
            self.entries.swap_remove(pos);
            if pos < self.entries.len() {
                // The element swapped into `pos` may violate the heap
                // property in either direction.
                self.sift_down(pos);
                self.sift_up(pos);
            }
        }
    }

    fn sift_up(&mut self, mut pos: usize) {
        while pos > 0 {
            let parent = (pos - 1) / 2;
            if self.entries[pos].sorts_before(&self.entries[parent]) {
                self.entries.swap(pos, parent);
                pos = parent;
            } else {
                break;
            }
        }
    }

    fn sift_down(&mut self, mut pos: usize) {
        loop {
            let mut earliest = pos;
            for child in [2 * pos + 1, 2 * pos + 2] {
                if child < self.entries.len()
                    && self.entries[child].sorts_before(&self.entries[earliest])
                {
                    earliest = child;
                }
            }
            if earliest == pos {
                break;
            }
            self.entries.swap(pos, earliest);
            pos = earliest;
        }
    }
}

impl<K, V> fmt::Debug for TimerQueue<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerQueue")
            .field("len", &self.entries.len())
            .field("capacity", &self.capacity)
            .field("next", &self.entries.first().map(|entry| entry.deadline))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::{QueueFull, TimerQueue};
    use crate::Ticks;

    fn at(us: u32) -> Ticks {
        Ticks::from_micros(us)
    }

    #[test]
    fn pops_by_deadline_not_insertion() {
        let mut queue = TimerQueue::with_capacity(8);
        queue.push(at(2000), 'a', ()).unwrap();
        queue.push(at(1000), 'b', ()).unwrap();
        queue.push(at(3000), 'c', ()).unwrap();
        assert_eq!(queue.peek_time(), Some(at(1000)));
        let order: Vec<char> = std::iter::from_fn(|| queue.pop()).map(|(_, k, _)| k).collect();
        assert_eq!(order, vec!['b', 'a', 'c']);
    }

    #[test]
    fn fifo_at_equal_deadlines() {
        let mut queue = TimerQueue::with_capacity(8);
        for key in ['a', 'b', 'c', 'd'] {
            queue.push(at(500), key, ()).unwrap();
        }
        let order: Vec<char> = std::iter::from_fn(|| queue.pop()).map(|(_, k, _)| k).collect();
        assert_eq!(order, vec!['a', 'b', 'c', 'd']);
    }

    #[test]
    fn wrap_aware_ordering() {
        let mut queue = TimerQueue::with_capacity(8);
        // `b` wrapped past the counter boundary; numerically smaller but later.
        queue.push(at(4_294_967_000), 'a', ()).unwrap();
        queue.push(at(500), 'b', ()).unwrap();
        let order: Vec<char> = std::iter::from_fn(|| queue.pop()).map(|(_, k, _)| k).collect();
        assert_eq!(order, vec!['a', 'b']);
    }

    #[test]
    fn push_fails_at_capacity() {
        let mut queue = TimerQueue::with_capacity(2);
        queue.push(at(1), 'a', ()).unwrap();
        queue.push(at(2), 'b', ()).unwrap();
        assert_eq!(queue.push(at(3), 'c', ()), Err(QueueFull));
        assert_eq!(queue.len(), 2);
        // Popping frees a slot again.
        queue.pop().unwrap();
        queue.push(at(3), 'c', ()).unwrap();
    }

    #[test]
    fn remove_drops_entry_and_keeps_order() {
        let mut queue = TimerQueue::with_capacity(8);
        queue.push(at(1000), 'a', ()).unwrap();
        queue.push(at(2000), 'b', ()).unwrap();
        queue.push(at(3000), 'c', ()).unwrap();
        queue.push(at(4000), 'd', ()).unwrap();
        queue.remove('b');
        assert!(!queue.contains('b'));
        queue.remove('b'); // absent key is a no-op
        let order: Vec<char> = std::iter::from_fn(|| queue.pop()).map(|(_, k, _)| k).collect();
        assert_eq!(order, vec!['a', 'c', 'd']);
    }

    #[test]
    fn payload_travels_with_the_entry() {
        let mut queue = TimerQueue::with_capacity(4);
        queue.push(at(700), 1u8, "late").unwrap();
        queue.push(at(300), 2u8, "early").unwrap();
        assert_eq!(queue.pop(), Some((at(300), 2, "early")));
        assert_eq!(queue.pop(), Some((at(700), 1, "late")));
        assert_eq!(queue.pop(), None);
    }
}
