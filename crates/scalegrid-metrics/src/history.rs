//! Fixed-capacity FIFO history.

use std::collections::VecDeque;

/// Ring buffer that keeps the most recent `capacity` entries.
///
/// Entries are stored oldest-first; pushing into a full buffer evicts
/// the oldest entry.
#[derive(Debug, Clone)]
pub struct BoundedHistory<T> {
    entries: VecDeque<T>,
    capacity: usize,
}

impl<T> BoundedHistory<T> {
    /// Create an empty history. A capacity of zero is treated as one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append an entry, returning the evicted one if the buffer was full.
    pub fn push(&mut self, entry: T) -> Option<T> {
        let evicted = if self.entries.len() >= self.capacity {
            self.entries.pop_front()
        } else {
            None
        };
        self.entries.push_back(entry);
        evicted
    }

    /// Change the capacity, evicting the oldest entries if it shrinks.
    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity.max(1);
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
    }

    pub fn latest(&self) -> Option<&T> {
        self.entries.back()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Iterate oldest-first.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.entries.iter()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl<T: Clone> BoundedHistory<T> {
    /// Copy out the entries, most recent last.
    pub fn to_vec(&self) -> Vec<T> {
        self.entries.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evicts_oldest_first() {
        let mut h = BoundedHistory::new(3);
        assert_eq!(h.push(1), None);
        assert_eq!(h.push(2), None);
        assert_eq!(h.push(3), None);
        assert_eq!(h.push(4), Some(1));
        assert_eq!(h.to_vec(), vec![2, 3, 4]);
        assert_eq!(h.latest(), Some(&4));
    }

    #[test]
    fn never_exceeds_capacity() {
        let mut h = BoundedHistory::new(100);
        for i in 0..250 {
            h.push(i);
            assert!(h.len() <= 100);
        }
        assert_eq!(h.len(), 100);
        assert_eq!(h.iter().next(), Some(&150));
    }

    #[test]
    fn shrinking_capacity_drops_oldest() {
        let mut h = BoundedHistory::new(5);
        for i in 0..5 {
            h.push(i);
        }
        h.set_capacity(2);
        assert_eq!(h.to_vec(), vec![3, 4]);
        assert_eq!(h.capacity(), 2);
    }

    #[test]
    fn zero_capacity_holds_one() {
        let mut h = BoundedHistory::new(0);
        h.push("a");
        h.push("b");
        assert_eq!(h.to_vec(), vec!["b"]);
    }
}
