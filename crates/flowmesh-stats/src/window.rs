//! Size-bounded FIFO sample window.

use std::collections::VecDeque;

/// An ordered, size-bounded, append-only buffer. Inserting past capacity
/// evicts the oldest item; eviction order is strictly first-in-first-out.
///
/// Owned exclusively by the statistics entry that created it; never shared
/// across threads.
#[derive(Debug, Clone)]
pub struct FixedWindow<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T> FixedWindow<T> {
    /// Create a window holding at most `capacity` items.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero; a window must hold at least one item.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity >= 1, "window capacity must be at least 1");
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append one item, evicting the oldest when full.
    pub fn add(&mut self, item: T) {
        if self.items.len() == self.capacity {
            self.items.pop_front();
        }
        self.items.push_back(item);
    }

    /// Append many items; only the last `capacity` of the combined
    /// contents survive.
    pub fn add_range<I>(&mut self, items: I)
    where
        I: IntoIterator<Item = T>,
    {
        for item in items {
            self.add(item);
        }
    }

    /// Current contents, oldest to newest.
    pub fn items(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }

    pub fn first(&self) -> Option<&T> {
        self.items.front()
    }

    pub fn last(&self) -> Option<&T> {
        self.items.back()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_evicts_oldest_at_capacity() {
        let mut window = FixedWindow::new(3);
        window.add_range([1, 2, 3]);
        assert_eq!(window.items().copied().collect::<Vec<_>>(), vec![1, 2, 3]);

        window.add(4);
        assert_eq!(window.items().copied().collect::<Vec<_>>(), vec![2, 3, 4]);
        assert_eq!(window.first(), Some(&2));
        assert_eq!(window.last(), Some(&4));
    }

    #[test]
    fn add_range_keeps_only_the_tail() {
        let mut window = FixedWindow::new(3);
        window.add_range(1..=10);
        assert_eq!(window.items().copied().collect::<Vec<_>>(), vec![8, 9, 10]);
    }

    #[test]
    fn capacity_one_keeps_the_newest() {
        let mut window = FixedWindow::new(1);
        assert_eq!(window.capacity(), 1);
        window.add(1);
        window.add(2);
        assert_eq!(window.len(), 1);
        assert_eq!(window.last(), Some(&2));
    }

    #[test]
    #[should_panic(expected = "capacity must be at least 1")]
    fn zero_capacity_is_refused() {
        let _ = FixedWindow::<u64>::new(0);
    }
}
