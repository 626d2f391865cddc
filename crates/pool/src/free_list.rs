//! Capacity-bounded FIFO of idle connections.

use std::collections::VecDeque;

/// Fixed-capacity queue. A push past capacity is refused and the item is
/// handed back to the caller instead of evicting anything.
#[derive(Debug)]
pub(crate) struct FreeList<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T> FreeList<T> {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append `item`, or give it back if the list is full.
    pub(crate) fn push(&mut self, item: T) -> Result<(), T> {
        if self.items.len() >= self.capacity {
            return Err(item);
        }
        self.items.push_back(item);
        Ok(())
    }

    /// Take the oldest idle item.
    pub(crate) fn pop(&mut self) -> Option<T> {
        self.items.pop_front()
    }

    /// Remove every item, oldest first.
    pub(crate) fn drain(&mut self) -> Vec<T> {
        self.items.drain(..).collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.items.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }
}
