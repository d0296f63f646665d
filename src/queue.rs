//! Thread-safe FIFO queue of data items
//!
//! The four queues of every manager are the only cross-task data
//! structures in the pipeline. Pops are non-blocking; callers poll with a
//! short sleep instead of waiting on a condition. `len` is an
//! instantaneous observation used for monitoring and drain polling only.

use crate::item::Item;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// FIFO queue with thread-safe push, pop, size and clear.
///
/// Cloning is cheap; clones share the same underlying queue. The lock is
/// held only for the duration of a single O(1) operation.
#[derive(Clone, Default)]
pub struct ItemQueue {
    items: Arc<Mutex<VecDeque<Item>>>,
}

impl ItemQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self {
            items: Arc::new(Mutex::new(VecDeque::new())),
        }
    }

    /// Append an item at the back.
    pub fn push(&self, item: Item) {
        self.items.lock().expect("queue lock poisoned").push_back(item);
    }

    /// Take the item at the front, if any.
    pub fn pop(&self) -> Option<Item> {
        self.items.lock().expect("queue lock poisoned").pop_front()
    }

    /// Instantaneous number of queued items.
    pub fn len(&self) -> usize {
        self.items.lock().expect("queue lock poisoned").len()
    }

    /// True when no items are queued at this instant.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every queued item.
    pub fn clear(&self) {
        self.items.lock().expect("queue lock poisoned").clear();
    }
}
