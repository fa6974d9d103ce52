//! Priority-aware FIFO used for pending function items.
//!
//! High priority entries go to the front, normal entries to the back. Every
//! operation takes the queue mutex for its own duration only.

use std::collections::VecDeque;

use parking_lot::Mutex;

use crate::util::serde::Priority;

/// Insert `item` into `deque` according to `priority`.
pub(crate) fn push_prioritized<T>(deque: &mut VecDeque<T>, item: T, priority: Priority) {
    if priority.is_high() {
        deque.push_front(item);
    } else {
        deque.push_back(item);
    }
}

/// Thread-safe double-ended queue with front insertion for high priority items.
#[derive(Debug)]
pub struct WorkQueue<T> {
    items: Mutex<VecDeque<T>>,
}

impl<T> WorkQueue<T> {
    /// Create an empty queue.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
        }
    }

    /// Insert at the front for [`Priority::High`], otherwise at the back.
    pub fn enqueue(&self, item: T, priority: Priority) {
        push_prioritized(&mut self.items.lock(), item, priority);
    }

    /// Remove the front item without blocking.
    pub fn try_dequeue(&self) -> Option<T> {
        self.items.lock().pop_front()
    }

    /// Current number of queued items.
    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    /// Whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    /// Drop every queued item and return how many were removed.
    pub fn clear(&self) -> usize {
        let drained = std::mem::take(&mut *self.items.lock());
        let count = drained.len();
        // drop outside the lock; captured state may be heavy
        drop(drained);
        count
    }
}

impl<T> Default for WorkQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_high_priority_goes_first() {
        let queue = WorkQueue::new();
        queue.enqueue("a", Priority::Normal);
        queue.enqueue("b", Priority::Normal);
        queue.enqueue("c", Priority::Normal);
        queue.enqueue("d", Priority::High);

        let order: Vec<_> = std::iter::from_fn(|| queue.try_dequeue()).collect();
        assert_eq!(order, vec!["d", "a", "b", "c"]);
    }

    #[test]
    fn test_empty_queue_yields_nothing() {
        let queue: WorkQueue<u32> = WorkQueue::new();
        assert!(queue.try_dequeue().is_none());
        assert!(queue.is_empty());
        assert_eq!(queue.len(), 0);
    }

    #[test]
    fn test_clear_reports_count() {
        let queue = WorkQueue::new();
        for i in 0..5 {
            queue.enqueue(i, Priority::Normal);
        }
        assert_eq!(queue.clear(), 5);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_concurrent_dequeue_never_duplicates() {
        let queue = Arc::new(WorkQueue::new());
        for i in 0..1000 {
            queue.enqueue(i, Priority::Normal);
        }

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || {
                    let mut seen = Vec::new();
                    while let Some(item) = queue.try_dequeue() {
                        seen.push(item);
                    }
                    seen
                })
            })
            .collect();

        let mut all = HashSet::new();
        let mut total = 0;
        for handle in handles {
            for item in handle.join().unwrap() {
                total += 1;
                all.insert(item);
            }
        }
        assert_eq!(total, 1000);
        assert_eq!(all.len(), 1000);
    }
}
