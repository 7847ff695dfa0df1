//! Blocking multi-producer multi-consumer queue with close semantics.
//!
//! Worker input queues, join output queues, and the executor pool all sit on
//! [`TaskQueue`]. Producers block while a bounded queue is full; consumers
//! block while it is empty. [`close`](TaskQueue::close) wakes every waiter;
//! items already queued remain readable until drained.

use std::collections::VecDeque;

use parking_lot::{Condvar, Mutex};

use crate::error::BrokerError;

/// Outcome of a non-blocking pull.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PullResult<T> {
    /// An item was dequeued.
    Item(T),
    /// The queue is currently empty.
    Empty,
    /// The queue is closed and fully drained.
    Closed,
}

struct Inner<T> {
    items: VecDeque<T>,
    closed: bool,
}

/// Bounded (or unbounded) blocking FIFO queue, safe for any number of
/// producer and consumer threads.
pub struct TaskQueue<T> {
    inner: Mutex<Inner<T>>,
    capacity: Option<usize>,
    not_empty: Condvar,
    not_full: Condvar,
}

impl<T> TaskQueue<T> {
    /// Creates a queue that blocks producers once `capacity` items queue up.
    #[must_use]
    pub fn bounded(capacity: usize) -> Self {
        Self::with_capacity(Some(capacity.max(1)))
    }

    /// Creates a queue that never blocks producers.
    #[must_use]
    pub fn unbounded() -> Self {
        Self::with_capacity(None)
    }

    fn with_capacity(capacity: Option<usize>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                items: VecDeque::new(),
                closed: false,
            }),
            capacity,
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
        }
    }

    /// Enqueues an item, blocking while a bounded queue is at capacity.
    ///
    /// # Errors
    ///
    /// [`BrokerError::Shutdown`] once the queue is closed; the rejected
    /// item is dropped.
    pub fn push_back(&self, item: T) -> Result<(), BrokerError> {
        let mut inner = self.inner.lock();
        loop {
            if inner.closed {
                return Err(BrokerError::Shutdown);
            }
            let full = self
                .capacity
                .is_some_and(|capacity| inner.items.len() >= capacity);
            if !full {
                break;
            }
            self.not_full.wait(&mut inner);
        }
        inner.items.push_back(item);
        drop(inner);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Dequeues the front item, blocking while the queue is empty.
    ///
    /// # Errors
    ///
    /// [`BrokerError::Shutdown`] when the queue is closed and drained.
    pub fn pull_front(&self) -> Result<T, BrokerError> {
        let mut inner = self.inner.lock();
        loop {
            if let Some(item) = inner.items.pop_front() {
                drop(inner);
                self.not_full.notify_one();
                return Ok(item);
            }
            if inner.closed {
                return Err(BrokerError::Shutdown);
            }
            self.not_empty.wait(&mut inner);
        }
    }

    /// Dequeues the front item without blocking.
    pub fn try_pull_front(&self) -> PullResult<T> {
        let mut inner = self.inner.lock();
        if let Some(item) = inner.items.pop_front() {
            drop(inner);
            self.not_full.notify_one();
            return PullResult::Item(item);
        }
        if inner.closed {
            PullResult::Closed
        } else {
            PullResult::Empty
        }
    }

    /// Closes the queue and wakes every blocked producer and consumer.
    /// Queued items remain pullable until the queue drains.
    pub fn close(&self) {
        self.inner.lock().closed = true;
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    /// Whether [`close`](TaskQueue::close) has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    /// Number of currently queued items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().items.len()
    }

    /// Whether the queue holds no items.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().items.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    use super::*;

    #[test]
    fn fifo_order_is_preserved() {
        let queue = TaskQueue::unbounded();
        queue.push_back(1).unwrap();
        queue.push_back(2).unwrap();
        queue.push_back(3).unwrap();

        assert_eq!(queue.len(), 3);
        assert_eq!(queue.pull_front().unwrap(), 1);
        assert_eq!(queue.pull_front().unwrap(), 2);
        assert_eq!(queue.pull_front().unwrap(), 3);
        assert!(queue.is_empty());
    }

    #[test]
    fn try_pull_reports_empty_then_items_then_closed() {
        let queue = TaskQueue::unbounded();
        assert_eq!(queue.try_pull_front(), PullResult::Empty);

        queue.push_back(7).unwrap();
        assert_eq!(queue.try_pull_front(), PullResult::Item(7));

        queue.push_back(8).unwrap();
        queue.close();
        assert_eq!(queue.try_pull_front(), PullResult::Item(8));
        assert_eq!(queue.try_pull_front(), PullResult::Closed);
    }

    #[test]
    fn pull_blocks_until_an_item_arrives() {
        let queue = Arc::new(TaskQueue::unbounded());
        let producer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                queue.push_back(42).unwrap();
            })
        };

        assert_eq!(queue.pull_front().unwrap(), 42);
        producer.join().unwrap();
    }

    #[test]
    fn bounded_push_blocks_until_space_frees_up() {
        let queue = Arc::new(TaskQueue::bounded(1));
        queue.push_back(1).unwrap();

        let producer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.push_back(2))
        };

        thread::sleep(Duration::from_millis(20));
        assert_eq!(queue.pull_front().unwrap(), 1);
        producer.join().unwrap().unwrap();
        assert_eq!(queue.pull_front().unwrap(), 2);
    }

    #[test]
    fn close_wakes_blocked_consumers() {
        let queue: Arc<TaskQueue<i32>> = Arc::new(TaskQueue::unbounded());
        let consumer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.pull_front())
        };

        thread::sleep(Duration::from_millis(20));
        queue.close();
        assert!(matches!(
            consumer.join().unwrap(),
            Err(BrokerError::Shutdown)
        ));
        assert!(matches!(queue.push_back(1), Err(BrokerError::Shutdown)));
    }

    #[test]
    fn many_producers_one_consumer() {
        let queue = Arc::new(TaskQueue::bounded(8));
        let mut producers = Vec::new();
        for base in 0..4 {
            let queue = Arc::clone(&queue);
            producers.push(thread::spawn(move || {
                for i in 0..100 {
                    queue.push_back(base * 100 + i).unwrap();
                }
            }));
        }

        let mut seen = Vec::with_capacity(400);
        for _ in 0..400 {
            seen.push(queue.pull_front().unwrap());
        }
        for producer in producers {
            producer.join().unwrap();
        }

        seen.sort_unstable();
        assert_eq!(seen, (0..400).collect::<Vec<_>>());
    }
}
