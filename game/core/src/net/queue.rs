use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

/// A mutex-guarded FIFO used to hand work between network workers and the
/// game loop. Single operations can go through the convenience methods;
/// compound check-then-pop sequences must run on a held [`lock`] guard.
///
/// Items produced by one worker come out in production order, so messages
/// belonging to a single connection (always fed by one receive worker) stay
/// ordered. No order is promised across producers.
///
/// [`lock`]: SharedQueue::lock
pub struct SharedQueue<T> {
    inner: Mutex<VecDeque<T>>,
}

impl<T> SharedQueue<T> {
    pub fn new() -> SharedQueue<T> {
        SharedQueue {
            inner: Mutex::new(VecDeque::new()),
        }
    }

    /// Acquires the queue lock. A poisoned lock is taken over; the queue
    /// holds plain data that stays consistent across a panicking holder.
    #[inline]
    pub fn lock(&self) -> QueueGuard<'_, T> {
        let guard = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        QueueGuard { queue: guard }
    }

    #[inline]
    pub fn push(&self, item: T) {
        self.lock().push(item);
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.lock().len()
    }
}

pub struct QueueGuard<'a, T> {
    queue: MutexGuard<'a, VecDeque<T>>,
}

impl<'a, T> QueueGuard<'a, T> {
    #[inline]
    pub fn push(&mut self, item: T) {
        self.queue.push_back(item);
    }

    #[inline]
    pub fn pop(&mut self) -> Option<T> {
        self.queue.pop_front()
    }

    #[inline]
    pub fn front(&self) -> Option<&T> {
        self.queue.front()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.queue.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_fifo_order() {
        let queue = SharedQueue::new();

        queue.push(1);
        queue.push(2);
        queue.push(3);

        let mut guard = queue.lock();
        assert_eq!(guard.pop(), Some(1));
        assert_eq!(guard.pop(), Some(2));
        assert_eq!(guard.pop(), Some(3));
        assert_eq!(guard.pop(), None);
    }

    #[test]
    fn test_compound_drain_under_one_guard() {
        let queue = SharedQueue::new();

        queue.push("a");
        queue.push("b");

        let mut drained = Vec::new();
        let mut guard = queue.lock();
        while let Some(item) = guard.pop() {
            drained.push(item);
        }
        drop(guard);

        assert_eq!(drained, vec!["a", "b"]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_front_leaves_item() {
        let queue = SharedQueue::new();
        queue.push(7);

        let guard = queue.lock();
        assert_eq!(guard.front(), Some(&7));
        assert_eq!(guard.len(), 1);
    }

    #[test]
    fn test_concurrent_producers() {
        let queue = Arc::new(SharedQueue::new());

        let handles: Vec<_> = (0..4)
            .map(|producer| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || {
                    for item in 0..100 {
                        queue.push((producer, item));
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(queue.len(), 400);

        // Per-producer order survives interleaving.
        let mut last_seen = [None; 4];
        let mut guard = queue.lock();
        while let Some((producer, item)) = guard.pop() {
            if let Some(previous) = last_seen[producer] {
                assert!(item > previous);
            }
            last_seen[producer] = Some(item);
        }
    }
}
