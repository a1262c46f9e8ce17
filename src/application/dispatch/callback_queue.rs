//! Per-channel FIFO of completion sinks.
//!
//! The dispatcher records a sink before writing its frame and takes it back
//! with [`CallbackQueue::dequeue_if`] when the write fails.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

pub struct CallbackQueue<T> {
    queues: Mutex<HashMap<String, VecDeque<T>>>,
}

impl<T> CallbackQueue<T> {
    pub fn new() -> Self {
        Self {
            queues: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, VecDeque<T>>> {
        self.queues.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record `item` at the tail of `key`'s queue.
    pub fn enqueue(&self, key: &str, item: T) {
        self.lock().entry(key.to_string()).or_default().push_back(item);
    }

    /// Pop the head of `key`'s queue.
    pub fn dequeue(&self, key: &str) -> Option<T> {
        self.dequeue_if(key, |_| true)
    }

    /// Pop the head of `key`'s queue only if it satisfies `accept`.
    pub fn dequeue_if(&self, key: &str, accept: impl FnOnce(&T) -> bool) -> Option<T> {
        let mut queues = self.lock();
        let queue = queues.get_mut(key)?;
        if !queue.front().is_some_and(accept) {
            return None;
        }
        let item = queue.pop_front();
        if queue.is_empty() {
            queues.remove(key);
        }
        item
    }

    /// Remove and return every item queued for `key`, oldest first.
    pub fn drain(&self, key: &str) -> Vec<T> {
        self.lock()
            .remove(key)
            .map(Vec::from)
            .unwrap_or_default()
    }

    /// Remove every item of every channel.
    pub fn drain_all(&self) -> Vec<(String, T)> {
        self.lock()
            .drain()
            .flat_map(|(key, queue)| queue.into_iter().map(move |item| (key.clone(), item)))
            .collect()
    }

    pub fn len(&self, key: &str) -> usize {
        self.lock().get(key).map_or(0, VecDeque::len)
    }

    pub fn is_empty(&self, key: &str) -> bool {
        self.len(key) == 0
    }

    /// Number of channels with at least one queued item.
    pub fn channel_count(&self) -> usize {
        self.lock().len()
    }
}

impl<T> Default for CallbackQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enqueue_then_dequeue_is_fifo_per_key() {
        let queue = CallbackQueue::new();
        queue.enqueue("cp1", 1);
        queue.enqueue("cp1", 2);
        queue.enqueue("cp2", 3);

        assert_eq!(queue.dequeue("cp1"), Some(1));
        assert_eq!(queue.dequeue("cp1"), Some(2));
        assert_eq!(queue.dequeue("cp1"), None);
        assert_eq!(queue.len("cp2"), 1);
        assert_eq!(queue.channel_count(), 1);
    }

    #[test]
    fn conditional_dequeue_checks_the_head() {
        let queue = CallbackQueue::new();
        queue.enqueue("main", 7);
        assert_eq!(queue.dequeue_if("main", |head| *head == 8), None);
        assert_eq!(queue.dequeue_if("main", |head| *head == 7), Some(7));
        assert_eq!(queue.dequeue_if("main", |_| true), None);
        assert_eq!(queue.channel_count(), 0);
    }

    #[test]
    fn drain_empties_the_channel() {
        let queue = CallbackQueue::new();
        for i in 0..3 {
            queue.enqueue("cp1", i);
        }
        queue.enqueue("cp2", 9);

        assert_eq!(queue.drain("cp1"), vec![0, 1, 2]);
        assert!(queue.is_empty("cp1"));
        assert_eq!(queue.drain_all(), vec![("cp2".to_string(), 9)]);
        assert_eq!(queue.channel_count(), 0);
    }
}
