//! Unbounded FIFO with a cancellable blocking dequeue
//!
//! Safe for many producers; assumes a single consumer.

use std::collections::VecDeque;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::kinds::NamespacedName;

/// Outcome of a data-plane deployment for one gateway
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueueObject {
    pub gateway: NamespacedName,
    /// `None` when the deployment succeeded
    pub error: Option<String>,
}

#[derive(Debug)]
pub struct Queue<T> {
    items: Mutex<VecDeque<T>>,
    notify: Notify,
}

impl<T> Default for Queue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Queue<T> {
    pub fn new() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
        }
    }

    /// Append an item and wake the consumer without blocking
    pub fn enqueue(&self, item: T) {
        self.items.lock().push_back(item);
        // Notify keeps at most one stored permit, so repeated posts coalesce.
        self.notify.notify_one();
    }

    /// Take the oldest item, waiting until one arrives
    ///
    /// Returns `None` once the token is cancelled and the queue is empty.
    pub async fn dequeue(&self, token: &CancellationToken) -> Option<T> {
        loop {
            if let Some(item) = self.items.lock().pop_front() {
                return Some(item);
            }

            tokio::select! {
                biased;
                _ = token.cancelled() => return None,
                _ = self.notify.notified() => {}
            }
        }
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }
}
