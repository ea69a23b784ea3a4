//! Named work queues for background task processing.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::debug;

/// Queue trait for background task processing.
#[async_trait]
pub trait Queue: Send + Sync {
    /// Push an item onto the queue.
    async fn push(&self, queue: &str, item: &str) -> Result<()>;

    /// Pop an item from the queue, waiting up to `timeout_secs` for one.
    ///
    /// A timeout of zero never waits.
    async fn pop(&self, queue: &str, timeout_secs: u64) -> Result<Option<String>>;

    /// Get the number of items in the queue.
    async fn len(&self, queue: &str) -> Result<u64>;

    /// Check if the queue is empty.
    async fn is_empty(&self, queue: &str) -> Result<bool> {
        Ok(self.len(queue).await? == 0)
    }
}

/// In-process FIFO queues keyed by name.
#[derive(Default)]
pub struct MemoryQueue {
    queues: Mutex<HashMap<String, VecDeque<String>>>,
    pushed: Notify,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn try_pop(&self, queue: &str) -> Option<String> {
        self.queues.lock().get_mut(queue)?.pop_front()
    }
}

#[async_trait]
impl Queue for MemoryQueue {
    async fn push(&self, queue: &str, item: &str) -> Result<()> {
        self.queues
            .lock()
            .entry(queue.to_string())
            .or_default()
            .push_back(item.to_string());
        self.pushed.notify_waiters();

        debug!(queue = %queue, "pushed item to queue");
        Ok(())
    }

    async fn pop(&self, queue: &str, timeout_secs: u64) -> Result<Option<String>> {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(timeout_secs);

        loop {
            // Register interest before checking so a push in between is not missed
            let notified = self.pushed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(item) = self.try_pop(queue) {
                debug!(queue = %queue, "popped item from queue");
                return Ok(Some(item));
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(None);
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn len(&self, queue: &str) -> Result<u64> {
        Ok(self
            .queues
            .lock()
            .get(queue)
            .map_or(0, |q| q.len() as u64))
    }
}

impl std::fmt::Debug for MemoryQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryQueue")
            .field("queues", &self.queues.lock().len())
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn fifo_order_per_queue() {
        let queue = MemoryQueue::new();
        queue.push("a", "1").await.unwrap();
        queue.push("a", "2").await.unwrap();
        queue.push("b", "x").await.unwrap();

        assert_eq!(queue.len("a").await.unwrap(), 2);
        assert_eq!(queue.pop("a", 0).await.unwrap().as_deref(), Some("1"));
        assert_eq!(queue.pop("a", 0).await.unwrap().as_deref(), Some("2"));
        assert_eq!(queue.pop("a", 0).await.unwrap(), None);
        assert_eq!(queue.pop("b", 0).await.unwrap().as_deref(), Some("x"));
    }

    #[tokio::test]
    async fn unknown_queue_is_empty() {
        let queue = MemoryQueue::new();
        assert!(queue.is_empty("nothing").await.unwrap());
        assert_eq!(queue.pop("nothing", 0).await.unwrap(), None);
    }

    #[tokio::test]
    async fn pop_times_out() {
        let queue = MemoryQueue::new();
        assert_eq!(queue.pop("q", 1).await.unwrap(), None);
    }

    #[tokio::test]
    async fn blocking_pop_wakes_on_push() {
        let queue = Arc::new(MemoryQueue::new());
        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.pop("q", 5).await })
        };
        tokio::task::yield_now().await;
        queue.push("q", "item").await.unwrap();

        let popped = waiter.await.unwrap().unwrap();
        assert_eq!(popped.as_deref(), Some("item"));
    }
}
