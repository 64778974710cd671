//! Per-connection delivery queue.
//!
//! Each live connection owns one bounded FIFO. Producers (the registry's
//! fan-out) never wait: when the queue is full the configured
//! [`BackpressurePolicy`] decides whether the oldest pending event is
//! discarded or the connection is marked for disconnect. A single consumer
//! (the connection's socket task) drains it in order.

use std::collections::VecDeque;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;

/// What a full delivery queue does with a new event.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum BackpressurePolicy {
    /// Discard the oldest queued event and enqueue the new one.
    #[default]
    DropOldest,
    /// Close the queue; the consumer disconnects and the client resyncs.
    Disconnect,
}

/// Result of a non-blocking [`DeliveryQueue::push`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Queued,
    /// Queued after evicting the oldest pending event.
    DroppedOldest,
    /// The queue overflowed under [`BackpressurePolicy::Disconnect`] and is now closed.
    Disconnected,
    /// The queue was already closed; the event was discarded.
    Closed,
}

impl EnqueueOutcome {
    pub fn is_queued(&self) -> bool {
        matches!(self, Self::Queued | Self::DroppedOldest)
    }
}

struct QueueInner<T> {
    items: VecDeque<T>,
    closed: bool,
}

/// Bounded single-consumer FIFO with a non-blocking producer side.
pub struct DeliveryQueue<T> {
    inner: Mutex<QueueInner<T>>,
    notify: Notify,
    capacity: usize,
    policy: BackpressurePolicy,
}

impl<T> DeliveryQueue<T> {
    pub fn new(capacity: usize, policy: BackpressurePolicy) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Mutex::new(QueueInner {
                items: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            notify: Notify::new(),
            capacity,
            policy,
        }
    }

    /// Enqueue without blocking.
    pub fn push(&self, item: T) -> EnqueueOutcome {
        let outcome = {
            let mut inner = self.inner.lock();
            if inner.closed {
                return EnqueueOutcome::Closed;
            }
            if inner.items.len() >= self.capacity {
                match self.policy {
                    BackpressurePolicy::DropOldest => {
                        inner.items.pop_front();
                        inner.items.push_back(item);
                        EnqueueOutcome::DroppedOldest
                    }
                    BackpressurePolicy::Disconnect => {
                        inner.closed = true;
                        inner.items.clear();
                        EnqueueOutcome::Disconnected
                    }
                }
            } else {
                inner.items.push_back(item);
                EnqueueOutcome::Queued
            }
        };
        self.notify.notify_one();
        outcome
    }

    /// Wait for the next event. Returns `None` once the queue is closed and drained.
    ///
    /// Cancel safe: an item is only removed in the poll that returns it.
    pub async fn recv(&self) -> Option<T> {
        loop {
            {
                let mut inner = self.inner.lock();
                if let Some(item) = inner.items.pop_front() {
                    return Some(item);
                }
                if inner.closed {
                    return None;
                }
            }
            self.notify.notified().await;
        }
    }

    /// Pop without waiting.
    pub fn try_recv(&self) -> Option<T> {
        self.inner.lock().items.pop_front()
    }

    /// Close the queue. Pending items can still be drained.
    pub fn close(&self) {
        self.inner.lock().closed = true;
        self.notify.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    pub fn len(&self) -> usize {
        self.inner.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn policy(&self) -> BackpressurePolicy {
        self.policy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_policy_parse() {
        assert_eq!(
            BackpressurePolicy::from_str("drop_oldest").unwrap(),
            BackpressurePolicy::DropOldest
        );
        assert_eq!(
            BackpressurePolicy::from_str("disconnect").unwrap(),
            BackpressurePolicy::Disconnect
        );
        assert!(BackpressurePolicy::from_str("grow").is_err());
    }

    #[tokio::test]
    async fn test_fifo_order() {
        let queue = DeliveryQueue::new(8, BackpressurePolicy::DropOldest);
        for i in 0..5 {
            assert_eq!(queue.push(i), EnqueueOutcome::Queued);
        }
        for i in 0..5 {
            assert_eq!(queue.recv().await, Some(i));
        }
        assert!(queue.is_empty());
    }

    #[test]
    fn test_drop_oldest_keeps_newest() {
        let queue = DeliveryQueue::new(3, BackpressurePolicy::DropOldest);
        for i in 0..3 {
            queue.push(i);
        }
        assert_eq!(queue.push(3), EnqueueOutcome::DroppedOldest);
        assert_eq!(queue.push(4), EnqueueOutcome::DroppedOldest);
        assert_eq!(queue.len(), 3);
        let drained: Vec<_> = std::iter::from_fn(|| queue.try_recv()).collect();
        assert_eq!(drained, vec![2, 3, 4]);
    }

    #[tokio::test]
    async fn test_disconnect_policy_closes_queue() {
        let queue = DeliveryQueue::new(2, BackpressurePolicy::Disconnect);
        queue.push(1);
        queue.push(2);
        assert_eq!(queue.push(3), EnqueueOutcome::Disconnected);
        assert!(queue.is_closed());
        assert_eq!(queue.push(4), EnqueueOutcome::Closed);
        assert_eq!(queue.recv().await, None);
    }

    #[tokio::test]
    async fn test_recv_wakes_on_push() {
        let queue = Arc::new(DeliveryQueue::new(4, BackpressurePolicy::DropOldest));
        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.recv().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.push("hello");
        let got = tokio::time::timeout(Duration::from_secs(1), consumer)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got, Some("hello"));
    }

    #[tokio::test]
    async fn test_close_drains_then_ends() {
        let queue = DeliveryQueue::new(4, BackpressurePolicy::DropOldest);
        queue.push(1);
        queue.close();
        assert_eq!(queue.recv().await, Some(1));
        assert_eq!(queue.recv().await, None);
        assert_eq!(queue.push(2), EnqueueOutcome::Closed);
    }
}
