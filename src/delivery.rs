// src/delivery.rs
//! Bounded per-subscriber delivery queue.
//!
//! The dispatcher pushes without ever waiting; the transport drains with
//! [`DeliveryReceiver::recv`]. When the queue is full the configured
//! [`DropPolicy`] decides which item is lost, and the loss is counted so the
//! transport can tell its client.
//!
//! `push` and `close` share one lock: once `close` has returned, no later
//! push is accepted.

use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tokio::sync::Notify;

use crate::error::ConfigError;
use crate::item::Item;

/// What to do when a subscriber's queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropPolicy {
    /// Evict the oldest queued item to make room.
    #[default]
    DropOldest,
    /// Keep the queue as is and discard the incoming item.
    DropNewest,
}

impl fmt::Display for DropPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DropPolicy::DropOldest => f.write_str("drop_oldest"),
            DropPolicy::DropNewest => f.write_str("drop_newest"),
        }
    }
}

impl FromStr for DropPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "drop_oldest" | "oldest" => Ok(DropPolicy::DropOldest),
            "drop_newest" | "newest" => Ok(DropPolicy::DropNewest),
            _ => Err(ConfigError::DropPolicy(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Queued,
    /// Queued after evicting the oldest entry.
    DroppedOldest,
    /// Not queued; the queue was full.
    DroppedNewest,
    /// Not queued; the subscription is gone.
    Closed,
}

impl PushOutcome {
    /// The pushed item is now in the queue.
    pub fn accepted(self) -> bool {
        matches!(self, PushOutcome::Queued | PushOutcome::DroppedOldest)
    }

    pub fn overflowed(self) -> bool {
        matches!(self, PushOutcome::DroppedOldest | PushOutcome::DroppedNewest)
    }
}

#[derive(Debug)]
struct State {
    buf: VecDeque<Arc<Item>>,
    closed: bool,
}

#[derive(Debug)]
pub struct DeliveryQueue {
    state: Mutex<State>,
    capacity: usize,
    policy: DropPolicy,
    notify: Notify,
    dropped: AtomicU64,
}

impl DeliveryQueue {
    /// `capacity` of zero is treated as one.
    pub fn bounded(capacity: usize, policy: DropPolicy) -> Arc<Self> {
        let capacity = capacity.max(1);
        Arc::new(Self {
            state: Mutex::new(State {
                buf: VecDeque::with_capacity(capacity.min(1024)),
                closed: false,
            }),
            capacity,
            policy,
            notify: Notify::new(),
            dropped: AtomicU64::new(0),
        })
    }

    /// Non-blocking enqueue.
    pub fn push(&self, item: Arc<Item>) -> PushOutcome {
        let outcome = {
            let mut st = self.state.lock().expect("delivery queue mutex poisoned");
            if st.closed {
                return PushOutcome::Closed;
            }
            if st.buf.len() < self.capacity {
                st.buf.push_back(item);
                PushOutcome::Queued
            } else {
                match self.policy {
                    DropPolicy::DropOldest => {
                        st.buf.pop_front();
                        st.buf.push_back(item);
                        PushOutcome::DroppedOldest
                    }
                    DropPolicy::DropNewest => PushOutcome::DroppedNewest,
                }
            }
        };

        if outcome.overflowed() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        if outcome.accepted() {
            self.notify.notify_one();
        }
        outcome
    }

    /// Stop accepting items. Already queued items can still be drained.
    /// Returns `false` if the queue was already closed.
    pub fn close(&self) -> bool {
        let was_open = {
            let mut st = self.state.lock().expect("delivery queue mutex poisoned");
            !std::mem::replace(&mut st.closed, true)
        };
        self.notify.notify_one();
        was_open
    }

    pub fn is_closed(&self) -> bool {
        self.state
            .lock()
            .expect("delivery queue mutex poisoned")
            .closed
    }

    pub fn len(&self) -> usize {
        self.state
            .lock()
            .expect("delivery queue mutex poisoned")
            .buf
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total items lost to overflow since creation.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn pop(&self) -> Result<Option<Arc<Item>>, ()> {
        let mut st = self.state.lock().expect("delivery queue mutex poisoned");
        match st.buf.pop_front() {
            Some(item) => Ok(Some(item)),
            None if st.closed => Err(()),
            None => Ok(None),
        }
    }
}

/// Consumer side of a [`DeliveryQueue`], owned by the transport.
#[derive(Debug)]
pub struct DeliveryReceiver {
    queue: Arc<DeliveryQueue>,
    reported_drops: u64,
}

impl DeliveryReceiver {
    pub fn new(queue: Arc<DeliveryQueue>) -> Self {
        Self {
            queue,
            reported_drops: 0,
        }
    }

    /// Next item, waiting if the queue is empty. `None` once the queue is
    /// closed and drained.
    pub async fn recv(&mut self) -> Option<Arc<Item>> {
        loop {
            let notified = self.queue.notify.notified();
            match self.queue.pop() {
                Ok(Some(item)) => return Some(item),
                Ok(None) => {}
                Err(()) => {
                    // leave the wake-up for a later recv after close
                    self.queue.notify.notify_one();
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Next item if one is queued right now.
    pub fn try_recv(&mut self) -> Option<Arc<Item>> {
        self.queue.pop().ok().flatten()
    }

    /// Items dropped since the previous call.
    pub fn take_dropped(&mut self) -> u64 {
        let total = self.queue.dropped();
        let fresh = total.saturating_sub(self.reported_drops);
        self.reported_drops = total;
        fresh
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: &str) -> Arc<Item> {
        Arc::new(Item {
            id: id.into(),
            title: String::new(),
            body: None,
            url: String::new(),
            score: 0,
            source_bucket: "rust".into(),
            author: None,
            created_utc: 0.0,
            nsfw: false,
            is_self: true,
            category_tag: None,
            comment_count: 0,
            comments: None,
        })
    }

    #[test]
    fn drop_oldest_evicts_front() {
        let q = DeliveryQueue::bounded(2, DropPolicy::DropOldest);
        assert_eq!(q.push(item("a")), PushOutcome::Queued);
        assert_eq!(q.push(item("b")), PushOutcome::Queued);
        assert_eq!(q.push(item("c")), PushOutcome::DroppedOldest);
        let mut rx = DeliveryReceiver::new(q.clone());
        assert_eq!(rx.try_recv().unwrap().id, "b");
        assert_eq!(rx.try_recv().unwrap().id, "c");
        assert_eq!(rx.take_dropped(), 1);
        assert_eq!(rx.take_dropped(), 0);
    }

    #[test]
    fn drop_newest_keeps_queue() {
        let q = DeliveryQueue::bounded(1, DropPolicy::DropNewest);
        assert_eq!(q.push(item("a")), PushOutcome::Queued);
        assert_eq!(q.push(item("b")), PushOutcome::DroppedNewest);
        let mut rx = DeliveryReceiver::new(q.clone());
        assert_eq!(rx.try_recv().unwrap().id, "a");
        assert!(rx.try_recv().is_none());
        assert_eq!(q.dropped(), 1);
    }

    #[test]
    fn closed_queue_rejects_pushes() {
        let q = DeliveryQueue::bounded(4, DropPolicy::DropOldest);
        assert!(q.close());
        assert!(!q.close());
        assert_eq!(q.push(item("a")), PushOutcome::Closed);
    }

    #[tokio::test]
    async fn recv_drains_then_ends_after_close() {
        let q = DeliveryQueue::bounded(4, DropPolicy::DropOldest);
        let mut rx = DeliveryReceiver::new(q.clone());
        q.push(item("a"));
        q.close();
        assert_eq!(rx.recv().await.unwrap().id, "a");
        assert!(rx.recv().await.is_none());
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn recv_wakes_on_push() {
        let q = DeliveryQueue::bounded(4, DropPolicy::DropOldest);
        let mut rx = DeliveryReceiver::new(q.clone());
        let waiter = tokio::spawn(async move { rx.recv().await.map(|i| i.id.clone()) });
        tokio::task::yield_now().await;
        q.push(item("late"));
        assert_eq!(waiter.await.unwrap(), Some("late".to_string()));
    }

    #[test]
    fn policy_parses() {
        assert_eq!("drop_newest".parse::<DropPolicy>(), Ok(DropPolicy::DropNewest));
        assert!("lifo".parse::<DropPolicy>().is_err());
    }
}
