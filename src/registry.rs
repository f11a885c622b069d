// src/registry.rs
//! Subscription registry: the set of live subscribers and their queues.
//!
//! Register/unregister are O(1) and take the registry lock only for the map
//! update. The dispatcher works from an immutable snapshot that is rebuilt
//! lazily after the set changes, so a dispatch pass never holds the lock while
//! it evaluates filters or pushes items.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde::Serialize;

use crate::delivery::{DeliveryQueue, DeliveryReceiver, DropPolicy, PushOutcome};
use crate::filter::FilterSpec;
use crate::item::Item;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct SubscriptionId(u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// A subscriber's spec plus the queue its transport drains.
#[derive(Debug)]
pub struct Subscription {
    id: SubscriptionId,
    spec: FilterSpec,
    queue: Arc<DeliveryQueue>,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn spec(&self) -> &FilterSpec {
        &self.spec
    }

    pub fn deliver(&self, item: Arc<Item>) -> PushOutcome {
        self.queue.push(item)
    }

    pub fn is_open(&self) -> bool {
        !self.queue.is_closed()
    }
}

/// Point-in-time view of the registry, ordered by registration.
pub type Snapshot = Arc<[Arc<Subscription>]>;

#[derive(Debug, Default)]
struct Inner {
    subs: HashMap<SubscriptionId, Arc<Subscription>>,
    cached: Option<Snapshot>,
}

#[derive(Debug)]
pub struct SubscriptionRegistry {
    inner: Mutex<Inner>,
    next_id: AtomicU64,
    queue_capacity: usize,
    drop_policy: DropPolicy,
}

impl SubscriptionRegistry {
    pub fn new(queue_capacity: usize, drop_policy: DropPolicy) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            next_id: AtomicU64::new(1),
            queue_capacity,
            drop_policy,
        }
    }

    /// Add a subscriber. The returned receiver yields every item delivered to
    /// it until [`unregister`](Self::unregister) is called.
    pub fn register(&self, spec: FilterSpec) -> (SubscriptionId, DeliveryReceiver) {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let queue = DeliveryQueue::bounded(self.queue_capacity, self.drop_policy);
        let sub = Arc::new(Subscription {
            id,
            spec,
            queue: queue.clone(),
        });

        let count = {
            let mut inner = self.inner.lock().expect("registry mutex poisoned");
            inner.subs.insert(id, sub);
            inner.cached = None;
            inner.subs.len()
        };
        metrics::gauge!("subscriptions_active").set(count as f64);
        tracing::info!(target: "registry", %id, active = count, "subscriber registered");

        (id, DeliveryReceiver::new(queue))
    }

    /// Remove a subscriber and close its queue. No delivery is attempted for
    /// it once this returns. Returns `false` for unknown ids.
    pub fn unregister(&self, id: SubscriptionId) -> bool {
        let (removed, count) = {
            let mut inner = self.inner.lock().expect("registry mutex poisoned");
            let removed = inner.subs.remove(&id);
            if removed.is_some() {
                inner.cached = None;
            }
            (removed, inner.subs.len())
        };

        match removed {
            Some(sub) => {
                sub.queue.close();
                metrics::gauge!("subscriptions_active").set(count as f64);
                tracing::info!(target: "registry", %id, active = count, "subscriber removed");
                true
            }
            None => false,
        }
    }

    pub fn snapshot(&self) -> Snapshot {
        let mut inner = self.inner.lock().expect("registry mutex poisoned");
        if let Some(snap) = &inner.cached {
            return snap.clone();
        }
        let mut subs: Vec<Arc<Subscription>> = inner.subs.values().cloned().collect();
        subs.sort_by_key(|s| s.id);
        let snap: Snapshot = subs.into();
        inner.cached = Some(snap.clone());
        snap
    }

    /// Close every queue and empty the registry (shutdown).
    pub fn close_all(&self) -> usize {
        let drained: Vec<Arc<Subscription>> = {
            let mut inner = self.inner.lock().expect("registry mutex poisoned");
            inner.cached = None;
            inner.subs.drain().map(|(_, s)| s).collect()
        };
        for sub in &drained {
            sub.queue.close();
        }
        metrics::gauge!("subscriptions_active").set(0.0);
        drained.len()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("registry mutex poisoned").subs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_is_ordered_and_stable_across_changes() {
        let reg = SubscriptionRegistry::new(8, DropPolicy::DropOldest);
        let (a, _ra) = reg.register(FilterSpec::default());
        let (b, _rb) = reg.register(FilterSpec::default());
        let before = reg.snapshot();
        assert_eq!(
            before.iter().map(|s| s.id()).collect::<Vec<_>>(),
            vec![a, b]
        );

        assert!(reg.unregister(a));
        // the old snapshot is unaffected, the new one reflects the removal
        assert_eq!(before.len(), 2);
        assert_eq!(reg.snapshot().len(), 1);
        assert!(!before[0].is_open());
    }

    #[test]
    fn snapshot_is_cached_until_changed() {
        let reg = SubscriptionRegistry::new(8, DropPolicy::DropOldest);
        let (_id, _rx) = reg.register(FilterSpec::default());
        let s1 = reg.snapshot();
        let s2 = reg.snapshot();
        assert!(Arc::ptr_eq(&s1, &s2));
        let (_id2, _rx2) = reg.register(FilterSpec::default());
        assert!(!Arc::ptr_eq(&s1, &reg.snapshot()));
    }

    #[test]
    fn unregister_unknown_is_noop() {
        let reg = SubscriptionRegistry::new(8, DropPolicy::DropOldest);
        let (id, _rx) = reg.register(FilterSpec::default());
        assert!(reg.unregister(id));
        assert!(!reg.unregister(id));
        assert!(reg.is_empty());
    }

    #[tokio::test]
    async fn close_all_ends_every_receiver() {
        let reg = SubscriptionRegistry::new(8, DropPolicy::DropOldest);
        let (_a, mut ra) = reg.register(FilterSpec::default());
        let (_b, mut rb) = reg.register(FilterSpec::default());
        assert_eq!(reg.close_all(), 2);
        assert!(ra.recv().await.is_none());
        assert!(rb.recv().await.is_none());
    }
}
