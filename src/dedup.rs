// src/dedup.rs
//! Dedup ledger: which item ids were already handed to the dispatcher.
//!
//! Assumes a single active poll cycle at a time. The mutex only guards map
//! operations and is never held across an await point.

use std::collections::HashMap;
use std::sync::Mutex;

/// Monotonic poll-cycle counter used as the ledger timestamp.
pub type Cycle = u64;

/// Bounded map from item id to the last cycle it was seen in.
#[derive(Debug, Default)]
pub struct SeenSet {
    inner: Mutex<HashMap<String, Cycle>>,
}

impl SeenSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seen(&self, id: &str) -> bool {
        self.inner
            .lock()
            .expect("seen set mutex poisoned")
            .contains_key(id)
    }

    /// Record `id` as seen in `cycle`, refreshing an existing entry.
    pub fn mark(&self, id: &str, cycle: Cycle) {
        self.inner
            .lock()
            .expect("seen set mutex poisoned")
            .insert(id.to_string(), cycle);
    }

    /// Returns `true` if `id` is new, marking it in the same critical section.
    /// A repeat sighting refreshes its cycle so it stays suppressed while the
    /// source keeps returning it.
    pub fn check_and_mark(&self, id: &str, cycle: Cycle) -> bool {
        let mut map = self.inner.lock().expect("seen set mutex poisoned");
        match map.get_mut(id) {
            Some(last) => {
                *last = (*last).max(cycle);
                false
            }
            None => {
                map.insert(id.to_string(), cycle);
                true
            }
        }
    }

    /// Drop entries last seen before `horizon`. Returns how many were evicted.
    pub fn evict_older_than(&self, horizon: Cycle) -> usize {
        let mut map = self.inner.lock().expect("seen set mutex poisoned");
        let before = map.len();
        map.retain(|_, last| *last >= horizon);
        before - map.len()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("seen set mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
