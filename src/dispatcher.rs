// src/dispatcher.rs
//! Fan-out of one deduplicated item to every matching subscriber.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use metrics::{counter, histogram};

use crate::delivery::PushOutcome;
use crate::filter::matches;
use crate::item::Item;
use crate::persistence::{PersistenceGateway, Scheduled};
use crate::registry::{Subscription, SubscriptionRegistry};
use crate::source::ContentSource;

/// What happened to one item during a dispatch pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Subscriptions in the snapshot.
    pub considered: usize,
    pub matched: usize,
    /// Items accepted by a queue (including drop-oldest evictions).
    pub delivered: usize,
    /// Queue overflows under the drop policy.
    pub dropped: usize,
    /// Matched subscribers that went away before the push.
    pub closed: usize,
    pub enriched: bool,
    pub persisted: bool,
}

pub struct Dispatcher {
    registry: Arc<SubscriptionRegistry>,
    source: Arc<dyn ContentSource>,
    persistence: Arc<PersistenceGateway>,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<SubscriptionRegistry>,
        source: Arc<dyn ContentSource>,
        persistence: Arc<PersistenceGateway>,
    ) -> Self {
        crate::metrics::ensure_described();
        Self {
            registry,
            source,
            persistence,
        }
    }

    /// Evaluate `item` against a registry snapshot and enqueue it for every
    /// match. Never waits on a subscriber. Subscribers without a comment
    /// request are served first; the comment fetch (at most once per item)
    /// only delays the subscribers that asked for it.
    pub async fn dispatch(&self, item: Item) -> DispatchReport {
        let t0 = Instant::now();
        let snapshot = self.registry.snapshot();
        let mut report = DispatchReport {
            considered: snapshot.len(),
            ..Default::default()
        };

        let (with_comments, plain): (Vec<_>, Vec<_>) = snapshot
            .iter()
            .filter(|sub| sub.is_open() && matches(&item, sub.spec()))
            .partition(|sub| sub.spec().wants_comments());
        report.matched = with_comments.len() + plain.len();
        counter!("dispatch_items_total").increment(1);
        if report.matched == 0 {
            return report;
        }
        counter!("dispatch_matches_total").increment(report.matched as u64);

        let base = Arc::new(item);
        let mut wants_persistence = false;

        for sub in plain {
            wants_persistence |= self.push(sub, base.clone(), &mut report);
        }

        if let Some(max_limit) = with_comments.iter().map(|sub| sub.spec().comments_limit()).max() {
            let comments = if base.comments.is_none() {
                report.enriched = true;
                Some(self.enrich(&base, max_limit).await)
            } else {
                None
            };
            let mut enriched_by_limit: HashMap<usize, Arc<Item>> = HashMap::new();
            for sub in with_comments {
                let payload = match &comments {
                    Some(comments) => {
                        let limit = sub.spec().comments_limit();
                        enriched_by_limit
                            .entry(limit)
                            .or_insert_with(|| Arc::new(base.with_comments(comments, limit)))
                            .clone()
                    }
                    None => base.clone(),
                };
                wants_persistence |= self.push(sub, payload, &mut report);
            }
        }

        if wants_persistence {
            report.persisted = self.persistence.schedule(base.clone()) == Scheduled::Spawned;
        }

        histogram!("dispatch_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);
        tracing::debug!(
            target: "dispatch",
            item_id = %base.id,
            matched = report.matched,
            delivered = report.delivered,
            dropped = report.dropped,
            "dispatched"
        );
        report
    }

    /// Push one payload and account for the outcome. Returns `true` when the
    /// item was accepted by a subscriber that allows persistence.
    fn push(&self, sub: &Subscription, payload: Arc<Item>, report: &mut DispatchReport) -> bool {
        let item_id = payload.id.clone();
        let outcome = sub.deliver(payload);
        match outcome {
            PushOutcome::Queued => {}
            PushOutcome::DroppedOldest | PushOutcome::DroppedNewest => {
                report.dropped += 1;
                counter!("delivery_dropped_total").increment(1);
                tracing::debug!(
                    target: "dispatch",
                    subscription = %sub.id(),
                    %item_id,
                    ?outcome,
                    "subscriber queue full"
                );
            }
            PushOutcome::Closed => report.closed += 1,
        }
        if outcome.accepted() {
            report.delivered += 1;
            !sub.spec().opt_out_of_persistence
        } else {
            false
        }
    }

    /// Dispatch `items` one after another, preserving their order.
    pub async fn dispatch_batch(&self, items: Vec<Item>) -> Vec<DispatchReport> {
        let mut reports = Vec::with_capacity(items.len());
        for item in items {
            reports.push(self.dispatch(item).await);
        }
        reports
    }

    /// Comment bodies for `item`; a failed fetch yields an empty list.
    async fn enrich(&self, item: &Item, limit: usize) -> Vec<String> {
        match self.source.list_comments(&item.id, limit).await {
            Ok(comments) => comments,
            Err(e) => {
                counter!("enrichment_failures_total").increment(1);
                tracing::warn!(
                    target: "dispatch",
                    item_id = %item.id,
                    error = %e,
                    "comment fetch failed; delivering without comments"
                );
                Vec::new()
            }
        }
    }
}
