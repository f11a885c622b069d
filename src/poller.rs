// src/poller.rs
//! Periodic pull from the content source.
//!
//! One cycle = one `list_posts` call. New ids are marked in the ledger and
//! dispatched in the order the source returned them; ids already in the
//! ledger are skipped. Cycles never overlap: the loop awaits each cycle before
//! waiting for the next tick, and a late tick delays the schedule instead of
//! bursting.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use metrics::{counter, gauge, histogram};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use crate::config::PollerConfig;
use crate::dedup::{Cycle, SeenSet};
use crate::dispatcher::Dispatcher;
use crate::error::SourceError;
use crate::item::Item;
use crate::source::{bucket_path, ContentSource};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub cycle: Cycle,
    pub fetched: usize,
    pub fresh: usize,
    pub duplicates: usize,
    pub evicted: usize,
    /// Sum of per-item deliveries across subscribers.
    pub delivered: usize,
}

pub struct SourcePoller {
    source: Arc<dyn ContentSource>,
    ledger: Arc<SeenSet>,
    dispatcher: Arc<Dispatcher>,
    cfg: PollerConfig,
    bucket: Option<String>,
    cycle: AtomicU64,
}

impl SourcePoller {
    pub fn new(
        source: Arc<dyn ContentSource>,
        ledger: Arc<SeenSet>,
        dispatcher: Arc<Dispatcher>,
        cfg: PollerConfig,
    ) -> Self {
        let bucket = bucket_path(&cfg.subreddits);
        Self {
            source,
            ledger,
            dispatcher,
            cfg,
            bucket,
            cycle: AtomicU64::new(0),
        }
    }

    /// Number of cycles started so far.
    pub fn cycles(&self) -> Cycle {
        self.cycle.load(Ordering::SeqCst)
    }

    /// Run a single cycle. A source failure yields no items at all and
    /// leaves the ledger untouched.
    pub async fn poll_once(&self) -> Result<CycleReport, SourceError> {
        crate::metrics::ensure_described();
        let t0 = Instant::now();
        let cycle = self.cycle.fetch_add(1, Ordering::SeqCst) + 1;
        counter!("poll_cycles_total").increment(1);

        let posts = match self
            .source
            .list_posts(self.bucket.as_deref(), self.cfg.sort, self.cfg.limit)
            .await
        {
            Ok(posts) => posts,
            Err(e) => {
                counter!("poll_errors_total").increment(1);
                return Err(e);
            }
        };

        let mut report = CycleReport {
            cycle,
            fetched: posts.len(),
            ..Default::default()
        };

        for raw in posts {
            let item = Item::from(raw);
            if item.id.is_empty() {
                continue;
            }
            if self.ledger.check_and_mark(&item.id, cycle) {
                report.fresh += 1;
                report.delivered += self.dispatcher.dispatch(item).await.delivered;
            } else {
                report.duplicates += 1;
            }
        }

        let horizon = cycle.saturating_sub(self.cfg.dedup_horizon_cycles);
        report.evicted = self.ledger.evict_older_than(horizon);

        counter!("poll_items_new_total").increment(report.fresh as u64);
        counter!("poll_items_dedup_total").increment(report.duplicates as u64);
        gauge!("dedup_ledger_size").set(self.ledger.len() as f64);
        histogram!("poll_cycle_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);

        Ok(report)
    }

    /// Poll until `shutdown` flips to `true` (or its sender is dropped).
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(Duration::from_secs(self.cfg.interval_secs));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(
            target: "poller",
            source = self.source.name(),
            bucket = self.bucket.as_deref().unwrap_or("all"),
            sort = %self.cfg.sort,
            interval_secs = self.cfg.interval_secs,
            "poller started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                _ = ticker.tick() => {}
            }

            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                res = self.poll_once() => match res {
                    Ok(r) => tracing::info!(
                        target: "poller",
                        cycle = r.cycle,
                        fetched = r.fetched,
                        fresh = r.fresh,
                        dedup = r.duplicates,
                        delivered = r.delivered,
                        "poll tick"
                    ),
                    Err(e) => tracing::warn!(
                        target: "poller",
                        error = %e,
                        source = self.source.name(),
                        "poll cycle failed; skipping"
                    ),
                },
            }
        }
        tracing::info!(target: "poller", cycles = self.cycles(), "poller stopped");
    }
}
