// src/metrics.rs
use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;

/// One-time metrics registration (so series show up on /metrics).
pub fn ensure_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("poll_cycles_total", "Poll cycles started.");
        describe_counter!("poll_errors_total", "Poll cycles skipped after a source error.");
        describe_counter!("poll_items_new_total", "Items not yet in the dedup ledger.");
        describe_counter!("poll_items_dedup_total", "Items suppressed by the dedup ledger.");
        describe_gauge!("dedup_ledger_size", "Ids currently held by the dedup ledger.");
        describe_histogram!("poll_cycle_ms", "Poll cycle duration in milliseconds.");
        describe_histogram!("source_request_ms", "Source HTTP request time in milliseconds.");
        describe_counter!("source_http_errors_total", "Non-2xx responses from the source.");
        describe_counter!("dispatch_items_total", "Items evaluated against the registry.");
        describe_counter!("dispatch_matches_total", "Item/subscriber matches.");
        describe_histogram!("dispatch_ms", "Dispatch pass duration in milliseconds.");
        describe_counter!("delivery_dropped_total", "Items lost to full subscriber queues.");
        describe_counter!("enrichment_failures_total", "Failed comment fetches.");
        describe_gauge!("subscriptions_active", "Registered subscribers.");
        describe_counter!("persistence_writes_total", "Items written to the store.");
        describe_counter!("persistence_failures_total", "Failed store writes.");
        describe_counter!("persistence_dropped_total", "Writes skipped at the in-flight cap.");
    });
}

pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Install the global Prometheus recorder. Call once per process.
    pub fn install() -> anyhow::Result<Self> {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .map_err(|e| anyhow::anyhow!("prometheus: install recorder: {e}"))?;
        ensure_described();
        Ok(Self { handle })
    }
}
