//! Feed relay binary entrypoint.
//! Loads config, starts the poll loop and serves the HTTP/WebSocket API until
//! Ctrl-C.

use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use feed_relay::api::{self, AppState};
use feed_relay::config::RelayConfig;
use feed_relay::metrics::Metrics;
use feed_relay::persistence::PersistenceGateway;
use feed_relay::relay::Relay;
use feed_relay::source::{reddit::RedditSource, ContentSource};

/// `RUST_LOG` wins; `LOG_FORMAT=json` switches to one JSON object per line.
fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("feed_relay=info,warn"));
    let json = std::env::var("LOG_FORMAT")
        .ok()
        .is_some_and(|v| v.eq_ignore_ascii_case("json"));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer().compact()).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env in local/dev; no-op when absent.
    let _ = dotenvy::dotenv();
    init_tracing();

    let cfg = RelayConfig::load()?;
    let metrics = Metrics::install()?;

    let reddit = RedditSource::new(&cfg.source).context("building reddit client")?;
    tracing::info!(
        target: "relay",
        authenticated = reddit.is_authenticated(),
        "content source ready"
    );
    let source: Arc<dyn ContentSource> = Arc::new(reddit);
    let persistence = Arc::new(
        PersistenceGateway::from_config(&cfg.persistence).context("building persistence gateway")?,
    );

    let relay = Relay::start(&cfg, source.clone(), persistence);
    let state = AppState {
        registry: relay.registry().clone(),
        source,
        defaults: cfg.filter_defaults.clone(),
        metrics: Some(metrics.handle.clone()),
    };
    let app = api::router(state);
    let registry = relay.registry().clone();

    let listener = tokio::net::TcpListener::bind(&cfg.server.bind)
        .await
        .with_context(|| format!("binding {}", cfg.server.bind))?;
    tracing::info!(target: "relay", bind = %cfg.server.bind, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!(target: "relay", "shutdown requested");
            // open subscriber sockets end once their queues close
            registry.close_all();
        })
        .await
        .context("http server")?;

    relay.shutdown().await;
    Ok(())
}
