// src/api.rs
//! HTTP surface: health, one-shot query, streaming subscribe, metrics.

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::CorsLayer;

use crate::filter::{FilterDefaults, FilterSpec};
use crate::query::run_query;
use crate::registry::SubscriptionRegistry;
use crate::source::{ContentSource, SortMode, MAX_PAGE};

pub const INVALID_FILTER_MSG: &str = "Invalid JSON payload for filter parameters.";
pub const INVALID_SORT_MSG: &str = "Invalid sort_by parameter. Use 'hot', 'new', 'top', or 'rising'.";

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<SubscriptionRegistry>,
    pub source: Arc<dyn ContentSource>,
    pub defaults: FilterDefaults,
    /// `None` when no recorder is installed (tests).
    pub metrics: Option<PrometheusHandle>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/scrape", get(scrape))
        .route("/ws/subscribe", get(ws_subscribe))
        .route("/metrics", get(metrics))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

/// Query-string form of a filter; list fields are comma-separated.
#[derive(Debug, Default, Deserialize)]
struct ScrapeParams {
    subreddits: Option<String>,
    keywords: Option<String>,
    min_score: Option<i64>,
    include_nsfw: Option<bool>,
    is_self: Option<bool>,
    flair: Option<String>,
    #[serde(default)]
    fetch_comments: bool,
    comments_limit: Option<usize>,
    sort_by: Option<String>,
    limit: Option<usize>,
}

const DEFAULT_SCRAPE_LIMIT: usize = 10;

fn csv(v: Option<String>) -> Option<Vec<String>> {
    v.map(|s| s.split(',').map(|p| p.trim().to_string()).collect())
}

impl ScrapeParams {
    fn into_parts(self, defaults: &FilterDefaults) -> Result<(FilterSpec, SortMode, usize), String> {
        let sort = match self.sort_by.as_deref() {
            None => SortMode::Hot,
            Some(s) => s.parse::<SortMode>().map_err(|_| INVALID_SORT_MSG.to_string())?,
        };
        let spec = FilterSpec {
            source_buckets: csv(self.subreddits),
            keywords: csv(self.keywords),
            min_score: self.min_score,
            include_nsfw: self.include_nsfw,
            is_self: self.is_self,
            category_tags: csv(self.flair),
            fetch_comments: self.fetch_comments,
            comments_limit: self.comments_limit,
            opt_out_of_persistence: true,
        }
        .resolve(defaults);
        let limit = self.limit.unwrap_or(DEFAULT_SCRAPE_LIMIT).min(MAX_PAGE);
        Ok((spec, sort, limit))
    }
}

async fn scrape(State(state): State<AppState>, Query(params): Query<ScrapeParams>) -> Response {
    let (spec, sort, limit) = match params.into_parts(&state.defaults) {
        Ok(parts) => parts,
        Err(detail) => {
            return (StatusCode::BAD_REQUEST, Json(json!({ "detail": detail }))).into_response();
        }
    };

    match run_query(state.source.as_ref(), &spec, sort, limit).await {
        Ok(posts) => {
            tracing::info!(target: "api", count = posts.len(), %sort, limit, "scrape served");
            Json(json!({ "posts": posts })).into_response()
        }
        Err(e) => {
            tracing::warn!(target: "api", error = %e, "scrape failed");
            (StatusCode::BAD_GATEWAY, Json(json!({ "detail": e.to_string() }))).into_response()
        }
    }
}

async fn metrics(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => handle.render().into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn ws_subscribe(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| serve_subscriber(socket, state))
}

/// Wait for the first text frame and parse it as a filter.
async fn read_filter(socket: &mut WebSocket) -> Option<Result<FilterSpec, serde_json::Error>> {
    while let Some(Ok(msg)) = socket.recv().await {
        match msg {
            Message::Text(text) => return Some(serde_json::from_str(text.as_str())),
            Message::Binary(bytes) => return Some(serde_json::from_slice(&bytes)),
            Message::Close(_) => return None,
            _ => {}
        }
    }
    None
}

async fn serve_subscriber(mut socket: WebSocket, state: AppState) {
    let spec = match read_filter(&mut socket).await {
        None => return,
        Some(Ok(spec)) => spec.resolve(&state.defaults),
        Some(Err(e)) => {
            tracing::warn!(target: "api", error = %e, "invalid filter payload");
            let body = json!({ "error": INVALID_FILTER_MSG }).to_string();
            let _ = socket.send(Message::Text(body.into())).await;
            let _ = socket.send(Message::Close(None)).await;
            return;
        }
    };

    let (id, mut rx) = state.registry.register(spec);

    loop {
        tokio::select! {
            item = rx.recv() => {
                // queue closed: relay shutting down
                let Some(item) = item else { break };
                let dropped = rx.take_dropped();
                if dropped > 0 {
                    let notice = json!({ "dropped": dropped }).to_string();
                    if socket.send(Message::Text(notice.into())).await.is_err() {
                        break;
                    }
                }
                let body = match serde_json::to_string(item.as_ref()) {
                    Ok(body) => body,
                    Err(e) => {
                        tracing::warn!(target: "api", subscription = %id, error = %e, "encode failed");
                        continue;
                    }
                };
                if socket.send(Message::Text(body.into())).await.is_err() {
                    break;
                }
            }
            msg = socket.recv() => match msg {
                None | Some(Err(_)) | Some(Ok(Message::Close(_))) => break,
                Some(Ok(_)) => {}
            },
        }
    }

    state.registry.unregister(id);
    let _ = socket.send(Message::Close(None)).await;
    tracing::info!(target: "api", subscription = %id, "subscriber disconnected");
}
