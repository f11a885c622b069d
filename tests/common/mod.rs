// tests/common/mod.rs
//
// Shared fixtures for integration tests: post builders, a wired
// poller/dispatcher/registry trio over a scripted source, and an in-memory
// store with optional latency and failure.
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use feed_relay::config::PollerConfig;
use feed_relay::dedup::SeenSet;
use feed_relay::delivery::DropPolicy;
use feed_relay::dispatcher::Dispatcher;
use feed_relay::error::PersistenceError;
use feed_relay::item::RawPost;
use feed_relay::persistence::{ItemStore, PersistenceGateway, SignedPayload};
use feed_relay::poller::SourcePoller;
use feed_relay::registry::SubscriptionRegistry;
use feed_relay::source::memory::ScriptedSource;
use feed_relay::source::ContentSource;

pub fn post(id: &str, subreddit: &str, title: &str, score: i64) -> RawPost {
    RawPost {
        id: id.into(),
        title: title.into(),
        subreddit: subreddit.into(),
        score,
        url: format!("https://www.reddit.com/r/{subreddit}/comments/{id}"),
        ..Default::default()
    }
}

pub struct Pipeline {
    pub registry: Arc<SubscriptionRegistry>,
    pub dispatcher: Arc<Dispatcher>,
    pub poller: SourcePoller,
    pub source: Arc<ScriptedSource>,
}

pub fn pipeline(source: ScriptedSource, capacity: usize, policy: DropPolicy) -> Pipeline {
    pipeline_with(source, capacity, policy, Arc::new(PersistenceGateway::disabled()))
}

pub fn pipeline_with(
    source: ScriptedSource,
    capacity: usize,
    policy: DropPolicy,
    persistence: Arc<PersistenceGateway>,
) -> Pipeline {
    let source = Arc::new(source);
    let dyn_source: Arc<dyn ContentSource> = source.clone();
    let registry = Arc::new(SubscriptionRegistry::new(capacity, policy));
    let dispatcher = Arc::new(Dispatcher::new(
        registry.clone(),
        dyn_source.clone(),
        persistence,
    ));
    let poller = SourcePoller::new(
        dyn_source,
        Arc::new(SeenSet::new()),
        dispatcher.clone(),
        PollerConfig::default(),
    );
    Pipeline {
        registry,
        dispatcher,
        poller,
        source,
    }
}

/// Store that records payloads, optionally after a delay or with an error.
#[derive(Default)]
pub struct MemoryStore {
    pub delay: Option<Duration>,
    pub fail: bool,
    pub attempts: AtomicUsize,
    pub written: Mutex<Vec<SignedPayload>>,
}

impl MemoryStore {
    pub fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Default::default()
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn written_ids(&self) -> Vec<String> {
        self.written
            .lock()
            .unwrap()
            .iter()
            .map(|p| p.item_id.clone())
            .collect()
    }
}

#[async_trait]
impl ItemStore for MemoryStore {
    async fn write(&self, payload: &SignedPayload) -> Result<(), PersistenceError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if let Some(d) = self.delay {
            tokio::time::sleep(d).await;
        }
        if self.fail {
            return Err(PersistenceError::Unreachable("store offline".into()));
        }
        self.written.lock().unwrap().push(payload.clone());
        Ok(())
    }
}
