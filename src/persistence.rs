// src/persistence.rs
//! Best-effort persistence of delivered items.
//!
//! Each write signs the item's canonical JSON and POSTs it to the configured
//! store. Writes run as detached tasks, capped by a semaphore; when the cap is
//! reached the write is dropped and counted instead of queued. Every failure
//! ends in a log line and a counter, never in an error seen by the dispatcher.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use metrics::counter;
use reqwest::Client;
use sha2::Sha256;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::config::PersistenceConfig;
use crate::error::PersistenceError;
use crate::item::Item;

pub const SIGNATURE_HEADER: &str = "X-Relay-Signature";
pub const ITEM_ID_HEADER: &str = "X-Relay-Item-Id";

/// Opaque signing capability.
pub trait Signer: Send + Sync {
    fn sign(&self, bytes: &[u8]) -> Result<String, PersistenceError>;
}

/// HMAC-SHA256 over the payload, hex encoded.
pub struct HmacSigner {
    key: Vec<u8>,
}

impl HmacSigner {
    pub fn new(secret: impl Into<Vec<u8>>) -> Result<Self, PersistenceError> {
        let key = secret.into();
        if key.is_empty() {
            return Err(PersistenceError::Signing("empty signing secret".into()));
        }
        Ok(Self { key })
    }

    pub fn verify(&self, bytes: &[u8], signature_hex: &str) -> bool {
        let Ok(signature) = hex::decode(signature_hex) else {
            return false;
        };
        let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(&self.key) else {
            return false;
        };
        mac.update(bytes);
        mac.verify_slice(&signature).is_ok()
    }
}

impl Signer for HmacSigner {
    fn sign(&self, bytes: &[u8]) -> Result<String, PersistenceError> {
        let mut mac = Hmac::<Sha256>::new_from_slice(&self.key)
            .map_err(|e| PersistenceError::Signing(e.to_string()))?;
        mac.update(bytes);
        Ok(hex::encode(mac.finalize().into_bytes()))
    }
}

/// Stable byte form of an item: compact JSON, fields in declaration order.
pub fn canonical_bytes(item: &Item) -> Result<Vec<u8>, PersistenceError> {
    Ok(serde_json::to_vec(item)?)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedPayload {
    pub item_id: String,
    pub body: Vec<u8>,
    pub signature: String,
}

/// Append-only external store.
#[async_trait]
pub trait ItemStore: Send + Sync {
    async fn write(&self, payload: &SignedPayload) -> Result<(), PersistenceError>;
}

/// Store reached over HTTP POST.
pub struct HttpStore {
    url: String,
    client: Client,
    timeout: Duration,
    max_retries: u8,
}

impl HttpStore {
    pub fn new(url: String) -> Self {
        Self {
            url,
            client: Client::new(),
            timeout: Duration::from_secs(5),
            max_retries: 2,
        }
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout = Duration::from_secs(secs);
        self
    }

    pub fn with_retries(mut self, retries: u8) -> Self {
        self.max_retries = retries;
        self
    }

    async fn backoff(attempt: u8) {
        tokio::time::sleep(Duration::from_millis(250u64 << (attempt - 1).min(6))).await;
    }
}

#[async_trait]
impl ItemStore for HttpStore {
    async fn write(&self, payload: &SignedPayload) -> Result<(), PersistenceError> {
        let mut attempt: u8 = 0;
        loop {
            attempt += 1;
            let res = self
                .client
                .post(&self.url)
                .timeout(self.timeout)
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .header(SIGNATURE_HEADER, &payload.signature)
                .header(ITEM_ID_HEADER, &payload.item_id)
                .body(payload.body.clone())
                .send()
                .await;

            match res {
                Ok(rsp) if rsp.status().is_success() => return Ok(()),
                Ok(rsp) => {
                    let status = rsp.status();
                    // 4xx will not get better on retry
                    if status.is_server_error() && attempt <= self.max_retries {
                        Self::backoff(attempt).await;
                        continue;
                    }
                    return Err(PersistenceError::Rejected(status.as_u16()));
                }
                Err(e) => {
                    if attempt <= self.max_retries {
                        Self::backoff(attempt).await;
                        continue;
                    }
                    return Err(PersistenceError::Unreachable(e.to_string()));
                }
            }
        }
    }
}

/// Outcome of handing an item to the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheduled {
    Spawned,
    /// No store configured.
    Disabled,
    /// Too many writes in flight; this one was dropped.
    Saturated,
    /// The gateway has been drained for shutdown.
    Closed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub completed: usize,
    pub aborted: usize,
}

struct Backend {
    signer: Arc<dyn Signer>,
    store: Arc<dyn ItemStore>,
}

impl Backend {
    async fn persist(&self, item: &Item) -> Result<(), PersistenceError> {
        let body = canonical_bytes(item)?;
        let signature = self.signer.sign(&body)?;
        let payload = SignedPayload {
            item_id: item.id.clone(),
            body,
            signature,
        };
        self.store.write(&payload).await
    }
}

pub struct PersistenceGateway {
    backend: Option<Arc<Backend>>,
    permits: Arc<Semaphore>,
    max_in_flight: usize,
    tasks: Mutex<JoinSet<()>>,
    closed: AtomicBool,
}

impl PersistenceGateway {
    /// Gateway that accepts items and does nothing with them.
    pub fn disabled() -> Self {
        Self {
            backend: None,
            permits: Arc::new(Semaphore::new(0)),
            max_in_flight: 0,
            tasks: Mutex::new(JoinSet::new()),
            closed: AtomicBool::new(false),
        }
    }

    pub fn new(signer: Arc<dyn Signer>, store: Arc<dyn ItemStore>, max_in_flight: usize) -> Self {
        let max_in_flight = max_in_flight.max(1);
        Self {
            backend: Some(Arc::new(Backend { signer, store })),
            permits: Arc::new(Semaphore::new(max_in_flight)),
            max_in_flight,
            tasks: Mutex::new(JoinSet::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Build from config: no store URL means a disabled gateway.
    pub fn from_config(cfg: &PersistenceConfig) -> Result<Self, PersistenceError> {
        let Some(url) = cfg.store_url.clone().filter(|u| !u.trim().is_empty()) else {
            tracing::info!(target: "persistence", "no store configured; persistence disabled");
            return Ok(Self::disabled());
        };
        let secret = cfg.signing_secret.clone().unwrap_or_default();
        let signer = HmacSigner::new(secret.into_bytes())?;
        let store = HttpStore::new(url)
            .with_timeout(cfg.timeout_secs)
            .with_retries(cfg.max_retries);
        Ok(Self::new(Arc::new(signer), Arc::new(store), cfg.max_in_flight))
    }

    pub fn is_enabled(&self) -> bool {
        self.backend.is_some()
    }

    /// Start a detached write for `item` and return immediately.
    pub fn schedule(&self, item: Arc<Item>) -> Scheduled {
        let Some(backend) = &self.backend else {
            return Scheduled::Disabled;
        };
        if self.closed.load(Ordering::Acquire) {
            return Scheduled::Closed;
        }
        let Ok(permit) = self.permits.clone().try_acquire_owned() else {
            counter!("persistence_dropped_total").increment(1);
            tracing::warn!(target: "persistence", item_id = %item.id, "too many writes in flight; dropping");
            return Scheduled::Saturated;
        };

        let backend = backend.clone();
        let mut tasks = self.tasks.lock().expect("persistence tasks mutex poisoned");
        // drain sets `closed` under this lock
        if self.closed.load(Ordering::Acquire) {
            return Scheduled::Closed;
        }
        // reap finished writes so the set does not grow
        while tasks.try_join_next().is_some() {}
        tasks.spawn(async move {
            let _permit = permit;
            match backend.persist(&item).await {
                Ok(()) => {
                    counter!("persistence_writes_total").increment(1);
                    tracing::debug!(target: "persistence", item_id = %item.id, "item persisted");
                }
                Err(e) => {
                    counter!("persistence_failures_total").increment(1);
                    tracing::warn!(target: "persistence", item_id = %item.id, error = %e, "persist failed");
                }
            }
        });
        Scheduled::Spawned
    }

    /// Writes currently holding a permit.
    pub fn in_flight(&self) -> usize {
        self.max_in_flight - self.permits.available_permits()
    }

    /// Stop accepting writes, wait up to `timeout` for the ones in flight and
    /// abort whatever is left.
    pub async fn drain(&self, timeout: Duration) -> DrainReport {
        let mut set = {
            let mut tasks = self.tasks.lock().expect("persistence tasks mutex poisoned");
            self.closed.store(true, Ordering::Release);
            std::mem::take(&mut *tasks)
        };

        let mut report = DrainReport::default();
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            match tokio::time::timeout_at(deadline, set.join_next()).await {
                Ok(Some(_)) => report.completed += 1,
                Ok(None) => break,
                Err(_) => {
                    report.aborted = set.len();
                    set.abort_all();
                    break;
                }
            }
        }
        if report.aborted > 0 {
            tracing::warn!(target: "persistence", aborted = report.aborted, "abandoned in-flight writes at shutdown");
        }
        report
    }
}
