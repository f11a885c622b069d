// src/error.rs
//! Error taxonomy for the relay.
//!
//! None of these errors is allowed to stop the poll loop or a dispatch pass.
//! Callers log and count them; the only fatal path is a bad configuration at
//! startup, which is reported through `anyhow` by `config`.

use thiserror::Error;

/// Failure talking to the content source. Transient: the poll cycle is
/// skipped and the next one proceeds normally.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("source request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("source returned status {status} for {endpoint}")]
    Status { status: u16, endpoint: String },

    #[error("source payload could not be decoded: {0}")]
    Decode(String),

    #[error("source authentication failed: {0}")]
    Auth(String),

    #[error("scripted source has no response left")]
    Exhausted,
}

/// Failure while persisting a delivered item. Always logged and swallowed.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("signing failed: {0}")]
    Signing(String),

    #[error("item could not be encoded: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("store unreachable: {0}")]
    Unreachable(String),

    #[error("store rejected write with status {0}")]
    Rejected(u16),
}

/// Configuration problems detected before the relay starts polling.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },

    #[error("unknown sort mode '{0}' (use hot, new, top or rising)")]
    SortMode(String),

    #[error("unknown drop policy '{0}' (use drop_oldest or drop_newest)")]
    DropPolicy(String),

    #[error("persistence.store_url is set but no signing secret is configured")]
    MissingSigningSecret,

    #[error("filter_defaults.comments_limit ({limit}) exceeds max_comments_limit ({max})")]
    CommentsLimit { limit: usize, max: usize },
}
