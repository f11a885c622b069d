// src/source/mod.rs
pub mod memory;
pub mod reddit;

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, SourceError};
use crate::item::RawPost;

/// Largest listing page the source serves in one call.
pub const MAX_PAGE: usize = 100;

/// Listing order requested from the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortMode {
    #[default]
    Hot,
    New,
    Top,
    Rising,
}

impl SortMode {
    pub fn as_str(self) -> &'static str {
        match self {
            SortMode::Hot => "hot",
            SortMode::New => "new",
            SortMode::Top => "top",
            SortMode::Rising => "rising",
        }
    }
}

impl fmt::Display for SortMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SortMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hot" => Ok(SortMode::Hot),
            "new" => Ok(SortMode::New),
            "top" => Ok(SortMode::Top),
            "rising" => Ok(SortMode::Rising),
            _ => Err(ConfigError::SortMode(s.to_string())),
        }
    }
}

/// Pull interface to the external content source.
///
/// Every call may fail (rate limits, network, bad payloads); callers treat a
/// failure as transient.
#[async_trait]
pub trait ContentSource: Send + Sync {
    /// Most recent posts of `bucket` (`None` = everything) in `sort` order.
    async fn list_posts(
        &self,
        bucket: Option<&str>,
        sort: SortMode,
        limit: usize,
    ) -> Result<Vec<RawPost>, SourceError>;

    /// Up to `limit` top-level comment bodies of `post_id`, in source order.
    async fn list_comments(&self, post_id: &str, limit: usize)
        -> Result<Vec<String>, SourceError>;

    fn name(&self) -> &'static str;
}

/// Join configured buckets into a single multi-listing name (`a+b`).
pub fn bucket_path(buckets: &[String]) -> Option<String> {
    let parts: Vec<&str> = buckets
        .iter()
        .map(|b| b.trim())
        .filter(|b| !b.is_empty())
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("+"))
    }
}
