// src/config.rs
//! Relay configuration.
//!
//! Resolution order:
//! 1) `$RELAY_CONFIG_PATH` (must exist if set)
//! 2) `config/relay.toml`
//! 3) built-in defaults
//!
//! Secrets and the bind address can then be overridden from the environment
//! (`.env` is loaded by the binary). [`RelayConfig::validate`] runs before
//! anything starts; a failure there is the only fatal error of the service.

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::delivery::DropPolicy;
use crate::error::ConfigError;
use crate::filter::FilterDefaults;
use crate::source::SortMode;

pub const ENV_CONFIG_PATH: &str = "RELAY_CONFIG_PATH";
pub const DEFAULT_CONFIG_PATH: &str = "config/relay.toml";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub server: ServerConfig,
    pub source: SourceConfig,
    pub poller: PollerConfig,
    pub delivery: DeliveryConfig,
    pub filter_defaults: FilterDefaults,
    pub persistence: PersistenceConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8000".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub public_base_url: String,
    pub oauth_base_url: String,
    pub token_url: String,
    pub user_agent: String,
    /// App-only OAuth; both must be set to leave the public endpoints.
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub timeout_secs: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            public_base_url: "https://www.reddit.com".to_string(),
            oauth_base_url: "https://oauth.reddit.com".to_string(),
            token_url: "https://www.reddit.com/api/v1/access_token".to_string(),
            user_agent: concat!("feed-relay/", env!("CARGO_PKG_VERSION")).to_string(),
            client_id: None,
            client_secret: None,
            timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollerConfig {
    pub interval_secs: u64,
    /// Empty means the `all` listing.
    pub subreddits: Vec<String>,
    pub sort: SortMode,
    pub limit: usize,
    /// Ids not seen for this many cycles are forgotten.
    pub dedup_horizon_cycles: u64,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval_secs: 10,
            subreddits: Vec::new(),
            sort: SortMode::New,
            limit: 100,
            dedup_horizon_cycles: 60,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliveryConfig {
    pub queue_capacity: usize,
    pub drop_policy: DropPolicy,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 256,
            drop_policy: DropPolicy::DropOldest,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    /// Unset disables persistence.
    pub store_url: Option<String>,
    pub signing_secret: Option<String>,
    pub max_in_flight: usize,
    pub timeout_secs: u64,
    pub max_retries: u8,
    pub drain_timeout_secs: u64,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            store_url: None,
            signing_secret: None,
            max_in_flight: 32,
            timeout_secs: 5,
            max_retries: 2,
            drain_timeout_secs: 5,
        }
    }
}

impl RelayConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        toml::from_str(s).context("parsing relay config")
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading relay config from {}", path.display()))?;
        Self::from_toml_str(&content)
    }

    /// File lookup only; no env overrides, no validation.
    pub fn load_default() -> Result<Self> {
        if let Ok(p) = std::env::var(ENV_CONFIG_PATH) {
            let pb = PathBuf::from(p);
            if !pb.exists() {
                return Err(anyhow!("{ENV_CONFIG_PATH} points to non-existent path"));
            }
            return Self::load_from(&pb);
        }
        let default_path = PathBuf::from(DEFAULT_CONFIG_PATH);
        if default_path.exists() {
            return Self::load_from(&default_path);
        }
        Ok(Self::default())
    }

    /// Full startup path: file, env overrides, validation.
    pub fn load() -> Result<Self> {
        let mut cfg = Self::load_default()?;
        cfg.apply_env_overrides();
        cfg.validate().context("invalid relay config")?;
        Ok(cfg)
    }

    pub fn apply_env_overrides(&mut self) {
        if let Some(v) = env_nonempty("RELAY_BIND") {
            self.server.bind = v;
        }
        if let Some(v) = env_nonempty("REDDIT_CLIENT_ID") {
            self.source.client_id = Some(v);
        }
        if let Some(v) = env_nonempty("REDDIT_CLIENT_SECRET") {
            self.source.client_secret = Some(v);
        }
        if let Some(v) = env_nonempty("USER_AGENT") {
            self.source.user_agent = v;
        }
        if let Some(v) = env_nonempty("PERSIST_STORE_URL") {
            self.persistence.store_url = Some(v);
        }
        if let Some(v) = env_nonempty("PERSIST_SIGNING_SECRET") {
            self.persistence.signing_secret = Some(v);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poller.interval_secs == 0 {
            return Err(ConfigError::Zero {
                field: "poller.interval_secs",
            });
        }
        if self.poller.limit == 0 {
            return Err(ConfigError::Zero {
                field: "poller.limit",
            });
        }
        if self.poller.dedup_horizon_cycles == 0 {
            return Err(ConfigError::Zero {
                field: "poller.dedup_horizon_cycles",
            });
        }
        if self.delivery.queue_capacity == 0 {
            return Err(ConfigError::Zero {
                field: "delivery.queue_capacity",
            });
        }
        if self.persistence.max_in_flight == 0 {
            return Err(ConfigError::Zero {
                field: "persistence.max_in_flight",
            });
        }
        let fd = &self.filter_defaults;
        if fd.comments_limit > fd.max_comments_limit {
            return Err(ConfigError::CommentsLimit {
                limit: fd.comments_limit,
                max: fd.max_comments_limit,
            });
        }
        let has_store = self
            .persistence
            .store_url
            .as_deref()
            .is_some_and(|u| !u.trim().is_empty());
        let has_secret = self
            .persistence
            .signing_secret
            .as_deref()
            .is_some_and(|s| !s.is_empty());
        if has_store && !has_secret {
            return Err(ConfigError::MissingSigningSecret);
        }
        Ok(())
    }
}

fn env_nonempty(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
