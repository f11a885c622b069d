// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod api;
pub mod config;
pub mod dedup;
pub mod delivery;
pub mod dispatcher;
pub mod error;
pub mod filter;
pub mod item;
pub mod metrics;
pub mod persistence;
pub mod poller;
pub mod query;
pub mod registry;
pub mod relay;
pub mod source;

// ---- Re-exports for stable public API ----
pub use crate::api::{router, AppState};
pub use crate::config::RelayConfig;
pub use crate::filter::{matches, FilterDefaults, FilterSpec};
pub use crate::item::Item;
pub use crate::relay::{Relay, RelayHandle};
