//! Tracked-app persistence
//!
//! This module provides RocksDB-backed persistent storage for:
//! - The set of application IDs each guild tracks
//! - The bot-wide role assignment counter
//!
//! # Architecture
//!
//! The state store uses RocksDB column families to logically separate the two
//! kinds of data while sharing a single database instance:
//!
//! - `apps`: one key per (guild, app) pair, uniqueness enforced by the key
//! - `meta`: counters (`assignments`)
//!
//! The engine only sees the [`AppStore`] trait, so tests can swap in fakes.
//!
//! # Usage
//!
//! ```ignore
//! use reconciler::state::StateStore;
//!
//! let store = StateStore::open("./zerda-state")?;
//! store.add_app(guild_id, app_id)?;
//! let apps = store.list_apps(guild_id)?;
//! ```

pub mod schema;
pub mod store;
pub mod types;

use std::collections::HashSet;

use async_trait::async_trait;

use crate::ids::{AppId, GuildId};

// Re-export core types
pub use store::{SharedStateStore, StateStore, StoreError, StoreResult};
pub use types::{Stats, TrackedApp};

/// Tracked-app store operations consumed by the engine and command handlers
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AppStore: Send + Sync {
    /// Track `app_id` in `guild_id`; duplicates fail with
    /// [`StoreError::AlreadyTracked`].
    async fn add_app(&self, guild_id: GuildId, app_id: AppId) -> StoreResult<()>;

    /// Untrack `app_id` in `guild_id`, returning the number of rows removed
    async fn remove_app(&self, guild_id: GuildId, app_id: AppId) -> StoreResult<usize>;

    async fn list_apps(&self, guild_id: GuildId) -> StoreResult<HashSet<AppId>>;

    /// Record one successful role grant, returning the new total
    async fn increment_assignments(&self) -> StoreResult<u64>;

    async fn stats(&self) -> StoreResult<Stats>;
}
