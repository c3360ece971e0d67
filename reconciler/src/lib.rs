//! Presence-driven role reconciliation
//!
//! This library keeps a single "marker" role per guild in sync with what each
//! member is doing right now:
//! - A member whose presence shows a tracked application gets the role
//! - Everyone else (including dnd/offline/invisible members) loses it
//!
//! # Components
//!
//! - [`presence::should_hold_role`]: the pure membership decision
//! - [`role::RoleResolver`]: find-or-create for the marker role
//! - [`cache::PassCache`]: role + tracked apps resolved once per guild pass
//! - [`reconcile::Reconciler`]: single-member, guild, all-guild and
//!   notification-driven reconciliation
//! - [`state::StateStore`]: RocksDB-backed tracked-app store and counters
//!
//! The engine reaches the platform only through [`directory::Directory`] and
//! the store only through [`state::AppStore`], both injected at construction.
//!
//! # Usage
//!
//! ```ignore
//! use reconciler::{Reconciler, ReconcilerConfig, StateStore};
//!
//! let store = StateStore::open("./zerda-state")?.shared();
//! let engine = Reconciler::new(directory, store, ReconcilerConfig::from_env());
//! let summary = engine.reconcile_all_guilds().await;
//! ```

#![allow(clippy::uninlined_format_args)]

pub mod cache;
pub mod config;
pub mod directory;
pub mod ids;
pub mod presence;
pub mod reconcile;
pub mod role;
pub mod state;

pub use cache::{PassCache, TrackedApps};
pub use config::{ReconcilerConfig, DEFAULT_ROLE_NAME};
pub use directory::{
    Directory, DirectoryError, DirectoryErrorKind, DirectoryResult, Guild, Member, Role, RoleSpec,
};
pub use ids::{AppId, GuildId, IdError, RoleId, UserId};
pub use presence::{should_hold_role, Activity, Presence, PresenceStatus};
pub use reconcile::{
    MemberOutcome, PresenceUpdate, Reconciler, RoleMode, SharedReconciler, SweepSummary,
};
pub use role::RoleResolver;
pub use state::{AppStore, SharedStateStore, StateStore, Stats, StoreError, StoreResult};
