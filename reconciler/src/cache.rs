//! Per-pass guild cache
//!
//! Resolving the marker role and reading the tracked-app set once per guild
//! instead of once per member is what makes a full sweep tractable: a guild of
//! ~2700 members goes from minutes of API and store round-trips to well under
//! a second.
//!
//! A [`PassCache`] is built at the top of one guild pass, lent to every member
//! reconciliation in that pass and dropped at the end. It is never mutated and
//! never shared across guilds or passes.

use std::collections::HashSet;

use crate::directory::Role;
use crate::ids::{AppId, GuildId};

/// Tracked apps as loaded for one pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackedApps {
    Loaded(HashSet<AppId>),
    /// The store could not be read; every member falls back to removal.
    Unavailable,
}

impl TrackedApps {
    pub fn get(&self) -> Option<&HashSet<AppId>> {
        match self {
            Self::Loaded(apps) => Some(apps),
            Self::Unavailable => None,
        }
    }
}

/// Immutable snapshot of everything a guild pass resolves once
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassCache {
    guild_id: GuildId,
    role: Option<Role>,
    apps: TrackedApps,
}

impl PassCache {
    pub fn new(guild_id: GuildId, role: Option<Role>, apps: TrackedApps) -> Self {
        Self {
            guild_id,
            role,
            apps,
        }
    }

    pub fn guild_id(&self) -> GuildId {
        self.guild_id
    }

    /// The marker role, or `None` when it could not be resolved this pass
    pub fn role(&self) -> Option<&Role> {
        self.role.as_ref()
    }

    pub fn apps(&self) -> &TrackedApps {
        &self.apps
    }
}
