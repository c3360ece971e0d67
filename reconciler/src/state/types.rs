//! Core types for tracked-app persistence

use serde::{Deserialize, Serialize};

use crate::ids::{AppId, GuildId};

/// One row of the tracked-app table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TrackedApp {
    pub guild_id: GuildId,
    pub app_id: AppId,
}

/// Bot-wide statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stats {
    /// Guilds with at least one tracked app
    pub guilds: u64,
    /// Tracked (guild, app) pairs
    pub apps: u64,
    /// Successful marker role grants since the store was created
    pub assignments: u64,
}
