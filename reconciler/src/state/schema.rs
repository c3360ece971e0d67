//! Column family definitions for RocksDB state store
//!
//! Each column family provides logical separation of data types
//! while sharing the same RocksDB instance.

/// Column family for tracked (guild, app) pairs
pub const CF_APPS: &str = "apps";

/// Column family for bot-wide counters
pub const CF_META: &str = "meta";

/// All column family names
pub const ALL_CFS: &[&str] = &[CF_APPS, CF_META];

/// Key prefixes for compound keys
pub mod keys {
    use crate::ids::{AppId, GuildId};

    /// Prefix shared by every tracked-app key
    pub const APP_PREFIX: &str = "app:";

    /// Meta key holding the role assignment counter
    pub const ASSIGNMENTS: &str = "assignments";

    /// Create a tracked-app key (guild + app)
    pub fn app(guild_id: GuildId, app_id: AppId) -> String {
        format!("{}{}:{}", APP_PREFIX, guild_id, app_id)
    }

    /// Prefix matching every app tracked in one guild.
    ///
    /// The trailing separator keeps guild `5` from matching guild `55`.
    pub fn guild_apps(guild_id: GuildId) -> String {
        format!("{}{}:", APP_PREFIX, guild_id)
    }

    /// Parse a tracked-app key back into its parts
    pub fn parse_app(key: &str) -> Option<(GuildId, AppId)> {
        let rest = key.strip_prefix(APP_PREFIX)?;
        let (guild, app) = rest.split_once(':')?;
        Some((GuildId::parse(guild).ok()?, AppId::parse(app).ok()?))
    }
}
