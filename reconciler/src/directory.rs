//! Directory adapter seam
//!
//! The engine never talks to the platform directly. Everything it needs from
//! the remote directory (guilds, roles, members with presence, role mutations)
//! goes through the narrow [`Directory`] trait, so production code can plug in
//! an HTTP client and tests can plug in fakes.

use std::collections::HashSet;
use std::fmt;

use async_trait::async_trait;
use thiserror::Error;

use crate::ids::{GuildId, RoleId, UserId};
use crate::presence::Presence;

/// Broad classification of a remote failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectoryErrorKind {
    /// Missing permission (role hierarchy, Manage Roles, ...)
    Forbidden,
    /// Guild, member or role no longer exists
    NotFound,
    /// Request rejected by the platform rate limiter
    RateLimited,
    /// Transport failure or an unclassified platform error
    Other,
}

impl fmt::Display for DirectoryErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Forbidden => write!(f, "forbidden"),
            Self::NotFound => write!(f, "not_found"),
            Self::RateLimited => write!(f, "rate_limited"),
            Self::Other => write!(f, "other"),
        }
    }
}

/// Error surfaced by any remote directory call
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("directory {kind} error{}: {message}", .code.map(|c| format!(" (code {c})")).unwrap_or_default())]
pub struct DirectoryError {
    pub kind: DirectoryErrorKind,
    /// Platform-defined JSON error code, when the platform supplied one
    pub code: Option<u32>,
    pub message: String,
}

impl DirectoryError {
    pub fn new(kind: DirectoryErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            code: None,
            message: message.into(),
        }
    }

    pub fn with_code(mut self, code: u32) -> Self {
        self.code = Some(code);
        self
    }
}

/// Result type for directory operations
pub type DirectoryResult<T> = Result<T, DirectoryError>;

/// A guild the bot is a member of
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Guild {
    pub id: GuildId,
    pub name: String,
}

impl Guild {
    pub fn new(id: GuildId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }
}

impl fmt::Display for Guild {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Guild \"{}\" ({})", self.name, self.id)
    }
}

/// A role inside a guild
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Role {
    pub id: RoleId,
    pub guild_id: GuildId,
    pub name: String,
    pub position: u32,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Role \"{}\" ({})", self.name, self.id)
    }
}

/// Parameters for creating a role
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleSpec {
    pub name: String,
    /// Display members with this role separately in the member list
    pub hoist: bool,
    pub mentionable: bool,
    /// Permission bitfield granted by the role
    pub permissions: u64,
    pub position: u32,
    /// Audit log reason
    pub reason: String,
}

/// A guild member as seen by one reconciliation call.
///
/// `roles` mirrors the member's role set on the platform; the engine updates
/// it after every successful add/remove so repeated calls stay idempotent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    pub guild_id: GuildId,
    pub user_id: UserId,
    /// Human-readable tag for logs
    pub tag: String,
    pub roles: HashSet<RoleId>,
    pub presence: Option<Presence>,
}

impl Member {
    pub fn new(guild_id: GuildId, user_id: UserId, tag: impl Into<String>) -> Self {
        Self {
            guild_id,
            user_id,
            tag: tag.into(),
            roles: HashSet::new(),
            presence: None,
        }
    }

    pub fn with_presence(mut self, presence: Presence) -> Self {
        self.presence = Some(presence);
        self
    }

    pub fn with_role(mut self, role: RoleId) -> Self {
        self.roles.insert(role);
        self
    }

    pub fn has_role(&self, role: RoleId) -> bool {
        self.roles.contains(&role)
    }
}

impl fmt::Display for Member {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Member \"{}\" ({}) in guild {}",
            self.tag, self.user_id, self.guild_id
        )
    }
}

/// Remote directory operations consumed by the engine
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Directory: Send + Sync {
    /// Every guild the bot currently belongs to
    async fn guilds(&self) -> DirectoryResult<Vec<Guild>>;

    /// Roles already known locally for `guild`, without a remote call
    fn cached_roles(&self, guild: GuildId) -> Vec<Role>;

    /// Fetch the guild's roles from the platform, refreshing the local cache
    async fn fetch_roles(&self, guild: GuildId) -> DirectoryResult<Vec<Role>>;

    async fn create_role(&self, guild: GuildId, spec: &RoleSpec) -> DirectoryResult<Role>;

    /// Bulk member fetch; presences are attached when `with_presences` is set
    async fn fetch_members(
        &self,
        guild: GuildId,
        with_presences: bool,
    ) -> DirectoryResult<Vec<Member>>;

    async fn add_role(&self, member: &Member, role: &Role, reason: &str) -> DirectoryResult<()>;

    async fn remove_role(&self, member: &Member, role: &Role, reason: &str)
        -> DirectoryResult<()>;
}
