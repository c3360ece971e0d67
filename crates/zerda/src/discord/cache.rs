//! Local view of guild state fed by gateway events and REST responses.
//!
//! Presences only arrive over the gateway, so this cache is where
//! [`HttpDirectory::fetch_members`](super::HttpDirectory) gets them from.
//! Locks are never held across an `.await`.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use reconciler::{Guild, GuildId, Member, Presence, Role, RoleId, UserId};
use tracing::warn;

#[derive(Debug, Default)]
struct GuildEntry {
    guild: Option<Guild>,
    roles: Vec<Role>,
    members: HashMap<UserId, Member>,
    presences: HashMap<UserId, Presence>,
}

/// Shared reference to GuildCache
pub type SharedGuildCache = Arc<GuildCache>;

#[derive(Debug, Default)]
pub struct GuildCache {
    guilds: RwLock<HashMap<GuildId, GuildEntry>>,
}

impl GuildCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared(self) -> SharedGuildCache {
        Arc::new(self)
    }

    fn read<T>(&self, f: impl FnOnce(&HashMap<GuildId, GuildEntry>) -> T) -> Option<T> {
        match self.guilds.read() {
            Ok(guilds) => Some(f(&guilds)),
            Err(_) => {
                warn!("Guild cache lock poisoned");
                None
            }
        }
    }

    fn write<T>(&self, f: impl FnOnce(&mut HashMap<GuildId, GuildEntry>) -> T) -> Option<T> {
        match self.guilds.write() {
            Ok(mut guilds) => Some(f(&mut guilds)),
            Err(_) => {
                warn!("Guild cache lock poisoned");
                None
            }
        }
    }

    // =========================================================================
    // Guilds
    // =========================================================================

    pub fn upsert_guild(&self, guild: Guild) {
        let id = guild.id;
        self.write(|guilds| guilds.entry(id).or_default().guild = Some(guild));
    }

    /// Forget everything about a guild, e.g. after leaving it
    pub fn remove_guild(&self, guild: GuildId) {
        self.write(|guilds| guilds.remove(&guild));
    }

    pub fn guild(&self, guild: GuildId) -> Option<Guild> {
        self.read(|guilds| guilds.get(&guild).and_then(|e| e.guild.clone()))
            .flatten()
    }

    /// Every known guild, ordered by ID for stable sweeps
    pub fn guilds(&self) -> Vec<Guild> {
        let mut guilds: Vec<Guild> = self
            .read(|guilds| guilds.values().filter_map(|e| e.guild.clone()).collect())
            .unwrap_or_default();
        guilds.sort_by_key(|g| g.id);
        guilds
    }

    // =========================================================================
    // Roles
    // =========================================================================

    pub fn roles(&self, guild: GuildId) -> Vec<Role> {
        self.read(|guilds| guilds.get(&guild).map(|e| e.roles.clone()))
            .flatten()
            .unwrap_or_default()
    }

    pub fn set_roles(&self, guild: GuildId, roles: Vec<Role>) {
        self.write(|guilds| guilds.entry(guild).or_default().roles = roles);
    }

    pub fn push_role(&self, role: Role) {
        self.write(|guilds| guilds.entry(role.guild_id).or_default().roles.push(role));
    }

    // =========================================================================
    // Members and presences
    // =========================================================================

    /// Cached member with their latest presence attached
    pub fn member(&self, guild: GuildId, user: UserId) -> Option<Member> {
        self.read(|guilds| {
            let entry = guilds.get(&guild)?;
            let mut member = entry.members.get(&user)?.clone();
            member.presence = entry.presences.get(&user).cloned();
            Some(member)
        })
        .flatten()
    }

    /// Store a member's role set and tag. Presence is tracked separately.
    pub fn upsert_member(&self, member: Member) {
        self.write(|guilds| {
            let entry = guilds.entry(member.guild_id).or_default();
            let mut member = member;
            member.presence = None;
            entry.members.insert(member.user_id, member);
        });
    }

    /// Mirror a successful role add/remove into the cached member
    pub fn set_member_role(&self, guild: GuildId, user: UserId, role: RoleId, held: bool) {
        self.write(|guilds| {
            let Some(member) = guilds.get_mut(&guild).and_then(|e| e.members.get_mut(&user))
            else {
                return;
            };
            if held {
                member.roles.insert(role);
            } else {
                member.roles.remove(&role);
            }
        });
    }

    pub fn remove_member(&self, guild: GuildId, user: UserId) {
        self.write(|guilds| {
            if let Some(entry) = guilds.get_mut(&guild) {
                entry.members.remove(&user);
                entry.presences.remove(&user);
            }
        });
    }

    pub fn set_presence(&self, guild: GuildId, user: UserId, presence: Option<Presence>) {
        self.write(|guilds| {
            let entry = guilds.entry(guild).or_default();
            match presence {
                Some(presence) => entry.presences.insert(user, presence),
                None => entry.presences.remove(&user),
            };
        });
    }

    pub fn presence(&self, guild: GuildId, user: UserId) -> Option<Presence> {
        self.read(|guilds| guilds.get(&guild)?.presences.get(&user).cloned())
            .flatten()
    }
}
