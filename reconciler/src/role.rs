//! Marker role resolution
//!
//! Two entry points with deliberately different behaviour when the role is
//! missing:
//!
//! - [`RoleResolver::ensure`] (startup, guild join) creates it.
//! - [`RoleResolver::find`] (mid-reconciliation) reports `None` and warns, so
//!   a role an operator deleted on purpose is not silently brought back.
//!
//! When two roles share the configured name, the first one the directory
//! lists wins.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::directory::{Directory, DirectoryResult, Role, RoleSpec};
use crate::ids::GuildId;

pub struct RoleResolver {
    directory: Arc<dyn Directory>,
    spec: RoleSpec,
}

impl RoleResolver {
    pub fn new(directory: Arc<dyn Directory>, spec: RoleSpec) -> Self {
        Self { directory, spec }
    }

    pub fn role_name(&self) -> &str {
        &self.spec.name
    }

    fn pick(&self, roles: Vec<Role>) -> Option<Role> {
        roles.into_iter().find(|role| role.name == self.spec.name)
    }

    /// Look the role up without creating it.
    ///
    /// Checks the locally known roles first and falls back to one remote
    /// refresh. `Ok(None)` means the role does not exist; `Err` means the
    /// lookup itself failed.
    pub async fn find(&self, guild: GuildId) -> DirectoryResult<Option<Role>> {
        if let Some(role) = self.pick(self.directory.cached_roles(guild)) {
            return Ok(Some(role));
        }

        let role = self.pick(self.directory.fetch_roles(guild).await?);
        if role.is_none() {
            warn!(
                guild_id = %guild,
                role_name = %self.spec.name,
                "Marker role not found. It may have been deleted or renamed"
            );
        }
        Ok(role)
    }

    /// Find the role, creating it if the guild does not have one yet.
    ///
    /// Never fails: lookup and creation errors are logged and degrade to
    /// "no role this pass".
    pub async fn ensure(&self, guild: GuildId) -> Option<Role> {
        if let Some(role) = self.pick(self.directory.cached_roles(guild)) {
            debug!(guild_id = %guild, role = %role, "Guild already has marker role");
            return Some(role);
        }

        match self.directory.fetch_roles(guild).await {
            Ok(roles) => {
                if let Some(role) = self.pick(roles) {
                    debug!(guild_id = %guild, role = %role, "Guild already has marker role");
                    return Some(role);
                }
            }
            Err(e) => {
                warn!(guild_id = %guild, error = %e, "Failed to fetch roles");
                return None;
            }
        }

        match self.directory.create_role(guild, &self.spec).await {
            Ok(role) => {
                info!(guild_id = %guild, role = %role, "Created marker role");
                Some(role)
            }
            Err(e) => {
                warn!(
                    guild_id = %guild,
                    role_name = %self.spec.name,
                    error = %e,
                    "Error creating marker role"
                );
                None
            }
        }
    }
}
