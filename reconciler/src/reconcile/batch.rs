//! Guild passes and the all-guild sweep
//!
//! Guilds are visited one at a time and members within a guild one at a time.
//! Combined with the platform rate limit this makes a cold-start sweep slow,
//! but it bounds the burst of outstanding API calls.

use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use super::{Reconciler, RoleMode};
use crate::cache::{PassCache, TrackedApps};
use crate::directory::{Guild, Role};
use crate::ids::GuildId;

/// Totals for one sweep over every guild
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepSummary {
    pub guilds: usize,
    pub members: usize,
    pub elapsed: Duration,
}

impl Reconciler {
    /// Find or create the marker role in `guild`
    pub async fn ensure_marker_role(&self, guild: GuildId) -> Option<Role> {
        self.roles.ensure(guild).await
    }

    /// Resolve the role and tracked apps once for a guild pass
    pub async fn prepare_pass(&self, guild: GuildId, mode: RoleMode) -> PassCache {
        let role = match mode {
            RoleMode::Ensure => self.roles.ensure(guild).await,
            RoleMode::Lookup => match self.roles.find(guild).await {
                Ok(role) => role,
                Err(e) => {
                    warn!(guild_id = %guild, error = %e, "Failed to look up marker role");
                    None
                }
            },
        };

        let apps = match self.store.list_apps(guild).await {
            Ok(apps) => TrackedApps::Loaded(apps),
            Err(e) => {
                error!(guild_id = %guild, error = %e, "Failed to load tracked apps");
                TrackedApps::Unavailable
            }
        };

        PassCache::new(guild, role, apps)
    }

    /// Reconcile every member of `guild` against the existing marker role.
    ///
    /// Used after the tracked-app set changes. Returns the number of members
    /// checked.
    pub async fn reconcile_guild(&self, guild: &Guild) -> usize {
        let cache = self.prepare_pass(guild.id, RoleMode::Lookup).await;
        self.reconcile_guild_with(guild, &cache, "").await
    }

    /// Create the marker role if needed, then reconcile every member.
    ///
    /// Used when the bot joins a guild.
    pub async fn ensure_and_reconcile_guild(&self, guild: &Guild) -> usize {
        let cache = self.prepare_pass(guild.id, RoleMode::Ensure).await;
        self.reconcile_guild_with(guild, &cache, "").await
    }

    /// Reconcile every member of `guild` using a prepared pass cache.
    ///
    /// `progress` is appended to the start/finish log lines (e.g. `(3/12)`).
    pub async fn reconcile_guild_with(
        &self,
        guild: &Guild,
        cache: &PassCache,
        progress: &str,
    ) -> usize {
        info!(guild = %guild, progress, "Beginning member check");
        let start = Instant::now();

        if cache.role().is_none() {
            warn!(guild = %guild, "No marker role this pass, skipping member check");
            return 0;
        }

        let mut members = match self.directory.fetch_members(guild.id, true).await {
            Ok(members) => members,
            Err(e) => {
                warn!(guild = %guild, error = %e, "Failed to fetch members");
                return 0;
            }
        };

        let total = members.len();
        let every = self.config.progress_every.max(1);

        for (index, member) in members.iter_mut().enumerate() {
            let processed = index + 1;

            debug!(member = %member, "Checking member");
            self.reconcile_member(member, Some(cache)).await;

            // The last iteration is covered by the finish log.
            if processed % every == 0 && processed < total {
                debug!(guild = %guild, processed, total, "Member check progress");
            }
        }

        info!(
            guild = %guild,
            members = total,
            elapsed_ms = start.elapsed().as_millis() as u64,
            progress,
            "Finished member check"
        );

        total
    }

    /// Ensure the marker role and reconcile every member in every guild.
    ///
    /// Guilds are processed strictly one after another.
    pub async fn reconcile_all_guilds(&self) -> SweepSummary {
        info!("Beginning full member sweep");
        let start = Instant::now();

        let guilds = match self.directory.guilds().await {
            Ok(guilds) => guilds,
            Err(e) => {
                warn!(error = %e, "Failed to list guilds, skipping sweep");
                return SweepSummary::default();
            }
        };

        let mut summary = SweepSummary::default();
        for guild in &guilds {
            summary.guilds += 1;

            let progress = format!("({}/{})", summary.guilds, guilds.len());
            let cache = self.prepare_pass(guild.id, RoleMode::Ensure).await;
            summary.members += self.reconcile_guild_with(guild, &cache, &progress).await;
        }

        summary.elapsed = start.elapsed();
        info!(
            members = summary.members,
            guilds = summary.guilds,
            elapsed_ms = summary.elapsed.as_millis() as u64,
            "Finished full member sweep"
        );

        summary
    }
}
