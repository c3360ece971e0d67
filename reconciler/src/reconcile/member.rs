//! Single-member reconciliation

use std::collections::HashSet;

use tracing::{debug, error, info, warn};

use super::Reconciler;
use crate::cache::{PassCache, TrackedApps};
use crate::directory::{Member, Role};
use crate::ids::AppId;
use crate::presence::should_hold_role;
use crate::state::StoreError;

/// What one member reconciliation did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberOutcome {
    /// Role added and the assignment counter bumped
    Granted,
    /// Role removed
    Revoked,
    /// Membership already matched the decision
    Unchanged,
    /// No marker role to apply a decision to
    NoRole,
    /// The add/remove call failed; nothing changed
    Failed,
}

#[derive(Debug, thiserror::Error)]
enum DecisionError {
    #[error("tracked apps could not be loaded for this pass")]
    AppsUnavailable,

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl Reconciler {
    /// Bring one member's marker role in line with their presence.
    ///
    /// With a [`PassCache`] the role and tracked apps come from the pass;
    /// without one they are resolved fresh. Never fails: remote and store
    /// errors are logged, and a failed decision removes the role rather than
    /// leaving a stale grant. On success `member.roles` is updated to match
    /// the platform, so a repeat call is a no-op.
    pub async fn reconcile_member(
        &self,
        member: &mut Member,
        cache: Option<&PassCache>,
    ) -> MemberOutcome {
        let role = match cache {
            Some(cache) => cache.role().cloned(),
            None => match self.roles.find(member.guild_id).await {
                Ok(role) => role,
                Err(e) => {
                    warn!(
                        guild_id = %member.guild_id,
                        error = %e,
                        "Failed to look up marker role"
                    );
                    None
                }
            },
        };

        let Some(role) = role else {
            return MemberOutcome::NoRole;
        };

        let hold = match self.decide(member, cache).await {
            Ok(hold) => hold,
            Err(e) => {
                error!(member = %member, error = %e, "Failed to decide marker role, removing it");
                false
            }
        };

        if hold {
            self.grant(member, &role).await
        } else {
            self.revoke(member, &role).await
        }
    }

    async fn decide(
        &self,
        member: &Member,
        cache: Option<&PassCache>,
    ) -> Result<bool, DecisionError> {
        // Short-circuit before touching the store. Presence is absent for
        // offline members.
        let presence = match &member.presence {
            Some(presence) if !presence.status.suppresses_role() => presence,
            _ => return Ok(false),
        };

        match cache.map(PassCache::apps) {
            Some(TrackedApps::Loaded(apps)) => Ok(should_hold_role(Some(presence), apps)),
            Some(TrackedApps::Unavailable) => Err(DecisionError::AppsUnavailable),
            None => {
                let apps: HashSet<AppId> = self.store.list_apps(member.guild_id).await?;
                Ok(should_hold_role(Some(presence), &apps))
            }
        }
    }

    async fn grant(&self, member: &mut Member, role: &Role) -> MemberOutcome {
        if member.has_role(role.id) {
            debug!(member = %member, role = %role, "Member already has role");
            return MemberOutcome::Unchanged;
        }

        if let Err(e) = self
            .directory
            .add_role(member, role, &self.config.audit_reason)
            .await
        {
            warn!(member = %member, role = %role, error = %e, "Error assigning role");
            return MemberOutcome::Failed;
        }

        member.roles.insert(role.id);
        info!(member = %member, role = %role, "Assigned role");

        if let Err(e) = self.store.increment_assignments().await {
            warn!(error = %e, "Failed to increment assignment counter");
        }

        MemberOutcome::Granted
    }

    async fn revoke(&self, member: &mut Member, role: &Role) -> MemberOutcome {
        if !member.has_role(role.id) {
            return MemberOutcome::Unchanged;
        }

        if let Err(e) = self
            .directory
            .remove_role(member, role, &self.config.audit_reason)
            .await
        {
            warn!(member = %member, role = %role, error = %e, "Error removing role");
            return MemberOutcome::Failed;
        }

        member.roles.remove(&role.id);
        info!(member = %member, role = %role, "Removed role");
        MemberOutcome::Revoked
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::ReconcilerConfig;
    use crate::directory::{DirectoryError, DirectoryErrorKind, MockDirectory};
    use crate::presence::PresenceStatus;
    use crate::reconcile::test_support::*;
    use crate::state::MockAppStore;

    fn reconciler(directory: MockDirectory, store: MockAppStore) -> Reconciler {
        Reconciler::new(
            Arc::new(directory),
            Arc::new(store),
            ReconcilerConfig::default(),
        )
    }

    fn pass(apps: TrackedApps) -> PassCache {
        PassCache::new(GUILD, Some(marker_role()), apps)
    }

    #[tokio::test]
    async fn test_grant_is_idempotent_and_counts_once() {
        let mut directory = MockDirectory::new();
        directory
            .expect_add_role()
            .times(1)
            .returning(|_, _, _| Ok(()));
        directory.expect_remove_role().never();
        let mut store = MockAppStore::new();
        store
            .expect_increment_assignments()
            .times(1)
            .returning(|| Ok(1));

        let engine = reconciler(directory, store);
        let cache = pass(TrackedApps::Loaded(tracked()));
        let mut alice = member(1, PresenceStatus::Online, Some(GAME));

        assert_eq!(
            engine.reconcile_member(&mut alice, Some(&cache)).await,
            MemberOutcome::Granted
        );
        assert!(alice.has_role(ROLE));
        assert_eq!(
            engine.reconcile_member(&mut alice, Some(&cache)).await,
            MemberOutcome::Unchanged
        );
    }

    #[tokio::test]
    async fn test_revoke_does_not_touch_counter() {
        let mut directory = MockDirectory::new();
        directory
            .expect_remove_role()
            .times(1)
            .returning(|_, _, _| Ok(()));
        let mut store = MockAppStore::new();
        store.expect_increment_assignments().never();

        let engine = reconciler(directory, store);
        let cache = pass(TrackedApps::Loaded(tracked()));
        let mut alice = member(1, PresenceStatus::Offline, Some(GAME)).with_role(ROLE);

        assert_eq!(
            engine.reconcile_member(&mut alice, Some(&cache)).await,
            MemberOutcome::Revoked
        );
        assert!(!alice.has_role(ROLE));
        assert_eq!(
            engine.reconcile_member(&mut alice, Some(&cache)).await,
            MemberOutcome::Unchanged
        );
    }

    #[tokio::test]
    async fn test_no_role_is_a_noop() {
        let mut directory = MockDirectory::new();
        directory.expect_add_role().never();
        directory.expect_remove_role().never();
        let engine = reconciler(directory, MockAppStore::new());

        let cache = PassCache::new(GUILD, None, TrackedApps::Loaded(tracked()));
        let mut alice = member(1, PresenceStatus::Online, Some(GAME));

        assert_eq!(
            engine.reconcile_member(&mut alice, Some(&cache)).await,
            MemberOutcome::NoRole
        );
    }

    #[tokio::test]
    async fn test_unavailable_apps_fail_toward_removal() {
        let mut directory = MockDirectory::new();
        directory.expect_add_role().never();
        directory
            .expect_remove_role()
            .times(1)
            .returning(|_, _, _| Ok(()));
        let engine = reconciler(directory, MockAppStore::new());

        let cache = pass(TrackedApps::Unavailable);
        let mut alice = member(1, PresenceStatus::Online, Some(GAME)).with_role(ROLE);

        assert_eq!(
            engine.reconcile_member(&mut alice, Some(&cache)).await,
            MemberOutcome::Revoked
        );
    }

    #[tokio::test]
    async fn test_fresh_lookup_store_error_fails_toward_removal() {
        let mut directory = MockDirectory::new();
        directory
            .expect_cached_roles()
            .returning(|_| vec![marker_role()]);
        directory
            .expect_remove_role()
            .times(1)
            .returning(|_, _, _| Ok(()));
        let mut store = MockAppStore::new();
        store
            .expect_list_apps()
            .returning(|_| Err(StoreError::LockPoisoned));

        let engine = reconciler(directory, store);
        let mut alice = member(1, PresenceStatus::Online, Some(GAME)).with_role(ROLE);

        assert_eq!(
            engine.reconcile_member(&mut alice, None).await,
            MemberOutcome::Revoked
        );
    }

    #[tokio::test]
    async fn test_suppressed_status_skips_store_lookup() {
        let mut directory = MockDirectory::new();
        directory
            .expect_cached_roles()
            .returning(|_| vec![marker_role()]);
        let mut store = MockAppStore::new();
        store.expect_list_apps().never();

        let engine = reconciler(directory, store);
        let mut alice = member(1, PresenceStatus::Dnd, Some(GAME));

        assert_eq!(
            engine.reconcile_member(&mut alice, None).await,
            MemberOutcome::Unchanged
        );
    }

    #[tokio::test]
    async fn test_failed_add_is_not_counted_or_retried() {
        let mut directory = MockDirectory::new();
        directory.expect_add_role().times(1).returning(|_, _, _| {
            Err(DirectoryError::new(DirectoryErrorKind::Forbidden, "Missing Permissions"))
        });
        let mut store = MockAppStore::new();
        store.expect_increment_assignments().never();

        let engine = reconciler(directory, store);
        let cache = pass(TrackedApps::Loaded(tracked()));
        let mut alice = member(1, PresenceStatus::Idle, Some(GAME));

        assert_eq!(
            engine.reconcile_member(&mut alice, Some(&cache)).await,
            MemberOutcome::Failed
        );
        assert!(!alice.has_role(ROLE));
    }

    #[tokio::test]
    async fn test_counter_failure_still_reports_grant() {
        let mut directory = MockDirectory::new();
        directory.expect_add_role().returning(|_, _, _| Ok(()));
        let mut store = MockAppStore::new();
        store
            .expect_increment_assignments()
            .returning(|| Err(StoreError::LockPoisoned));

        let engine = reconciler(directory, store);
        let cache = pass(TrackedApps::Loaded(tracked()));
        let mut alice = member(1, PresenceStatus::Online, Some(GAME));

        assert_eq!(
            engine.reconcile_member(&mut alice, Some(&cache)).await,
            MemberOutcome::Granted
        );
    }
}
