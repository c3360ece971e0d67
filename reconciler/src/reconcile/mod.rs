//! Reconciliation engine
//!
//! Both the full sweep and the per-notification path funnel into
//! [`Reconciler::reconcile_member`], which applies [`should_hold_role`] and
//! issues at most one add/remove call.
//!
//! - `member`: single-member reconciliation (decision + idempotent apply)
//! - `batch`: guild passes and the all-guild sweep, sequential by design to
//!   stay under the platform rate limiter
//! - `events`: incremental reconciliation on presence notifications
//!
//! A sweep and a notification for the same member may interleave. Nothing
//! serialises them; both paths are idempotent, so the worst case is a
//! redundant remote call.
//!
//! [`should_hold_role`]: crate::presence::should_hold_role

mod batch;
mod events;
mod member;

use std::sync::Arc;

use crate::config::ReconcilerConfig;
use crate::directory::Directory;
use crate::role::RoleResolver;
use crate::state::AppStore;

pub use batch::SweepSummary;
pub use events::PresenceUpdate;
pub use member::MemberOutcome;

/// Shared reference to Reconciler
pub type SharedReconciler = Arc<Reconciler>;

/// How a pass obtains the marker role
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoleMode {
    /// Create the role if it is missing (startup, guild join)
    Ensure,
    /// Only look it up; a missing role turns the pass into a no-op
    Lookup,
}

/// The reconciliation engine, wired to its two collaborators
pub struct Reconciler {
    directory: Arc<dyn Directory>,
    store: Arc<dyn AppStore>,
    roles: RoleResolver,
    config: ReconcilerConfig,
}

impl Reconciler {
    pub fn new(
        directory: Arc<dyn Directory>,
        store: Arc<dyn AppStore>,
        config: ReconcilerConfig,
    ) -> Self {
        let roles = RoleResolver::new(directory.clone(), config.role_spec());
        Self {
            directory,
            store,
            roles,
            config,
        }
    }

    /// Create a shared reference to this reconciler
    pub fn shared(self) -> SharedReconciler {
        Arc::new(self)
    }

    pub fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn AppStore> {
        &self.store
    }

    pub fn directory(&self) -> &Arc<dyn Directory> {
        &self.directory
    }

    pub fn roles(&self) -> &RoleResolver {
        &self.roles
    }
}
