//! Engine configuration

use serde::Deserialize;

use crate::directory::RoleSpec;

/// Name of the marker role when nothing else is configured
pub const DEFAULT_ROLE_NAME: &str = "Currently Playing";

/// Tunables for the reconciliation engine
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ReconcilerConfig {
    /// Fixed name identifying the marker role in every guild
    pub role_name: String,
    /// Log batch progress every N members
    pub progress_every: usize,
    /// Audit log reason attached to role creation and grants
    pub audit_reason: String,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            role_name: DEFAULT_ROLE_NAME.to_string(),
            progress_every: 50,
            audit_reason: "Role for people currently playing".to_string(),
        }
    }
}

impl ReconcilerConfig {
    /// Defaults overridden by `ZERDA_ROLE_NAME` and `ZERDA_PROGRESS_EVERY`
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            role_name: std::env::var("ZERDA_ROLE_NAME")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .unwrap_or(defaults.role_name),
            progress_every: std::env::var("ZERDA_PROGRESS_EVERY")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|n| *n > 0)
                .unwrap_or(defaults.progress_every),
            audit_reason: defaults.audit_reason,
        }
    }

    /// Shape of the marker role when it has to be created.
    ///
    /// Hoisting is what makes the role useful: it groups players at the top of
    /// the member list. It grants no permissions and sits at the bottom of the
    /// hierarchy.
    pub fn role_spec(&self) -> RoleSpec {
        RoleSpec {
            name: self.role_name.clone(),
            hoist: true,
            mentionable: true,
            permissions: 0,
            position: 0,
            reason: self.audit_reason.clone(),
        }
    }
}
