//! Member presence and the membership decision
//!
//! A presence is what the platform tells us a member is doing right now: a
//! status plus zero or more activities. [`should_hold_role`] maps it onto the
//! one question this engine answers, "should this member wear the marker role?"

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::ids::AppId;

/// Platform presence status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    Online,
    Idle,
    Dnd,
    Offline,
    Invisible,
}

impl PresenceStatus {
    /// Statuses under which the marker role is never held.
    pub fn suppresses_role(self) -> bool {
        matches!(self, Self::Dnd | Self::Offline | Self::Invisible)
    }
}

/// A single activity record. Custom statuses and some rich presences carry no
/// application ID.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Activity {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub application_id: Option<AppId>,
}

impl Activity {
    pub fn for_app(name: impl Into<String>, application_id: AppId) -> Self {
        Self {
            name: name.into(),
            application_id: Some(application_id),
        }
    }
}

/// Snapshot of a member's presence, supplied per reconciliation call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Presence {
    pub status: PresenceStatus,
    #[serde(default)]
    pub activities: Vec<Activity>,
}

impl Presence {
    pub fn new(status: PresenceStatus, activities: Vec<Activity>) -> Self {
        Self { status, activities }
    }
}

/// Decide whether a member with `presence` should hold the marker role in a
/// guild tracking `tracked`.
///
/// Absent presence and dnd/offline/invisible statuses never qualify, whatever
/// activity is reported. Otherwise at least one activity must carry an
/// application ID that is tracked.
pub fn should_hold_role(presence: Option<&Presence>, tracked: &HashSet<AppId>) -> bool {
    let Some(presence) = presence else {
        return false;
    };

    if presence.status.suppresses_role() {
        return false;
    }

    presence
        .activities
        .iter()
        .filter_map(|activity| activity.application_id)
        .any(|app| tracked.contains(&app))
}
