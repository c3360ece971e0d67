//! Incremental reconciliation on presence notifications
//!
//! Notifications arrive one member at a time, so there is no pass cache: the
//! role and tracked apps are looked up fresh for each decision.

use tracing::debug;

use super::{MemberOutcome, Reconciler};
use crate::directory::Member;
use crate::ids::{GuildId, UserId};
use crate::presence::Presence;

/// A presence-change notification for one member of one guild
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceUpdate {
    pub guild_id: GuildId,
    pub user_id: UserId,
    /// New presence; `None` when the member went fully offline
    pub presence: Option<Presence>,
}

impl Reconciler {
    /// Reconcile the member a presence notification refers to.
    ///
    /// `member` is the caller's cached view of that guild member. Without one
    /// the notification is dropped and `None` returned.
    pub async fn handle_presence_update(
        &self,
        update: PresenceUpdate,
        member: Option<&mut Member>,
    ) -> Option<MemberOutcome> {
        let Some(member) = member else {
            debug!(
                guild_id = %update.guild_id,
                user_id = %update.user_id,
                "Skipping presence update with no cached member"
            );
            return None;
        };

        member.presence = update.presence;
        Some(self.reconcile_member(member, None).await)
    }
}
