//! Wire types for the platform REST API and gateway payloads.
//!
//! Only the fields the bot reads are modelled; everything else is ignored by
//! serde.

use std::collections::HashSet;

use reconciler::{Activity, AppId, Guild, GuildId, Member, Presence, PresenceStatus, Role, RoleId, UserId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize)]
pub struct ApiUser {
    pub id: UserId,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub discriminator: Option<String>,
}

impl ApiUser {
    /// `name#1234` for legacy accounts, plain username otherwise
    pub fn tag(&self) -> String {
        match self.discriminator.as_deref() {
            Some(d) if d != "0" => format!("{}#{}", self.username, d),
            _ => self.username.clone(),
        }
    }
}

/// Only the ID is guaranteed on presence payloads
#[derive(Debug, Clone, Deserialize)]
pub struct PartialUser {
    pub id: UserId,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiGuild {
    pub id: GuildId,
    #[serde(default)]
    pub name: String,
}

impl From<ApiGuild> for Guild {
    fn from(guild: ApiGuild) -> Self {
        Guild::new(guild.id, guild.name)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiRole {
    pub id: RoleId,
    pub name: String,
    #[serde(default)]
    pub position: u32,
}

impl ApiRole {
    pub fn into_role(self, guild_id: GuildId) -> Role {
        Role {
            id: self.id,
            guild_id,
            name: self.name,
            position: self.position,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateRoleBody<'a> {
    pub name: &'a str,
    /// Bitfield serialized as a decimal string
    pub permissions: String,
    pub hoist: bool,
    pub mentionable: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct RolePositionBody {
    pub id: RoleId,
    pub position: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiMember {
    /// Absent only in some gateway payloads where the user is implied
    #[serde(default)]
    pub user: Option<ApiUser>,
    #[serde(default)]
    pub nick: Option<String>,
    #[serde(default)]
    pub roles: Vec<RoleId>,
}

impl ApiMember {
    /// Convert into the engine's member shape, or `None` without a user
    pub fn into_member(self, guild_id: GuildId) -> Option<Member> {
        let user = self.user?;
        let tag = match &self.nick {
            Some(nick) => format!("{} [{}]", user.tag(), nick),
            None => user.tag(),
        };
        Some(Member {
            guild_id,
            user_id: user.id,
            tag,
            roles: self.roles.into_iter().collect::<HashSet<_>>(),
            presence: None,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiActivity {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub application_id: Option<AppId>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiPresence {
    pub user: PartialUser,
    #[serde(default)]
    pub guild_id: Option<GuildId>,
    pub status: PresenceStatus,
    #[serde(default)]
    pub activities: Vec<ApiActivity>,
}

impl ApiPresence {
    /// The platform reports fully offline members with an `offline` status
    /// and no activities; treat that as no presence at all.
    pub fn to_presence(&self) -> Option<Presence> {
        if self.status == PresenceStatus::Offline && self.activities.is_empty() {
            return None;
        }
        Some(Presence::new(
            self.status,
            self.activities
                .iter()
                .map(|a| Activity {
                    name: a.name.clone(),
                    application_id: a.application_id,
                })
                .collect(),
        ))
    }
}

/// JSON error body returned by the REST API
#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorBody {
    #[serde(default)]
    pub code: Option<u32>,
    #[serde(default)]
    pub message: String,
    /// Seconds to wait, on 429 responses
    #[serde(default)]
    pub retry_after: Option<f64>,
    /// Set on 429 responses that hold back every route
    #[serde(default)]
    pub global: bool,
}

/// Public application info, as returned by the RPC lookup
#[derive(Debug, Clone, Deserialize)]
pub struct ApiApplication {
    pub id: AppId,
    #[serde(default)]
    pub name: String,
}

/// Interaction type for slash commands
pub const APPLICATION_COMMAND: u8 = 2;

/// Incoming interaction, as delivered by `INTERACTION_CREATE`
#[derive(Debug, Clone, Deserialize)]
pub struct ApiInteraction {
    pub id: String,
    pub token: String,
    #[serde(rename = "type")]
    pub kind: u8,
    #[serde(default)]
    pub guild_id: Option<GuildId>,
    /// Set when invoked inside a guild
    #[serde(default)]
    pub member: Option<ApiInteractionMember>,
    /// Set when invoked in a DM
    #[serde(default)]
    pub user: Option<ApiUser>,
    #[serde(default)]
    pub data: Option<ApiCommandData>,
}

impl ApiInteraction {
    pub fn invoker(&self) -> Option<&ApiUser> {
        self.member
            .as_ref()
            .and_then(|m| m.user.as_ref())
            .or(self.user.as_ref())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiInteractionMember {
    #[serde(default)]
    pub user: Option<ApiUser>,
    /// Resolved permission bitfield as a decimal string
    #[serde(default)]
    pub permissions: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiCommandData {
    pub name: String,
    #[serde(default)]
    pub options: Vec<ApiCommandOption>,
}

/// A command option; subcommands carry their own options
#[derive(Debug, Clone, Deserialize)]
pub struct ApiCommandOption {
    pub name: String,
    #[serde(default)]
    pub value: Option<serde_json::Value>,
    #[serde(default)]
    pub options: Vec<ApiCommandOption>,
}

/// Interaction callback: type 4 is "respond with a message"
#[derive(Debug, Clone, Serialize)]
pub struct InteractionCallback<'a> {
    #[serde(rename = "type")]
    pub kind: u8,
    pub data: InteractionCallbackData<'a>,
}

#[derive(Debug, Clone, Serialize)]
pub struct InteractionCallbackData<'a> {
    pub content: &'a str,
    /// 64 = ephemeral
    pub flags: u32,
}
