//! Gateway dispatch events and the bot that reacts to them.
//!
//! A gateway bridge forwards dispatch events to this process as
//! newline-delimited JSON objects of the form `{"t": "EVENT_NAME", "d": {..}}`.
//! [`run_event_loop`] reads them, keeps the [`GuildCache`] current and hands
//! each event to [`Bot::handle`].
//!
//! Full sweeps and post-command sweeps run as spawned tasks so presence
//! updates keep flowing while a large guild is processed. At most one full
//! sweep runs at a time.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use reconciler::{Guild, GuildId, PresenceUpdate, SharedReconciler, UserId};
use serde::Deserialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::commands::{self, AppLookup, Invocation};
use crate::discord::model::{ApiGuild, ApiInteraction, ApiMember, ApiPresence, ApiRole, ApiUser};
use crate::discord::SharedGuildCache;
use crate::replies::Responder;

// ============================================================================
// Events
// ============================================================================

#[derive(Debug, Deserialize)]
struct RawDispatch {
    #[serde(default)]
    t: Option<String>,
    #[serde(default)]
    d: serde_json::Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReadyPayload {
    pub user: ApiUser,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GuildCreatePayload {
    #[serde(flatten)]
    pub guild: ApiGuild,
    #[serde(default)]
    pub roles: Vec<ApiRole>,
    #[serde(default)]
    pub members: Vec<ApiMember>,
    #[serde(default)]
    pub presences: Vec<ApiPresence>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GuildDeletePayload {
    pub id: GuildId,
    /// Set during outages; the bot is still a member
    #[serde(default)]
    pub unavailable: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MemberPayload {
    pub guild_id: GuildId,
    #[serde(flatten)]
    pub member: ApiMember,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MemberRemovePayload {
    pub guild_id: GuildId,
    pub user: ApiUser,
}

/// Dispatch events the bot acts on
#[derive(Debug, Clone)]
pub enum GatewayEvent {
    Ready(ReadyPayload),
    GuildCreate(Box<GuildCreatePayload>),
    GuildDelete(GuildDeletePayload),
    PresenceUpdate(ApiPresence),
    MemberUpsert(MemberPayload),
    MemberRemove(MemberRemovePayload),
    InteractionCreate(Box<ApiInteraction>),
}

impl GatewayEvent {
    /// Parse one line from the bridge. `Ok(None)` for events the bot ignores.
    pub fn parse(line: &str) -> serde_json::Result<Option<Self>> {
        let raw: RawDispatch = serde_json::from_str(line)?;
        let Some(name) = raw.t else {
            return Ok(None);
        };

        let event = match name.as_str() {
            "READY" => GatewayEvent::Ready(serde_json::from_value(raw.d)?),
            "GUILD_CREATE" => GatewayEvent::GuildCreate(Box::new(serde_json::from_value(raw.d)?)),
            "GUILD_DELETE" => GatewayEvent::GuildDelete(serde_json::from_value(raw.d)?),
            "PRESENCE_UPDATE" => GatewayEvent::PresenceUpdate(serde_json::from_value(raw.d)?),
            "GUILD_MEMBER_ADD" | "GUILD_MEMBER_UPDATE" => {
                GatewayEvent::MemberUpsert(serde_json::from_value(raw.d)?)
            }
            "GUILD_MEMBER_REMOVE" => GatewayEvent::MemberRemove(serde_json::from_value(raw.d)?),
            "INTERACTION_CREATE" => {
                GatewayEvent::InteractionCreate(Box::new(serde_json::from_value(raw.d)?))
            }
            _ => return Ok(None),
        };
        Ok(Some(event))
    }
}

// ============================================================================
// Bot
// ============================================================================

/// Clears the full-sweep flag when the sweep task ends, however it ends
struct SweepGuard(Arc<AtomicBool>);

impl Drop for SweepGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Reacts to gateway events by driving the reconciler
pub struct Bot {
    engine: SharedReconciler,
    cache: SharedGuildCache,
    responder: Arc<dyn Responder>,
    apps: Arc<dyn AppLookup>,
    ready: AtomicBool,
    sweeping: Arc<AtomicBool>,
}

impl Bot {
    pub fn new(
        engine: SharedReconciler,
        cache: SharedGuildCache,
        responder: Arc<dyn Responder>,
        apps: Arc<dyn AppLookup>,
    ) -> Self {
        Self {
            engine,
            cache,
            responder,
            apps,
            ready: AtomicBool::new(false),
            sweeping: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    /// Handle one event. Returns the spawned sweep, if the event started one.
    pub async fn handle(&self, event: GatewayEvent) -> Option<JoinHandle<()>> {
        match event {
            GatewayEvent::Ready(ready) => self.on_ready(ready),
            GatewayEvent::GuildCreate(payload) => self.on_guild_create(*payload),
            GatewayEvent::GuildDelete(payload) => {
                self.on_guild_delete(payload);
                None
            }
            GatewayEvent::PresenceUpdate(presence) => {
                self.on_presence_update(presence).await;
                None
            }
            GatewayEvent::MemberUpsert(payload) => {
                if let Some(member) = payload.member.into_member(payload.guild_id) {
                    self.cache.upsert_member(member);
                }
                None
            }
            GatewayEvent::MemberRemove(payload) => {
                self.cache.remove_member(payload.guild_id, payload.user.id);
                None
            }
            GatewayEvent::InteractionCreate(interaction) => self.on_interaction(*interaction).await,
        }
    }

    fn on_ready(&self, ready: ReadyPayload) -> Option<JoinHandle<()>> {
        info!(user = %ready.user.tag(), user_id = %ready.user.id, "Logged in");
        self.ready.store(true, Ordering::SeqCst);
        self.start_full_sweep()
    }

    /// Run the full sweep in the background unless one is already running
    pub fn start_full_sweep(&self) -> Option<JoinHandle<()>> {
        if self.sweeping.swap(true, Ordering::SeqCst) {
            info!("Full sweep already running, skipping");
            return None;
        }

        let engine = self.engine.clone();
        let guard = SweepGuard(self.sweeping.clone());
        Some(tokio::spawn(async move {
            let _guard = guard;
            engine.reconcile_all_guilds().await;
        }))
    }

    fn on_guild_create(&self, payload: GuildCreatePayload) -> Option<JoinHandle<()>> {
        let guild = Guild::from(payload.guild);
        let guild_id = guild.id;

        self.cache.upsert_guild(guild.clone());
        self.cache.set_roles(
            guild_id,
            payload
                .roles
                .into_iter()
                .map(|r| r.into_role(guild_id))
                .collect(),
        );
        for member in payload
            .members
            .into_iter()
            .filter_map(|m| m.into_member(guild_id))
        {
            self.cache.upsert_member(member);
        }
        for presence in &payload.presences {
            self.cache
                .set_presence(guild_id, presence.user.id, presence.to_presence());
        }

        // Before READY this is the initial guild list, which the READY sweep covers.
        if !self.is_ready() {
            debug!(guild = %guild, "Cached guild");
            return None;
        }

        info!(guild = %guild, "Joined guild");
        let engine = self.engine.clone();
        Some(tokio::spawn(async move {
            engine.ensure_and_reconcile_guild(&guild).await;
        }))
    }

    fn on_guild_delete(&self, payload: GuildDeletePayload) {
        if payload.unavailable {
            warn!(guild_id = %payload.id, "Guild became unavailable");
            return;
        }
        match self.cache.guild(payload.id) {
            Some(guild) => info!(guild = %guild, "Left guild"),
            None => info!(guild_id = %payload.id, "Left guild"),
        }
        self.cache.remove_guild(payload.id);
    }

    async fn on_presence_update(&self, presence: ApiPresence) {
        let user_id: UserId = presence.user.id;
        let Some(guild_id) = presence.guild_id else {
            debug!(user_id = %user_id, "Skipping presence update without a guild");
            return;
        };

        let update = PresenceUpdate {
            guild_id,
            user_id,
            presence: presence.to_presence(),
        };
        self.cache
            .set_presence(guild_id, user_id, update.presence.clone());

        let mut member = self.cache.member(guild_id, user_id);
        self.engine
            .handle_presence_update(update, member.as_mut())
            .await;
    }

    async fn on_interaction(&self, interaction: ApiInteraction) -> Option<JoinHandle<()>> {
        let invocation = Invocation::from_interaction(interaction)?;
        info!(
            command = ?invocation.command,
            invoker = %invocation.invoker,
            guild_id = ?invocation.guild_id,
            "Command received"
        );

        let outcome = commands::execute(
            &invocation,
            self.engine.store().as_ref(),
            self.apps.as_ref(),
        )
        .await;
        info!(invoker = %invocation.invoker, reply = %outcome.reply, "Reply");
        if let Err(e) = self
            .responder
            .respond(&invocation.interaction, &outcome.reply)
            .await
        {
            error!(error = %e, "Failed to send reply");
        }

        let guild_id = outcome.resweep?;
        let guild = self
            .cache
            .guild(guild_id)
            .unwrap_or_else(|| Guild::new(guild_id, guild_id.to_string()));
        info!(guild = %guild, "Checking all members for changed app list");
        let engine = self.engine.clone();
        Some(tokio::spawn(async move {
            engine.reconcile_guild(&guild).await;
        }))
    }
}

// ============================================================================
// Event loop
// ============================================================================

/// Read dispatch events until the bridge closes the stream.
///
/// With `sweep_every` set, a full sweep is also started on that period once
/// the bot is ready.
pub async fn run_event_loop<R>(bot: Arc<Bot>, reader: R, sweep_every: Option<Duration>) -> Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut ticker = sweep_every.map(|period| {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        ticker
    });

    loop {
        let tick = async {
            match ticker.as_mut() {
                Some(ticker) => {
                    ticker.tick().await;
                }
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read gateway stream")? else {
                    info!("Gateway stream closed");
                    return Ok(());
                };
                if line.trim().is_empty() {
                    continue;
                }
                match GatewayEvent::parse(&line) {
                    Ok(Some(event)) => {
                        bot.handle(event).await;
                    }
                    Ok(None) => {}
                    Err(e) => warn!(error = %e, "Skipping malformed gateway event"),
                }
            }
            _ = tick => {
                if bot.is_ready() {
                    info!("Starting periodic sweep");
                    bot.start_full_sweep();
                } else {
                    debug!("Skipping periodic sweep before ready");
                }
            }
        }
    }
}
