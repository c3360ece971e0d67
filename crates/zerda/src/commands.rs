//! Operator slash-command handlers.
//!
//! Handlers only decide what to reply and whether the guild needs a fresh
//! sweep. Sending the reply and running the sweep is up to the caller, so the
//! reply is never held up by a slow sweep.

use std::fmt;

use async_trait::async_trait;
use reconciler::{AppId, AppStore, DirectoryError, DirectoryErrorKind, DirectoryResult, GuildId};
use tracing::{error, info, warn};

use crate::discord::model::{ApiCommandOption, ApiInteraction, APPLICATION_COMMAND};
use crate::replies::{InteractionRef, Reply};

/// Option name carrying the application ID for `app add` / `app remove`
pub const APP_ID_OPTION: &str = "application-id";

/// ADMINISTRATOR permission bit
pub const ADMINISTRATOR: u64 = 1 << 3;

/// Longest message the platform accepts
const MAX_MESSAGE_LEN: usize = 2000;

/// JSON error code for an application ID the platform does not know
const UNKNOWN_APPLICATION: u32 = 10002;

/// JSON error code for a malformed request, e.g. an ID out of range
const INVALID_FORM_BODY: u32 = 50035;

/// Public name and ID of an application
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Application {
    pub id: AppId,
    /// Empty when the platform no longer knows the ID
    pub name: String,
}

impl Application {
    pub fn new(id: AppId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }

    fn unnamed(id: AppId) -> Self {
        Self::new(id, "")
    }
}

impl fmt::Display for Application {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.name.is_empty() {
            write!(f, "application {}", self.id)
        } else {
            write!(f, "{} ({})", self.name, self.id)
        }
    }
}

/// Resolves application IDs to their public info
#[async_trait]
pub trait AppLookup: Send + Sync {
    async fn application(&self, id: AppId) -> DirectoryResult<Application>;
}

fn is_unknown_app(e: &DirectoryError) -> bool {
    e.kind == DirectoryErrorKind::NotFound || e.code == Some(UNKNOWN_APPLICATION)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Info,
    /// Raw, not yet validated application ID
    AppAdd(String),
    AppRemove(String),
    AppList,
    Unknown(String),
}

impl Command {
    fn parse(name: &str, options: &[ApiCommandOption]) -> Self {
        match name {
            "info" => Command::Info,
            "app" => {
                let Some(sub) = options.first() else {
                    return Command::Unknown(name.to_string());
                };
                match sub.name.as_str() {
                    "add" => Command::AppAdd(app_id_option(&sub.options)),
                    "remove" => Command::AppRemove(app_id_option(&sub.options)),
                    "list" => Command::AppList,
                    other => Command::Unknown(format!("{name} {other}")),
                }
            }
            other => Command::Unknown(other.to_string()),
        }
    }

    fn requires_admin(&self) -> bool {
        matches!(self, Command::AppAdd(_) | Command::AppRemove(_))
    }

    fn requires_guild(&self) -> bool {
        matches!(
            self,
            Command::AppAdd(_) | Command::AppRemove(_) | Command::AppList
        )
    }
}

fn app_id_option(options: &[ApiCommandOption]) -> String {
    options
        .iter()
        .find(|o| o.name == APP_ID_OPTION)
        .and_then(|o| o.value.as_ref())
        .map(|v| match v {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        })
        .unwrap_or_default()
}

/// A slash command plus the context needed to authorize and answer it
#[derive(Debug, Clone)]
pub struct Invocation {
    pub interaction: InteractionRef,
    pub guild_id: Option<GuildId>,
    pub is_admin: bool,
    /// Who ran it, for logs
    pub invoker: String,
    pub command: Command,
}

impl Invocation {
    /// `None` for anything that is not a slash command
    pub fn from_interaction(interaction: ApiInteraction) -> Option<Self> {
        if interaction.kind != APPLICATION_COMMAND {
            return None;
        }
        let data = interaction.data.as_ref()?;
        let command = Command::parse(&data.name, &data.options);

        let is_admin = interaction
            .member
            .as_ref()
            .and_then(|m| m.permissions.as_deref())
            .and_then(|p| p.parse::<u64>().ok())
            .is_some_and(|bits| bits & ADMINISTRATOR != 0);
        let invoker = interaction
            .invoker()
            .map(|u| format!("{} ({})", u.tag(), u.id))
            .unwrap_or_else(|| "unknown user".to_string());

        Some(Self {
            interaction: InteractionRef {
                id: interaction.id,
                token: interaction.token,
            },
            guild_id: interaction.guild_id,
            is_admin,
            invoker,
            command,
        })
    }
}

/// What the caller should do after a command ran
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutcome {
    pub reply: Reply,
    /// Guild whose members must be re-checked against the new app list
    pub resweep: Option<GuildId>,
}

impl From<Reply> for CommandOutcome {
    fn from(reply: Reply) -> Self {
        Self {
            reply,
            resweep: None,
        }
    }
}

/// Run one command against the app store. Application IDs are checked
/// against `apps` before anything is written.
pub async fn execute(
    invocation: &Invocation,
    store: &dyn AppStore,
    apps: &dyn AppLookup,
) -> CommandOutcome {
    let command = &invocation.command;

    if command.requires_admin() && !invocation.is_admin {
        info!(invoker = %invocation.invoker, "Not an admin");
        return Reply::bad("Sorry, only admins can use this command!").into();
    }
    let guild = match (command.requires_guild(), invocation.guild_id) {
        (true, None) => {
            info!(invoker = %invocation.invoker, command = ?command, "Guild command used outside a guild");
            return Reply::bad("This command can only be used in a server.").into();
        }
        (_, guild) => guild,
    };

    match (command, guild) {
        (Command::Info, _) => info_reply(store).await.into(),
        (Command::AppAdd(raw), Some(guild)) => app_add(guild, raw, store, apps).await,
        (Command::AppRemove(raw), Some(guild)) => app_remove(guild, raw, store, apps).await,
        (Command::AppList, Some(guild)) => app_list(guild, store, apps).await.into(),
        (Command::Unknown(name), _) => {
            warn!(command = %name, invoker = %invocation.invoker, "Unimplemented command");
            Reply::meh("Sorry, I don't know how to do this yet. It's probably coming soon!").into()
        }
        // Guild commands without a guild were rejected above.
        _ => Reply::unknown_error().into(),
    }
}

async fn info_reply(store: &dyn AppStore) -> Reply {
    let stats = match store.stats().await {
        Ok(stats) => stats,
        Err(e) => {
            error!(error = %e, "Failed to read stats");
            return Reply::unknown_error();
        }
    };

    Reply::plain(format!(
        "{}\n**Running version:** {}\n**Source code:** {}\n\n```\nStats for nerds:\n  - Servers bot is active in: {}\n  - Applications tracked:     {}\n  - Total role assignments:   {}\n```",
        env!("CARGO_PKG_DESCRIPTION"),
        env!("CARGO_PKG_VERSION"),
        env!("CARGO_PKG_HOMEPAGE"),
        stats.guilds,
        stats.apps,
        stats.assignments,
    ))
}

fn parse_app_id(raw: &str) -> Result<AppId, Reply> {
    AppId::parse(raw).map_err(|e| {
        info!(error = %e, "Rejected application ID");
        Reply::bad(format!("`{raw}` is not a valid application ID"))
    })
}

/// Reply for a failed application lookup
fn lookup_failed(app: AppId, e: &DirectoryError) -> Reply {
    if is_unknown_app(e) {
        info!(app_id = %app, error = %e, "Unknown application");
        Reply::bad(format!("Unknown application `{app}`"))
    } else if e.code == Some(INVALID_FORM_BODY) {
        info!(app_id = %app, error = %e, "Application ID rejected by platform");
        Reply::bad(format!("`{app}` is not a valid application ID"))
    } else {
        error!(app_id = %app, error = %e, "Application lookup failed");
        Reply::unknown_error()
    }
}

async fn app_add(
    guild: GuildId,
    raw: &str,
    store: &dyn AppStore,
    apps: &dyn AppLookup,
) -> CommandOutcome {
    let id = match parse_app_id(raw) {
        Ok(id) => id,
        Err(reply) => return reply.into(),
    };
    let app = match apps.application(id).await {
        Ok(app) => app,
        Err(e) => return lookup_failed(id, &e).into(),
    };

    match store.add_app(guild, app.id).await {
        Ok(()) => {
            info!(guild_id = %guild, app = %app, "Added app");
            CommandOutcome {
                reply: Reply::good(format!("Now tracking {app}")),
                resweep: Some(guild),
            }
        }
        Err(e) if e.is_already_tracked() => {
            info!(guild_id = %guild, app = %app, "App already tracked");
            Reply::meh(format!("Already tracking {app} in this server")).into()
        }
        Err(e) => {
            error!(guild_id = %guild, app = %app, error = %e, "add_app failed");
            Reply::unknown_error().into()
        }
    }
}

async fn app_remove(
    guild: GuildId,
    raw: &str,
    store: &dyn AppStore,
    apps: &dyn AppLookup,
) -> CommandOutcome {
    let id = match parse_app_id(raw) {
        Ok(id) => id,
        Err(reply) => return reply.into(),
    };
    // An app deleted on the platform side can still be untracked.
    let app = match apps.application(id).await {
        Ok(app) => app,
        Err(e) if is_unknown_app(&e) => Application::unnamed(id),
        Err(e) => return lookup_failed(id, &e).into(),
    };

    match store.remove_app(guild, app.id).await {
        Ok(0) => {
            info!(guild_id = %guild, app = %app, "App was not tracked");
            Reply::meh(format!("I wasn't tracking {app} in this server")).into()
        }
        Ok(_) => {
            info!(guild_id = %guild, app = %app, "Removed app");
            CommandOutcome {
                reply: Reply::good(format!("Stopped tracking {app}")),
                resweep: Some(guild),
            }
        }
        Err(e) => {
            error!(guild_id = %guild, app = %app, error = %e, "remove_app failed");
            Reply::unknown_error().into()
        }
    }
}

async fn app_list(guild: GuildId, store: &dyn AppStore, apps: &dyn AppLookup) -> Reply {
    let ids = match store.list_apps(guild).await {
        Ok(ids) => ids,
        Err(e) => {
            error!(guild_id = %guild, error = %e, "list_apps failed");
            return Reply::unknown_error();
        }
    };

    if ids.is_empty() {
        return Reply::plain("I am not tracking any apps in this server yet!");
    }

    let mut ids: Vec<AppId> = ids.into_iter().collect();
    ids.sort();

    let mut message = String::from("I am tracking these apps in this server:\n");
    for (i, id) in ids.iter().enumerate() {
        let app = match apps.application(*id).await {
            Ok(app) => app,
            Err(e) => {
                if !is_unknown_app(&e) {
                    warn!(guild_id = %guild, app_id = %id, error = %e, "Application lookup failed");
                }
                Application::unnamed(*id)
            }
        };
        let line = if app.name.is_empty() {
            format!("- {}\n", app.id)
        } else {
            format!("- {app}\n")
        };
        let more = format!("...and {} more\n", ids.len() - i);
        if message.len() + line.len() + more.len() > MAX_MESSAGE_LEN {
            message.push_str(&more);
            break;
        }
        message.push_str(&line);
    }
    Reply::plain(message)
}
