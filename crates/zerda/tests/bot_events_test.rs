//! Bot event handling end to end
//!
//! Gateway events go through the real [`Bot`], [`GuildCache`] and RocksDB
//! store. Only the REST side is replaced, by a directory that applies role
//! changes straight to the cache the way the HTTP adapter does.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use reconciler::{
    AppId, Directory, DirectoryError, DirectoryErrorKind, DirectoryResult, Guild, GuildId, Member,
    Reconciler, ReconcilerConfig, Role, RoleId, RoleSpec, StateStore, UserId,
};
use zerda::{
    run_event_loop, AppLookup, Application, Bot, GatewayEvent, GuildCache, InteractionRef, Reply,
    Responder, SharedGuildCache, Signal,
};

const GUILD: GuildId = GuildId::new(5);
const GAME: AppId = AppId::new(1001);
const ALICE: UserId = UserId::new(1);
const BOB: UserId = UserId::new(2);

struct CacheDirectory {
    cache: SharedGuildCache,
    next_role_id: Mutex<u64>,
    mutations: Mutex<usize>,
    /// Makes the guild list never resolve
    stall_guilds: AtomicBool,
}

impl CacheDirectory {
    fn new(cache: SharedGuildCache) -> Self {
        Self {
            cache,
            next_role_id: Mutex::new(500),
            mutations: Mutex::new(0),
            stall_guilds: AtomicBool::new(false),
        }
    }

    fn mutations(&self) -> usize {
        *self.mutations.lock().unwrap()
    }
}

#[async_trait]
impl Directory for CacheDirectory {
    async fn guilds(&self) -> DirectoryResult<Vec<Guild>> {
        if self.stall_guilds.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        Ok(self.cache.guilds())
    }

    fn cached_roles(&self, guild: GuildId) -> Vec<Role> {
        self.cache.roles(guild)
    }

    async fn fetch_roles(&self, guild: GuildId) -> DirectoryResult<Vec<Role>> {
        Ok(self.cache.roles(guild))
    }

    async fn create_role(&self, guild: GuildId, spec: &RoleSpec) -> DirectoryResult<Role> {
        let mut next = self.next_role_id.lock().unwrap();
        *next += 1;
        let role = Role {
            id: RoleId::new(*next),
            guild_id: guild,
            name: spec.name.clone(),
            position: spec.position,
        };
        self.cache.push_role(role.clone());
        Ok(role)
    }

    async fn fetch_members(
        &self,
        guild: GuildId,
        _with_presences: bool,
    ) -> DirectoryResult<Vec<Member>> {
        Ok([ALICE, BOB]
            .into_iter()
            .filter_map(|user| self.cache.member(guild, user))
            .collect())
    }

    async fn add_role(&self, member: &Member, role: &Role, _reason: &str) -> DirectoryResult<()> {
        *self.mutations.lock().unwrap() += 1;
        self.cache
            .set_member_role(member.guild_id, member.user_id, role.id, true);
        Ok(())
    }

    async fn remove_role(
        &self,
        member: &Member,
        role: &Role,
        _reason: &str,
    ) -> DirectoryResult<()> {
        *self.mutations.lock().unwrap() += 1;
        self.cache
            .set_member_role(member.guild_id, member.user_id, role.id, false);
        Ok(())
    }
}

#[derive(Default)]
struct RecordingResponder {
    replies: Mutex<Vec<(InteractionRef, Reply)>>,
}

#[async_trait]
impl Responder for RecordingResponder {
    async fn respond(&self, interaction: &InteractionRef, reply: &Reply) -> DirectoryResult<()> {
        self.replies
            .lock()
            .unwrap()
            .push((interaction.clone(), reply.clone()));
        Ok(())
    }
}

/// Knows only the one game the tests play
struct OneGameLookup;

#[async_trait]
impl AppLookup for OneGameLookup {
    async fn application(&self, id: AppId) -> DirectoryResult<Application> {
        if id == GAME {
            Ok(Application::new(id, "Game"))
        } else {
            Err(
                DirectoryError::new(DirectoryErrorKind::NotFound, "Unknown Application")
                    .with_code(10002),
            )
        }
    }
}

struct Harness {
    bot: Arc<Bot>,
    cache: SharedGuildCache,
    directory: Arc<CacheDirectory>,
    responder: Arc<RecordingResponder>,
    store: Arc<StateStore>,
    _dir: tempfile::TempDir,
}

impl Harness {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::open(dir.path().join("state.db")).unwrap().shared();
        let cache = GuildCache::new().shared();
        let directory = Arc::new(CacheDirectory::new(cache.clone()));
        let responder = Arc::new(RecordingResponder::default());
        let engine = Reconciler::new(
            directory.clone(),
            store.clone(),
            ReconcilerConfig::default(),
        )
        .shared();
        let bot = Bot::new(
            engine,
            cache.clone(),
            responder.clone(),
            Arc::new(OneGameLookup),
        )
        .shared();

        Self {
            bot,
            cache,
            directory,
            responder,
            store,
            _dir: dir,
        }
    }

    /// Feed one event line and wait for any sweep it started
    async fn send(&self, line: &str) {
        let event = GatewayEvent::parse(line).unwrap().unwrap();
        if let Some(sweep) = self.bot.handle(event).await {
            sweep.await.unwrap();
        }
    }

    fn role(&self) -> Option<Role> {
        self.cache
            .roles(GUILD)
            .into_iter()
            .find(|r| r.name == "Currently Playing")
    }

    fn holds_role(&self, user: UserId) -> bool {
        let role = self.role().unwrap();
        self.cache.member(GUILD, user).unwrap().has_role(role.id)
    }
}

const GUILD_CREATE: &str = r#"{"t": "GUILD_CREATE", "d": {
    "id": "5", "name": "Test Guild",
    "roles": [{"id": "5", "name": "@everyone", "position": 0}],
    "members": [
        {"user": {"id": "1", "username": "alice"}, "roles": []},
        {"user": {"id": "2", "username": "bob"}, "roles": []}
    ],
    "presences": [
        {"user": {"id": "1"}, "status": "online",
         "activities": [{"name": "Game", "type": 0, "application_id": "1001"}]},
        {"user": {"id": "2"}, "status": "online",
         "activities": [{"name": "Other", "type": 0, "application_id": "2002"}]}
    ]
}}"#;

const READY: &str = r#"{"t": "READY", "d": {"user": {"id": "99", "username": "zerda"}}}"#;

fn presence_line(user: u64, status: &str, app: Option<u64>) -> String {
    let activities = match app {
        Some(app) => format!(r#"[{{"name": "Game", "type": 0, "application_id": "{app}"}}]"#),
        None => "[]".to_string(),
    };
    format!(
        r#"{{"t": "PRESENCE_UPDATE", "d": {{"user": {{"id": "{user}"}}, "guild_id": "5", "status": "{status}", "activities": {activities}}}}}"#
    )
}

fn app_command_line(sub: &str, app: u64, permissions: &str) -> String {
    format!(
        r#"{{"t": "INTERACTION_CREATE", "d": {{
            "id": "700", "token": "tok", "type": 2, "guild_id": "5",
            "member": {{"user": {{"id": "1", "username": "alice"}}, "permissions": "{permissions}"}},
            "data": {{"name": "app", "options": [
                {{"name": "{sub}", "options": [{{"name": "application-id", "value": "{app}"}}]}}
            ]}}
        }}}}"#
    )
}

/// Test: READY creates the marker role and grants it to the member playing a tracked app
#[tokio::test]
async fn test_ready_sweep_creates_role_and_grants() {
    let h = Harness::new();
    h.store.add_app(GUILD, GAME).unwrap();

    h.send(GUILD_CREATE).await;
    assert!(h.role().is_none());

    h.send(READY).await;

    assert!(h.bot.is_ready());
    assert!(h.holds_role(ALICE));
    assert!(!h.holds_role(BOB));
    assert_eq!(h.store.assignments().unwrap(), 1);
}

/// Test: presence updates after READY grant and revoke the role
#[tokio::test]
async fn test_presence_updates_follow_activity() {
    let h = Harness::new();
    h.store.add_app(GUILD, GAME).unwrap();
    h.send(GUILD_CREATE).await;
    h.send(READY).await;

    h.send(&presence_line(2, "online", Some(1001))).await;
    assert!(h.holds_role(BOB));

    h.send(&presence_line(2, "dnd", Some(1001))).await;
    assert!(!h.holds_role(BOB));

    h.send(&presence_line(1, "offline", None)).await;
    assert!(!h.holds_role(ALICE));
    assert_eq!(h.store.assignments().unwrap(), 2);
}

/// Test: presence for a member the cache never saw is dropped
#[tokio::test]
async fn test_presence_for_unknown_member_is_dropped() {
    let h = Harness::new();
    h.store.add_app(GUILD, GAME).unwrap();
    h.send(GUILD_CREATE).await;
    h.send(READY).await;
    let before = h.directory.mutations();

    h.send(&presence_line(42, "online", Some(1001))).await;

    assert_eq!(h.directory.mutations(), before);
}

/// Test: an admin adding an app gets a good reply and the guild is re-swept
#[tokio::test]
async fn test_app_add_command_resweeps_guild() {
    let h = Harness::new();
    h.send(GUILD_CREATE).await;
    h.send(READY).await;
    assert!(!h.holds_role(ALICE));

    h.send(&app_command_line("add", 1001, "8")).await;

    let replies = h.responder.replies.lock().unwrap().clone();
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0].0.id, "700");
    assert_eq!(replies[0].1, Reply::good("Now tracking Game (1001)"));
    assert!(h.holds_role(ALICE));
}

/// Test: adding an application the platform does not know changes nothing
#[tokio::test]
async fn test_app_add_unknown_application_is_refused() {
    let h = Harness::new();
    h.send(GUILD_CREATE).await;
    h.send(READY).await;
    let before = h.directory.mutations();

    h.send(&app_command_line("add", 2002, "8")).await;

    let replies = h.responder.replies.lock().unwrap().clone();
    assert_eq!(replies[0].1, Reply::bad("Unknown application `2002`"));
    assert!(h.store.list_apps(GUILD).unwrap().is_empty());
    assert_eq!(h.directory.mutations(), before);
}

/// Test: a non-admin cannot change the tracked apps
#[tokio::test]
async fn test_app_remove_requires_admin() {
    let h = Harness::new();
    h.store.add_app(GUILD, GAME).unwrap();
    h.send(GUILD_CREATE).await;
    h.send(READY).await;

    h.send(&app_command_line("remove", 1001, "0")).await;

    let replies = h.responder.replies.lock().unwrap().clone();
    assert_eq!(replies[0].1.signal, Some(Signal::Bad));
    assert_eq!(h.store.list_apps(GUILD).unwrap().len(), 1);
    assert!(h.holds_role(ALICE));
}

/// Test: joining a guild after READY ensures the role and sweeps it
#[tokio::test]
async fn test_guild_join_after_ready_sweeps() {
    let h = Harness::new();
    h.store.add_app(GUILD, GAME).unwrap();
    h.send(READY).await;

    h.send(GUILD_CREATE).await;

    assert!(h.role().is_some());
    assert!(h.holds_role(ALICE));
}

/// Test: leaving a guild drops it from the cache; outages do not
#[tokio::test]
async fn test_guild_delete_handling() {
    let h = Harness::new();
    h.send(GUILD_CREATE).await;

    h.send(r#"{"t": "GUILD_DELETE", "d": {"id": "5", "unavailable": true}}"#)
        .await;
    assert_eq!(h.cache.guilds().len(), 1);

    h.send(r#"{"t": "GUILD_DELETE", "d": {"id": "5"}}"#).await;
    assert!(h.cache.guilds().is_empty());
}

/// Test: member events keep the cached role sets current
#[tokio::test]
async fn test_member_events_update_cache() {
    let h = Harness::new();
    h.send(GUILD_CREATE).await;

    h.send(
        r#"{"t": "GUILD_MEMBER_UPDATE", "d": {"guild_id": "5", "user": {"id": "2", "username": "bob"}, "roles": ["9"]}}"#,
    )
    .await;
    assert!(h.cache.member(GUILD, BOB).unwrap().has_role(RoleId::new(9)));

    h.send(r#"{"t": "GUILD_MEMBER_REMOVE", "d": {"guild_id": "5", "user": {"id": "2", "username": "bob"}}}"#)
        .await;
    assert!(h.cache.member(GUILD, BOB).is_none());
}

/// Test: the event loop skips malformed lines and stops cleanly at end of stream
#[tokio::test]
async fn test_event_loop_skips_malformed_lines() {
    let h = Harness::new();
    let input = format!(
        "{}\nnot json\n\n{{\"t\": \"TYPING_START\", \"d\": {{}}}}\n",
        GUILD_CREATE.replace('\n', " ")
    );

    run_event_loop(h.bot.clone(), input.as_bytes(), None)
        .await
        .unwrap();

    assert_eq!(h.cache.guilds(), vec![Guild::new(GUILD, "Test Guild")]);
    assert!(!h.bot.is_ready());
}

/// Test: a full sweep that never finishes can be aborted without blocking later sweeps
#[tokio::test]
async fn test_aborted_full_sweep_releases_flag() {
    let h = Harness::new();
    h.directory.stall_guilds.store(true, Ordering::SeqCst);

    let stalled = h.bot.start_full_sweep().expect("first sweep starts");
    assert!(h.bot.start_full_sweep().is_none());

    stalled.abort();
    assert!(stalled.await.unwrap_err().is_cancelled());

    h.directory.stall_guilds.store(false, Ordering::SeqCst);
    let next = h
        .bot
        .start_full_sweep()
        .expect("sweep starts again after abort");
    next.await.unwrap();
}
