//! Directory adapter over the platform REST API.
//!
//! [`HttpDirectory`] implements [`reconciler::Directory`] with `reqwest`.
//! Presences are not available over REST, so member fetches read them from
//! the gateway-fed [`GuildCache`]. Failed requests become [`DirectoryError`]s
//! and are never retried here; [`ratelimit`] only paces the requests that
//! follow a limited one.

pub mod cache;
pub mod model;
pub mod ratelimit;

use std::time::Duration;

use async_trait::async_trait;
use reconciler::{
    AppId, Directory, DirectoryError, DirectoryErrorKind, DirectoryResult, Guild, GuildId, Member,
    Role, RoleSpec, UserId,
};
use reqwest::header::AUTHORIZATION;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

pub use cache::{GuildCache, SharedGuildCache};
use model::{
    ApiApplication, ApiErrorBody, ApiGuild, ApiMember, ApiRole, CreateRoleBody,
    InteractionCallback, InteractionCallbackData, RolePositionBody,
};
use ratelimit::{route_key, RateLimiter};

use crate::commands::{AppLookup, Application};
use crate::replies::{InteractionRef, Reply, Responder};

/// Largest page the member list endpoint returns
const MEMBER_PAGE: usize = 1000;

/// Largest page the current-user guild list endpoint returns
const GUILD_PAGE: usize = 200;

/// Header carrying the audit log reason for role changes
const AUDIT_LOG_REASON: &str = "X-Audit-Log-Reason";

/// Interaction response flag for "only the invoking user sees this"
const EPHEMERAL: u32 = 1 << 6;

/// Classify a non-success HTTP status
pub fn error_kind(status: StatusCode) -> DirectoryErrorKind {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => DirectoryErrorKind::Forbidden,
        StatusCode::NOT_FOUND => DirectoryErrorKind::NotFound,
        StatusCode::TOO_MANY_REQUESTS => DirectoryErrorKind::RateLimited,
        _ => DirectoryErrorKind::Other,
    }
}

fn transport_error(e: reqwest::Error) -> DirectoryError {
    DirectoryError::new(DirectoryErrorKind::Other, format!("request failed: {e}"))
}

fn decode_error(e: reqwest::Error) -> DirectoryError {
    DirectoryError::new(DirectoryErrorKind::Other, format!("unexpected response body: {e}"))
}

async fn check(limiter: &RateLimiter, route: &str, resp: Response) -> DirectoryResult<Response> {
    let status = resp.status();
    limiter.observe(route, resp.headers());
    if status.is_success() {
        return Ok(resp);
    }

    let headers = resp.headers().clone();
    let body = resp.json::<ApiErrorBody>().await.ok();
    let message = match &body {
        Some(body) if !body.message.is_empty() => body.message.clone(),
        _ => status.to_string(),
    };
    if status == StatusCode::TOO_MANY_REQUESTS {
        let (retry_after, global) = body
            .as_ref()
            .map(|b| (b.retry_after, b.global))
            .unwrap_or_default();
        limiter.limited(route, &headers, retry_after, global);
    }

    let mut err = DirectoryError::new(error_kind(status), message);
    if let Some(code) = body.and_then(|b| b.code) {
        err = err.with_code(code);
    }
    Err(err)
}

/// REST-backed directory
pub struct HttpDirectory {
    http: reqwest::Client,
    api_base: String,
    token: String,
    cache: SharedGuildCache,
    limiter: RateLimiter,
}

impl HttpDirectory {
    pub fn new(
        api_base: impl Into<String>,
        token: impl Into<String>,
        cache: SharedGuildCache,
    ) -> DirectoryResult<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!(
                "DiscordBot (",
                env!("CARGO_PKG_HOMEPAGE"),
                ", ",
                env!("CARGO_PKG_VERSION"),
                ")"
            ))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| {
                DirectoryError::new(
                    DirectoryErrorKind::Other,
                    format!("Failed to create HTTP client: {e}"),
                )
            })?;

        Ok(Self {
            http,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            token: token.into(),
            cache,
            limiter: RateLimiter::new(),
        })
    }

    pub fn cache(&self) -> &SharedGuildCache {
        &self.cache
    }

    /// Send one request, waiting out its rate-limit bucket first.
    /// `build` adds headers and body to the authorized request.
    async fn send<F>(&self, method: Method, path: &str, build: F) -> DirectoryResult<Response>
    where
        F: FnOnce(RequestBuilder) -> RequestBuilder,
    {
        let route = route_key(&method, path);
        let request = build(
            self.http
                .request(method, format!("{}{}", self.api_base, path))
                .header(AUTHORIZATION, format!("Bot {}", self.token)),
        );

        self.limiter.acquire(&route).await;
        let resp = request.send().await.map_err(transport_error)?;
        check(&self.limiter, &route, resp).await
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> DirectoryResult<T> {
        self.send(Method::GET, path, |req| req)
            .await?
            .json()
            .await
            .map_err(decode_error)
    }

    fn member_role_path(member: &Member, role: &Role) -> String {
        format!(
            "/guilds/{}/members/{}/roles/{}",
            member.guild_id, member.user_id, role.id
        )
    }
}

#[async_trait]
impl Directory for HttpDirectory {
    async fn guilds(&self) -> DirectoryResult<Vec<Guild>> {
        let cached = self.cache.guilds();
        if !cached.is_empty() {
            return Ok(cached);
        }

        let mut guilds = Vec::new();
        let mut after: Option<GuildId> = None;
        loop {
            let mut path = format!("/users/@me/guilds?limit={GUILD_PAGE}");
            if let Some(after) = after {
                path.push_str(&format!("&after={after}"));
            }

            let page: Vec<ApiGuild> = self.get_json(&path).await?;
            let full = page.len() >= GUILD_PAGE;
            let last = page.iter().map(|g| g.id).max();
            guilds.extend(page.into_iter().map(Guild::from));

            if !full || last.is_none() || last == after {
                break;
            }
            after = last;
        }

        for guild in &guilds {
            self.cache.upsert_guild(guild.clone());
        }
        Ok(guilds)
    }

    fn cached_roles(&self, guild: GuildId) -> Vec<Role> {
        self.cache.roles(guild)
    }

    async fn fetch_roles(&self, guild: GuildId) -> DirectoryResult<Vec<Role>> {
        let roles: Vec<ApiRole> = self.get_json(&format!("/guilds/{guild}/roles")).await?;
        let roles: Vec<Role> = roles.into_iter().map(|r| r.into_role(guild)).collect();
        self.cache.set_roles(guild, roles.clone());
        Ok(roles)
    }

    async fn create_role(&self, guild: GuildId, spec: &RoleSpec) -> DirectoryResult<Role> {
        let body = CreateRoleBody {
            name: &spec.name,
            permissions: spec.permissions.to_string(),
            hoist: spec.hoist,
            mentionable: spec.mentionable,
        };
        let path = format!("/guilds/{guild}/roles");
        let created: ApiRole = self
            .send(Method::POST, &path, |req| {
                req.header(AUDIT_LOG_REASON, &spec.reason).json(&body)
            })
            .await?
            .json()
            .await
            .map_err(decode_error)?;
        let mut role = created.into_role(guild);

        // New roles land just above @everyone; move it if asked for elsewhere.
        if role.position != spec.position {
            let body = [RolePositionBody {
                id: role.id,
                position: spec.position,
            }];
            let moved = self
                .send(Method::PATCH, &path, |req| {
                    req.header(AUDIT_LOG_REASON, &spec.reason).json(&body)
                })
                .await;
            match moved {
                Ok(_) => role.position = spec.position,
                Err(e) => warn!(guild_id = %guild, role = %role, error = %e, "Failed to position role"),
            }
        }

        self.cache.push_role(role.clone());
        Ok(role)
    }

    async fn fetch_members(
        &self,
        guild: GuildId,
        with_presences: bool,
    ) -> DirectoryResult<Vec<Member>> {
        let mut members = Vec::new();
        let mut after: Option<UserId> = None;
        loop {
            let mut path = format!("/guilds/{guild}/members?limit={MEMBER_PAGE}");
            if let Some(after) = after {
                path.push_str(&format!("&after={after}"));
            }

            let page: Vec<ApiMember> = self.get_json(&path).await?;
            let full = page.len() >= MEMBER_PAGE;
            let before = members.len();
            members.extend(page.into_iter().filter_map(|m| m.into_member(guild)));

            let last = members[before..].iter().map(|m| m.user_id).max();
            if !full || last.is_none() || last == after {
                break;
            }
            after = last;
        }

        for member in &mut members {
            self.cache.upsert_member(member.clone());
            if with_presences {
                member.presence = self.cache.presence(guild, member.user_id);
            }
        }
        debug!(guild_id = %guild, count = members.len(), "Fetched members");

        Ok(members)
    }

    async fn add_role(&self, member: &Member, role: &Role, reason: &str) -> DirectoryResult<()> {
        self.send(Method::PUT, &Self::member_role_path(member, role), |req| {
            req.header(AUDIT_LOG_REASON, reason)
        })
        .await?;
        self.cache
            .set_member_role(member.guild_id, member.user_id, role.id, true);
        Ok(())
    }

    async fn remove_role(
        &self,
        member: &Member,
        role: &Role,
        reason: &str,
    ) -> DirectoryResult<()> {
        self.send(Method::DELETE, &Self::member_role_path(member, role), |req| {
            req.header(AUDIT_LOG_REASON, reason)
        })
        .await?;
        self.cache
            .set_member_role(member.guild_id, member.user_id, role.id, false);
        Ok(())
    }
}

#[async_trait]
impl Responder for HttpDirectory {
    async fn respond(&self, interaction: &InteractionRef, reply: &Reply) -> DirectoryResult<()> {
        let content = reply.content();
        let body = InteractionCallback {
            kind: 4,
            data: InteractionCallbackData {
                content: &content,
                flags: if reply.ephemeral { EPHEMERAL } else { 0 },
            },
        };
        let path = format!(
            "/interactions/{}/{}/callback",
            interaction.id, interaction.token
        );
        self.send(Method::POST, &path, |req| req.json(&body)).await?;
        Ok(())
    }
}

#[async_trait]
impl AppLookup for HttpDirectory {
    async fn application(&self, id: AppId) -> DirectoryResult<Application> {
        let app: ApiApplication = self.get_json(&format!("/applications/{id}/rpc")).await?;
        Ok(Application::new(app.id, app.name))
    }
}
