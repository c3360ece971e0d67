//! Request pacing from the platform's rate-limit headers.
//!
//! Every response updates the bucket of the route it came from. Before a
//! request goes out, [`RateLimiter::acquire`] sleeps until that bucket (and
//! any global limit) has reset. Nothing here retries a failed request; a 429
//! only delays the requests after it.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use reqwest::header::HeaderMap;
use reqwest::Method;
use tokio::time::Instant;
use tracing::{debug, warn};

const REMAINING: &str = "x-ratelimit-remaining";
const RESET_AFTER: &str = "x-ratelimit-reset-after";
const GLOBAL: &str = "x-ratelimit-global";
const RETRY_AFTER: &str = "retry-after";

/// Path segments that name the resource a bucket belongs to
const MAJOR_PARAMS: [&str; 3] = ["guilds", "channels", "webhooks"];

#[derive(Debug, Clone, Copy)]
struct Bucket {
    remaining: u32,
    reset_at: Instant,
}

#[derive(Debug, Default)]
struct LimiterState {
    buckets: HashMap<String, Bucket>,
    global_until: Option<Instant>,
}

/// Rate-limit state shared by all requests of one client
#[derive(Debug, Default)]
pub struct RateLimiter {
    state: Mutex<LimiterState>,
}

/// Bucket key for a request: method plus path with minor IDs collapsed.
///
/// IDs after `guilds`, `channels` and `webhooks` are kept since the platform
/// limits those routes per resource. Interaction tokens are collapsed too.
pub fn route_key(method: &Method, path: &str) -> String {
    let path = path.split('?').next().unwrap_or_default();
    let segments: Vec<&str> = path.split('/').collect();

    let mut key = method.as_str().to_string();
    for (i, segment) in segments.iter().enumerate() {
        if segment.is_empty() {
            continue;
        }
        let prev = if i > 0 { segments[i - 1] } else { "" };
        let is_id = segment.bytes().all(|b| b.is_ascii_digit());
        let is_token = i >= 2 && segments[i - 2] == "interactions";

        key.push('/');
        if (is_id && !MAJOR_PARAMS.contains(&prev)) || is_token {
            key.push_str(":id");
        } else {
            key.push_str(segment);
        }
    }
    key
}

fn header<T: std::str::FromStr>(headers: &HeaderMap, name: &str) -> Option<T> {
    headers.get(name)?.to_str().ok()?.parse().ok()
}

fn secs(secs: f64) -> Duration {
    Duration::from_secs_f64(secs.max(0.0))
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// How long a request on `route` has to wait right now
    pub fn delay(&self, route: &str) -> Duration {
        let Ok(state) = self.state.lock() else {
            warn!("Rate limiter lock poisoned");
            return Duration::ZERO;
        };
        let now = Instant::now();

        let global = state
            .global_until
            .map(|until| until.saturating_duration_since(now))
            .unwrap_or_default();
        let bucket = state
            .buckets
            .get(route)
            .filter(|b| b.remaining == 0)
            .map(|b| b.reset_at.saturating_duration_since(now))
            .unwrap_or_default();

        global.max(bucket)
    }

    /// Wait until a request on `route` may be sent
    pub async fn acquire(&self, route: &str) {
        let wait = self.delay(route);
        if !wait.is_zero() {
            debug!(route, wait_ms = wait.as_millis() as u64, "Waiting for rate limit reset");
            tokio::time::sleep(wait).await;
        }
    }

    /// Record the bucket headers of any response
    pub fn observe(&self, route: &str, headers: &HeaderMap) {
        let (Some(remaining), Some(reset_after)) = (
            header::<u32>(headers, REMAINING),
            header::<f64>(headers, RESET_AFTER),
        ) else {
            return;
        };

        if let Ok(mut state) = self.state.lock() {
            state.buckets.insert(
                route.to_string(),
                Bucket {
                    remaining,
                    reset_at: Instant::now() + secs(reset_after),
                },
            );
        }
    }

    /// Record a 429. `retry_after` comes from the body when present, else the
    /// `Retry-After` header.
    pub fn limited(
        &self,
        route: &str,
        headers: &HeaderMap,
        retry_after: Option<f64>,
        global: bool,
    ) {
        let Some(retry_after) = retry_after.or_else(|| header::<f64>(headers, RETRY_AFTER)) else {
            return;
        };
        let global = global || header::<bool>(headers, GLOBAL).unwrap_or(false);
        let until = Instant::now() + secs(retry_after);

        warn!(route, retry_after, global, "Rate limited by platform");
        if let Ok(mut state) = self.state.lock() {
            if global {
                state.global_until = Some(until);
            } else {
                state.buckets.insert(
                    route.to_string(),
                    Bucket {
                        remaining: 0,
                        reset_at: until,
                    },
                );
            }
        }
    }
}
