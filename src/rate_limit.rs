//! Fixed-window request limiting keyed on client address, path and tenant.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tokio::sync::Mutex;

use crate::config::AppConfig;
use crate::error::ApiError;

pub static LIMIT_HEADER: HeaderName = HeaderName::from_static("x-ratelimit-limit");
pub static REMAINING_HEADER: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
pub static RESET_HEADER: HeaderName = HeaderName::from_static("x-ratelimit-reset");

const TENANT_HEADERS: [&str; 3] = ["x-tenant-id", "x-tenant", "x-account-id"];

/// Expired windows are swept after this many checks.
const CLEANUP_EVERY: u64 = 5_000;
const MAX_BUCKETS: usize = 50_000;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BucketKey {
    pub client: String,
    pub path: String,
    pub tenant: String,
}

#[derive(Debug, Clone, Copy)]
struct Window {
    count: u32,
    reset_at: Instant,
    reset_epoch: i64,
}

#[derive(Debug, Default)]
struct Buckets {
    windows: HashMap<BucketKey, Window>,
    ops: u64,
}

impl Buckets {
    fn purge_expired(&mut self, now: Instant) {
        self.windows.retain(|_, window| window.reset_at > now);
    }

    /// Make room for one more key, dropping the window closest to expiry
    /// when nothing has expired yet.
    fn make_room(&mut self, now: Instant) {
        if self.windows.len() < MAX_BUCKETS {
            return;
        }
        self.purge_expired(now);
        while self.windows.len() >= MAX_BUCKETS {
            let Some(oldest) = self
                .windows
                .iter()
                .min_by_key(|(_, window)| window.reset_at)
                .map(|(key, _)| key.clone())
            else {
                break;
            };
            self.windows.remove(&oldest);
        }
    }
}

/// Outcome of counting one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    /// Unix time at which the current window closes
    pub reset_epoch: i64,
    /// Whole seconds until the window closes, never less than one
    pub retry_after: u64,
}

#[derive(Debug)]
pub struct RateLimiter {
    limit: u32,
    window: Duration,
    exclude_paths: Vec<String>,
    trust_proxy: bool,
    buckets: Mutex<Buckets>,
}

impl RateLimiter {
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            limit: limit.max(1),
            window: window.max(Duration::from_secs(1)),
            exclude_paths: Vec::new(),
            trust_proxy: false,
            buckets: Mutex::new(Buckets::default()),
        }
    }

    /// `None` when `RATE_LIMIT_ENABLED` is off.
    pub fn from_config(config: &AppConfig) -> Option<Arc<Self>> {
        if !config.rate_limit_enabled {
            return None;
        }
        let limiter = Self::new(
            config.rate_limit_requests,
            Duration::from_secs(config.rate_limit_window_seconds),
        )
        .with_exclude_paths(config.rate_limit_exclude_paths.clone())
        .with_trust_proxy(config.rate_limit_trust_proxy);
        tracing::info!(
            limit = limiter.limit,
            window_seconds = limiter.window.as_secs(),
            "rate limiting enabled"
        );
        Some(Arc::new(limiter))
    }

    pub fn with_exclude_paths(mut self, paths: Vec<String>) -> Self {
        self.exclude_paths = paths;
        self
    }

    pub fn with_trust_proxy(mut self, trust_proxy: bool) -> Self {
        self.trust_proxy = trust_proxy;
        self
    }

    /// A path is excluded when it equals a configured prefix or continues
    /// it with `/`, so `/docs` covers `/docs/index.html` but not `/docsx`.
    pub fn is_excluded(&self, path: &str) -> bool {
        self.exclude_paths.iter().any(|prefix| {
            let prefix = prefix.trim_end_matches('/');
            !prefix.is_empty()
                && path
                    .strip_prefix(prefix)
                    .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
        })
    }

    pub async fn check(&self, key: BucketKey) -> Decision {
        let now = Instant::now();
        let mut buckets = self.buckets.lock().await;

        buckets.ops += 1;
        if buckets.ops % CLEANUP_EVERY == 0 {
            buckets.purge_expired(now);
        }

        let expired = buckets
            .windows
            .get(&key)
            .is_none_or(|window| window.reset_at <= now);
        if expired {
            if !buckets.windows.contains_key(&key) {
                buckets.make_room(now);
            }
            let reset_epoch = chrono::Utc::now().timestamp()
                + i64::try_from(self.window.as_secs()).unwrap_or(i64::MAX);
            buckets.windows.insert(
                key.clone(),
                Window {
                    count: 0,
                    reset_at: now + self.window,
                    reset_epoch,
                },
            );
        }

        let Some(window) = buckets.windows.get_mut(&key) else {
            return Decision {
                allowed: true,
                limit: self.limit,
                remaining: self.limit,
                reset_epoch: chrono::Utc::now().timestamp(),
                retry_after: 1,
            };
        };

        let allowed = window.count < self.limit;
        if allowed {
            window.count += 1;
        }
        let left = window.reset_at.saturating_duration_since(now);
        let retry_after = (left.as_secs() + u64::from(left.subsec_nanos() > 0)).max(1);

        Decision {
            allowed,
            limit: self.limit,
            remaining: self.limit - window.count,
            reset_epoch: window.reset_epoch,
            retry_after,
        }
    }

    pub async fn tracked_keys(&self) -> usize {
        self.buckets.lock().await.windows.len()
    }

    fn client_address(&self, request: &Request) -> String {
        if self.trust_proxy
            && let Some(first) = request
                .headers()
                .get("x-forwarded-for")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.split(',').next())
                .map(str::trim)
                .filter(|v| !v.is_empty())
        {
            return first.to_string();
        }
        request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip().to_string())
            .unwrap_or_else(|| "unknown".to_string())
    }

    fn key_for(&self, request: &Request) -> BucketKey {
        let tenant = TENANT_HEADERS
            .iter()
            .find_map(|name| {
                request
                    .headers()
                    .get(*name)
                    .and_then(|v| v.to_str().ok())
                    .map(str::trim)
                    .filter(|v| !v.is_empty())
            })
            .unwrap_or("-");
        BucketKey {
            client: self.client_address(request),
            path: request.uri().path().to_string(),
            tenant: tenant.to_string(),
        }
    }
}

fn insert_if_absent(headers: &mut HeaderMap, name: &HeaderName, value: impl ToString) {
    if headers.contains_key(name) {
        return;
    }
    if let Ok(value) = HeaderValue::from_str(&value.to_string()) {
        headers.insert(name.clone(), value);
    }
}

fn apply_headers(headers: &mut HeaderMap, decision: &Decision) {
    insert_if_absent(headers, &LIMIT_HEADER, decision.limit);
    insert_if_absent(headers, &REMAINING_HEADER, decision.remaining);
    insert_if_absent(headers, &RESET_HEADER, decision.reset_epoch);
}

/// Counts the request against its window and answers 429 once the window
/// is spent. `OPTIONS`, `HEAD` and excluded paths pass through uncounted.
pub async fn rate_limit_middleware(
    State(limiter): State<Arc<RateLimiter>>,
    request: Request,
    next: Next,
) -> Response {
    if matches!(*request.method(), Method::OPTIONS | Method::HEAD)
        || limiter.is_excluded(request.uri().path())
    {
        return next.run(request).await;
    }

    let key = limiter.key_for(&request);
    let decision = limiter.check(key.clone()).await;

    if !decision.allowed {
        tracing::warn!(
            client = %key.client,
            path = %key.path,
            tenant = %key.tenant,
            retry_after = decision.retry_after,
            "rate limit exceeded"
        );
        metrics::counter!("http_rate_limited_total").increment(1);
        let mut response = ApiError::new(
            StatusCode::TOO_MANY_REQUESTS,
            "RATE_LIMITED",
            "Too many requests",
        )
        .with_retry_after(decision.retry_after)
        .into_response();
        apply_headers(response.headers_mut(), &decision);
        return response;
    }

    let mut response = next.run(request).await;
    apply_headers(response.headers_mut(), &decision);
    response
}
