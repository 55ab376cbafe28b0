//! Fixed-window admission control as an axum middleware.
//!
//! Attach with `from_fn_with_state(RateLimit::new(config, store), rate_limit)`.
//! Several limiters stack; each keeps its own counters under its `name`.

use std::{
    fmt,
    net::{IpAddr, SocketAddr},
    sync::Arc,
    time::Duration,
};

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{header::RETRY_AFTER, HeaderMap, HeaderName, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use quill_core::ratelimit::{RateLimitStore, WindowRecord};
use tracing::{debug, warn};

use super::auth::AuthUser;
use crate::error::ErrorBody;

pub const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
pub const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
pub const X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

/// Identity used when the generator cannot produce one.
pub const UNKNOWN_IDENTITY: &str = "unknown";

type IdentityFn = dyn Fn(&Request) -> Option<String> + Send + Sync;

/// Peers whose `X-Forwarded-For` and `X-Real-IP` headers are believed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrustedProxies(Arc<Vec<IpAddr>>);

impl TrustedProxies {
    pub fn new(addrs: impl IntoIterator<Item = IpAddr>) -> Self {
        Self(Arc::new(addrs.into_iter().collect()))
    }

    pub fn contains(&self, addr: &IpAddr) -> bool {
        self.0.contains(addr)
    }
}

/// How a request maps to the identity its quota is counted against.
#[derive(Clone)]
pub enum KeyGenerator {
    /// The peer address. Forwarding headers count only when the peer is a
    /// trusted proxy.
    ClientIp(TrustedProxies),
    /// The authenticated user; requires `require_auth` to run first.
    User,
    /// One shared bucket for every caller.
    Fixed(String),
    Custom(Arc<IdentityFn>),
}

impl Default for KeyGenerator {
    fn default() -> Self {
        Self::ClientIp(TrustedProxies::default())
    }
}

impl KeyGenerator {
    pub fn custom(f: impl Fn(&Request) -> Option<String> + Send + Sync + 'static) -> Self {
        Self::Custom(Arc::new(f))
    }

    fn identity(&self, request: &Request) -> Option<String> {
        match self {
            KeyGenerator::ClientIp(trusted) => client_ip(request, trusted).map(|ip| ip.to_string()),
            KeyGenerator::User => request
                .extensions()
                .get::<AuthUser>()
                .map(|AuthUser(user)| user.to_string()),
            KeyGenerator::Fixed(key) => Some(key.clone()),
            KeyGenerator::Custom(f) => f(request),
        }
    }
}

impl fmt::Debug for KeyGenerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyGenerator::ClientIp(trusted) => f.debug_tuple("ClientIp").field(trusted).finish(),
            KeyGenerator::User => f.write_str("User"),
            KeyGenerator::Fixed(key) => f.debug_tuple("Fixed").field(key).finish(),
            KeyGenerator::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

fn client_ip(request: &Request, trusted: &TrustedProxies) -> Option<IpAddr> {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())?;
    if !trusted.contains(&peer) {
        return Some(peer);
    }
    let headers = request.headers();
    forwarded_client(headers, trusted)
        .or_else(|| header_ip(headers, "x-real-ip"))
        .or(Some(peer))
}

/// Nearest `X-Forwarded-For` hop that is not itself a trusted proxy. A header
/// with any unparsable hop is ignored as a whole.
fn forwarded_client(headers: &HeaderMap, trusted: &TrustedProxies) -> Option<IpAddr> {
    let value = headers.get("x-forwarded-for")?.to_str().ok()?;
    let hops = value
        .split(',')
        .map(|hop| hop.trim().parse::<IpAddr>())
        .collect::<Result<Vec<_>, _>>()
        .ok()?;
    hops.iter()
        .rev()
        .find(|hop| !trusted.contains(hop))
        .or_else(|| hops.first())
        .copied()
}

fn header_ip(headers: &HeaderMap, name: &str) -> Option<IpAddr> {
    header_str(headers, name)?.parse().ok()
}

fn header_str(headers: &HeaderMap, name: &str) -> Option<String> {
    let value = headers.get(name)?.to_str().ok()?.trim();
    (!value.is_empty()).then(|| value.to_string())
}

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Namespace for this limiter's counters.
    pub name: String,
    pub window: Duration,
    pub max_requests: u64,
    pub key_generator: KeyGenerator,
    /// Give the slot back when the handler answers with a status below 400.
    pub skip_successful_requests: bool,
    /// Give the slot back when the handler answers with 400 or above.
    pub skip_failed_requests: bool,
    pub message: String,
}

impl RateLimitConfig {
    pub fn new(name: impl Into<String>, window: Duration, max_requests: u64) -> Self {
        Self {
            name: name.into(),
            window,
            max_requests,
            key_generator: KeyGenerator::default(),
            skip_successful_requests: false,
            skip_failed_requests: false,
            message: "Too many requests, please try again later.".to_string(),
        }
    }

    pub fn with_key_generator(mut self, key_generator: KeyGenerator) -> Self {
        self.key_generator = key_generator;
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    pub fn skip_successful(mut self) -> Self {
        self.skip_successful_requests = true;
        self
    }

    pub fn skip_failed(mut self) -> Self {
        self.skip_failed_requests = true;
        self
    }

    /// General API traffic: 100 requests per 15 minutes per client address.
    pub fn standard() -> Self {
        Self::new("standard", Duration::from_secs(15 * 60), 100)
    }

    /// Model calls: 10 per hour per authenticated user.
    pub fn ai() -> Self {
        Self::new("ai", Duration::from_secs(60 * 60), 10)
            .with_key_generator(KeyGenerator::User)
            .with_message("AI request limit reached, please try again later.")
    }

    /// Public demo endpoint: 3 per minute shared by everyone.
    pub fn demo() -> Self {
        Self::new("demo", Duration::from_secs(60), 3)
            .with_key_generator(KeyGenerator::Fixed("demo".to_string()))
            .with_message("Demo rate limit exceeded, try again in a minute.")
    }

    /// Credential attempts: 5 failures per 15 minutes per client address.
    pub fn auth() -> Self {
        Self::new("auth", Duration::from_secs(15 * 60), 5)
            .skip_successful()
            .with_message("Too many authentication attempts, please try again later.")
    }

    fn store_key(&self, request: &Request) -> String {
        let identity = self
            .key_generator
            .identity(request)
            .unwrap_or_else(|| UNKNOWN_IDENTITY.to_string());
        format!("{}:{}", self.name, identity)
    }

    fn should_refund(&self, status: StatusCode) -> bool {
        let failed = status.as_u16() >= 400;
        (self.skip_successful_requests && !failed) || (self.skip_failed_requests && failed)
    }
}

/// Middleware state: one limiter configuration bound to a counter store.
#[derive(Clone)]
pub struct RateLimit {
    config: Arc<RateLimitConfig>,
    store: Arc<dyn RateLimitStore>,
}

impl RateLimit {
    pub fn new(config: RateLimitConfig, store: Arc<dyn RateLimitStore>) -> Self {
        Self {
            config: Arc::new(config),
            store,
        }
    }
}

pub async fn rate_limit(State(limit): State<RateLimit>, request: Request, next: Next) -> Response {
    let config = &limit.config;
    let key = config.store_key(&request);

    let mut record = match limit.store.increment(&key, config.window).await {
        Ok(record) => record,
        Err(err) => {
            warn!(limiter = %config.name, error = %err, "rate limit store failed, allowing request");
            return next.run(request).await;
        }
    };

    if record.count > config.max_requests {
        debug!(limiter = %config.name, key = %key, count = record.count, "rate limit exceeded");
        return too_many_requests(config, &record);
    }

    let mut response = next.run(request).await;

    if config.should_refund(response.status()) {
        match limit.store.decrement(&key).await {
            Ok(()) => record.count = record.count.saturating_sub(1),
            Err(err) => {
                warn!(limiter = %config.name, error = %err, "failed to refund rate limit slot");
            }
        }
    }

    append_rate_limit_headers(response.headers_mut(), config.max_requests, &record);
    response
}

fn too_many_requests(config: &RateLimitConfig, record: &WindowRecord) -> Response {
    let mut response = (
        StatusCode::TOO_MANY_REQUESTS,
        Json(ErrorBody::new(config.message.clone())),
    )
        .into_response();
    let headers = response.headers_mut();
    append_rate_limit_headers(headers, config.max_requests, record);
    headers.insert(
        RETRY_AFTER,
        HeaderValue::from(record.retry_after(Utc::now())),
    );
    response
}

fn append_rate_limit_headers(headers: &mut HeaderMap, limit: u64, record: &WindowRecord) {
    headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(limit));
    headers.insert(
        X_RATELIMIT_REMAINING,
        HeaderValue::from(record.remaining(limit)),
    );
    headers.insert(
        X_RATELIMIT_RESET,
        HeaderValue::from(record.reset_time.timestamp()),
    );
}
