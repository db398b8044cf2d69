//! Distributed sliding-window rate limiter.
//!
//! Every evaluated request is logged as one entry in a per-client sorted
//! set (`ratelimit:<scope>:<client>`), scored by its arrival time in
//! nanoseconds. A single atomic pipeline purges entries older than the
//! window, inserts the new one, counts what is left and refreshes the
//! key's expiry to `window + 1 minute` so idle clients are reclaimed.
//!
//! A request is rejected when the post-insert count exceeds the limit.
//! Rejected attempts stay in the log, so a client that keeps hammering
//! stays limited until it backs off for a full window.
//!
//! # Fail-open
//!
//! When the store is unreachable or slower than [`RateLimitConfig::timeout`],
//! the request proceeds **unthrottled**. This trades abuse protection for
//! availability: a store outage disables rate limiting entirely. Each such
//! request is logged at `warn` and counted in
//! [`RATELIMIT_FAIL_OPEN_TOTAL`](crate::telemetry::RATELIMIT_FAIL_OPEN_TOTAL)
//! so operators can alert on it.
//!
//! # Client identity
//!
//! The client key is taken from the first non-empty header in
//! [`RateLimitConfig::client_ip_headers`] (left-most entry for
//! `X-Forwarded-For`), falling back to the transport peer address. These
//! headers are trivially spoofable unless a trusted proxy overwrites them;
//! deployments without such a proxy should configure an empty header list.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use axum::Json;
use axum::extract::{ConnectInfo, Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use http::header::RETRY_AFTER;
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use tracing::{debug, warn};

use crate::error::with_timeout;
use crate::store::{KvStore, WindowHit};
use crate::telemetry;
use crate::{EdgeError, Result};

pub const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
pub const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
pub const X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

/// Extra lifetime of a client's log beyond the window itself.
const EXPIRY_GRACE: Duration = Duration::from_secs(60);

/// Configuration for [`DistributedRateLimiter`].
///
/// ```rust
/// # use ojeomneo_edge::RateLimitConfig;
/// # use std::time::Duration;
/// let config = RateLimitConfig::new()
///     .window(Duration::from_secs(30))
///     .max_requests(20)
///     .skip_path("/ojeomneo/v1/healthcheck");
/// ```
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Trailing window length. Default: 60s.
    pub window: Duration,
    /// Requests allowed per window. Default: 100.
    pub max_requests: u64,
    /// Message returned in the 429 body.
    pub message: String,
    /// Path prefixes never limited (health, docs, metrics).
    pub skip_paths: Vec<String>,
    /// Key scope: logs live under `ratelimit:<scope>:<client>`. Default: "api".
    pub scope: String,
    /// Headers consulted for the client address, in precedence order.
    pub client_ip_headers: Vec<HeaderName>,
    /// Bound on the store round-trip. Default: 3s.
    pub timeout: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(60),
            max_requests: 100,
            message: "Too many requests. Please try again later.".to_string(),
            skip_paths: vec![
                "/ojeomneo/v1/healthcheck".to_string(),
                "/ojeomneo/v1/docs".to_string(),
                "/ojeomneo/metrics".to_string(),
            ],
            scope: "api".to_string(),
            client_ip_headers: vec![
                HeaderName::from_static("x-forwarded-for"),
                HeaderName::from_static("x-real-ip"),
            ],
            timeout: Duration::from_secs(3),
        }
    }
}

impl RateLimitConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the window length.
    pub fn window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    /// Set the number of requests allowed per window.
    pub fn max_requests(mut self, max: u64) -> Self {
        self.max_requests = max;
        self
    }

    /// Set the 429 message.
    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    /// Replace the exempt path prefixes.
    pub fn skip_paths(mut self, paths: Vec<String>) -> Self {
        self.skip_paths = paths;
        self
    }

    /// Add one exempt path prefix.
    pub fn skip_path(mut self, path: impl Into<String>) -> Self {
        self.skip_paths.push(path.into());
        self
    }

    /// Set the key scope.
    pub fn scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = scope.into();
        self
    }

    /// Replace the client address headers (empty: peer address only).
    pub fn client_ip_headers(mut self, headers: Vec<HeaderName>) -> Self {
        self.client_ip_headers = headers;
        self
    }

    /// Set the store timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Reject a zero window, limit or timeout.
    pub fn validate(&self) -> Result<()> {
        if self.window.is_zero() {
            return Err(EdgeError::Configuration(
                "rate limit window must be non-zero".into(),
            ));
        }
        if self.max_requests == 0 {
            return Err(EdgeError::Configuration(
                "rate limit max_requests must be at least 1".into(),
            ));
        }
        if self.timeout.is_zero() {
            return Err(EdgeError::Configuration(
                "rate limit store timeout must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

/// Outcome of one rate-limit evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u64,
    /// Requests left in the current window, clamped at zero.
    pub remaining: u64,
    /// Epoch seconds at which the window is guaranteed to have rolled.
    pub reset_at: u64,
    pub retry_after_secs: u64,
}

impl RateLimitDecision {
    /// Write `X-RateLimit-*` headers (and `Retry-After` on rejection).
    pub fn apply_headers(&self, headers: &mut HeaderMap) {
        headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(self.limit));
        headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(self.remaining));
        headers.insert(X_RATELIMIT_RESET, HeaderValue::from(self.reset_at));
        if !self.allowed {
            headers.insert(RETRY_AFTER, HeaderValue::from(self.retry_after_secs));
        }
    }
}

/// Per-client sliding-window limiter over a shared [`KvStore`].
pub struct DistributedRateLimiter {
    store: Option<Arc<dyn KvStore>>,
    config: RateLimitConfig,
    seq: AtomicU64,
}

impl DistributedRateLimiter {
    /// Build a limiter. Without a store every request is allowed.
    ///
    /// Rejects a zero window, limit or timeout.
    pub fn new(store: Option<Arc<dyn KvStore>>, config: RateLimitConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            store,
            config,
            seq: AtomicU64::new(0),
        })
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Whether `path` falls under an exempt prefix.
    pub fn is_exempt(&self, path: &str) -> bool {
        self.config
            .skip_paths
            .iter()
            .any(|prefix| path.starts_with(prefix.as_str()))
    }

    /// Store key holding `client_key`'s log.
    pub fn key_for(&self, client_key: &str) -> String {
        format!("ratelimit:{}:{client_key}", self.config.scope)
    }

    /// Record one request for `client_key` and decide whether it may proceed.
    ///
    /// Store failures and timeouts are returned as errors; see
    /// [`allow`](Self::allow) for the fail-open wrapper.
    pub async fn check(&self, client_key: &str) -> Result<RateLimitDecision> {
        let Some(store) = &self.store else {
            return Err(EdgeError::Store("no store configured".into()));
        };

        let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
        let now_nanos = now.as_nanos() as i64;
        let hit = WindowHit {
            now_nanos,
            window_start_nanos: now_nanos - self.config.window.as_nanos() as i64,
            member: format!("{now_nanos}-{}", self.seq.fetch_add(1, Ordering::Relaxed)),
            expire: self.config.window + EXPIRY_GRACE,
        };

        let key = self.key_for(client_key);
        let count = with_timeout(
            "rate limit check",
            self.config.timeout,
            store.record_hit(&key, &hit),
        )
        .await?;

        let limit = self.config.max_requests;
        Ok(RateLimitDecision {
            allowed: count <= limit,
            limit,
            remaining: limit.saturating_sub(count),
            reset_at: (now + self.config.window).as_secs(),
            retry_after_secs: self.config.window.as_secs().max(1),
        })
    }

    /// Fail-open wrapper around [`check`](Self::check).
    ///
    /// Returns `None` when no store is configured or the store failed; the
    /// caller should then let the request through without headers.
    pub async fn allow(&self, client_key: &str) -> Option<RateLimitDecision> {
        self.store.as_ref()?;
        match self.check(client_key).await {
            Ok(decision) => {
                let status = if decision.allowed { "allowed" } else { "limited" };
                metrics::counter!(telemetry::RATELIMIT_REQUESTS_TOTAL, "status" => status)
                    .increment(1);
                Some(decision)
            }
            Err(e) => {
                metrics::counter!(telemetry::RATELIMIT_FAIL_OPEN_TOTAL).increment(1);
                metrics::counter!(telemetry::STORE_ERRORS_TOTAL, "operation" => "record_hit")
                    .increment(1);
                warn!(
                    client = client_key,
                    error = %e,
                    "rate limit store unavailable, failing open"
                );
                None
            }
        }
    }

    /// Derive the client key from the configured headers or the peer address.
    pub fn client_key(&self, headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
        for name in &self.config.client_ip_headers {
            let Some(value) = headers.get(name).and_then(|v| v.to_str().ok()) else {
                continue;
            };
            // X-Forwarded-For is "client, proxy1, proxy2"
            let candidate = value.split(',').next().unwrap_or_default().trim();
            if !candidate.is_empty() {
                return candidate.to_string();
            }
        }
        peer.map(|addr| addr.ip().to_string())
            .unwrap_or_else(|| "unknown".to_string())
    }

    fn rejection(&self, decision: &RateLimitDecision) -> Response {
        let body = serde_json::json!({
            "success": false,
            "error": {
                "code": "RATE_LIMIT_EXCEEDED",
                "message": self.config.message,
                "retryAfter": decision.retry_after_secs,
            }
        });
        let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
        decision.apply_headers(response.headers_mut());
        response
    }
}

/// Axum middleware enforcing `limiter` in front of the wrapped routes.
///
/// ```rust,ignore
/// let app = Router::new()
///     .route("/menus", get(list_menus))
///     .layer(axum::middleware::from_fn_with_state(limiter, rate_limit));
/// ```
pub async fn rate_limit(
    State(limiter): State<Arc<DistributedRateLimiter>>,
    request: Request,
    next: Next,
) -> Response {
    if limiter.is_exempt(request.uri().path()) {
        return next.run(request).await;
    }

    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let client = limiter.client_key(request.headers(), peer);

    let Some(decision) = limiter.allow(&client).await else {
        return next.run(request).await;
    };

    if !decision.allowed {
        debug!(client, limit = decision.limit, "rate limit exceeded");
        return limiter.rejection(&decision);
    }

    let mut response = next.run(request).await;
    decision.apply_headers(response.headers_mut());
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(config: RateLimitConfig) -> DistributedRateLimiter {
        DistributedRateLimiter::new(None, config).unwrap()
    }

    #[test]
    fn forwarded_for_takes_left_most_entry() {
        let limiter = limiter(RateLimitConfig::default());
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.9, 10.0.0.1"));
        headers.insert("x-real-ip", HeaderValue::from_static("198.51.100.7"));
        assert_eq!(limiter.client_key(&headers, None), "203.0.113.9");
    }

    #[test]
    fn real_ip_used_when_forwarded_for_missing() {
        let limiter = limiter(RateLimitConfig::default());
        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", HeaderValue::from_static("198.51.100.7"));
        assert_eq!(limiter.client_key(&headers, None), "198.51.100.7");
    }

    #[test]
    fn peer_address_is_last_resort() {
        let limiter = limiter(RateLimitConfig::default().client_ip_headers(vec![]));
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.9"));
        let peer: SocketAddr = "192.0.2.1:4242".parse().unwrap();
        assert_eq!(limiter.client_key(&headers, Some(peer)), "192.0.2.1");
        assert_eq!(limiter.client_key(&headers, None), "unknown");
    }

    #[test]
    fn exempt_paths_match_by_prefix() {
        let limiter = limiter(RateLimitConfig::default());
        assert!(limiter.is_exempt("/ojeomneo/v1/healthcheck/live"));
        assert!(limiter.is_exempt("/ojeomneo/metrics"));
        assert!(!limiter.is_exempt("/ojeomneo/v1/menus"));
    }

    #[test]
    fn key_uses_scope() {
        let limiter = limiter(RateLimitConfig::default().scope("sketch"));
        assert_eq!(limiter.key_for("1.2.3.4"), "ratelimit:sketch:1.2.3.4");
    }

    #[test]
    fn zero_window_is_rejected() {
        let result =
            DistributedRateLimiter::new(None, RateLimitConfig::default().window(Duration::ZERO));
        assert!(matches!(result, Err(EdgeError::Configuration(_))));
    }

    #[test]
    fn rejection_headers_include_retry_after() {
        let decision = RateLimitDecision {
            allowed: false,
            limit: 5,
            remaining: 0,
            reset_at: 1_700_000_060,
            retry_after_secs: 60,
        };
        let mut headers = HeaderMap::new();
        decision.apply_headers(&mut headers);
        assert_eq!(headers[RETRY_AFTER], "60");
        assert_eq!(headers[X_RATELIMIT_REMAINING], "0");
        assert_eq!(headers[X_RATELIMIT_RESET], "1700000060");
    }
}
