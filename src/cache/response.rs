//! Distributed HTTP response cache.
//!
//! [`DistributedResponseCache`] sits behind the rate limiter and in front
//! of the business handlers. Cacheable requests (configured methods, not
//! under an exempt prefix, no `Cache-Control: no-cache`) are looked up by
//! a hash of their path and raw query string; hits are replayed without
//! touching the handler, misses run the handler and store 2xx responses.
//!
//! # Key derivation
//!
//! `<key_prefix>:<first 16 hex chars of sha256(path ++ query)>`. The query
//! string is hashed exactly as received: `?a=1&b=2` and `?b=2&a=1` are two
//! entries. Normalising parameter order would change which requests share
//! an entry, so it is left to callers that need it.
//!
//! # Failure handling
//!
//! Store errors, timeouts and undecodable payloads all count as misses.
//! The handler always runs in that case; this layer never produces an
//! error response of its own. A handler body that fails while being
//! buffered is passed on to the client as the same body error.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use axum::body::{Body, Bytes, HttpBody};
use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use futures_util::{future, stream};
use http::header::{CACHE_CONTROL, CONTENT_LENGTH, CONTENT_TYPE};
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::digest_hex;
use crate::error::with_timeout;
use crate::store::KvStore;
use crate::telemetry;
use crate::{EdgeError, Result};

pub const X_CACHE: HeaderName = HeaderName::from_static("x-cache");
pub const X_CACHE_AGE: HeaderName = HeaderName::from_static("x-cache-age");

/// Configuration for [`DistributedResponseCache`].
///
/// ```rust
/// # use ojeomneo_edge::ResponseCacheConfig;
/// # use std::time::Duration;
/// let config = ResponseCacheConfig::new()
///     .default_ttl(Duration::from_secs(120))
///     .path_ttl("/ojeomneo/v1/menus", Duration::from_secs(600));
/// ```
#[derive(Debug, Clone)]
pub struct ResponseCacheConfig {
    /// TTL when no path rule matches. Default: 5 minutes.
    pub default_ttl: Duration,
    /// Per path-prefix TTLs; the longest matching prefix wins.
    pub path_ttls: Vec<(String, Duration)>,
    /// Path prefixes never cached.
    pub skip_paths: Vec<String>,
    /// Cacheable methods. Default: GET.
    pub methods: Vec<Method>,
    /// Namespace of stored entries. Default: "cache:api".
    pub key_prefix: String,
    /// Response headers replayed on hits besides content-type.
    pub cached_headers: Vec<HeaderName>,
    /// Bound on each store round-trip. Default: 2s.
    pub timeout: Duration,
    /// Larger (or unsized) bodies are passed through uncached. Default: 1 MiB.
    pub max_body_bytes: usize,
}

impl Default for ResponseCacheConfig {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(5 * 60),
            path_ttls: vec![
                ("/ojeomneo/v1/config".to_string(), Duration::from_secs(30 * 60)),
                ("/ojeomneo/v1/menus".to_string(), Duration::from_secs(10 * 60)),
                ("/ojeomneo/v1/menus/categories".to_string(), Duration::from_secs(15 * 60)),
            ],
            skip_paths: vec![
                "/ojeomneo/v1/healthcheck".to_string(),
                "/ojeomneo/v1/docs".to_string(),
                "/ojeomneo/metrics".to_string(),
            ],
            methods: vec![Method::GET],
            key_prefix: "cache:api".to_string(),
            cached_headers: vec![
                HeaderName::from_static("content-encoding"),
                HeaderName::from_static("vary"),
            ],
            timeout: Duration::from_secs(2),
            max_body_bytes: 1024 * 1024,
        }
    }
}

impl ResponseCacheConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the fallback TTL.
    pub fn default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    /// Add (or replace) a TTL rule for a path prefix.
    pub fn path_ttl(mut self, prefix: impl Into<String>, ttl: Duration) -> Self {
        let prefix = prefix.into();
        self.path_ttls.retain(|(p, _)| *p != prefix);
        self.path_ttls.push((prefix, ttl));
        self
    }

    /// Replace all path TTL rules.
    pub fn path_ttls(mut self, rules: Vec<(String, Duration)>) -> Self {
        self.path_ttls = rules;
        self
    }

    /// Replace the exempt path prefixes.
    pub fn skip_paths(mut self, paths: Vec<String>) -> Self {
        self.skip_paths = paths;
        self
    }

    /// Replace the cacheable methods.
    pub fn methods(mut self, methods: Vec<Method>) -> Self {
        self.methods = methods;
        self
    }

    /// Set the key namespace.
    pub fn key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    /// Set the store timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the largest body that will be cached.
    pub fn max_body_bytes(mut self, bytes: usize) -> Self {
        self.max_body_bytes = bytes;
        self
    }

    /// Reject zero TTLs and a zero timeout.
    pub fn validate(&self) -> Result<()> {
        if self.default_ttl.is_zero() {
            return Err(EdgeError::Configuration(
                "response cache default TTL must be non-zero".into(),
            ));
        }
        if let Some((prefix, _)) = self.path_ttls.iter().find(|(_, ttl)| ttl.is_zero()) {
            return Err(EdgeError::Configuration(format!(
                "response cache TTL for {prefix} must be non-zero"
            )));
        }
        if self.timeout.is_zero() {
            return Err(EdgeError::Configuration(
                "response cache store timeout must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

/// A stored response, serialized as JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedResponse {
    pub status_code: u16,
    #[serde(with = "base64_bytes")]
    pub body: Vec<u8>,
    pub content_type: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Epoch seconds at capture time.
    pub cached_at: u64,
}

impl CachedResponse {
    /// Rebuild an HTTP response, tagged as a hit `age_secs` old.
    ///
    /// Returns `None` for payloads that could not have been stored by this
    /// layer (non-2xx or invalid status).
    fn replay(self, age_secs: u64) -> Option<Response> {
        let status = StatusCode::from_u16(self.status_code).ok()?;
        if !status.is_success() {
            return None;
        }

        let mut response = Response::new(Body::from(self.body));
        *response.status_mut() = status;
        let headers = response.headers_mut();
        for (name, value) in &self.headers {
            if let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                headers.insert(name, value);
            }
        }
        if let Ok(content_type) = HeaderValue::from_str(&self.content_type) {
            headers.insert(CONTENT_TYPE, content_type);
        }
        headers.insert(X_CACHE, HeaderValue::from_static("HIT"));
        headers.insert(X_CACHE_AGE, HeaderValue::from(age_secs));
        Some(response)
    }
}

mod base64_bytes {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}

/// Compute the store key for a request path and raw query string.
///
/// Deterministic across processes. Query parameter order is significant.
pub fn cache_key(prefix: &str, path: &str, query: &str) -> String {
    format!(
        "{prefix}:{}",
        digest_hex(&[path.as_bytes(), query.as_bytes()], 8)
    )
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Response cache over a shared [`KvStore`].
pub struct DistributedResponseCache {
    store: Option<Arc<dyn KvStore>>,
    config: ResponseCacheConfig,
}

impl DistributedResponseCache {
    /// Build a cache. Without a store every request passes straight through.
    ///
    /// Rejects zero TTLs and a zero timeout.
    pub fn new(store: Option<Arc<dyn KvStore>>, config: ResponseCacheConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { store, config })
    }

    pub fn config(&self) -> &ResponseCacheConfig {
        &self.config
    }

    /// Whether a request may be served from / stored in the cache.
    pub fn is_cacheable(&self, method: &Method, path: &str, headers: &HeaderMap) -> bool {
        if !self.config.methods.contains(method) {
            return false;
        }
        if self
            .config
            .skip_paths
            .iter()
            .any(|prefix| path.starts_with(prefix.as_str()))
        {
            return false;
        }
        !headers
            .get_all(CACHE_CONTROL)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(','))
            .any(|directive| directive.trim().eq_ignore_ascii_case("no-cache"))
    }

    /// TTL for `path`: the longest matching prefix rule, else the default.
    pub fn ttl_for(&self, path: &str) -> Duration {
        self.config
            .path_ttls
            .iter()
            .filter(|(prefix, _)| path.starts_with(prefix.as_str()))
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(_, ttl)| *ttl)
            .unwrap_or(self.config.default_ttl)
    }

    /// Store key for a request.
    pub fn key_for(&self, path: &str, query: &str) -> String {
        cache_key(&self.config.key_prefix, path, query)
    }

    /// Fetch and decode an entry; every failure mode is a miss.
    async fn lookup(&self, store: &dyn KvStore, key: &str) -> Option<CachedResponse> {
        let start = Instant::now();
        let result = with_timeout("cache get", self.config.timeout, store.get(key)).await;
        metrics::histogram!(telemetry::CACHE_OPERATION_DURATION_SECONDS, "operation" => "get")
            .record(start.elapsed().as_secs_f64());

        let bytes = match result {
            Ok(Some(bytes)) if !bytes.is_empty() => bytes,
            Ok(_) => return None,
            Err(e) => {
                metrics::counter!(telemetry::STORE_ERRORS_TOTAL, "operation" => "get")
                    .increment(1);
                warn!(key, error = %e, "response cache read failed, treating as miss");
                return None;
            }
        };

        match serde_json::from_slice(&bytes) {
            Ok(cached) => Some(cached),
            Err(e) => {
                warn!(key, error = %e, "corrupt response cache entry, treating as miss");
                None
            }
        }
    }

    /// Write a captured response; failures are logged and dropped.
    async fn save(&self, store: &dyn KvStore, key: &str, cached: &CachedResponse, ttl: Duration) {
        let payload = match serde_json::to_vec(cached) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(key, error = %e, "failed to encode response for cache");
                return;
            }
        };

        let start = Instant::now();
        let result = with_timeout("cache set", self.config.timeout, store.set_ex(key, &payload, ttl)).await;
        metrics::histogram!(telemetry::CACHE_OPERATION_DURATION_SECONDS, "operation" => "set")
            .record(start.elapsed().as_secs_f64());

        if let Err(e) = result {
            metrics::counter!(telemetry::STORE_ERRORS_TOTAL, "operation" => "set").increment(1);
            warn!(key, error = %e, "response cache write failed");
        }
    }

    /// Serve `request` from the cache or run `next` and capture its response.
    pub async fn handle(&self, request: Request, next: Next) -> Response {
        let Some(store) = self.store.as_deref() else {
            return next.run(request).await;
        };
        if !self.is_cacheable(request.method(), request.uri().path(), request.headers()) {
            return next.run(request).await;
        }

        let path = request.uri().path().to_string();
        let key = self.key_for(&path, request.uri().query().unwrap_or_default());

        if let Some(cached) = self.lookup(store, &key).await {
            let age = epoch_secs().saturating_sub(cached.cached_at);
            if let Some(response) = cached.replay(age) {
                metrics::counter!(telemetry::CACHE_HITS_TOTAL).increment(1);
                debug!(path, key, age, "response cache hit");
                return response;
            }
            warn!(key, "cached entry has an uncacheable status, treating as miss");
        }
        metrics::counter!(telemetry::CACHE_MISSES_TOTAL).increment(1);

        let response = next.run(request).await;
        let mut response = self.capture(store, &key, &path, response).await;
        response
            .headers_mut()
            .insert(X_CACHE, HeaderValue::from_static("MISS"));
        response
    }

    /// Buffer and store a successful response, returning it intact.
    async fn capture(&self, store: &dyn KvStore, key: &str, path: &str, response: Response) -> Response {
        if !response.status().is_success() {
            return response;
        }
        let fits = response
            .body()
            .size_hint()
            .upper()
            .is_some_and(|upper| upper <= self.config.max_body_bytes as u64);
        if !fits {
            debug!(path, "response body too large or unsized, not caching");
            return response;
        }

        let (mut parts, body) = response.into_parts();
        let bytes = match axum::body::to_bytes(body, self.config.max_body_bytes).await {
            Ok(bytes) => bytes,
            Err(e) => {
                // Hand the handler's own body error to the client unchanged.
                warn!(path, error = %e, "failed to buffer response body, not caching");
                parts.headers.remove(CONTENT_LENGTH);
                let failed = stream::once(future::ready(Err::<Bytes, _>(e)));
                return Response::from_parts(parts, Body::from_stream(failed));
            }
        };

        let headers = self
            .config
            .cached_headers
            .iter()
            .filter_map(|name| {
                let value = parts.headers.get(name)?.to_str().ok()?;
                Some((name.as_str().to_string(), value.to_string()))
            })
            .collect();
        let cached = CachedResponse {
            status_code: parts.status.as_u16(),
            body: bytes.to_vec(),
            content_type: parts
                .headers
                .get(CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
                .to_string(),
            headers,
            cached_at: epoch_secs(),
        };
        self.save(store, key, &cached, self.ttl_for(path)).await;

        Response::from_parts(parts, Body::from(bytes))
    }
}

/// Axum middleware serving cacheable requests through `cache`.
pub async fn response_cache(
    State(cache): State<Arc<DistributedResponseCache>>,
    request: Request,
    next: Next,
) -> Response {
    cache.handle(request, next).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache(config: ResponseCacheConfig) -> DistributedResponseCache {
        DistributedResponseCache::new(None, config).unwrap()
    }

    #[test]
    fn cache_key_deterministic() {
        let k1 = cache_key("cache:api", "/ojeomneo/v1/menus", "page=1&limit=20");
        let k2 = cache_key("cache:api", "/ojeomneo/v1/menus", "page=1&limit=20");
        assert_eq!(k1, k2);
        assert!(k1.starts_with("cache:api:"));
        assert_eq!(k1.len(), "cache:api:".len() + 16);
    }

    #[test]
    fn cache_key_query_order_matters() {
        let k1 = cache_key("cache:api", "/ojeomneo/v1/menus", "page=1&limit=20");
        let k2 = cache_key("cache:api", "/ojeomneo/v1/menus", "limit=20&page=1");
        assert_ne!(k1, k2);
    }

    #[test]
    fn cache_key_differs_on_path() {
        let k1 = cache_key("cache:api", "/ojeomneo/v1/menus", "");
        let k2 = cache_key("cache:api", "/ojeomneo/v1/config", "");
        assert_ne!(k1, k2);
    }

    #[test]
    fn longest_prefix_ttl_wins() {
        let cache = cache(ResponseCacheConfig::default());
        assert_eq!(
            cache.ttl_for("/ojeomneo/v1/menus/categories"),
            Duration::from_secs(15 * 60)
        );
        assert_eq!(cache.ttl_for("/ojeomneo/v1/menus/12"), Duration::from_secs(10 * 60));
        assert_eq!(cache.ttl_for("/ojeomneo/v1/app/version"), Duration::from_secs(5 * 60));
    }

    #[test]
    fn only_configured_methods_are_cacheable() {
        let cache = cache(ResponseCacheConfig::default());
        let headers = HeaderMap::new();
        assert!(cache.is_cacheable(&Method::GET, "/ojeomneo/v1/menus", &headers));
        assert!(!cache.is_cacheable(&Method::POST, "/ojeomneo/v1/menus", &headers));
        assert!(!cache.is_cacheable(&Method::GET, "/ojeomneo/v1/healthcheck/ready", &headers));
    }

    #[test]
    fn no_cache_directive_bypasses() {
        let cache = cache(ResponseCacheConfig::default());
        let mut headers = HeaderMap::new();
        headers.insert(CACHE_CONTROL, HeaderValue::from_static("max-age=0, No-Cache"));
        assert!(!cache.is_cacheable(&Method::GET, "/ojeomneo/v1/menus", &headers));
    }

    #[test]
    fn zero_ttl_rule_is_rejected() {
        let config = ResponseCacheConfig::default().path_ttl("/x", Duration::ZERO);
        assert!(matches!(
            DistributedResponseCache::new(None, config),
            Err(EdgeError::Configuration(_))
        ));
    }

    #[test]
    fn cached_response_json_shape() {
        let cached = CachedResponse {
            status_code: 200,
            body: b"{}".to_vec(),
            content_type: "application/json".into(),
            headers: BTreeMap::new(),
            cached_at: 7,
        };
        let json = serde_json::to_value(&cached).unwrap();
        assert_eq!(json["statusCode"], 200);
        assert_eq!(json["body"], "e30=");
        assert_eq!(json["contentType"], "application/json");
        assert_eq!(json["cachedAt"], 7);
    }

    #[test]
    fn replay_refuses_non_success_status() {
        let cached = CachedResponse {
            status_code: 500,
            body: vec![],
            content_type: String::new(),
            headers: BTreeMap::new(),
            cached_at: 0,
        };
        assert!(cached.replay(0).is_none());
    }
}
