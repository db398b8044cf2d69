//! Wiring of the edge middleware onto an axum [`Router`].

use std::sync::Arc;

use axum::Router;
use axum::middleware::from_fn_with_state;

use crate::cache::DistributedResponseCache;
use crate::cache::response::response_cache;
use crate::ratelimit::{DistributedRateLimiter, rate_limit};

/// The request-path components, applied in the order
/// rate limiter → response cache → handler.
///
/// Either component may be left out.
///
/// ```rust
/// # use std::sync::Arc;
/// # use axum::{Router, routing::get};
/// # use ojeomneo_edge::{DistributedRateLimiter, EdgeLayers, RateLimitConfig};
/// # use ojeomneo_edge::store::{KvStore, MemoryStore};
/// let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
/// let limiter = DistributedRateLimiter::new(Some(store), RateLimitConfig::default()).unwrap();
/// let app: Router = EdgeLayers::new()
///     .rate_limiter(Arc::new(limiter))
///     .apply(Router::new().route("/", get(|| async { "ok" })));
/// ```
#[derive(Clone, Default)]
pub struct EdgeLayers {
    rate_limiter: Option<Arc<DistributedRateLimiter>>,
    response_cache: Option<Arc<DistributedResponseCache>>,
}

impl EdgeLayers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rate_limiter(mut self, limiter: Arc<DistributedRateLimiter>) -> Self {
        self.rate_limiter = Some(limiter);
        self
    }

    pub fn response_cache(mut self, cache: Arc<DistributedResponseCache>) -> Self {
        self.response_cache = Some(cache);
        self
    }

    /// Wrap every route of `router`.
    ///
    /// The connection must be served with
    /// `into_make_service_with_connect_info::<SocketAddr>()` for the rate
    /// limiter to see peer addresses; without it clients are keyed by
    /// forwarding headers only.
    pub fn apply<S>(&self, router: Router<S>) -> Router<S>
    where
        S: Clone + Send + Sync + 'static,
    {
        // Layers added later run first.
        let mut router = router;
        if let Some(cache) = &self.response_cache {
            router = router.layer(from_fn_with_state(Arc::clone(cache), response_cache));
        }
        if let Some(limiter) = &self.rate_limiter {
            router = router.layer(from_fn_with_state(Arc::clone(limiter), rate_limit));
        }
        router
    }
}
