//! Ojeomneo edge - request-path resilience for the ojeomneo API
//!
//! This crate provides the components that sit between the network and the
//! business handlers of the ojeomneo menu-recommendation service:
//!
//! - [`DistributedRateLimiter`]: sliding-window rate limiting shared by every
//!   API instance through a [`KvStore`](store::KvStore)
//! - [`DistributedResponseCache`]: full-response caching of idempotent reads
//! - [`CacheInvalidator`]: prefix-based eviction after writes
//! - [`ReasoningCache`] and [`RecommendationOrchestrator`]: concurrent,
//!   cached generation of the reason shown next to each recommended menu
//!
//! Store outages never turn into errors on the request path: the rate limiter
//! lets requests through and the response cache serves misses. The only
//! failure a client can observe from this crate is a 429.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::net::SocketAddr;
//! use std::sync::Arc;
//!
//! use axum::{Router, routing::get};
//! use ojeomneo_edge::store::{KvStore, RedisStore, RedisStoreConfig};
//! use ojeomneo_edge::{
//!     DistributedRateLimiter, DistributedResponseCache, EdgeLayers, RateLimitConfig,
//!     ResponseCacheConfig,
//! };
//!
//! #[tokio::main]
//! async fn main() -> ojeomneo_edge::Result<()> {
//!     let store: Arc<dyn KvStore> =
//!         Arc::new(RedisStore::connect(&RedisStoreConfig::new("redis://127.0.0.1:6379")).await?);
//!
//!     let limiter = DistributedRateLimiter::new(Some(store.clone()), RateLimitConfig::default())?;
//!     let cache = DistributedResponseCache::new(Some(store), ResponseCacheConfig::default())?;
//!
//!     let app = EdgeLayers::new()
//!         .rate_limiter(Arc::new(limiter))
//!         .response_cache(Arc::new(cache))
//!         .apply(Router::new().route("/ojeomneo/v1/menus", get(|| async { "[]" })));
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await.unwrap();
//!     axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
//!         .await
//!         .unwrap();
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod error;
pub mod layers;
pub mod ratelimit;
pub mod recommend;
#[cfg(feature = "server")]
pub mod server;
pub mod store;
pub mod telemetry;

// Re-export main types at crate root
pub use error::{EdgeError, Result};
pub use layers::EdgeLayers;

pub use cache::{
    CacheInvalidator, CachedResponse, DistributedResponseCache, ReasoningCache,
    ReasoningCacheConfig, ResponseCacheConfig, SweeperHandle, cache_key,
};
pub use ratelimit::{DistributedRateLimiter, RateLimitConfig, RateLimitDecision, rate_limit};
pub use recommend::{
    ChatReasonGenerator, ReasonGenerator, RecommendationOrchestrator, fallback_reason,
};
