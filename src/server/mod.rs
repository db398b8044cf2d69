//! HTTP service assembly for `ojeomd`.
//!
//! This module provides:
//! - Configuration types (`config`)
//! - [`App`]: component construction from a [`Config`] and the axum router
//!   with the edge layers applied
//! - [`App::serve`]: serving with graceful shutdown and a supervised
//!   reasoning-cache sweeper
//!
//! Routes, relative to `server.base_path`:
//! - `GET /healthcheck`
//! - `POST /recommendations/reasons` with `{mood, keywords, candidates}`

pub mod config;

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::{Next, from_fn_with_state};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::store::KvStore;
use crate::{
    DistributedRateLimiter, DistributedResponseCache, EdgeError, EdgeLayers, ReasonGenerator,
    ReasoningCache, RecommendationOrchestrator, Result,
};

pub use config::Config;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<RecommendationOrchestrator>,
    pub store_name: Option<String>,
    pub request_timeout: Duration,
}

/// Body of `POST /recommendations/reasons`.
#[derive(Debug, Clone, Deserialize)]
pub struct ReasonsRequest {
    pub mood: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    pub candidates: Vec<String>,
}

/// Reasons in candidate order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReasonsResponse {
    pub reasons: Vec<String>,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    store: Option<String>,
}

/// Assembled service: router plus the components that outlive a request.
pub struct App {
    router: Router,
    reasoning_cache: Arc<ReasoningCache>,
}

impl App {
    /// Build every component from `config`.
    ///
    /// `store` is shared by the rate limiter and the response cache; without
    /// one both are skipped.
    pub fn build(
        config: &Config,
        store: Option<Arc<dyn KvStore>>,
        generator: Arc<dyn ReasonGenerator>,
    ) -> Result<Self> {
        let reasoning_cache = Arc::new(ReasoningCache::new(config.reasoning_cache_config())?);
        let orchestrator = RecommendationOrchestrator::new(Arc::clone(&reasoning_cache), generator)
            .generation_timeout(config.generation_timeout());

        let mut layers = EdgeLayers::new();
        if store.is_some() && config.rate_limit.enabled {
            let limiter = DistributedRateLimiter::new(store.clone(), config.rate_limit_config()?)?;
            layers = layers.rate_limiter(Arc::new(limiter));
        }
        if store.is_some() && config.response_cache.enabled {
            let cache =
                DistributedResponseCache::new(store.clone(), config.response_cache_config()?)?;
            layers = layers.response_cache(Arc::new(cache));
        }

        let state = AppState {
            orchestrator: Arc::new(orchestrator),
            store_name: store.as_ref().map(|s| s.name().to_string()),
            request_timeout: config.request_timeout(),
        };
        let router = layers.apply(routes(state, &config.server.base_path));

        Ok(Self {
            router,
            reasoning_cache,
        })
    }

    /// The fully layered router.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    pub fn reasoning_cache(&self) -> &Arc<ReasoningCache> {
        &self.reasoning_cache
    }

    /// Serve on `listener` until `shutdown` resolves, then stop the sweeper.
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let sweeper = self.reasoning_cache.spawn_sweeper();
        let result = axum::serve(
            listener,
            self.router
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown)
        .await;

        sweeper.shutdown().await;
        info!("server stopped");
        result.map_err(|e| EdgeError::Http(format!("server error: {e}")))
    }
}

/// Build the unlayered routes under `base_path`.
pub fn routes(state: AppState, base_path: &str) -> Router {
    let request_timeout = state.request_timeout;
    Router::new()
        .route(&format!("{base_path}/healthcheck"), get(healthcheck))
        .route(
            &format!("{base_path}/recommendations/reasons"),
            post(generate_reasons),
        )
        .layer(from_fn_with_state(request_timeout, timeout_requests))
        .with_state(state)
}

async fn healthcheck(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        store: state.store_name,
    })
}

async fn generate_reasons(
    State(state): State<AppState>,
    Json(request): Json<ReasonsRequest>,
) -> Json<ReasonsResponse> {
    // Leave a little headroom under the request timeout for serialisation.
    let deadline = Instant::now() + state.request_timeout.mul_f32(0.9);
    let reasons = state
        .orchestrator
        .generate_rationales_within(
            &request.mood,
            &request.keywords,
            &request.candidates,
            Some(deadline),
        )
        .await;
    Json(ReasonsResponse { reasons })
}

async fn timeout_requests(State(after): State<Duration>, request: Request, next: Next) -> Response {
    let path = request.uri().path().to_string();
    match tokio::time::timeout(after, next.run(request)).await {
        Ok(response) => response,
        Err(_) => {
            warn!(path, ?after, "request timed out");
            StatusCode::REQUEST_TIMEOUT.into_response()
        }
    }
}

/// Resolves on Ctrl+C or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
        info!("received Ctrl+C, shutting down");
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
                info!("received terminate signal, shutting down");
            }
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recommend::ChatReasonGenerator;
    use crate::store::MemoryStore;
    use axum::body::{Body, to_bytes};
    use tower::ServiceExt;

    fn app(store: Option<Arc<dyn KvStore>>) -> App {
        let generator: Arc<dyn ReasonGenerator> =
            Arc::new(ChatReasonGenerator::new(None::<String>, "test"));
        App::build(&Config::default(), store, generator).unwrap()
    }

    #[tokio::test]
    async fn healthcheck_reports_store() {
        let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        let response = app(Some(store))
            .router()
            .oneshot(
                http::Request::builder()
                    .uri("/ojeomneo/v1/healthcheck")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        // Exempt from rate limiting and caching.
        assert!(response.headers().get("x-ratelimit-limit").is_none());
        assert!(response.headers().get("x-cache").is_none());

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "ok");
        assert_eq!(json["store"], "memory");
    }

    #[tokio::test]
    async fn reasons_endpoint_keeps_order() {
        let response = app(None)
            .router()
            .oneshot(
                http::Request::builder()
                    .method("POST")
                    .uri("/ojeomneo/v1/recommendations/reasons")
                    .header("content-type", "application/json")
                    .body(Body::from(
                        r#"{"mood":"피곤함","keywords":["국물"],"candidates":["냉면","비빔밥"]}"#,
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let parsed: ReasonsResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed.reasons.len(), 2);
        assert!(parsed.reasons[0].starts_with("시원한 육수"));
        assert!(parsed.reasons[1].starts_with("비빔밥"));
    }
}
