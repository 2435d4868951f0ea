//! # HTTP Shim
//!
//! A thin axum router that forwards onto bus operations. It adds no
//! semantics of its own.
//!
//! ## Endpoints
//!
//! - `GET /health` - Health check
//! - `GET /status` - Node and edge counts with the root id
//! - `GET /nodes/{id}?parent=` - Describe a node
//! - `GET /nodes/{id}/children?type=&includeDel=&recursive=` - Descendant query
//! - `POST /nodes` - Insert a node with its parent edge
//! - `DELETE /nodes/{id}?parent=` - Tombstone one parent edge
//! - `POST /nodes/{id}/points` - Node points, or edge points with `parent`
//! - `POST /nodes/{id}/parents` - Move a parent edge
//! - `PUT /nodes/{id}/parents` - Link under an additional parent
//! - `POST /nodes/{id}/not` - Notification fan-out
//!
//! ## Security Configuration (Environment Variables)
//!
//! - `FLEETGRAPH_CORS_ORIGINS`: Comma-separated list of allowed origins, or "*" for all (default: localhost only)
//! - `FLEETGRAPH_RATE_LIMIT`: Requests per second (default: 100, 0 to disable)
//! - `FLEETGRAPH_API_KEY`: If set, requires Bearer token authentication

mod auth;
mod handlers;
mod middleware;
mod types;

pub use auth::get_api_key_from_env;
pub use types::{
    AckResponse, CopyRequest, ErrorResponse, HealthResponse, InsertNodeRequest, MoveRequest,
    ParentQuery, PointsRequest, StatusResponse,
};

use crate::error::AppError;
use crate::service::FleetService;
use axum::{
    Router,
    http::{HeaderValue, Method, header},
    middleware as axum_middleware,
    routing::{get, post},
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

// =============================================================================
// SERVER STATE
// =============================================================================

/// Shared server state.
#[derive(Debug, Clone)]
pub struct AppState {
    pub service: Arc<FleetService>,
}

impl AppState {
    #[must_use]
    pub fn new(service: Arc<FleetService>) -> Self {
        Self { service }
    }
}

/// Security settings of the router.
#[derive(Debug, Clone, Default)]
pub struct ApiSettings {
    pub api_key: Option<String>,
    /// Requests per second, 0 disables the limiter.
    pub rate_limit: u32,
    /// Raw `FLEETGRAPH_CORS_ORIGINS` value.
    pub cors_origins: Option<String>,
}

impl ApiSettings {
    /// Key and CORS origins from the environment, rate limit from config.
    pub fn from_env(rate_limit: u32) -> Self {
        Self {
            api_key: get_api_key_from_env(),
            rate_limit,
            cors_origins: std::env::var("FLEETGRAPH_CORS_ORIGINS").ok(),
        }
    }
}

// =============================================================================
// CORS CONFIGURATION
// =============================================================================

/// `"*"` allows every origin, a comma-separated list allows those, and
/// anything else falls back to localhost only.
fn build_cors_layer(origins: Option<&str>) -> CorsLayer {
    match origins {
        Some("*") => {
            tracing::warn!("CORS: allowing all origins (FLEETGRAPH_CORS_ORIGINS=*)");
            CorsLayer::permissive()
        }
        Some(origins) => {
            let allowed: Vec<HeaderValue> = origins
                .split(',')
                .filter_map(|s| {
                    let trimmed = s.trim();
                    match trimmed.parse::<HeaderValue>() {
                        Ok(hv) => Some(hv),
                        Err(e) => {
                            tracing::warn!("CORS: invalid origin '{}': {}", trimmed, e);
                            None
                        }
                    }
                })
                .collect();

            if allowed.is_empty() {
                tracing::warn!("CORS: no valid origins in FLEETGRAPH_CORS_ORIGINS, defaulting to localhost");
                build_localhost_cors()
            } else {
                restrict(CorsLayer::new().allow_origin(allowed))
            }
        }
        None => build_localhost_cors(),
    }
}

fn build_localhost_cors() -> CorsLayer {
    let origins: Vec<HeaderValue> = [
        "http://localhost:3000",
        "http://localhost:8080",
        "http://127.0.0.1:3000",
        "http://127.0.0.1:8080",
    ]
    .into_iter()
    .filter_map(|o| o.parse().ok())
    .collect();
    restrict(CorsLayer::new().allow_origin(origins))
}

fn restrict(layer: CorsLayer) -> CorsLayer {
    layer
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
}

// =============================================================================
// ROUTER CREATION
// =============================================================================

/// Create the axum router with all endpoints and middleware.
///
/// Middleware stack (outer to inner): tracing, CORS, body limit, rate
/// limiting, authentication.
pub fn create_router(state: AppState, settings: &ApiSettings) -> Router {
    let mut router = Router::new()
        .route("/health", get(handlers::health_handler))
        .route("/status", get(handlers::status_handler))
        .route("/nodes", post(handlers::insert_node_handler))
        .route(
            "/nodes/{id}",
            get(handlers::get_node_handler).delete(handlers::delete_node_handler),
        )
        .route("/nodes/{id}/children", get(handlers::children_handler))
        .route("/nodes/{id}/points", post(handlers::points_handler))
        .route(
            "/nodes/{id}/parents",
            post(handlers::move_handler).put(handlers::copy_handler),
        )
        .route("/nodes/{id}/not", post(handlers::notification_handler));

    match settings.api_key.as_deref() {
        Some(key) => {
            tracing::info!("API key authentication enabled");
            let key: auth::ApiKey = Arc::from(key);
            router = router.layer(axum_middleware::from_fn_with_state(
                key,
                auth::api_key_auth_middleware,
            ));
        }
        None => tracing::warn!(
            "API key authentication disabled; set FLEETGRAPH_API_KEY to require a bearer token"
        ),
    }

    match middleware::create_rate_limiter(settings.rate_limit) {
        Some(limiter) => {
            tracing::info!(rps = settings.rate_limit, "rate limiting enabled");
            router = router.layer(axum_middleware::from_fn_with_state(
                limiter,
                middleware::rate_limit_middleware,
            ));
        }
        None => tracing::info!("rate limiting disabled"),
    }

    router
        .layer(axum::extract::DefaultBodyLimit::max(2 * 1024 * 1024))
        .layer(build_cors_layer(settings.cors_origins.as_deref()))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// =============================================================================
// SERVER STARTUP
// =============================================================================

/// Serve until ctrl-c.
pub async fn run_server(addr: &str, service: Arc<FleetService>, settings: &ApiSettings) -> Result<(), AppError> {
    let router = create_router(AppState::new(Arc::clone(&service)), settings);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| AppError::Io(format!("bind {addr} failed: {e}")))?;
    tracing::info!("fleetgraph HTTP shim listening on {}", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for ctrl-c");
            }
        })
        .await
        .map_err(|e| AppError::Io(format!("server error: {e}")))?;

    service.shutdown();
    Ok(())
}
