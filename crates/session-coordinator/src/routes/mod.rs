//! HTTP routes for the session coordinator.
//!
//! Defines the axum router and application state.

use crate::actors::HubHandle;
use crate::auth::TokenValidator;
use crate::config::Config;
use crate::handlers;
use crate::middleware::{rate_limit, RateLimitState};
use crate::observability::{health_router, HealthState};
use crate::storage::{MeetingStore, ParticipantStore};

use axum::{
    http::{header, HeaderName, HeaderValue, Method},
    middleware::from_fn_with_state,
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{AllowHeaders, AllowOrigin, Any, CorsLayer};
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};
use tracing::warn;

/// Request timeout for plain HTTP handlers. Upgraded WebSockets run outside
/// the request future and are not affected.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// How long browsers may cache a CORS preflight.
pub const CORS_MAX_AGE: Duration = Duration::from_secs(300);

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,

    /// Handle to the hub actor that owns live rooms.
    pub hub: HubHandle,

    /// Meeting lookups (read-only).
    pub meetings: Arc<dyn MeetingStore>,

    /// Participant records, for the REST surface.
    pub participants: Arc<dyn ParticipantStore>,

    pub validator: Arc<dyn TokenValidator>,
}

/// Build the application routes.
///
/// - `/api/ws/:meeting_id` - WebSocket join
/// - `/api/meetings/:id/join` - join-notify
/// - `/api/meetings/:id/participants` - list (GET) and update (PUT, PATCH)
/// - `/api/health`, `/api/stats` - live counts
/// - `/health`, `/ready` - liveness and readiness
/// - `/metrics` - Prometheus scrape
///
/// The `/api` routes are rate limited per client address; serve with
/// `into_make_service_with_connect_info::<SocketAddr>()` so the limiter
/// sees the peer address.
pub fn build_routes(
    state: Arc<AppState>,
    health_state: Arc<HealthState>,
    metrics_handle: PrometheusHandle,
) -> Router {
    let cors = cors_layer(&state.config.allowed_origins);
    let limiter = RateLimitState::per_minute(state.config.rate_limit_per_minute);

    let api_routes = Router::new()
        .route("/api/ws/:meeting_id", get(handlers::ws_handler))
        .route("/api/meetings/:id/join", post(handlers::join_notify))
        .route(
            "/api/meetings/:id/participants",
            get(handlers::get_participants)
                .put(handlers::update_participant)
                .patch(handlers::update_participant),
        )
        .route("/api/health", get(handlers::stats))
        .route("/api/stats", get(handlers::stats))
        .route_layer(from_fn_with_state(limiter, rate_limit))
        .with_state(state);

    let metrics_routes = Router::new()
        .route("/metrics", get(handlers::metrics_handler))
        .with_state(metrics_handle);

    api_routes
        .merge(metrics_routes)
        .merge(health_router(health_state))
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .layer(cors)
}

/// Any origin when none are configured; otherwise exactly the listed ones,
/// with credentials so browsers may send the session cookie.
fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    if allowed_origins.is_empty() {
        return CorsLayer::new()
            .allow_methods(Any)
            .allow_headers(Any)
            .allow_origin(Any);
    }

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(target: "sc.routes", origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    // Credentialed CORS forbids wildcards, so methods and headers are listed.
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_credentials(true)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::OPTIONS,
        ])
        .allow_headers(AllowHeaders::list([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            header::ACCEPT,
            header::ORIGIN,
            HeaderName::from_static("x-requested-with"),
        ]))
        .max_age(CORS_MAX_AGE)
}
