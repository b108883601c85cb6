//! REST API layer built on Axum.
//!
//! Provides HTTP handlers for leaderboard writes, ranked queries, analytics,
//! history, and admin operations. Includes middleware for authentication, rate
//! limiting, request timeouts, body size limits, metrics collection, and
//! request ID tracing.

/// API error types mapped to HTTP status codes.
pub mod errors;
/// HTTP request handlers and application state.
pub mod handlers;
/// Prometheus metrics recording and background collection.
pub mod metrics;
/// Request and response data transfer objects.
pub mod models;

use axum::error_handling::HandleErrorLayer;
use axum::extract::{DefaultBodyLimit, MatchedPath, State};
use axum::http::StatusCode;
use axum::routing::{delete, get, post, put};
use axum::{middleware, Router};
use errors::ApiError;
use handlers::AppState;
use leaderboard_core::config;
use std::time::{Duration, Instant};
use tower::buffer::BufferLayer;
use tower::limit::{ConcurrencyLimitLayer, RateLimitLayer};
use tower::timeout::TimeoutLayer;
use tower::ServiceBuilder;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::Instrument;

async fn auth_middleware(
    State(state): State<AppState>,
    req: axum::http::Request<axum::body::Body>,
    next: axum::middleware::Next,
) -> Result<axum::response::Response, ApiError> {
    if let Some(ref expected_key) = state.api_key {
        use subtle::ConstantTimeEq;
        let authorized = req
            .headers()
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(|t| t.as_bytes().ct_eq(expected_key.as_bytes()).into())
            .unwrap_or(false);

        if !authorized {
            return Err(ApiError::Unauthorized(
                "Invalid or missing API key".to_string(),
            ));
        }
    }
    Ok(next.run(req).await)
}

async fn request_id_middleware(
    req: axum::http::Request<axum::body::Body>,
    next: axum::middleware::Next,
) -> axum::response::Response {
    let request_id = uuid::Uuid::new_v4().to_string();
    let span = tracing::info_span!("request", request_id = %request_id);
    async move {
        let mut response = next.run(req).await;
        if let Ok(value) = axum::http::HeaderValue::from_str(&request_id) {
            response.headers_mut().insert(
                axum::http::HeaderName::from_static("x-request-id"),
                value,
            );
        }
        response
    }
    .instrument(span)
    .await
}

async fn security_headers_middleware(
    req: axum::http::Request<axum::body::Body>,
    next: axum::middleware::Next,
) -> axum::response::Response {
    let mut response = next.run(req).await;
    let headers = response.headers_mut();
    headers.insert(
        axum::http::HeaderName::from_static("x-content-type-options"),
        axum::http::HeaderValue::from_static("nosniff"),
    );
    headers.insert(
        axum::http::HeaderName::from_static("x-frame-options"),
        axum::http::HeaderValue::from_static("DENY"),
    );
    headers.insert(
        axum::http::HeaderName::from_static("referrer-policy"),
        axum::http::HeaderValue::from_static("no-referrer"),
    );
    response
}

async fn metrics_middleware(
    req: axum::http::Request<axum::body::Body>,
    next: axum::middleware::Next,
) -> axum::response::Response {
    let method = req.method().to_string();
    // Route template, so board and player names do not explode label cardinality.
    let path = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());
    let start = Instant::now();
    let response = next.run(req).await;
    metrics::record_request(&method, &path, response.status().as_u16(), start.elapsed());
    response
}

/// Builds the Axum router with all routes and middleware layers.
///
/// The middleware stack (outermost to innermost):
/// Rate limiting → Concurrency limit → Timeout → Body limit → CORS → Trace →
/// Compression → Security headers → Request ID → Metrics → Auth.
pub fn create_router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/leaderboards", get(handlers::list_boards))
        .route("/leaderboards/:name", delete(handlers::clear_board))
        .route("/leaderboards/:name/players", post(handlers::add_player))
        .route(
            "/leaderboards/:name/players/batch",
            post(handlers::add_players_batch),
        )
        .route(
            "/leaderboards/:name/players/:player",
            get(handlers::get_player).delete(handlers::remove_player),
        )
        .route(
            "/leaderboards/:name/players/:player/score",
            put(handlers::increment_score),
        )
        .route(
            "/leaderboards/:name/players/:player/score/absolute",
            put(handlers::set_score),
        )
        .route(
            "/leaderboards/:name/players/:player/metadata",
            get(handlers::get_player_metadata).put(handlers::set_player_metadata),
        )
        .route(
            "/leaderboards/:name/players/:player/context",
            get(handlers::get_player_context),
        )
        .route(
            "/leaderboards/:name/players/:player/stats",
            get(handlers::get_player_stats),
        )
        .route(
            "/leaderboards/:name/players/:player/power-ups",
            post(handlers::activate_power_up),
        )
        .route("/power-ups", get(handlers::list_power_ups))
        .route("/leaderboards/:name/top", get(handlers::get_top))
        .route("/leaderboards/:name/page", get(handlers::get_page))
        .route("/leaderboards/:name/range", get(handlers::get_range))
        .route("/leaderboards/:name/stats", get(handlers::get_stats))
        .route("/leaderboards/:name/analytics", get(handlers::get_analytics))
        .route(
            "/leaderboards/:name/snapshots",
            get(handlers::get_history).post(handlers::create_snapshot),
        )
        .route("/leaderboards/:name/trim", post(handlers::trim_board))
        .route("/admin/boards/:name", delete(handlers::delete_board))
        .route("/admin/compact", post(handlers::compact))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    Router::new()
        .route("/health", get(handlers::health))
        .route("/metrics", get(handlers::metrics_endpoint))
        .merge(protected)
        .layer(middleware::from_fn(metrics_middleware))
        .layer(middleware::from_fn(request_id_middleware))
        .layer(middleware::from_fn(security_headers_middleware))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .layer(DefaultBodyLimit::max(config::MAX_REQUEST_BODY_BYTES))
        .layer(
            ServiceBuilder::new()
                .layer(HandleErrorLayer::new(|err: tower::BoxError| async move {
                    if err.is::<tower::timeout::error::Elapsed>() {
                        StatusCode::REQUEST_TIMEOUT
                    } else {
                        StatusCode::TOO_MANY_REQUESTS
                    }
                }))
                .layer(BufferLayer::new(1024))
                .layer(ConcurrencyLimitLayer::new(config::MAX_CONCURRENT_REQUESTS))
                .layer(RateLimitLayer::new(
                    config::RATE_LIMIT_RPS,
                    Duration::from_secs(1),
                ))
                .layer(TimeoutLayer::new(Duration::from_secs(
                    config::REQUEST_TIMEOUT_SECS,
                ))),
        )
        .with_state(state)
}
