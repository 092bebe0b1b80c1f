//! HTTP API surface: routing, middleware, and request handling.

mod envelope;
mod metrics;
mod middleware;
mod routes;
mod state;

pub use metrics::MetricsRegistry;
pub use state::AppState;

use axum::middleware::from_fn_with_state;
use axum::routing::{delete, get, post};
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::CorsLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::middleware::{metrics_middleware, rate_limit_middleware, security_headers, RateLimiters};

/// Build the full router with all middleware attached.
pub fn build_router(state: Arc<AppState>) -> Router {
    let limiters = RateLimiters::new(&state.config.ratelimit);

    let router = Router::new()
        .route("/parse/sync", post(routes::parse::parse_sync))
        .route("/parse/async", post(routes::parse::parse_async))
        .route("/parse/batch", post(routes::parse::parse_batch))
        .route("/parse/status/:id", get(routes::parse::job_status))
        .route("/parse/result/:id", get(routes::parse::job_result))
        .route("/parse/history", get(routes::parse::history))
        .route("/parse/cancel/:id", post(routes::parse::cancel_job))
        .route("/parse/:id", delete(routes::parse::delete_job))
        .route("/admin/metrics", get(routes::admin::metrics))
        .route("/admin/stats/real-time", get(routes::admin::real_time_stats))
        .route("/admin/cleanup", post(routes::admin::cleanup))
        .route("/health", get(routes::health::health))
        .route("/health/detailed", get(routes::health::health_detailed))
        .with_state(Arc::clone(&state));

    router
        .layer(from_fn_with_state(
            (Arc::clone(&state), Arc::new(limiters)),
            rate_limit_middleware,
        ))
        .layer(from_fn_with_state(Arc::clone(&state), metrics_middleware))
        .layer(axum::middleware::from_fn(security_headers))
        .layer(CatchPanicLayer::custom(envelope::panic_response))
        .layer(CorsLayer::permissive())
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(axum::extract::DefaultBodyLimit::max(
            state.config.max_file_size as usize + 1024 * 1024,
        ))
}

/// Bind and serve until the `shutdown` future resolves.
pub async fn serve(
    state: Arc<AppState>,
    addr: SocketAddr,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let router = build_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "api listening");
    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await?;
    Ok(())
}
