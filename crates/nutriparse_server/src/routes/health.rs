//! Liveness and readiness probes.

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::Response;
use nutriparse_protocol::http_types::{DetailedHealth, HealthProbe};
use std::sync::Arc;

use crate::envelope::{ok, request_id};
use crate::state::AppState;

pub async fn health(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    let rid = request_id(&headers);
    match state.store.ping() {
        Ok(()) => ok::<()>(StatusCode::OK, "ok", None, rid),
        Err(_) => ok::<()>(StatusCode::SERVICE_UNAVAILABLE, "store unavailable", None, rid),
    }
}

pub async fn health_detailed(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Response {
    let rid = request_id(&headers);
    let mut probes = Vec::new();

    let store_probe = match state.store.ping() {
        Ok(()) => HealthProbe {
            name: "job_store".to_string(),
            healthy: true,
            detail: None,
        },
        Err(err) => HealthProbe {
            name: "job_store".to_string(),
            healthy: false,
            detail: Some(err.to_string()),
        },
    };
    probes.push(store_probe);

    let blob_probe = match state.blob.exists("healthcheck").await {
        Ok(_) => HealthProbe {
            name: "blob_store".to_string(),
            healthy: true,
            detail: None,
        },
        Err(err) => HealthProbe {
            name: "blob_store".to_string(),
            healthy: false,
            detail: Some(err.to_string()),
        },
    };
    probes.push(blob_probe);

    let healthy = probes.iter().all(|p| p.healthy);
    let payload = DetailedHealth {
        healthy,
        probes,
        version: env!("CARGO_PKG_VERSION").to_string(),
    };
    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    ok(status, if healthy { "ok" } else { "degraded" }, Some(payload), rid)
}
