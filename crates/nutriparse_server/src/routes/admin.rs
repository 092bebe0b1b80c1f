//! Admin endpoints: metrics, real-time stats, cleanup.

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::Response;
use axum::Json;
use chrono::{Datelike, TimeZone, Utc};
use nutriparse_protocol::http_types::{CleanupRequest, CleanupResponse, RealTimeStats};
use nutriparse_protocol::JobState;
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

use crate::envelope::{ok, request_id, ApiError};
use crate::state::AppState;

pub async fn metrics(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let rid = request_id(&headers);
    let stats = state.store.stats(None).map_err(ApiError::from_store)?;
    let mut snapshot = state
        .metrics
        .snapshot(state.started_at.elapsed().as_secs());
    snapshot["jobs"] = json!({
        "total": stats.total,
        "by_state": stats
            .by_state
            .iter()
            .map(|(s, n)| (s.as_str(), *n))
            .collect::<std::collections::BTreeMap<_, _>>(),
        "success_rate": stats.success_rate,
        "avg_duration_ms": stats.avg_duration_ms,
    });
    Ok(ok(StatusCode::OK, "metrics", Some(snapshot), rid))
}

pub async fn real_time_stats(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let rid = request_id(&headers);
    let all = state.store.stats(None).map_err(ApiError::from_store)?;

    let now = Utc::now();
    let midnight = Utc
        .with_ymd_and_hms(now.year(), now.month(), now.day(), 0, 0, 0)
        .single()
        .map(|dt| dt.timestamp_millis())
        .unwrap_or(0);
    let today = state
        .store
        .stats(Some(midnight))
        .map_err(ApiError::from_store)?;

    let payload = RealTimeStats {
        processing: all.count(JobState::Leased) + all.count(JobState::Running),
        queued: all.count(JobState::Queued),
        completed_today: today.count(JobState::Completed),
        success_rate: all.success_rate,
    };
    Ok(ok(StatusCode::OK, "real-time stats", Some(payload), rid))
}

pub async fn cleanup(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<CleanupRequest>,
) -> Result<Response, ApiError> {
    let rid = request_id(&headers);
    let days = i64::from(request.days.max(1));
    let cutoff = Utc::now().timestamp_millis() - days * 86_400_000;

    let handles = state
        .store
        .cleanup(
            cutoff,
            &[JobState::Completed, JobState::Failed, JobState::Cancelled],
        )
        .map_err(ApiError::from_store)?;

    let deleted = handles.len() as u64;
    for handle in handles {
        if let Err(err) = state.blob.delete(&handle).await {
            warn!(handle = %handle, error = %err, "cleanup blob delete failed, blob orphaned on disk");
        }
    }
    info!(deleted, days, "cleanup run");
    Ok(ok(
        StatusCode::OK,
        "cleanup complete",
        Some(CleanupResponse { deleted }),
        rid,
    ))
}
