//! HTTP API payload types.
//!
//! Used by the server and by clients (CLI, tests). Responses share one
//! envelope: `{code, message, data, timestamp, request_id}`.

use nutriparse_ids::{BatchId, JobId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ErrorKind;
use crate::job::{JobState, ParsingType, Priority};

/// Uniform response envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub code: u16,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    /// RFC3339 timestamp of the response.
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

/// Error body carried in the envelope's `error` slot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    #[serde(rename = "type")]
    pub kind: ErrorKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

/// Accepted response for an async submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitAccepted {
    pub job_id: JobId,
}

/// Accepted response for a batch submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchAccepted {
    pub batch_id: BatchId,
    pub job_ids: Vec<JobId>,
}

/// `GET /parse/status/{id}` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusPayload {
    pub state: JobState,
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
}

/// `GET /parse/history` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryPayload<J> {
    pub jobs: Vec<J>,
    pub total: u64,
}

/// Query parameters accepted by the submission endpoints.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SubmitQuery {
    #[serde(default)]
    pub parsing_type: Option<ParsingType>,
    #[serde(default)]
    pub priority: Option<Priority>,
    #[serde(default)]
    pub callback_url: Option<String>,
}

/// `GET /admin/stats/real-time` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealTimeStats {
    pub processing: u64,
    pub queued: u64,
    pub completed_today: u64,
    pub success_rate: f64,
}

/// `POST /admin/cleanup` request body.
#[derive(Debug, Clone, Deserialize)]
pub struct CleanupRequest {
    pub days: u32,
}

/// `POST /admin/cleanup` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanupResponse {
    pub deleted: u64,
}

/// Callback body POSTed to `callback_url` after a terminal state.
/// At-least-once: receivers must use `job_id` as an idempotency key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallbackPayload {
    pub job_id: JobId,
    pub state: JobState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<crate::result::ParsedResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<crate::error::JobError>,
}

/// Health probe detail for one dependency.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthProbe {
    pub name: String,
    pub healthy: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetailedHealth {
    pub healthy: bool,
    pub probes: Vec<HealthProbe>,
    pub version: String,
}
