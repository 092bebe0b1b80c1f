//! Uniform response envelope and error mapping.
//!
//! Every foreseeable failure maps a known `ErrorKind` to a semantic
//! status; only uncaught panics produce the opaque `server_error` 500.

use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use nutriparse_protocol::http_types::{Envelope, ErrorBody};
use nutriparse_protocol::ErrorKind;
use serde::Serialize;
use serde_json::{json, Value};

pub const REQUEST_ID_HEADER: &str = "x-request-id";

pub fn request_id(headers: &HeaderMap) -> Option<String> {
    headers
        .get(REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

#[derive(Debug, Serialize)]
struct ErrorEnvelope {
    code: u16,
    message: String,
    error: ErrorBody,
    timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    request_id: Option<String>,
}

pub fn ok<T: Serialize>(
    status: StatusCode,
    message: &str,
    data: Option<T>,
    request_id: Option<String>,
) -> Response {
    let body = Envelope {
        code: status.as_u16(),
        message: message.to_string(),
        data,
        timestamp: Utc::now().to_rfc3339(),
        request_id,
    };
    (status, Json(body)).into_response()
}

/// A handler-level failure carrying its semantic status.
#[derive(Debug, Clone)]
pub struct ApiError {
    pub status: StatusCode,
    pub kind: ErrorKind,
    pub message: String,
    pub details: Option<Value>,
    pub request_id: Option<String>,
}

impl ApiError {
    pub fn new(status: StatusCode, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            status,
            kind,
            message: message.into(),
            details: None,
            request_id: None,
        }
    }

    pub fn with_request_id(mut self, request_id: Option<String>) -> Self {
        self.request_id = request_id;
        self
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, ErrorKind::NotFound, message)
    }

    /// Map a validation rejection to its wire status: oversize is 413, the
    /// rest are 400.
    pub fn from_validation(err: nutriparse_security::ValidationError) -> Self {
        let status = match err.kind {
            ErrorKind::TooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            _ => StatusCode::BAD_REQUEST,
        };
        Self::new(status, err.kind, err.message)
    }

    /// Map a stored job error (result endpoint, sync parse) to a status.
    pub fn from_job_error(err: &nutriparse_protocol::JobError) -> Self {
        let status = match err.kind {
            ErrorKind::DeadlineExceeded => StatusCode::GATEWAY_TIMEOUT,
            ErrorKind::TooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            kind if kind.is_validation() => StatusCode::BAD_REQUEST,
            _ => StatusCode::UNPROCESSABLE_ENTITY,
        };
        let mut api = Self::new(status, err.kind, err.message.clone());
        if let Some(stage) = &err.stage {
            api = api.with_details(json!({ "stage": stage }));
        }
        api
    }

    pub fn from_store(err: nutriparse_store::StoreError) -> Self {
        match err {
            nutriparse_store::StoreError::NotFound(msg)
            | nutriparse_store::StoreError::BatchNotFound(msg) => Self::not_found(msg),
            nutriparse_store::StoreError::Conflict(msg) => {
                Self::new(StatusCode::CONFLICT, ErrorKind::ServerError, msg)
            }
            nutriparse_store::StoreError::Backend(msg) => Self::new(
                StatusCode::SERVICE_UNAVAILABLE,
                ErrorKind::StoreUnavailable,
                msg,
            ),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorEnvelope {
            code: self.status.as_u16(),
            message: self.message,
            error: ErrorBody {
                kind: self.kind,
                details: self.details,
            },
            timestamp: Utc::now().to_rfc3339(),
            request_id: self.request_id,
        };
        (self.status, Json(body)).into_response()
    }
}

/// Panic handler for the catch-panic layer: opaque 500, details only in
/// the log.
pub fn panic_response(err: Box<dyn std::any::Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = err.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    };
    tracing::error!(panic = %detail, "request handler panicked");
    ApiError::new(
        StatusCode::INTERNAL_SERVER_ERROR,
        ErrorKind::ServerError,
        "internal server error",
    )
    .into_response()
}
