//! Parse endpoints: sync, async, batch, status, result, history, cancel,
//! delete.

use axum::extract::{Multipart, Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use nutriparse_ids::JobId;
use nutriparse_parser::{CancellationToken, PipelineInput};
use nutriparse_protocol::http_types::{
    BatchAccepted, HistoryPayload, StatusPayload, SubmitAccepted, SubmitQuery,
};
use nutriparse_protocol::{ErrorKind, JobError, JobFilter, JobState, ParsingType, Priority};
use nutriparse_security::{validate, UploadInfo, UploadLimits};
use nutriparse_store::NewJob;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::envelope::{ok, request_id, ApiError};
use crate::state::AppState;

/// Owner identity for inline (sync) pipeline runs.
const SYNC_WORKER: &str = "sync-api";

/// Lease long enough to outlive any sync deadline.
const SYNC_LEASE: Duration = Duration::from_secs(300);

struct Upload {
    filename: String,
    bytes: Vec<u8>,
}

/// Pull uploads out of the multipart body. `file` for single submissions,
/// repeated `files` for batches; both spellings are accepted everywhere.
async fn read_uploads(mut multipart: Multipart) -> Result<Vec<Upload>, ApiError> {
    let mut uploads = Vec::new();
    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(err) => {
                return Err(ApiError::new(
                    StatusCode::BAD_REQUEST,
                    ErrorKind::Empty,
                    format!("malformed multipart body: {err}"),
                ))
            }
        };
        let name = field.name().unwrap_or_default().to_string();
        if name != "file" && name != "files" {
            continue;
        }
        let filename = field.file_name().unwrap_or("upload.pdf").to_string();
        let bytes = field.bytes().await.map_err(|err| {
            ApiError::new(
                StatusCode::BAD_REQUEST,
                ErrorKind::Empty,
                format!("failed to read upload: {err}"),
            )
        })?;
        uploads.push(Upload {
            filename,
            bytes: bytes.to_vec(),
        });
    }
    if uploads.is_empty() {
        return Err(ApiError::new(
            StatusCode::BAD_REQUEST,
            ErrorKind::Empty,
            "no file field in request",
        ));
    }
    Ok(uploads)
}

/// Validate, persist the blob, and create the job record (state pending).
async fn admit_upload(
    state: &AppState,
    upload: &Upload,
    info: &UploadInfo,
    parsing_type: ParsingType,
    priority: Priority,
    batch_id: Option<nutriparse_ids::BatchId>,
    callback_url: Option<String>,
) -> Result<JobId, ApiError> {
    let id = JobId::new();
    let outcome = state
        .blob
        .put(&id.as_str(), &info.sanitized_filename, &upload.bytes)
        .await
        .map_err(|err| {
            ApiError::new(
                StatusCode::SERVICE_UNAVAILABLE,
                ErrorKind::BlobIo,
                err.to_string(),
            )
        })?;

    state
        .store
        .create(NewJob {
            id: id.clone(),
            batch_id,
            filename: info.sanitized_filename.clone(),
            size_bytes: outcome.size_bytes,
            content_hash: outcome.sha256,
            blob_handle: outcome.handle,
            parsing_type,
            priority,
            callback_url,
        })
        .map_err(ApiError::from_store)?;
    Ok(id)
}

pub async fn parse_sync(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SubmitQuery>,
    headers: HeaderMap,
    multipart: Multipart,
) -> Result<Response, ApiError> {
    let rid = request_id(&headers);
    state.metrics.record_sync_parse();

    let mut uploads = read_uploads(multipart).await?;
    let upload = uploads.remove(0);
    let limits = UploadLimits::synchronous(
        state.config.max_file_size,
        state.config.max_sync_file_size,
    );
    let info = validate(&upload.bytes, &upload.filename, limits)
        .map_err(|err| ApiError::from_validation(err).with_request_id(rid.clone()))?;

    let parsing_type = query.parsing_type.unwrap_or_default();
    let id = admit_upload(
        &state,
        &upload,
        &info,
        parsing_type,
        query.priority.unwrap_or_default(),
        None,
        None,
    )
    .await
    .map_err(|err| err.with_request_id(rid.clone()))?;

    // Inline execution holds a real lease so the record obeys the same
    // lifecycle invariants as pool-processed jobs; `claim_direct` keeps it
    // out of the shared queue.
    state
        .store
        .claim_direct(&id, SYNC_WORKER, SYNC_LEASE)
        .map_err(ApiError::from_store)?;
    state
        .store
        .mark_running(&id, SYNC_WORKER)
        .map_err(ApiError::from_store)?;

    let cancel = CancellationToken::new();
    let pipeline = Arc::clone(&state.pipeline);
    let bytes = upload.bytes;
    let page_count_hint = info.page_count_hint;
    let task_cancel = cancel.clone();
    let task = tokio::task::spawn_blocking(move || {
        pipeline.run(
            PipelineInput {
                bytes: &bytes,
                parsing_type,
                page_count_hint,
            },
            &task_cancel,
            &nutriparse_parser::NullProgress,
        )
    });

    let deadline = state.config.api.sync_deadline();
    match tokio::time::timeout(deadline, task).await {
        Ok(Ok(Ok(result))) => {
            state
                .store
                .complete(&id, SYNC_WORKER, &result)
                .map_err(ApiError::from_store)?;
            info!(job_id = %id, kind = result.kind_str(), "sync parse completed");
            Ok(ok(
                StatusCode::OK,
                "parsed",
                Some(json!({ "job_id": id, "result": result })),
                rid,
            ))
        }
        Ok(Ok(Err(pipeline_err))) => {
            let job_error = pipeline_err.into_job_error();
            let _ = state.store.fail(&id, Some(SYNC_WORKER), &job_error);
            warn!(job_id = %id, error = %job_error, "sync parse failed");
            Err(ApiError::from_job_error(&job_error).with_request_id(rid))
        }
        Ok(Err(join_err)) => {
            let job_error = JobError::new(
                ErrorKind::ServerError,
                format!("pipeline task failed: {join_err}"),
            );
            let _ = state.store.fail(&id, None, &job_error);
            Err(ApiError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorKind::ServerError,
                "internal server error",
            )
            .with_request_id(rid))
        }
        Err(_elapsed) => {
            cancel.cancel();
            let job_error = JobError::new(
                ErrorKind::DeadlineExceeded,
                format!("sync parse exceeded {}s deadline", deadline.as_secs()),
            );
            let _ = state.store.fail(&id, None, &job_error);
            warn!(job_id = %id, "sync parse timed out");
            Err(ApiError::from_job_error(&job_error).with_request_id(rid))
        }
    }
}

pub async fn parse_async(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SubmitQuery>,
    headers: HeaderMap,
    multipart: Multipart,
) -> Result<Response, ApiError> {
    let rid = request_id(&headers);
    state.metrics.record_async_submission();

    let mut uploads = read_uploads(multipart).await?;
    let upload = uploads.remove(0);
    let limits = UploadLimits::asynchronous(state.config.max_file_size);
    let info = validate(&upload.bytes, &upload.filename, limits)
        .map_err(|err| ApiError::from_validation(err).with_request_id(rid.clone()))?;

    let id = admit_upload(
        &state,
        &upload,
        &info,
        query.parsing_type.unwrap_or_default(),
        query.priority.unwrap_or_default(),
        None,
        query.callback_url.clone(),
    )
    .await
    .map_err(|err| err.with_request_id(rid.clone()))?;

    state.store.enqueue(&id).map_err(ApiError::from_store)?;
    info!(job_id = %id, "async job accepted");

    Ok(ok(
        StatusCode::ACCEPTED,
        "accepted",
        Some(SubmitAccepted { job_id: id }),
        rid,
    ))
}

pub async fn parse_batch(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SubmitQuery>,
    headers: HeaderMap,
    multipart: Multipart,
) -> Result<Response, ApiError> {
    let rid = request_id(&headers);
    let uploads = read_uploads(multipart).await?;
    let limits = UploadLimits::asynchronous(state.config.max_file_size);

    // Validate everything before admitting anything, so a bad file in the
    // middle cannot leave a half-submitted batch.
    let mut admitted = Vec::with_capacity(uploads.len());
    for upload in &uploads {
        let info = validate(&upload.bytes, &upload.filename, limits).map_err(|err| {
            ApiError::from_validation(err)
                .with_details(json!({ "filename": upload.filename }))
                .with_request_id(rid.clone())
        })?;
        admitted.push(info);
    }

    let batch = state
        .store
        .create_batch(None)
        .map_err(ApiError::from_store)?;
    let parsing_type = query.parsing_type.unwrap_or_default();
    let priority = query.priority.unwrap_or_default();

    let mut job_ids = Vec::with_capacity(uploads.len());
    for (upload, info) in uploads.iter().zip(&admitted) {
        let id = admit_upload(
            &state,
            upload,
            info,
            parsing_type,
            priority,
            Some(batch.id.clone()),
            query.callback_url.clone(),
        )
        .await
        .map_err(|err| err.with_request_id(rid.clone()))?;
        state.store.enqueue(&id).map_err(ApiError::from_store)?;
        job_ids.push(id);
    }

    info!(batch_id = %batch.id, jobs = job_ids.len(), "batch accepted");
    Ok(ok(
        StatusCode::ACCEPTED,
        "accepted",
        Some(BatchAccepted {
            batch_id: batch.id,
            job_ids,
        }),
        rid,
    ))
}

fn parse_job_id(raw: &str) -> Result<JobId, ApiError> {
    JobId::parse(raw).map_err(|_| ApiError::not_found(format!("no such job: {raw}")))
}

pub async fn job_status(
    State(state): State<Arc<AppState>>,
    Path(raw_id): Path<String>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let rid = request_id(&headers);
    let id = parse_job_id(&raw_id)?;
    let job = state
        .store
        .get(&id)
        .map_err(ApiError::from_store)?
        .ok_or_else(|| ApiError::not_found(format!("no such job: {raw_id}")))?;
    Ok(ok(
        StatusCode::OK,
        "status",
        Some(StatusPayload {
            state: job.state,
            progress: job.progress,
            stage: job.stage,
        }),
        rid,
    ))
}

pub async fn job_result(
    State(state): State<Arc<AppState>>,
    Path(raw_id): Path<String>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let rid = request_id(&headers);
    let id = parse_job_id(&raw_id)?;
    let job = match state.store.get(&id).map_err(ApiError::from_store)? {
        Some(job) => job,
        None => {
            if state.store.was_deleted(&id).map_err(ApiError::from_store)? {
                return Err(ApiError::new(
                    StatusCode::GONE,
                    ErrorKind::NotFound,
                    "job was deleted",
                )
                .with_request_id(rid));
            }
            return Err(ApiError::not_found(format!("no such job: {raw_id}")));
        }
    };

    match job.state {
        JobState::Completed => Ok(ok(StatusCode::OK, "completed", job.result, rid)),
        JobState::Failed => {
            let error = job.error.unwrap_or_else(|| {
                JobError::new(ErrorKind::ServerError, "failed without recorded error")
            });
            Err(ApiError::from_job_error(&error).with_request_id(rid))
        }
        JobState::Cancelled => Err(ApiError::new(
            StatusCode::GONE,
            ErrorKind::Cancelled,
            "job was cancelled",
        )
        .with_request_id(rid)),
        _ => Ok(ok(
            StatusCode::ACCEPTED,
            "not yet completed",
            Some(StatusPayload {
                state: job.state,
                progress: job.progress,
                stage: job.stage,
            }),
            rid,
        )),
    }
}

pub async fn history(
    State(state): State<Arc<AppState>>,
    Query(filter): Query<JobFilter>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let rid = request_id(&headers);
    let (jobs, total) = state.store.list(&filter).map_err(ApiError::from_store)?;
    Ok(ok(
        StatusCode::OK,
        "history",
        Some(HistoryPayload { jobs, total }),
        rid,
    ))
}

pub async fn cancel_job(
    State(state): State<Arc<AppState>>,
    Path(raw_id): Path<String>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let rid = request_id(&headers);
    let id = parse_job_id(&raw_id)?;
    let outcome = state.store.cancel(&id).map_err(ApiError::from_store)?;
    let message = match outcome {
        nutriparse_store::CancelOutcome::Cancelled => "cancelled",
        nutriparse_store::CancelOutcome::Requested => "cancellation requested",
        nutriparse_store::CancelOutcome::AlreadyTerminal => "already terminal",
    };
    Ok(ok::<()>(StatusCode::OK, message, None, rid))
}

pub async fn delete_job(
    State(state): State<Arc<AppState>>,
    Path(raw_id): Path<String>,
) -> Result<Response, ApiError> {
    let id = parse_job_id(&raw_id)?;
    let handle = state
        .store
        .delete(&id)
        .map_err(ApiError::from_store)?
        .ok_or_else(|| ApiError::not_found(format!("no such job: {raw_id}")))?;
    if let Err(err) = state.blob.delete(&handle).await {
        // Nothing re-attempts this; the file stays behind until an
        // operator removes it.
        warn!(job_id = %id, handle = %handle, error = %err, "blob delete failed, blob orphaned on disk");
    }
    Ok(StatusCode::NO_CONTENT.into_response())
}
