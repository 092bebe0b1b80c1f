//! The `JobStore` contract shared by the SQLite and in-memory backends.

use chrono::Utc;
use nutriparse_ids::{BatchId, JobId};
use nutriparse_protocol::{
    Batch, JobError, JobFilter, JobRecord, JobState, ParsedResult, ParsingType, Priority,
};
use std::time::Duration;
use thiserror::Error;

/// Store clock: epoch milliseconds. All job timestamps come from here.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("job not found: {0}")]
    NotFound(String),
    #[error("batch not found: {0}")]
    BatchNotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("store backend error: {0}")]
    Backend(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        StoreError::Backend(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Backend(err.to_string())
    }
}

/// Inputs for creating a job record. The id is caller-minted so the blob
/// can be stored under the job id before the record exists.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub id: JobId,
    pub batch_id: Option<BatchId>,
    pub filename: String,
    pub size_bytes: u64,
    pub content_hash: String,
    pub blob_handle: String,
    pub parsing_type: ParsingType,
    pub priority: Priority,
    pub callback_url: Option<String>,
}

/// Result of an owner-guarded write: either it applied, or the caller no
/// longer holds the lease (expired, swept, or taken over).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OwnerOutcome {
    Applied,
    Lost,
}

impl OwnerOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, OwnerOutcome::Applied)
    }
}

/// Result of a cancellation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// Job was pending/queued and is now terminally cancelled.
    Cancelled,
    /// Job is held by a worker; the cancel bit is set and will be observed
    /// at the next stage boundary.
    Requested,
    /// Job was already in a terminal state; nothing to do.
    AlreadyTerminal,
}

/// What one sweeper pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Expired leases returned to the queue.
    pub requeued: usize,
    /// Jobs failed with `exhausted_retries`.
    pub exhausted: usize,
}

/// Aggregate statistics over a time window.
#[derive(Debug, Clone, Default)]
pub struct StoreStats {
    pub by_state: Vec<(JobState, u64)>,
    pub total: u64,
    /// completed / (completed + failed); 1.0 when nothing finished yet.
    pub success_rate: f64,
    /// Mean wall-clock duration of completed jobs, milliseconds.
    pub avg_duration_ms: f64,
}

impl StoreStats {
    pub fn count(&self, state: JobState) -> u64 {
        self.by_state
            .iter()
            .find(|(s, _)| *s == state)
            .map(|(_, n)| *n)
            .unwrap_or(0)
    }
}

/// The one store contract. All operations are atomic per job id; writes on
/// leased jobs are guarded by the owning worker id so a worker that lost
/// its lease cannot clobber a reassigned job.
pub trait JobStore: Send + Sync {
    /// Insert a new record in state `pending`.
    fn create(&self, job: NewJob) -> Result<JobRecord, StoreError>;

    fn get(&self, id: &JobId) -> Result<Option<JobRecord>, StoreError>;

    /// Compare-and-swap on state: `pending → queued`. Fails closed: if the
    /// job is not pending the queue is left untouched.
    fn enqueue(&self, id: &JobId) -> Result<(), StoreError>;

    /// Generic guarded transition; returns false on conflict.
    fn transition(
        &self,
        id: &JobId,
        from: &[JobState],
        to: JobState,
    ) -> Result<bool, StoreError>;

    /// Claim a specific pending job without it ever entering the shared
    /// ready-queue: `pending → leased`. The sync parse path uses this so
    /// pool workers can never race it for the upload it is about to parse
    /// inline. Increments `attempts`.
    fn claim_direct(
        &self,
        id: &JobId,
        worker_id: &str,
        duration: Duration,
    ) -> Result<OwnerOutcome, StoreError>;

    /// Atomically take the highest-priority ready job: `queued → leased`,
    /// ordered by (priority desc, created_at asc, id asc), restricted to
    /// jobs whose retry delay has elapsed. Increments `attempts`.
    fn lease(&self, worker_id: &str, duration: Duration)
        -> Result<Option<JobRecord>, StoreError>;

    /// Extend the lease deadline; `Lost` if the worker no longer owns it.
    fn renew(
        &self,
        id: &JobId,
        worker_id: &str,
        duration: Duration,
    ) -> Result<OwnerOutcome, StoreError>;

    /// `leased → running`, records `started_at`. Owner-guarded.
    fn mark_running(&self, id: &JobId, worker_id: &str) -> Result<OwnerOutcome, StoreError>;

    /// Progress write; only applies while the job is leased/running, and
    /// the stored percent never decreases.
    fn update_progress(&self, id: &JobId, stage: &str, percent: u8) -> Result<(), StoreError>;

    /// `running → completed` with the result document. Owner-guarded.
    fn complete(
        &self,
        id: &JobId,
        worker_id: &str,
        result: &ParsedResult,
    ) -> Result<OwnerOutcome, StoreError>;

    /// Terminal failure. With `worker_id` the write is owner-guarded; the
    /// sweeper and the sync path pass `None` to force the transition.
    fn fail(
        &self,
        id: &JobId,
        worker_id: Option<&str>,
        error: &JobError,
    ) -> Result<OwnerOutcome, StoreError>;

    /// Cooperative failure: back to `queued` with a re-lease delay.
    /// Increments `attempts`. Owner-guarded.
    fn nack(
        &self,
        id: &JobId,
        worker_id: &str,
        retry_delay: Duration,
    ) -> Result<OwnerOutcome, StoreError>;

    /// Worker observed the cancel bit: `leased|running → cancelled`.
    fn mark_cancelled(&self, id: &JobId, worker_id: &str) -> Result<OwnerOutcome, StoreError>;

    /// Cancel from the API: direct for pending/queued, cooperative for
    /// held jobs.
    fn cancel(&self, id: &JobId) -> Result<CancelOutcome, StoreError>;

    /// Whether cancellation has been requested for a held job.
    fn cancel_requested(&self, id: &JobId) -> Result<bool, StoreError>;

    /// Return expired leases to the queue; fail jobs past `max_attempts`
    /// with `exhausted_retries`. Increments `attempts` on requeue.
    fn sweep_expired(&self, max_attempts: u32) -> Result<SweepReport, StoreError>;

    /// Filtered listing ordered by created_at descending, plus the total
    /// match count for paging.
    fn list(&self, filter: &JobFilter) -> Result<(Vec<JobRecord>, u64), StoreError>;

    /// Delete a job from any state. Returns the blob handle so the caller
    /// can schedule blob deletion. Leaves a tombstone so reads can answer
    /// "gone" rather than "never existed".
    fn delete(&self, id: &JobId) -> Result<Option<String>, StoreError>;

    /// Whether the id belonged to a job that was deleted.
    fn was_deleted(&self, id: &JobId) -> Result<bool, StoreError>;

    /// Aggregates over jobs created at or after `since_ms` (all jobs when
    /// `None`).
    fn stats(&self, since_ms: Option<i64>) -> Result<StoreStats, StoreError>;

    /// Bulk-delete terminal jobs finished before `older_than_ms` whose
    /// state is in `states`. Returns the orphaned blob handles.
    fn cleanup(
        &self,
        older_than_ms: i64,
        states: &[JobState],
    ) -> Result<Vec<String>, StoreError>;

    fn create_batch(&self, description: Option<String>) -> Result<Batch, StoreError>;

    fn get_batch(&self, id: &BatchId) -> Result<Option<Batch>, StoreError>;

    fn batch_jobs(&self, id: &BatchId) -> Result<Vec<JobRecord>, StoreError>;

    /// Liveness probe for health checks.
    fn ping(&self) -> Result<(), StoreError>;
}
