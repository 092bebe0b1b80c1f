//! SQLite-backed job store.
//!
//! Queue ordering and lease claims are single UPDATE statements with a
//! nested SELECT, so concurrent workers on the same database never double-
//! claim a job. Owner-guarded writes carry `lease_owner` in the WHERE
//! clause; a stale worker's write simply matches zero rows.

use nutriparse_ids::{BatchId, JobId};
use nutriparse_protocol::{
    Batch, ErrorKind, JobError, JobFilter, JobRecord, JobState, ParsedResult, Priority,
};
use rusqlite::{params, params_from_iter, types::Value, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;
use tracing::debug;

use crate::store::{
    now_millis, CancelOutcome, JobStore, NewJob, OwnerOutcome, StoreError, StoreStats,
    SweepReport,
};

const JOB_COLUMNS: &str = "id, batch_id, filename, size_bytes, content_hash, blob_handle, \
     parsing_type, priority, state, progress, stage, attempts, lease_owner, lease_deadline, \
     cancel_requested, callback_url, scheduled_at, created_at, updated_at, started_at, \
     finished_at, result_json, error_json";

pub struct SqliteJobStore {
    conn: Mutex<Connection>,
}

impl SqliteJobStore {
    /// Open (and initialize) a store at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        // Both pragmas return a result row; execute_batch discards it.
        conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA busy_timeout = 5000;")?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Private on-disk-free store, used by tests and `:memory:` configs.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<(), StoreError> {
        let state_values = JobState::ALL
            .iter()
            .map(|s| format!("'{}'", s.as_str()))
            .collect::<Vec<_>>()
            .join(",");
        let sql = format!(
            r#"
            CREATE TABLE IF NOT EXISTS np_jobs (
                id TEXT PRIMARY KEY,
                batch_id TEXT,
                filename TEXT NOT NULL,
                size_bytes INTEGER NOT NULL,
                content_hash TEXT NOT NULL,
                blob_handle TEXT NOT NULL,
                parsing_type TEXT NOT NULL,
                priority INTEGER NOT NULL DEFAULT 1,
                state TEXT NOT NULL DEFAULT 'pending'
                    CHECK (state IN ({state_values})),
                progress INTEGER NOT NULL DEFAULT 0
                    CHECK (progress BETWEEN 0 AND 100),
                stage TEXT,
                attempts INTEGER NOT NULL DEFAULT 0,
                lease_owner TEXT,
                lease_deadline INTEGER,
                cancel_requested INTEGER NOT NULL DEFAULT 0,
                callback_url TEXT,
                scheduled_at INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                started_at INTEGER,
                finished_at INTEGER,
                result_json TEXT,
                error_json TEXT
            );
            CREATE INDEX IF NOT EXISTS ix_jobs_dispatch
                ON np_jobs(state, priority, created_at);
            CREATE INDEX IF NOT EXISTS ix_jobs_created ON np_jobs(created_at);
            CREATE INDEX IF NOT EXISTS ix_jobs_batch ON np_jobs(batch_id);

            CREATE TABLE IF NOT EXISTS np_batches (
                id TEXT PRIMARY KEY,
                description TEXT,
                created_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS np_tombstones (
                id TEXT PRIMARY KEY,
                deleted_at INTEGER NOT NULL
            );
            "#,
        );
        let conn = self.lock();
        conn.execute_batch(&sql)?;
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn conversion_err(msg: impl Into<String>) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        0,
        rusqlite::types::Type::Text,
        msg.into().into(),
    )
}

fn job_from_row(row: &Row<'_>) -> rusqlite::Result<JobRecord> {
    let id: String = row.get("id")?;
    let id = JobId::parse(&id).map_err(|e| conversion_err(e.to_string()))?;
    let batch_id: Option<String> = row.get("batch_id")?;
    let batch_id = batch_id
        .map(|b| BatchId::parse(&b).map_err(|e| conversion_err(e.to_string())))
        .transpose()?;
    let parsing_type: String = row.get("parsing_type")?;
    let parsing_type = parsing_type.parse().map_err(conversion_err)?;
    let priority: i64 = row.get("priority")?;
    let priority = Priority::from_rank(priority)
        .ok_or_else(|| conversion_err(format!("invalid priority rank {priority}")))?;
    let state: String = row.get("state")?;
    let state = state.parse().map_err(conversion_err)?;
    let progress: i64 = row.get("progress")?;
    let attempts: i64 = row.get("attempts")?;
    let cancel_requested: i64 = row.get("cancel_requested")?;
    let result_json: Option<String> = row.get("result_json")?;
    let result = result_json
        .map(|json| {
            serde_json::from_str::<ParsedResult>(&json)
                .map_err(|e| conversion_err(e.to_string()))
        })
        .transpose()?;
    let error_json: Option<String> = row.get("error_json")?;
    let error = error_json
        .map(|json| {
            serde_json::from_str::<JobError>(&json).map_err(|e| conversion_err(e.to_string()))
        })
        .transpose()?;

    Ok(JobRecord {
        id,
        batch_id,
        filename: row.get("filename")?,
        size_bytes: row.get::<_, i64>("size_bytes")? as u64,
        content_hash: row.get("content_hash")?,
        blob_handle: row.get("blob_handle")?,
        parsing_type,
        priority,
        state,
        progress: progress.clamp(0, 100) as u8,
        stage: row.get("stage")?,
        attempts: attempts.max(0) as u32,
        lease_owner: row.get("lease_owner")?,
        lease_deadline: row.get("lease_deadline")?,
        cancel_requested: cancel_requested != 0,
        callback_url: row.get("callback_url")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
        started_at: row.get("started_at")?,
        finished_at: row.get("finished_at")?,
        result,
        error,
    })
}

impl JobStore for SqliteJobStore {
    fn create(&self, job: NewJob) -> Result<JobRecord, StoreError> {
        let now = now_millis();
        let conn = self.lock();
        conn.execute(
            r#"
            INSERT INTO np_jobs
                (id, batch_id, filename, size_bytes, content_hash, blob_handle,
                 parsing_type, priority, state, callback_url, scheduled_at,
                 created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 'pending', ?9, 0, ?10, ?10)
            "#,
            params![
                job.id.as_str(),
                job.batch_id.as_ref().map(|b| b.as_str()),
                job.filename,
                job.size_bytes as i64,
                job.content_hash,
                job.blob_handle,
                job.parsing_type.as_str(),
                job.priority.rank(),
                job.callback_url,
                now,
            ],
        )?;
        let record = conn
            .query_row(
                &format!("SELECT {JOB_COLUMNS} FROM np_jobs WHERE id = ?1"),
                params![job.id.as_str()],
                job_from_row,
            )?;
        Ok(record)
    }

    fn get(&self, id: &JobId) -> Result<Option<JobRecord>, StoreError> {
        let conn = self.lock();
        let record = conn
            .query_row(
                &format!("SELECT {JOB_COLUMNS} FROM np_jobs WHERE id = ?1"),
                params![id.as_str()],
                job_from_row,
            )
            .optional()?;
        Ok(record)
    }

    fn enqueue(&self, id: &JobId) -> Result<(), StoreError> {
        let now = now_millis();
        let conn = self.lock();
        let changed = conn.execute(
            r#"
            UPDATE np_jobs
            SET state = 'queued', scheduled_at = ?1,
                updated_at = MAX(?1, updated_at + 1)
            WHERE id = ?2 AND state = 'pending'
            "#,
            params![now, id.as_str()],
        )?;
        if changed == 0 {
            return Err(StoreError::Conflict(format!(
                "job {} is not pending, cannot enqueue",
                id
            )));
        }
        Ok(())
    }

    fn transition(
        &self,
        id: &JobId,
        from: &[JobState],
        to: JobState,
    ) -> Result<bool, StoreError> {
        if from.is_empty() {
            return Ok(false);
        }
        let now = now_millis();
        let from_values = from
            .iter()
            .map(|s| format!("'{}'", s.as_str()))
            .collect::<Vec<_>>()
            .join(",");
        let conn = self.lock();
        let changed = conn.execute(
            &format!(
                "UPDATE np_jobs SET state = ?1, updated_at = MAX(?2, updated_at + 1) \
                 WHERE id = ?3 AND state IN ({from_values})"
            ),
            params![to.as_str(), now, id.as_str()],
        )?;
        Ok(changed == 1)
    }

    fn claim_direct(
        &self,
        id: &JobId,
        worker_id: &str,
        duration: Duration,
    ) -> Result<OwnerOutcome, StoreError> {
        let now = now_millis();
        let deadline = now + duration.as_millis() as i64;
        let conn = self.lock();
        let changed = conn.execute(
            r#"
            UPDATE np_jobs
            SET state = 'leased', lease_owner = ?1, lease_deadline = ?2,
                attempts = attempts + 1,
                updated_at = MAX(?3, updated_at + 1)
            WHERE id = ?4 AND state = 'pending'
            "#,
            params![worker_id, deadline, now, id.as_str()],
        )?;
        Ok(owner_outcome(changed))
    }

    fn lease(
        &self,
        worker_id: &str,
        duration: Duration,
    ) -> Result<Option<JobRecord>, StoreError> {
        let now = now_millis();
        let deadline = now + duration.as_millis() as i64;
        let conn = self.lock();
        let record = conn
            .query_row(
                &format!(
                    r#"
                    UPDATE np_jobs
                    SET state = 'leased', lease_owner = ?1, lease_deadline = ?2,
                        attempts = attempts + 1,
                        updated_at = MAX(?3, updated_at + 1)
                    WHERE id = (
                        SELECT id FROM np_jobs
                        WHERE state = 'queued' AND scheduled_at <= ?3
                        ORDER BY priority DESC, created_at ASC, id ASC
                        LIMIT 1
                    )
                    RETURNING {JOB_COLUMNS}
                    "#
                ),
                params![worker_id, deadline, now],
                job_from_row,
            )
            .optional()?;
        if let Some(job) = &record {
            debug!(job_id = %job.id, worker_id, "leased job");
        }
        Ok(record)
    }

    fn renew(
        &self,
        id: &JobId,
        worker_id: &str,
        duration: Duration,
    ) -> Result<OwnerOutcome, StoreError> {
        let now = now_millis();
        let deadline = now + duration.as_millis() as i64;
        let conn = self.lock();
        let changed = conn.execute(
            r#"
            UPDATE np_jobs
            SET lease_deadline = ?1, updated_at = MAX(?2, updated_at + 1)
            WHERE id = ?3 AND lease_owner = ?4 AND state IN ('leased', 'running')
            "#,
            params![deadline, now, id.as_str(), worker_id],
        )?;
        Ok(owner_outcome(changed))
    }

    fn mark_running(&self, id: &JobId, worker_id: &str) -> Result<OwnerOutcome, StoreError> {
        let now = now_millis();
        let conn = self.lock();
        let changed = conn.execute(
            r#"
            UPDATE np_jobs
            SET state = 'running', started_at = COALESCE(started_at, ?1),
                updated_at = MAX(?1, updated_at + 1)
            WHERE id = ?2 AND lease_owner = ?3 AND state = 'leased'
            "#,
            params![now, id.as_str(), worker_id],
        )?;
        Ok(owner_outcome(changed))
    }

    fn update_progress(&self, id: &JobId, stage: &str, percent: u8) -> Result<(), StoreError> {
        // 100 is reserved for terminal completed/failed writes.
        let percent = percent.min(99) as i64;
        let now = now_millis();
        let conn = self.lock();
        conn.execute(
            r#"
            UPDATE np_jobs
            SET progress = MAX(progress, ?1), stage = ?2,
                updated_at = MAX(?3, updated_at + 1)
            WHERE id = ?4 AND state IN ('leased', 'running')
            "#,
            params![percent, stage, now, id.as_str()],
        )?;
        Ok(())
    }

    fn complete(
        &self,
        id: &JobId,
        worker_id: &str,
        result: &ParsedResult,
    ) -> Result<OwnerOutcome, StoreError> {
        let now = now_millis();
        let json = serde_json::to_string(result)?;
        let conn = self.lock();
        let changed = conn.execute(
            r#"
            UPDATE np_jobs
            SET state = 'completed', progress = 100, stage = 'commit',
                result_json = ?1, finished_at = ?2,
                lease_owner = NULL, lease_deadline = NULL,
                updated_at = MAX(?2, updated_at + 1)
            WHERE id = ?3 AND lease_owner = ?4 AND state = 'running'
            "#,
            params![json, now, id.as_str(), worker_id],
        )?;
        Ok(owner_outcome(changed))
    }

    fn fail(
        &self,
        id: &JobId,
        worker_id: Option<&str>,
        error: &JobError,
    ) -> Result<OwnerOutcome, StoreError> {
        let now = now_millis();
        let json = serde_json::to_string(error)?;
        let conn = self.lock();
        let changed = match worker_id {
            Some(worker) => conn.execute(
                r#"
                UPDATE np_jobs
                SET state = 'failed', progress = 100, error_json = ?1,
                    finished_at = ?2, lease_owner = NULL, lease_deadline = NULL,
                    updated_at = MAX(?2, updated_at + 1)
                WHERE id = ?3 AND lease_owner = ?4 AND state IN ('leased', 'running')
                "#,
                params![json, now, id.as_str(), worker],
            )?,
            None => conn.execute(
                r#"
                UPDATE np_jobs
                SET state = 'failed', progress = 100, error_json = ?1,
                    finished_at = ?2, lease_owner = NULL, lease_deadline = NULL,
                    updated_at = MAX(?2, updated_at + 1)
                WHERE id = ?3 AND state NOT IN ('completed', 'failed', 'cancelled')
                "#,
                params![json, now, id.as_str()],
            )?,
        };
        Ok(owner_outcome(changed))
    }

    fn nack(
        &self,
        id: &JobId,
        worker_id: &str,
        retry_delay: Duration,
    ) -> Result<OwnerOutcome, StoreError> {
        let now = now_millis();
        let scheduled_at = now + retry_delay.as_millis() as i64;
        let conn = self.lock();
        let changed = conn.execute(
            r#"
            UPDATE np_jobs
            SET state = 'queued', lease_owner = NULL, lease_deadline = NULL,
                attempts = attempts + 1, scheduled_at = ?1,
                updated_at = MAX(?2, updated_at + 1)
            WHERE id = ?3 AND lease_owner = ?4 AND state IN ('leased', 'running')
            "#,
            params![scheduled_at, now, id.as_str(), worker_id],
        )?;
        Ok(owner_outcome(changed))
    }

    fn mark_cancelled(&self, id: &JobId, worker_id: &str) -> Result<OwnerOutcome, StoreError> {
        let now = now_millis();
        let conn = self.lock();
        let changed = conn.execute(
            r#"
            UPDATE np_jobs
            SET state = 'cancelled', finished_at = ?1,
                lease_owner = NULL, lease_deadline = NULL,
                updated_at = MAX(?1, updated_at + 1)
            WHERE id = ?2 AND lease_owner = ?3 AND state IN ('leased', 'running')
            "#,
            params![now, id.as_str(), worker_id],
        )?;
        Ok(owner_outcome(changed))
    }

    fn cancel(&self, id: &JobId) -> Result<CancelOutcome, StoreError> {
        let now = now_millis();
        let conn = self.lock();
        let direct = conn.execute(
            r#"
            UPDATE np_jobs
            SET state = 'cancelled', finished_at = ?1,
                updated_at = MAX(?1, updated_at + 1)
            WHERE id = ?2 AND state IN ('pending', 'queued')
            "#,
            params![now, id.as_str()],
        )?;
        if direct == 1 {
            return Ok(CancelOutcome::Cancelled);
        }

        let requested = conn.execute(
            r#"
            UPDATE np_jobs
            SET cancel_requested = 1, updated_at = MAX(?1, updated_at + 1)
            WHERE id = ?2 AND state IN ('leased', 'running')
            "#,
            params![now, id.as_str()],
        )?;
        if requested == 1 {
            return Ok(CancelOutcome::Requested);
        }

        let exists: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM np_jobs WHERE id = ?1",
                params![id.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        match exists {
            Some(_) => Ok(CancelOutcome::AlreadyTerminal),
            None => Err(StoreError::NotFound(id.to_string())),
        }
    }

    fn cancel_requested(&self, id: &JobId) -> Result<bool, StoreError> {
        let conn = self.lock();
        let flag: Option<i64> = conn
            .query_row(
                "SELECT cancel_requested FROM np_jobs WHERE id = ?1",
                params![id.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(flag.unwrap_or(0) != 0)
    }

    fn sweep_expired(&self, max_attempts: u32) -> Result<SweepReport, StoreError> {
        let now = now_millis();
        let conn = self.lock();
        let requeued = conn.execute(
            r#"
            UPDATE np_jobs
            SET state = 'queued', lease_owner = NULL, lease_deadline = NULL,
                attempts = attempts + 1, scheduled_at = ?1,
                updated_at = MAX(?1, updated_at + 1)
            WHERE state IN ('leased', 'running') AND lease_deadline < ?1
            "#,
            params![now],
        )?;

        let exhausted_error = JobError::new(
            ErrorKind::ExhaustedRetries,
            format!("gave up after {} lease attempts", max_attempts),
        );
        let json = serde_json::to_string(&exhausted_error)?;
        let exhausted = conn.execute(
            r#"
            UPDATE np_jobs
            SET state = 'failed', progress = 100, error_json = ?1,
                finished_at = ?2, updated_at = MAX(?2, updated_at + 1)
            WHERE state = 'queued' AND attempts > ?3
            "#,
            params![json, now, max_attempts as i64],
        )?;

        Ok(SweepReport {
            requeued,
            exhausted,
        })
    }

    fn list(&self, filter: &JobFilter) -> Result<(Vec<JobRecord>, u64), StoreError> {
        let mut conditions: Vec<&str> = Vec::new();
        let mut values: Vec<Value> = Vec::new();

        if let Some(state) = filter.state {
            conditions.push("state = ?");
            values.push(Value::Text(state.as_str().to_string()));
        }
        if let Some(parsing_type) = filter.parsing_type {
            conditions.push("parsing_type = ?");
            values.push(Value::Text(parsing_type.as_str().to_string()));
        }
        if let Some(batch_id) = &filter.batch_id {
            conditions.push("batch_id = ?");
            values.push(Value::Text(batch_id.as_str()));
        }
        if let Some(after) = filter.created_after {
            conditions.push("created_at >= ?");
            values.push(Value::Integer(after));
        }
        if let Some(before) = filter.created_before {
            conditions.push("created_at < ?");
            values.push(Value::Integer(before));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        let conn = self.lock();
        let total: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM np_jobs {where_clause}"),
            params_from_iter(values.iter()),
            |row| row.get(0),
        )?;

        let limit = filter.page_size_clamped() as i64;
        let offset = filter.offset() as i64;
        let mut stmt = conn.prepare(&format!(
            "SELECT {JOB_COLUMNS} FROM np_jobs {where_clause} \
             ORDER BY created_at DESC, id DESC LIMIT {limit} OFFSET {offset}"
        ))?;
        let jobs = stmt
            .query_map(params_from_iter(values.iter()), job_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok((jobs, total.max(0) as u64))
    }

    fn delete(&self, id: &JobId) -> Result<Option<String>, StoreError> {
        let conn = self.lock();
        let handle: Option<String> = conn
            .query_row(
                "DELETE FROM np_jobs WHERE id = ?1 RETURNING blob_handle",
                params![id.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        if handle.is_some() {
            conn.execute(
                "INSERT OR IGNORE INTO np_tombstones (id, deleted_at) VALUES (?1, ?2)",
                params![id.as_str(), now_millis()],
            )?;
        }
        Ok(handle)
    }

    fn was_deleted(&self, id: &JobId) -> Result<bool, StoreError> {
        let conn = self.lock();
        let hit: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM np_tombstones WHERE id = ?1",
                params![id.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(hit.is_some())
    }

    fn stats(&self, since_ms: Option<i64>) -> Result<StoreStats, StoreError> {
        let since = since_ms.unwrap_or(0);
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT state, COUNT(*) FROM np_jobs WHERE created_at >= ?1 GROUP BY state",
        )?;
        let by_state = stmt
            .query_map(params![since], |row| {
                let state: String = row.get(0)?;
                let count: i64 = row.get(1)?;
                Ok((state, count))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut stats = StoreStats::default();
        for (state, count) in by_state {
            let state = state
                .parse::<JobState>()
                .map_err(StoreError::Backend)?;
            stats.total += count.max(0) as u64;
            stats.by_state.push((state, count.max(0) as u64));
        }

        let completed = stats.count(JobState::Completed);
        let failed = stats.count(JobState::Failed);
        stats.success_rate = if completed + failed == 0 {
            1.0
        } else {
            completed as f64 / (completed + failed) as f64
        };

        let avg: Option<f64> = conn.query_row(
            "SELECT AVG(finished_at - started_at) FROM np_jobs \
             WHERE state = 'completed' AND started_at IS NOT NULL \
               AND finished_at IS NOT NULL AND created_at >= ?1",
            params![since],
            |row| row.get(0),
        )?;
        stats.avg_duration_ms = avg.unwrap_or(0.0);

        Ok(stats)
    }

    fn cleanup(
        &self,
        older_than_ms: i64,
        states: &[JobState],
    ) -> Result<Vec<String>, StoreError> {
        if states.is_empty() {
            return Ok(Vec::new());
        }
        let state_values = states
            .iter()
            .map(|s| format!("'{}'", s.as_str()))
            .collect::<Vec<_>>()
            .join(",");
        let conn = self.lock();
        let mut stmt = conn.prepare(&format!(
            "DELETE FROM np_jobs \
             WHERE state IN ({state_values}) AND finished_at IS NOT NULL \
               AND finished_at < ?1 \
             RETURNING id, blob_handle"
        ))?;
        let rows = stmt
            .query_map(params![older_than_ms], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        drop(stmt);

        let now = now_millis();
        let mut handles = Vec::with_capacity(rows.len());
        for (id, handle) in rows {
            conn.execute(
                "INSERT OR IGNORE INTO np_tombstones (id, deleted_at) VALUES (?1, ?2)",
                params![id, now],
            )?;
            handles.push(handle);
        }
        Ok(handles)
    }

    fn create_batch(&self, description: Option<String>) -> Result<Batch, StoreError> {
        let batch = Batch {
            id: BatchId::new(),
            description,
            created_at: now_millis(),
        };
        let conn = self.lock();
        conn.execute(
            "INSERT INTO np_batches (id, description, created_at) VALUES (?1, ?2, ?3)",
            params![batch.id.as_str(), batch.description, batch.created_at],
        )?;
        Ok(batch)
    }

    fn get_batch(&self, id: &BatchId) -> Result<Option<Batch>, StoreError> {
        let conn = self.lock();
        let batch = conn
            .query_row(
                "SELECT id, description, created_at FROM np_batches WHERE id = ?1",
                params![id.as_str()],
                |row| {
                    let raw: String = row.get(0)?;
                    let id =
                        BatchId::parse(&raw).map_err(|e| conversion_err(e.to_string()))?;
                    Ok(Batch {
                        id,
                        description: row.get(1)?,
                        created_at: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(batch)
    }

    fn batch_jobs(&self, id: &BatchId) -> Result<Vec<JobRecord>, StoreError> {
        let conn = self.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {JOB_COLUMNS} FROM np_jobs WHERE batch_id = ?1 \
             ORDER BY created_at ASC, id ASC"
        ))?;
        let jobs = stmt
            .query_map(params![id.as_str()], job_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(jobs)
    }

    fn ping(&self) -> Result<(), StoreError> {
        let conn = self.lock();
        conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
        Ok(())
    }
}

fn owner_outcome(changed: usize) -> OwnerOutcome {
    if changed == 1 {
        OwnerOutcome::Applied
    } else {
        OwnerOutcome::Lost
    }
}
