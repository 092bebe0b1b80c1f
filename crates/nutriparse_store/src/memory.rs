//! In-memory job store used by tests and the `:memory:` configuration.
//!
//! Mirrors the SQLite backend's semantics exactly, including lease
//! ordering, owner guards, and the monotonic `updated_at` bump. Maps are
//! keyed by the id types themselves.

use nutriparse_ids::{BatchId, JobId};
use nutriparse_protocol::{
    Batch, ErrorKind, JobError, JobFilter, JobRecord, JobState, ParsedResult,
};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use crate::store::{
    now_millis, CancelOutcome, JobStore, NewJob, OwnerOutcome, StoreError, StoreStats,
    SweepReport,
};

#[derive(Default)]
struct Inner {
    jobs: HashMap<JobId, JobRecord>,
    /// Earliest lease time per job id (retry backoff); not part of the
    /// public record.
    scheduled_at: HashMap<JobId, i64>,
    batches: HashMap<BatchId, Batch>,
    tombstones: HashSet<JobId>,
}

#[derive(Default)]
pub struct MemoryJobStore {
    inner: Mutex<Inner>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn touch(job: &mut JobRecord, now: i64) {
    job.updated_at = now.max(job.updated_at + 1);
}

impl JobStore for MemoryJobStore {
    fn create(&self, job: NewJob) -> Result<JobRecord, StoreError> {
        let now = now_millis();
        let record = JobRecord {
            id: job.id,
            batch_id: job.batch_id,
            filename: job.filename,
            size_bytes: job.size_bytes,
            content_hash: job.content_hash,
            blob_handle: job.blob_handle,
            parsing_type: job.parsing_type,
            priority: job.priority,
            state: JobState::Pending,
            progress: 0,
            stage: None,
            attempts: 0,
            lease_owner: None,
            lease_deadline: None,
            cancel_requested: false,
            callback_url: job.callback_url,
            created_at: now,
            updated_at: now,
            started_at: None,
            finished_at: None,
            result: None,
            error: None,
        };
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.jobs.insert(job.id, record.clone());
        inner.scheduled_at.insert(job.id, 0);
        Ok(record)
    }

    fn get(&self, id: &JobId) -> Result<Option<JobRecord>, StoreError> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        Ok(inner.jobs.get(id).cloned())
    }

    fn enqueue(&self, id: &JobId) -> Result<(), StoreError> {
        let now = now_millis();
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let job = inner
            .jobs
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        if job.state != JobState::Pending {
            return Err(StoreError::Conflict(format!(
                "job {} is not pending, cannot enqueue",
                id
            )));
        }
        job.state = JobState::Queued;
        touch(job, now);
        inner.scheduled_at.insert(*id, now);
        Ok(())
    }

    fn transition(
        &self,
        id: &JobId,
        from: &[JobState],
        to: JobState,
    ) -> Result<bool, StoreError> {
        let now = now_millis();
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let Some(job) = inner.jobs.get_mut(id) else {
            return Ok(false);
        };
        if !from.contains(&job.state) {
            return Ok(false);
        }
        job.state = to;
        touch(job, now);
        Ok(true)
    }

    fn claim_direct(
        &self,
        id: &JobId,
        worker_id: &str,
        duration: Duration,
    ) -> Result<OwnerOutcome, StoreError> {
        let now = now_millis();
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let Some(job) = inner.jobs.get_mut(id) else {
            return Ok(OwnerOutcome::Lost);
        };
        if job.state != JobState::Pending {
            return Ok(OwnerOutcome::Lost);
        }
        job.state = JobState::Leased;
        job.lease_owner = Some(worker_id.to_string());
        job.lease_deadline = Some(now + duration.as_millis() as i64);
        job.attempts += 1;
        touch(job, now);
        Ok(OwnerOutcome::Applied)
    }

    fn lease(
        &self,
        worker_id: &str,
        duration: Duration,
    ) -> Result<Option<JobRecord>, StoreError> {
        let now = now_millis();
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());

        let mut candidate: Option<(i64, i64, JobId)> = None;
        for (key, job) in &inner.jobs {
            if job.state != JobState::Queued {
                continue;
            }
            if inner.scheduled_at.get(key).copied().unwrap_or(0) > now {
                continue;
            }
            // Highest priority first; within a class, oldest first; id as
            // the final tiebreaker for determinism.
            let entry = (-job.priority.rank(), job.created_at, *key);
            if candidate.as_ref().map(|best| entry < *best).unwrap_or(true) {
                candidate = Some(entry);
            }
        }

        let Some((_, _, key)) = candidate else {
            return Ok(None);
        };
        let job = inner
            .jobs
            .get_mut(&key)
            .ok_or_else(|| StoreError::Backend("lease candidate vanished".to_string()))?;
        job.state = JobState::Leased;
        job.lease_owner = Some(worker_id.to_string());
        job.lease_deadline = Some(now + duration.as_millis() as i64);
        job.attempts += 1;
        touch(job, now);
        Ok(Some(job.clone()))
    }

    fn renew(
        &self,
        id: &JobId,
        worker_id: &str,
        duration: Duration,
    ) -> Result<OwnerOutcome, StoreError> {
        let now = now_millis();
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let Some(job) = inner.jobs.get_mut(id) else {
            return Ok(OwnerOutcome::Lost);
        };
        if !job.state.is_held() || job.lease_owner.as_deref() != Some(worker_id) {
            return Ok(OwnerOutcome::Lost);
        }
        job.lease_deadline = Some(now + duration.as_millis() as i64);
        touch(job, now);
        Ok(OwnerOutcome::Applied)
    }

    fn mark_running(&self, id: &JobId, worker_id: &str) -> Result<OwnerOutcome, StoreError> {
        let now = now_millis();
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let Some(job) = inner.jobs.get_mut(id) else {
            return Ok(OwnerOutcome::Lost);
        };
        if job.state != JobState::Leased || job.lease_owner.as_deref() != Some(worker_id) {
            return Ok(OwnerOutcome::Lost);
        }
        job.state = JobState::Running;
        job.started_at.get_or_insert(now);
        touch(job, now);
        Ok(OwnerOutcome::Applied)
    }

    fn update_progress(&self, id: &JobId, stage: &str, percent: u8) -> Result<(), StoreError> {
        let now = now_millis();
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let Some(job) = inner.jobs.get_mut(id) else {
            return Ok(());
        };
        if !job.state.is_held() {
            return Ok(());
        }
        job.progress = job.progress.max(percent.min(99));
        job.stage = Some(stage.to_string());
        touch(job, now);
        Ok(())
    }

    fn complete(
        &self,
        id: &JobId,
        worker_id: &str,
        result: &ParsedResult,
    ) -> Result<OwnerOutcome, StoreError> {
        let now = now_millis();
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let Some(job) = inner.jobs.get_mut(id) else {
            return Ok(OwnerOutcome::Lost);
        };
        if job.state != JobState::Running || job.lease_owner.as_deref() != Some(worker_id) {
            return Ok(OwnerOutcome::Lost);
        }
        job.state = JobState::Completed;
        job.progress = 100;
        job.stage = Some("commit".to_string());
        job.result = Some(result.clone());
        job.finished_at = Some(now);
        job.lease_owner = None;
        job.lease_deadline = None;
        touch(job, now);
        Ok(OwnerOutcome::Applied)
    }

    fn fail(
        &self,
        id: &JobId,
        worker_id: Option<&str>,
        error: &JobError,
    ) -> Result<OwnerOutcome, StoreError> {
        let now = now_millis();
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let Some(job) = inner.jobs.get_mut(id) else {
            return Ok(OwnerOutcome::Lost);
        };
        let allowed = match worker_id {
            Some(worker) => {
                job.state.is_held() && job.lease_owner.as_deref() == Some(worker)
            }
            None => !job.state.is_terminal(),
        };
        if !allowed {
            return Ok(OwnerOutcome::Lost);
        }
        job.state = JobState::Failed;
        job.progress = 100;
        job.error = Some(error.clone());
        job.finished_at = Some(now);
        job.lease_owner = None;
        job.lease_deadline = None;
        touch(job, now);
        Ok(OwnerOutcome::Applied)
    }

    fn nack(
        &self,
        id: &JobId,
        worker_id: &str,
        retry_delay: Duration,
    ) -> Result<OwnerOutcome, StoreError> {
        let now = now_millis();
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let Some(job) = inner.jobs.get_mut(id) else {
            return Ok(OwnerOutcome::Lost);
        };
        if !job.state.is_held() || job.lease_owner.as_deref() != Some(worker_id) {
            return Ok(OwnerOutcome::Lost);
        }
        job.state = JobState::Queued;
        job.lease_owner = None;
        job.lease_deadline = None;
        job.attempts += 1;
        touch(job, now);
        inner
            .scheduled_at
            .insert(*id, now + retry_delay.as_millis() as i64);
        Ok(OwnerOutcome::Applied)
    }

    fn mark_cancelled(&self, id: &JobId, worker_id: &str) -> Result<OwnerOutcome, StoreError> {
        let now = now_millis();
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let Some(job) = inner.jobs.get_mut(id) else {
            return Ok(OwnerOutcome::Lost);
        };
        if !job.state.is_held() || job.lease_owner.as_deref() != Some(worker_id) {
            return Ok(OwnerOutcome::Lost);
        }
        job.state = JobState::Cancelled;
        job.finished_at = Some(now);
        job.lease_owner = None;
        job.lease_deadline = None;
        touch(job, now);
        Ok(OwnerOutcome::Applied)
    }

    fn cancel(&self, id: &JobId) -> Result<CancelOutcome, StoreError> {
        let now = now_millis();
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let Some(job) = inner.jobs.get_mut(id) else {
            return Err(StoreError::NotFound(id.to_string()));
        };
        match job.state {
            JobState::Pending | JobState::Queued => {
                job.state = JobState::Cancelled;
                job.finished_at = Some(now);
                touch(job, now);
                Ok(CancelOutcome::Cancelled)
            }
            JobState::Leased | JobState::Running => {
                job.cancel_requested = true;
                touch(job, now);
                Ok(CancelOutcome::Requested)
            }
            _ => Ok(CancelOutcome::AlreadyTerminal),
        }
    }

    fn cancel_requested(&self, id: &JobId) -> Result<bool, StoreError> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        Ok(inner
            .jobs
            .get(id)
            .map(|job| job.cancel_requested)
            .unwrap_or(false))
    }

    fn sweep_expired(&self, max_attempts: u32) -> Result<SweepReport, StoreError> {
        let now = now_millis();
        let mut report = SweepReport::default();
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());

        let mut requeued_keys = Vec::new();
        for (key, job) in inner.jobs.iter_mut() {
            if job.state.is_held() && job.lease_deadline.map(|d| d < now).unwrap_or(false) {
                job.state = JobState::Queued;
                job.lease_owner = None;
                job.lease_deadline = None;
                job.attempts += 1;
                touch(job, now);
                requeued_keys.push(*key);
                report.requeued += 1;
            }
        }
        for key in requeued_keys {
            inner.scheduled_at.insert(key, now);
        }

        for job in inner.jobs.values_mut() {
            if job.state == JobState::Queued && job.attempts > max_attempts {
                job.state = JobState::Failed;
                job.progress = 100;
                job.error = Some(JobError::new(
                    ErrorKind::ExhaustedRetries,
                    format!("gave up after {} lease attempts", max_attempts),
                ));
                job.finished_at = Some(now);
                touch(job, now);
                report.exhausted += 1;
            }
        }

        Ok(report)
    }

    fn list(&self, filter: &JobFilter) -> Result<(Vec<JobRecord>, u64), StoreError> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let mut matches: Vec<&JobRecord> = inner
            .jobs
            .values()
            .filter(|job| {
                filter.state.map(|s| job.state == s).unwrap_or(true)
                    && filter
                        .parsing_type
                        .map(|t| job.parsing_type == t)
                        .unwrap_or(true)
                    && filter
                        .batch_id
                        .as_ref()
                        .map(|b| job.batch_id.as_ref() == Some(b))
                        .unwrap_or(true)
                    && filter
                        .created_after
                        .map(|t| job.created_at >= t)
                        .unwrap_or(true)
                    && filter
                        .created_before
                        .map(|t| job.created_at < t)
                        .unwrap_or(true)
            })
            .collect();
        matches.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.id.cmp(&a.id))
        });

        let total = matches.len() as u64;
        let jobs = matches
            .into_iter()
            .skip(filter.offset() as usize)
            .take(filter.page_size_clamped() as usize)
            .cloned()
            .collect();
        Ok((jobs, total))
    }

    fn delete(&self, id: &JobId) -> Result<Option<String>, StoreError> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.scheduled_at.remove(id);
        let removed = inner.jobs.remove(id).map(|job| job.blob_handle);
        if removed.is_some() {
            inner.tombstones.insert(*id);
        }
        Ok(removed)
    }

    fn was_deleted(&self, id: &JobId) -> Result<bool, StoreError> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        Ok(inner.tombstones.contains(id))
    }

    fn stats(&self, since_ms: Option<i64>) -> Result<StoreStats, StoreError> {
        let since = since_ms.unwrap_or(0);
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let mut stats = StoreStats::default();
        let mut durations = Vec::new();

        for job in inner.jobs.values().filter(|j| j.created_at >= since) {
            stats.total += 1;
            match stats.by_state.iter_mut().find(|(s, _)| *s == job.state) {
                Some((_, n)) => *n += 1,
                None => stats.by_state.push((job.state, 1)),
            }
            if job.state == JobState::Completed {
                if let Some(d) = job.duration_ms() {
                    durations.push(d);
                }
            }
        }

        let completed = stats.count(JobState::Completed);
        let failed = stats.count(JobState::Failed);
        stats.success_rate = if completed + failed == 0 {
            1.0
        } else {
            completed as f64 / (completed + failed) as f64
        };
        stats.avg_duration_ms = if durations.is_empty() {
            0.0
        } else {
            durations.iter().sum::<i64>() as f64 / durations.len() as f64
        };
        Ok(stats)
    }

    fn cleanup(
        &self,
        older_than_ms: i64,
        states: &[JobState],
    ) -> Result<Vec<String>, StoreError> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let doomed: Vec<JobId> = inner
            .jobs
            .iter()
            .filter(|(_, job)| {
                states.contains(&job.state)
                    && job.finished_at.map(|t| t < older_than_ms).unwrap_or(false)
            })
            .map(|(key, _)| *key)
            .collect();

        let mut handles = Vec::with_capacity(doomed.len());
        for key in doomed {
            inner.scheduled_at.remove(&key);
            if let Some(job) = inner.jobs.remove(&key) {
                handles.push(job.blob_handle);
            }
            inner.tombstones.insert(key);
        }
        Ok(handles)
    }

    fn create_batch(&self, description: Option<String>) -> Result<Batch, StoreError> {
        let batch = Batch {
            id: BatchId::new(),
            description,
            created_at: now_millis(),
        };
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.batches.insert(batch.id, batch.clone());
        Ok(batch)
    }

    fn get_batch(&self, id: &BatchId) -> Result<Option<Batch>, StoreError> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        Ok(inner.batches.get(id).cloned())
    }

    fn batch_jobs(&self, id: &BatchId) -> Result<Vec<JobRecord>, StoreError> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let mut jobs: Vec<JobRecord> = inner
            .jobs
            .values()
            .filter(|job| job.batch_id.as_ref() == Some(id))
            .cloned()
            .collect();
        jobs.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(jobs)
    }

    fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
