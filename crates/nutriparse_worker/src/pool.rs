//! The worker pool: one lease-execute-commit loop per concurrency slot.

use nutriparse_blob::BlobStore;
use nutriparse_ids::JobId;
use nutriparse_parser::{
    CancellationToken, Pipeline, PipelineError, PipelineInput, ProgressSink,
};
use nutriparse_protocol::config::{CallbackConfig, DispatcherConfig, QueueConfig};
use nutriparse_protocol::{ErrorKind, JobError, JobRecord};
use nutriparse_store::{JobStore, OwnerOutcome};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::backoff::{retry_delay, IdleBackoff};
use crate::callback::CallbackClient;
use crate::progress::CoalescingProgress;
use crate::sweeper::run_sweeper;

#[derive(Debug, Clone)]
pub struct WorkerSettings {
    /// Stable identity prefix; slots append their index.
    pub worker_id: String,
    pub concurrency: usize,
    pub lease_duration: Duration,
    pub sweep_interval: Duration,
    pub max_attempts: u32,
    pub callback: CallbackConfig,
    /// Run the sweeper alongside the slots (one process in a fleet is
    /// enough, but extra sweepers are harmless).
    pub run_sweeper: bool,
}

impl WorkerSettings {
    pub fn from_config(queue: &QueueConfig, dispatcher: &DispatcherConfig, callback: &CallbackConfig) -> Self {
        Self {
            worker_id: format!("worker-{}", std::process::id()),
            concurrency: dispatcher.concurrency,
            lease_duration: queue.lease_duration(),
            sweep_interval: queue.sweep_interval(),
            max_attempts: queue.max_attempts,
            callback: callback.clone(),
            run_sweeper: true,
        }
    }
}

pub struct WorkerPool {
    store: Arc<dyn JobStore>,
    blob: Arc<dyn BlobStore>,
    pipeline: Arc<Pipeline>,
    callbacks: Arc<CallbackClient>,
    settings: WorkerSettings,
}

impl WorkerPool {
    pub fn new(
        store: Arc<dyn JobStore>,
        blob: Arc<dyn BlobStore>,
        pipeline: Arc<Pipeline>,
        settings: WorkerSettings,
    ) -> Self {
        Self {
            store,
            blob,
            pipeline,
            callbacks: Arc::new(CallbackClient::new(settings.callback.clone())),
            settings,
        }
    }

    /// Run slot loops (and optionally the sweeper) until `shutdown` fires.
    /// In-flight jobs finish their current stage and are nacked back.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(
            worker_id = %self.settings.worker_id,
            slots = self.settings.concurrency,
            "worker pool starting"
        );

        let mut tasks = Vec::new();
        if self.settings.run_sweeper {
            tasks.push(tokio::spawn(run_sweeper(
                Arc::clone(&self.store),
                self.settings.sweep_interval,
                self.settings.max_attempts,
                shutdown.clone(),
            )));
        }

        for slot in 0..self.settings.concurrency {
            let slot_worker = SlotWorker {
                store: Arc::clone(&self.store),
                blob: Arc::clone(&self.blob),
                pipeline: Arc::clone(&self.pipeline),
                callbacks: Arc::clone(&self.callbacks),
                worker_id: format!("{}-{}", self.settings.worker_id, slot),
                lease_duration: self.settings.lease_duration,
            };
            let shutdown = shutdown.clone();
            tasks.push(tokio::spawn(async move {
                slot_worker.run(shutdown).await;
            }));
        }

        for task in tasks {
            let _ = task.await;
        }
        info!(worker_id = %self.settings.worker_id, "worker pool stopped");
    }
}

struct SlotWorker {
    store: Arc<dyn JobStore>,
    blob: Arc<dyn BlobStore>,
    pipeline: Arc<Pipeline>,
    callbacks: Arc<CallbackClient>,
    worker_id: String,
    lease_duration: Duration,
}

impl SlotWorker {
    async fn run(&self, shutdown: CancellationToken) {
        let mut backoff = IdleBackoff::new();
        while !shutdown.is_cancelled() {
            match self.store.lease(&self.worker_id, self.lease_duration) {
                Ok(Some(job)) => {
                    backoff.reset();
                    self.process(job).await;
                }
                Ok(None) => {
                    tokio::time::sleep(backoff.next_delay()).await;
                }
                Err(err) => {
                    error!(worker_id = %self.worker_id, error = %err, "lease failed");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
        debug!(worker_id = %self.worker_id, "slot stopped");
    }

    async fn process(&self, job: JobRecord) {
        let job_id = job.id.clone();
        info!(
            job_id = %job_id,
            worker_id = %self.worker_id,
            attempts = job.attempts,
            parsing_type = %job.parsing_type,
            "processing job"
        );

        match self.store.mark_running(&job_id, &self.worker_id) {
            Ok(OwnerOutcome::Applied) => {}
            Ok(OwnerOutcome::Lost) => {
                warn!(job_id = %job_id, "lease lost before start");
                return;
            }
            Err(err) => {
                error!(job_id = %job_id, error = %err, "mark_running failed");
                return;
            }
        }

        let cancel = CancellationToken::new();
        let renewer = self.spawn_renewer(job_id.clone(), cancel.clone());

        let outcome = self.execute(&job, &cancel).await;
        renewer.abort();

        match outcome {
            Ok(result) => {
                match self.store.complete(&job_id, &self.worker_id, &result) {
                    Ok(OwnerOutcome::Applied) => {
                        info!(job_id = %job_id, kind = result.kind_str(), "job completed");
                        self.notify(&job_id).await;
                    }
                    Ok(OwnerOutcome::Lost) => {
                        warn!(job_id = %job_id, "lease lost at commit; result dropped")
                    }
                    Err(err) => error!(job_id = %job_id, error = %err, "commit failed"),
                }
            }
            Err(PipelineError::Cancelled { stage }) => {
                info!(job_id = %job_id, stage, "job cancelled cooperatively");
                match self.store.mark_cancelled(&job_id, &self.worker_id) {
                    Ok(_) => self.notify(&job_id).await,
                    Err(err) => error!(job_id = %job_id, error = %err, "cancel ack failed"),
                }
            }
            Err(PipelineError::Failed(job_error)) if job_error.kind.is_transient() => {
                let delay = retry_delay(job.attempts);
                warn!(
                    job_id = %job_id,
                    error = %job_error,
                    delay_secs = delay.as_secs(),
                    "transient failure, requeueing"
                );
                if let Err(err) = self.store.nack(&job_id, &self.worker_id, delay) {
                    error!(job_id = %job_id, error = %err, "nack failed");
                }
            }
            Err(PipelineError::Failed(job_error)) => {
                warn!(job_id = %job_id, error = %job_error, "job failed terminally");
                match self.store.fail(&job_id, Some(&self.worker_id), &job_error) {
                    Ok(OwnerOutcome::Applied) => self.notify(&job_id).await,
                    Ok(OwnerOutcome::Lost) => {
                        warn!(job_id = %job_id, "lease lost at failure commit")
                    }
                    Err(err) => error!(job_id = %job_id, error = %err, "fail write failed"),
                }
            }
        }
    }

    /// Fetch the blob and run the pipeline on a blocking thread so the CPU
    /// work cannot starve the runtime.
    async fn execute(
        &self,
        job: &JobRecord,
        cancel: &CancellationToken,
    ) -> Result<nutriparse_protocol::ParsedResult, PipelineError> {
        let bytes = self.blob.get(&job.blob_handle).await.map_err(|err| {
            PipelineError::Failed(
                JobError::new(ErrorKind::BlobIo, err.to_string()).at_stage("extract_basic_info"),
            )
        })?;

        let pipeline = Arc::clone(&self.pipeline);
        let parsing_type = job.parsing_type;
        let cancel = cancel.clone();
        let progress: Arc<dyn ProgressSink> = Arc::new(CoalescingProgress::new(
            Arc::clone(&self.store),
            job.id.clone(),
        ));

        let handle = tokio::task::spawn_blocking(move || {
            pipeline.run(
                PipelineInput {
                    bytes: &bytes,
                    parsing_type,
                    page_count_hint: 0,
                },
                &cancel,
                progress.as_ref(),
            )
        });

        match handle.await {
            Ok(result) => result,
            Err(join_err) => Err(PipelineError::Failed(
                JobError::new(
                    ErrorKind::ExtractorBug,
                    format!("pipeline task panicked: {join_err}"),
                ),
            )),
        }
    }

    /// Renew the lease every third of its duration, and trip the pipeline's
    /// cancel token when the API requested cancellation or the lease was
    /// lost to the sweeper.
    fn spawn_renewer(
        &self,
        job_id: JobId,
        cancel: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let store = Arc::clone(&self.store);
        let worker_id = self.worker_id.clone();
        let lease_duration = self.lease_duration;
        tokio::spawn(async move {
            let period = lease_duration / 3;
            let mut ticker = tokio::time::interval(period.max(Duration::from_millis(100)));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await; // immediate first tick
            loop {
                ticker.tick().await;
                match store.cancel_requested(&job_id) {
                    Ok(true) => {
                        cancel.cancel();
                    }
                    Ok(false) => {}
                    Err(err) => warn!(job_id = %job_id, error = %err, "cancel poll failed"),
                }
                match store.renew(&job_id, &worker_id, lease_duration) {
                    Ok(OwnerOutcome::Applied) => {}
                    Ok(OwnerOutcome::Lost) => {
                        warn!(job_id = %job_id, "lease lost during renewal");
                        cancel.cancel();
                        break;
                    }
                    Err(err) => warn!(job_id = %job_id, error = %err, "renew failed"),
                }
            }
        })
    }

    async fn notify(&self, job_id: &JobId) {
        let Ok(Some(job)) = self.store.get(job_id) else {
            return;
        };
        if job.callback_url.is_none() {
            return;
        }
        let callbacks = Arc::clone(&self.callbacks);
        tokio::spawn(async move {
            callbacks.deliver(&job).await;
        });
    }
}
