//! End-to-end worker tests over the in-memory store and blob backends,
//! with the real pipeline and real (uncompressed) PDF fixtures.

use nutriparse_blob::{BlobStore, MemoryBlobStore};
use nutriparse_ids::JobId;
use nutriparse_parser::{
    CancellationToken, OcrEngine, OcrError, OcrOutput, Pipeline, PlainTextExtractor,
};
use nutriparse_protocol::config::{CallbackConfig, ParserConfig};
use nutriparse_protocol::{
    ErrorKind, JobState, Nutrient, ParsedResult, ParsingType, Priority,
};
use nutriparse_store::{JobStore, MemoryJobStore, NewJob};
use nutriparse_worker::{WorkerPool, WorkerSettings};
use std::sync::Arc;
use std::time::Duration;

fn pdf(lines: &[&str]) -> Vec<u8> {
    let mut bytes = b"%PDF-1.4\n/Type /Page\n".to_vec();
    for line in lines {
        bytes.extend_from_slice(b"(");
        bytes.extend_from_slice(line.as_bytes());
        bytes.extend_from_slice(b") Tj\n");
    }
    bytes.extend_from_slice(b"%%EOF\n");
    bytes
}

async fn submit(
    store: &dyn JobStore,
    blob: &dyn BlobStore,
    bytes: &[u8],
    priority: Priority,
) -> JobId {
    let id = JobId::new();
    let outcome = blob
        .put(&id.as_str(), "doc.pdf", bytes)
        .await
        .expect("blob put");
    store
        .create(NewJob {
            id: id.clone(),
            batch_id: None,
            filename: "doc.pdf".to_string(),
            size_bytes: outcome.size_bytes,
            content_hash: outcome.sha256,
            blob_handle: outcome.handle,
            parsing_type: ParsingType::Auto,
            priority,
            callback_url: None,
        })
        .expect("create");
    store.enqueue(&id).expect("enqueue");
    id
}

fn settings(concurrency: usize) -> WorkerSettings {
    WorkerSettings {
        worker_id: "test-worker".to_string(),
        concurrency,
        lease_duration: Duration::from_secs(30),
        sweep_interval: Duration::from_millis(50),
        max_attempts: 3,
        callback: CallbackConfig {
            max_attempts: 1,
            backoff_base_secs: 0,
            timeout_secs: 1,
        },
        run_sweeper: true,
    }
}

fn default_pipeline() -> Arc<Pipeline> {
    Arc::new(Pipeline::new(
        Arc::new(PlainTextExtractor::new()),
        Arc::new(nutriparse_parser::text::DisabledOcr),
        ParserConfig::default(),
    ))
}

async fn wait_terminal(store: &dyn JobStore, id: &JobId, timeout: Duration) -> JobState {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let job = store.get(id).expect("get").expect("job exists");
        if job.state.is_terminal() {
            return job.state;
        }
        if tokio::time::Instant::now() > deadline {
            panic!("job {} still {:?} after {:?}", id, job.state, timeout);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn async_happy_path_parses_nutrition_label() {
    let store: Arc<dyn JobStore> = Arc::new(MemoryJobStore::new());
    let blob: Arc<dyn BlobStore> = Arc::new(MemoryBlobStore::new());

    let bytes = pdf(&[
        "Nutrition Facts",
        "Serving size: 100g",
        "Calories: 250 kcal",
        "Protein: 12 g",
    ]);
    let id = submit(store.as_ref(), blob.as_ref(), &bytes, Priority::Normal).await;

    let pool = WorkerPool::new(
        Arc::clone(&store),
        Arc::clone(&blob),
        default_pipeline(),
        settings(1),
    );
    let shutdown = CancellationToken::new();
    let pool_shutdown = shutdown.clone();
    let runner = tokio::spawn(async move { pool.run(pool_shutdown).await });

    let state = wait_terminal(store.as_ref(), &id, Duration::from_secs(5)).await;
    shutdown.cancel();
    let _ = runner.await;

    assert_eq!(state, JobState::Completed);
    let job = store.get(&id).expect("get").expect("job");
    assert_eq!(job.progress, 100);
    assert!(job.started_at.is_some() && job.finished_at.is_some());
    let ParsedResult::NutritionLabel { nutrition, .. } =
        job.result.expect("result present")
    else {
        panic!("expected nutrition label result");
    };
    let calories = nutrition.get(&Nutrient::Calories).expect("calories");
    assert_eq!(calories.value, 250.0);
    assert_eq!(calories.unit.as_str(), "kcal");
}

#[tokio::test(flavor = "multi_thread")]
async fn single_slot_respects_priority_order() {
    let store: Arc<dyn JobStore> = Arc::new(MemoryJobStore::new());
    let blob: Arc<dyn BlobStore> = Arc::new(MemoryBlobStore::new());

    let doc = pdf(&["Dietary guidance: eat a variety of foods every single day."]);
    let j_normal = submit(store.as_ref(), blob.as_ref(), &doc, Priority::Normal).await;
    tokio::time::sleep(Duration::from_millis(5)).await;
    let j_low = submit(store.as_ref(), blob.as_ref(), &doc, Priority::Low).await;
    tokio::time::sleep(Duration::from_millis(5)).await;
    let j_high = submit(store.as_ref(), blob.as_ref(), &doc, Priority::High).await;

    let pool = WorkerPool::new(
        Arc::clone(&store),
        Arc::clone(&blob),
        default_pipeline(),
        settings(1),
    );
    let shutdown = CancellationToken::new();
    let pool_shutdown = shutdown.clone();
    let runner = tokio::spawn(async move { pool.run(pool_shutdown).await });

    for id in [&j_normal, &j_low, &j_high] {
        let state = wait_terminal(store.as_ref(), id, Duration::from_secs(5)).await;
        assert_eq!(state, JobState::Completed);
    }
    shutdown.cancel();
    let _ = runner.await;

    let started = |id: &JobId| {
        store
            .get(id)
            .expect("get")
            .expect("job")
            .started_at
            .expect("started")
    };
    assert!(started(&j_high) <= started(&j_normal));
    assert!(started(&j_normal) <= started(&j_low));
}

struct FlakyOcr;

impl OcrEngine for FlakyOcr {
    fn recognize(&self, _bytes: &[u8], _languages: &[String]) -> Result<OcrOutput, OcrError> {
        Err(OcrError::Transient("engine warming up".to_string()))
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn transient_ocr_failure_nacks_with_backoff() {
    let store: Arc<dyn JobStore> = Arc::new(MemoryJobStore::new());
    let blob: Arc<dyn BlobStore> = Arc::new(MemoryBlobStore::new());

    // No text layer at all, so the OCR error cannot be demoted.
    let id = submit(store.as_ref(), blob.as_ref(), &pdf(&[]), Priority::Normal).await;

    let pipeline = Arc::new(Pipeline::new(
        Arc::new(PlainTextExtractor::new()),
        Arc::new(FlakyOcr),
        ParserConfig::default(),
    ));
    let pool = WorkerPool::new(Arc::clone(&store), Arc::clone(&blob), pipeline, settings(1));
    let shutdown = CancellationToken::new();
    let pool_shutdown = shutdown.clone();
    let runner = tokio::spawn(async move { pool.run(pool_shutdown).await });

    // Wait until the nack lands: queued again with the retry delay.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let job = store.get(&id).expect("get").expect("job");
        if job.state == JobState::Queued && job.attempts == 2 {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "job never nacked: {:?}",
            job.state
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    shutdown.cancel();
    let _ = runner.await;

    // The 30 s retry delay keeps it invisible to an immediate lease.
    assert!(store
        .lease("other", Duration::from_secs(30))
        .expect("lease")
        .is_none());
}

#[tokio::test(flavor = "multi_thread")]
async fn scanned_doc_uses_ocr_and_caps_quality() {
    struct GoodOcr;
    impl OcrEngine for GoodOcr {
        fn recognize(
            &self,
            _bytes: &[u8],
            _languages: &[String],
        ) -> Result<OcrOutput, OcrError> {
            Ok(OcrOutput {
                text: "Nutrition Facts\nCalories: 180 kcal\nSugar: 22 g".to_string(),
                confidence: 0.85,
            })
        }
    }

    let store: Arc<dyn JobStore> = Arc::new(MemoryJobStore::new());
    let blob: Arc<dyn BlobStore> = Arc::new(MemoryBlobStore::new());
    let id = submit(store.as_ref(), blob.as_ref(), &pdf(&["x"]), Priority::Normal).await;

    let pipeline = Arc::new(Pipeline::new(
        Arc::new(PlainTextExtractor::new()),
        Arc::new(GoodOcr),
        ParserConfig::default(),
    ));
    let pool = WorkerPool::new(Arc::clone(&store), Arc::clone(&blob), pipeline, settings(1));
    let shutdown = CancellationToken::new();
    let pool_shutdown = shutdown.clone();
    let runner = tokio::spawn(async move { pool.run(pool_shutdown).await });

    let state = wait_terminal(store.as_ref(), &id, Duration::from_secs(5)).await;
    shutdown.cancel();
    let _ = runner.await;

    assert_eq!(state, JobState::Completed);
    let job = store.get(&id).expect("get").expect("job");
    let result = job.result.expect("result");
    assert!(result.quality_score() <= 0.7);
    assert!(matches!(result, ParsedResult::NutritionLabel { .. }));
}

#[tokio::test(flavor = "multi_thread")]
async fn unparseable_doc_fails_terminally() {
    let store: Arc<dyn JobStore> = Arc::new(MemoryJobStore::new());
    let blob: Arc<dyn BlobStore> = Arc::new(MemoryBlobStore::new());

    // Valid upload, but with OCR disabled an empty text layer is fatal.
    let id = submit(store.as_ref(), blob.as_ref(), &pdf(&[]), Priority::Normal).await;

    let pool = WorkerPool::new(
        Arc::clone(&store),
        Arc::clone(&blob),
        default_pipeline(),
        settings(1),
    );
    let shutdown = CancellationToken::new();
    let pool_shutdown = shutdown.clone();
    let runner = tokio::spawn(async move { pool.run(pool_shutdown).await });

    let state = wait_terminal(store.as_ref(), &id, Duration::from_secs(5)).await;
    shutdown.cancel();
    let _ = runner.await;

    assert_eq!(state, JobState::Failed);
    let job = store.get(&id).expect("get").expect("job");
    let error = job.error.expect("error present");
    assert_eq!(error.kind, ErrorKind::Unparseable);
    assert!(job.result.is_none());
}
