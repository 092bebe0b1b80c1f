//! HTTP API end-to-end tests against a real listener, the in-memory
//! backends, and (where the scenario needs one) a live worker pool.

use nutriparse_blob::{BlobStore, MemoryBlobStore};
use nutriparse_parser::{CancellationToken, Pipeline, PlainTextExtractor};
use nutriparse_protocol::config::AppConfig;
use nutriparse_protocol::JobFilter;
use nutriparse_server::{build_router, AppState};
use nutriparse_store::{JobStore, MemoryJobStore};
use nutriparse_worker::{WorkerPool, WorkerSettings};
use std::net::SocketAddr;
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

struct TestApi {
    addr: SocketAddr,
    store: Arc<dyn JobStore>,
    blob: Arc<dyn BlobStore>,
    state: Arc<AppState>,
    shutdown: CancellationToken,
}

impl TestApi {
    async fn start(mutate: impl FnOnce(&mut AppConfig)) -> Self {
        let mut config = AppConfig::default();
        config.ratelimit.enabled = false;
        mutate(&mut config);

        let store: Arc<dyn JobStore> = Arc::new(MemoryJobStore::new());
        let blob: Arc<dyn BlobStore> = Arc::new(MemoryBlobStore::new());
        let pipeline = Arc::new(Pipeline::new(
            Arc::new(PlainTextExtractor::new()),
            Arc::new(nutriparse_parser::text::DisabledOcr),
            config.parser.clone(),
        ));
        let state = Arc::new(AppState::new(
            Arc::clone(&store),
            Arc::clone(&blob),
            pipeline,
            config,
        ));

        let router = build_router(Arc::clone(&state));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("addr");
        let shutdown = CancellationToken::new();
        let server_shutdown = shutdown.clone();
        tokio::spawn(async move {
            axum::serve(
                listener,
                router.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(async move {
                while !server_shutdown.is_cancelled() {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                }
            })
            .await
            .expect("serve");
        });

        Self {
            addr,
            store,
            blob,
            state,
            shutdown,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Run a single-slot worker pool until the given closure sees what it
    /// wants or the timeout hits.
    fn spawn_worker(&self) -> CancellationToken {
        let settings = WorkerSettings {
            worker_id: "api-test-worker".to_string(),
            concurrency: 1,
            lease_duration: Duration::from_secs(30),
            sweep_interval: Duration::from_millis(50),
            max_attempts: 3,
            callback: nutriparse_protocol::config::CallbackConfig {
                max_attempts: 1,
                backoff_base_secs: 0,
                timeout_secs: 1,
            },
            run_sweeper: true,
        };
        let pool = WorkerPool::new(
            Arc::clone(&self.store),
            Arc::clone(&self.blob),
            Arc::clone(&self.state.pipeline),
            settings,
        );
        let shutdown = CancellationToken::new();
        let pool_shutdown = shutdown.clone();
        tokio::spawn(async move { pool.run(pool_shutdown).await });
        shutdown
    }
}

impl Drop for TestApi {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

fn multipart_file(bytes: Vec<u8>, filename: &str) -> reqwest::multipart::Form {
    reqwest::multipart::Form::new().part(
        "file",
        reqwest::multipart::Part::bytes(bytes).file_name(filename.to_string()),
    )
}

#[tokio::test(flavor = "multi_thread")]
async fn sync_parse_returns_result_inline() {
    let api = TestApi::start(|_| {}).await;
    let client = reqwest::Client::new();

    let bytes = pdf(&[
        "Nutrition Facts",
        "Serving size: 100g",
        "Calories: 250 kcal",
        "Protein: 12 g",
    ]);
    let response = client
        .post(api.url("/parse/sync?parsing_type=auto"))
        .multipart(multipart_file(bytes, "label.pdf"))
        .send()
        .await
        .expect("request");

    assert_eq!(response.status(), 200);
    assert_eq!(
        response
            .headers()
            .get("x-content-type-options")
            .and_then(|v| v.to_str().ok()),
        Some("nosniff")
    );
    assert!(response.headers().contains_key("x-request-id"));

    let body: serde_json::Value = response.json().await.expect("json");
    assert_eq!(body["code"], 200);
    let result = &body["data"]["result"];
    assert_eq!(result["type"], "nutrition_label");
    assert_eq!(result["nutrition"]["calories"]["value"], 250.0);
    assert_eq!(result["nutrition"]["calories"]["unit"], "kcal");

    // The inline job record went through the full lifecycle.
    let (jobs, total) = api.store.list(&JobFilter::default()).expect("list");
    assert_eq!(total, 1);
    assert_eq!(jobs[0].state.as_str(), "completed");
    assert_eq!(jobs[0].progress, 100);
}

#[tokio::test(flavor = "multi_thread")]
async fn oversize_sync_recommends_async() {
    let api = TestApi::start(|config| {
        config.max_sync_file_size = 64;
    })
    .await;
    let client = reqwest::Client::new();

    let mut bytes = pdf(&["Nutrition Facts"]);
    bytes.extend_from_slice(&vec![b' '; 256]);
    let response = client
        .post(api.url("/parse/sync"))
        .multipart(multipart_file(bytes, "big.pdf"))
        .send()
        .await
        .expect("request");

    assert_eq!(response.status(), 413);
    let body: serde_json::Value = response.json().await.expect("json");
    assert_eq!(body["error"]["type"], "too_large");
    assert!(body["message"]
        .as_str()
        .expect("message")
        .contains("/parse/async"));
}

#[tokio::test(flavor = "multi_thread")]
async fn malicious_upload_leaves_no_trace() {
    let api = TestApi::start(|_| {}).await;
    let client = reqwest::Client::new();

    let bytes = pdf(&["/JS (app.alert(1))"]);
    // The token sits in raw content, not inside a literal string.
    let bytes = [&bytes[..], b"\n/JS (app.alert(1))\n"].concat();
    let response = client
        .post(api.url("/parse/async"))
        .multipart(multipart_file(bytes, "evil.pdf"))
        .send()
        .await
        .expect("request");

    assert_eq!(response.status(), 400);
    let body: serde_json::Value = response.json().await.expect("json");
    assert_eq!(body["error"]["type"], "suspected_malicious");

    // No job record, no blob, nothing queued.
    let (_, total) = api.store.list(&JobFilter::default()).expect("list");
    assert_eq!(total, 0);
    assert!(api
        .store
        .lease("w", Duration::from_secs(30))
        .expect("lease")
        .is_none());
}

#[tokio::test(flavor = "multi_thread")]
async fn async_submit_then_poll_to_completion() {
    let api = TestApi::start(|_| {}).await;
    let client = reqwest::Client::new();

    let bytes = pdf(&[
        "Nutrition Facts",
        "Calories: 180 kcal",
        "Sugar: 22 g",
        "Sodium: 300 mg",
    ]);
    let response = client
        .post(api.url("/parse/async?parsing_type=auto&priority=high"))
        .multipart(multipart_file(bytes, "label.pdf"))
        .send()
        .await
        .expect("request");
    assert_eq!(response.status(), 202);
    let body: serde_json::Value = response.json().await.expect("json");
    let job_id = body["data"]["job_id"].as_str().expect("job id").to_string();

    // Before any worker runs, the result endpoint says "not yet".
    let pending = client
        .get(api.url(&format!("/parse/result/{job_id}")))
        .send()
        .await
        .expect("request");
    assert_eq!(pending.status(), 202);

    let worker_shutdown = api.spawn_worker();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    let final_status = loop {
        let status = client
            .get(api.url(&format!("/parse/status/{job_id}")))
            .send()
            .await
            .expect("request");
        assert_eq!(status.status(), 200);
        let status_body: serde_json::Value = status.json().await.expect("json");
        let state = status_body["data"]["state"].as_str().expect("state").to_string();
        if state == "completed" || state == "failed" {
            break status_body;
        }
        assert!(tokio::time::Instant::now() < deadline, "stuck in {state}");
        tokio::time::sleep(Duration::from_millis(20)).await;
    };
    worker_shutdown.cancel();

    assert_eq!(final_status["data"]["state"], "completed");
    assert_eq!(final_status["data"]["progress"], 100);

    let result = client
        .get(api.url(&format!("/parse/result/{job_id}")))
        .send()
        .await
        .expect("request");
    assert_eq!(result.status(), 200);
    let result_body: serde_json::Value = result.json().await.expect("json");
    assert_eq!(result_body["data"]["type"], "nutrition_label");
    assert_eq!(result_body["data"]["nutrition"]["sodium"]["unit"], "mg");
}

#[tokio::test(flavor = "multi_thread")]
async fn history_filters_by_state() {
    let api = TestApi::start(|_| {}).await;
    let client = reqwest::Client::new();

    for _ in 0..2 {
        let response = client
            .post(api.url("/parse/async"))
            .multipart(multipart_file(pdf(&["Calories: 100 kcal"]), "a.pdf"))
            .send()
            .await
            .expect("request");
        assert_eq!(response.status(), 202);
    }

    let history = client
        .get(api.url("/parse/history?state=queued&page=0&page_size=10"))
        .send()
        .await
        .expect("request");
    assert_eq!(history.status(), 200);
    let body: serde_json::Value = history.json().await.expect("json");
    assert_eq!(body["data"]["total"], 2);
    assert_eq!(body["data"]["jobs"].as_array().expect("jobs").len(), 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn delete_then_result_is_gone() {
    let api = TestApi::start(|_| {}).await;
    let client = reqwest::Client::new();

    let response = client
        .post(api.url("/parse/async"))
        .multipart(multipart_file(pdf(&["Calories: 100 kcal"]), "a.pdf"))
        .send()
        .await
        .expect("request");
    let body: serde_json::Value = response.json().await.expect("json");
    let job_id = body["data"]["job_id"].as_str().expect("job id").to_string();

    let deleted = client
        .delete(api.url(&format!("/parse/{job_id}")))
        .send()
        .await
        .expect("request");
    assert_eq!(deleted.status(), 204);

    let gone = client
        .get(api.url(&format!("/parse/result/{job_id}")))
        .send()
        .await
        .expect("request");
    assert_eq!(gone.status(), 410);

    let missing = client
        .get(api.url("/parse/result/00000000-0000-4000-8000-000000000000"))
        .send()
        .await
        .expect("request");
    assert_eq!(missing.status(), 404);
}

#[tokio::test(flavor = "multi_thread")]
async fn rate_limit_rejects_with_retry_after() {
    let api = TestApi::start(|config| {
        config.ratelimit.enabled = true;
        config.ratelimit.per_minute = 2;
        config.ratelimit.per_hour = 1000;
    })
    .await;
    let client = reqwest::Client::new();

    let mut last_status = 0;
    let mut retry_after = None;
    for _ in 0..4 {
        let response = client
            .get(api.url("/parse/history"))
            .send()
            .await
            .expect("request");
        last_status = response.status().as_u16();
        if last_status == 429 {
            retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .map(String::from);
            break;
        }
    }
    assert_eq!(last_status, 429);
    assert!(retry_after.is_some());

    // Health stays reachable under throttling.
    let health = client
        .get(api.url("/health"))
        .send()
        .await
        .expect("request");
    assert_eq!(health.status(), 200);
}

#[tokio::test(flavor = "multi_thread")]
async fn admin_surfaces_stats_and_cleanup() {
    let api = TestApi::start(|_| {}).await;
    let client = reqwest::Client::new();

    let response = client
        .post(api.url("/parse/sync"))
        .multipart(multipart_file(
            pdf(&["Nutrition Facts", "Calories: 150 kcal", "Fat: 5 g"]),
            "a.pdf",
        ))
        .send()
        .await
        .expect("request");
    assert_eq!(response.status(), 200);

    let metrics = client
        .get(api.url("/admin/metrics"))
        .send()
        .await
        .expect("request");
    assert_eq!(metrics.status(), 200);
    let body: serde_json::Value = metrics.json().await.expect("json");
    assert_eq!(body["data"]["sync_parses_total"], 1);
    assert_eq!(body["data"]["jobs"]["by_state"]["completed"], 1);

    let stats = client
        .get(api.url("/admin/stats/real-time"))
        .send()
        .await
        .expect("request");
    let stats_body: serde_json::Value = stats.json().await.expect("json");
    assert_eq!(stats_body["data"]["completed_today"], 1);
    assert_eq!(stats_body["data"]["queued"], 0);

    // Nothing old enough to clean with a 30-day horizon.
    let cleanup = client
        .post(api.url("/admin/cleanup"))
        .json(&serde_json::json!({ "days": 30 }))
        .send()
        .await
        .expect("request");
    assert_eq!(cleanup.status(), 200);
    let cleanup_body: serde_json::Value = cleanup.json().await.expect("json");
    assert_eq!(cleanup_body["data"]["deleted"], 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn health_detailed_reports_probes() {
    let api = TestApi::start(|_| {}).await;
    let client = reqwest::Client::new();

    let response = client
        .get(api.url("/health/detailed"))
        .send()
        .await
        .expect("request");
    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json().await.expect("json");
    assert_eq!(body["data"]["healthy"], true);
    let probes = body["data"]["probes"].as_array().expect("probes");
    assert!(probes.iter().any(|p| p["name"] == "job_store"));
    assert!(probes.iter().any(|p| p["name"] == "blob_store"));
}
