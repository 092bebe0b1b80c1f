//! Terminal-state callback delivery.
//!
//! At-least-once: the receiver must treat `job_id` as an idempotency key.
//! Delivery failures never touch the job's terminal state.

use nutriparse_protocol::config::CallbackConfig;
use nutriparse_protocol::http_types::CallbackPayload;
use nutriparse_protocol::{JobError, JobRecord, ParsedResult};
use std::time::Duration;
use tracing::{info, warn};

pub struct CallbackClient {
    http: reqwest::Client,
    config: CallbackConfig,
}

impl CallbackClient {
    pub fn new(config: CallbackConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .unwrap_or_default();
        Self { http, config }
    }

    /// POST the terminal payload with exponential backoff. Returns whether
    /// any attempt got a 2xx back.
    pub async fn deliver(&self, job: &JobRecord) -> bool {
        let Some(url) = job.callback_url.as_deref() else {
            return true;
        };
        let payload = payload_for(job);

        for attempt in 1..=self.config.max_attempts {
            match self.http.post(url).json(&payload).send().await {
                Ok(response) if response.status().is_success() => {
                    info!(job_id = %job.id, attempt, "callback delivered");
                    return true;
                }
                Ok(response) => {
                    warn!(
                        job_id = %job.id,
                        attempt,
                        status = %response.status(),
                        "callback rejected"
                    );
                }
                Err(err) => {
                    warn!(job_id = %job.id, attempt, error = %err, "callback failed");
                }
            }
            if attempt < self.config.max_attempts {
                let delay = self.config.backoff_base_secs << (attempt - 1).min(8);
                tokio::time::sleep(Duration::from_secs(delay)).await;
            }
        }
        warn!(
            job_id = %job.id,
            attempts = self.config.max_attempts,
            "callback delivery exhausted"
        );
        false
    }
}

fn payload_for(job: &JobRecord) -> CallbackPayload {
    let result: Option<ParsedResult> = job.result.clone();
    let error: Option<JobError> = job.error.clone();
    CallbackPayload {
        job_id: job.id.clone(),
        state: job.state,
        result,
        error,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nutriparse_protocol::{ErrorKind, JobState, ParsingType, Priority};

    fn terminal_job(state: JobState, callback_url: Option<&str>) -> JobRecord {
        JobRecord {
            id: nutriparse_ids::JobId::new(),
            batch_id: None,
            filename: "a.pdf".to_string(),
            size_bytes: 1,
            content_hash: "h".to_string(),
            blob_handle: "b".to_string(),
            parsing_type: ParsingType::Auto,
            priority: Priority::Normal,
            state,
            progress: 100,
            stage: None,
            attempts: 1,
            lease_owner: None,
            lease_deadline: None,
            cancel_requested: false,
            callback_url: callback_url.map(String::from),
            created_at: 0,
            updated_at: 1,
            started_at: Some(0),
            finished_at: Some(1),
            result: None,
            error: Some(JobError::new(ErrorKind::Unparseable, "nope")),
        }
    }

    #[tokio::test]
    async fn no_url_is_a_no_op_success() {
        let client = CallbackClient::new(CallbackConfig::default());
        assert!(client.deliver(&terminal_job(JobState::Failed, None)).await);
    }

    #[tokio::test]
    async fn delivers_to_listening_receiver() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("addr");
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.expect("accept");
            let mut buf = vec![0u8; 4096];
            let n = socket.read(&mut buf).await.expect("read");
            let request = String::from_utf8_lossy(&buf[..n]).into_owned();
            socket
                .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 0\r\n\r\n")
                .await
                .expect("write");
            request
        });

        let client = CallbackClient::new(CallbackConfig {
            max_attempts: 1,
            backoff_base_secs: 0,
            timeout_secs: 5,
        });
        let job = terminal_job(JobState::Failed, Some(&format!("http://{addr}/cb")));
        assert!(client.deliver(&job).await);

        let request = server.await.expect("server");
        assert!(request.starts_with("POST /cb"));
        assert!(request.contains(&job.id.as_str()));
        assert!(request.contains("\"failed\""));
    }

    #[tokio::test]
    async fn unreachable_receiver_reports_failure() {
        let client = CallbackClient::new(CallbackConfig {
            max_attempts: 2,
            backoff_base_secs: 0,
            timeout_secs: 1,
        });
        // Reserved port with nothing listening.
        let job = terminal_job(JobState::Completed, Some("http://127.0.0.1:9/cb"));
        assert!(!client.deliver(&job).await);
    }
}
