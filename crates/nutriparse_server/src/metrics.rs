//! In-process request metrics, exposed as JSON at `/admin/metrics`.

use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct MetricsRegistry {
    requests_total: AtomicU64,
    responses_2xx: AtomicU64,
    responses_4xx: AtomicU64,
    responses_5xx: AtomicU64,
    rate_limited_total: AtomicU64,
    duration_ms_total: AtomicU64,
    sync_parses_total: AtomicU64,
    async_submissions_total: AtomicU64,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_response(&self, status: u16, duration_ms: u64) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
        self.duration_ms_total.fetch_add(duration_ms, Ordering::Relaxed);
        match status {
            200..=299 => &self.responses_2xx,
            400..=499 => &self.responses_4xx,
            _ => &self.responses_5xx,
        }
        .fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rate_limited(&self) {
        self.rate_limited_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_sync_parse(&self) {
        self.sync_parses_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_async_submission(&self) {
        self.async_submissions_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self, uptime_secs: u64) -> Value {
        let requests = self.requests_total.load(Ordering::Relaxed);
        let duration = self.duration_ms_total.load(Ordering::Relaxed);
        let avg_ms = if requests == 0 {
            0.0
        } else {
            duration as f64 / requests as f64
        };
        json!({
            "uptime_secs": uptime_secs,
            "requests_total": requests,
            "responses": {
                "2xx": self.responses_2xx.load(Ordering::Relaxed),
                "4xx": self.responses_4xx.load(Ordering::Relaxed),
                "5xx": self.responses_5xx.load(Ordering::Relaxed),
            },
            "rate_limited_total": self.rate_limited_total.load(Ordering::Relaxed),
            "avg_response_ms": avg_ms,
            "sync_parses_total": self.sync_parses_total.load(Ordering::Relaxed),
            "async_submissions_total": self.async_submissions_total.load(Ordering::Relaxed),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_aggregates_counts() {
        let registry = MetricsRegistry::new();
        registry.record_response(200, 10);
        registry.record_response(404, 30);
        registry.record_response(500, 20);
        registry.record_rate_limited();

        let snap = registry.snapshot(5);
        assert_eq!(snap["requests_total"], 3);
        assert_eq!(snap["responses"]["2xx"], 1);
        assert_eq!(snap["responses"]["4xx"], 1);
        assert_eq!(snap["responses"]["5xx"], 1);
        assert_eq!(snap["rate_limited_total"], 1);
        assert_eq!(snap["avg_response_ms"], 20.0);
    }
}
