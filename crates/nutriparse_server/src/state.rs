//! Shared request-handler state.

use nutriparse_blob::BlobStore;
use nutriparse_parser::Pipeline;
use nutriparse_protocol::AppConfig;
use nutriparse_store::JobStore;
use std::sync::Arc;
use std::time::Instant;

use crate::metrics::MetricsRegistry;

pub struct AppState {
    pub store: Arc<dyn JobStore>,
    pub blob: Arc<dyn BlobStore>,
    pub pipeline: Arc<Pipeline>,
    pub config: AppConfig,
    pub metrics: Arc<MetricsRegistry>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(
        store: Arc<dyn JobStore>,
        blob: Arc<dyn BlobStore>,
        pipeline: Arc<Pipeline>,
        config: AppConfig,
    ) -> Self {
        Self {
            store,
            blob,
            pipeline,
            config,
            metrics: Arc::new(MetricsRegistry::new()),
            started_at: Instant::now(),
        }
    }
}
