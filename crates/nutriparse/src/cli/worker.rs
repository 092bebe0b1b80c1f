//! `worker`: standalone worker pool against the shared store.

use anyhow::Result;
use nutriparse_protocol::AppConfig;
use nutriparse_worker::{WorkerPool, WorkerSettings};
use std::sync::Arc;

use super::build_components;
use crate::shutdown_token;

pub async fn run(config: AppConfig, slots: Option<usize>) -> Result<()> {
    let (store, blob, pipeline) = build_components(&config)?;
    let mut settings =
        WorkerSettings::from_config(&config.queue, &config.dispatcher, &config.callback);
    if let Some(slots) = slots {
        settings.concurrency = slots;
    }

    let pool = WorkerPool::new(store, Arc::clone(&blob), pipeline, settings);
    pool.run(shutdown_token()).await;
    Ok(())
}
