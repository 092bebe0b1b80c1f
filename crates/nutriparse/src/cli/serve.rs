//! `serve` / `start`: HTTP API, optionally with an embedded worker pool.

use anyhow::{Context, Result};
use nutriparse_protocol::AppConfig;
use nutriparse_server::AppState;
use nutriparse_worker::{WorkerPool, WorkerSettings};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

use super::build_components;
use crate::shutdown_token;

pub async fn run(config: AppConfig, embed_worker: bool, slots: Option<usize>) -> Result<()> {
    let (store, blob, pipeline) = build_components(&config)?;
    let addr: SocketAddr = config
        .http
        .listen_addr
        .parse()
        .with_context(|| format!("invalid listen address {}", config.http.listen_addr))?;

    let shutdown = shutdown_token();

    let worker_task = if embed_worker {
        let mut settings = WorkerSettings::from_config(
            &config.queue,
            &config.dispatcher,
            &config.callback,
        );
        if let Some(slots) = slots {
            settings.concurrency = slots;
        }
        let pool = WorkerPool::new(
            Arc::clone(&store),
            Arc::clone(&blob),
            Arc::clone(&pipeline),
            settings,
        );
        let pool_shutdown = shutdown.clone();
        Some(tokio::spawn(async move { pool.run(pool_shutdown).await }))
    } else {
        None
    };

    let state = Arc::new(AppState::new(store, blob, pipeline, config));
    let server_shutdown = shutdown.clone();
    nutriparse_server::serve(state, addr, async move {
        while !server_shutdown.is_cancelled() {
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        }
    })
    .await?;

    if let Some(task) = worker_task {
        let _ = task.await;
    }
    info!("bye");
    Ok(())
}
