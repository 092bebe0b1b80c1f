pub mod jobs;
pub mod serve;
pub mod worker;

use anyhow::{Context, Result};
use nutriparse_blob::{BlobStore, FsBlobStore, MemoryBlobStore};
use nutriparse_parser::text::{DisabledOcr, PlainTextExtractor};
use nutriparse_parser::Pipeline;
use nutriparse_protocol::AppConfig;
use nutriparse_store::{JobStore, MemoryJobStore, SqliteJobStore};
use std::sync::Arc;

/// Wire up the shared components from configuration. `:memory:` selects
/// the in-memory backends (useful for demos and smoke tests).
pub fn build_components(
    config: &AppConfig,
) -> Result<(Arc<dyn JobStore>, Arc<dyn BlobStore>, Arc<Pipeline>)> {
    let store: Arc<dyn JobStore> = if config.storage.db_path.as_os_str() == ":memory:" {
        Arc::new(MemoryJobStore::new())
    } else {
        Arc::new(
            SqliteJobStore::open(&config.storage.db_path).with_context(|| {
                format!("failed to open store at {}", config.storage.db_path.display())
            })?,
        )
    };

    let blob: Arc<dyn BlobStore> = if config.storage.db_path.as_os_str() == ":memory:" {
        Arc::new(MemoryBlobStore::new())
    } else {
        std::fs::create_dir_all(&config.storage.upload_dir).with_context(|| {
            format!(
                "failed to create upload dir {}",
                config.storage.upload_dir.display()
            )
        })?;
        Arc::new(FsBlobStore::new(&config.storage.upload_dir))
    };

    let pipeline = Arc::new(Pipeline::new(
        Arc::new(PlainTextExtractor::new()),
        Arc::new(DisabledOcr),
        config.parser.clone(),
    ));

    Ok((store, blob, pipeline))
}
