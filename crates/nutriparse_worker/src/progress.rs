//! Progress forwarding from the pipeline to the job store, coalesced to
//! at most one write per 500 ms per job. Stage transitions always flush so
//! the visible stage label never lags.

use nutriparse_ids::JobId;
use nutriparse_parser::ProgressSink;
use nutriparse_store::JobStore;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::warn;

const COALESCE_WINDOW: Duration = Duration::from_millis(500);

struct State {
    last_write: Option<Instant>,
    last_stage: Option<String>,
}

pub struct CoalescingProgress {
    store: Arc<dyn JobStore>,
    job_id: JobId,
    state: Mutex<State>,
}

impl CoalescingProgress {
    pub fn new(store: Arc<dyn JobStore>, job_id: JobId) -> Self {
        Self {
            store,
            job_id,
            state: Mutex::new(State {
                last_write: None,
                last_stage: None,
            }),
        }
    }
}

impl ProgressSink for CoalescingProgress {
    fn report(&self, stage: &str, percent: u8) {
        let now = Instant::now();
        {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            let stage_changed = state.last_stage.as_deref() != Some(stage);
            let window_open = state
                .last_write
                .map(|at| now.duration_since(at) < COALESCE_WINDOW)
                .unwrap_or(false);
            if window_open && !stage_changed {
                return;
            }
            state.last_write = Some(now);
            state.last_stage = Some(stage.to_string());
        }
        if let Err(err) = self.store.update_progress(&self.job_id, stage, percent) {
            warn!(job_id = %self.job_id, error = %err, "progress write failed");
        }
    }
}
