//! Expired-lease sweeper.
//!
//! Any process may run one; the store's guarded updates make concurrent
//! sweepers safe. Jobs whose worker vanished come back as `queued`, and
//! jobs out of attempts are failed with `exhausted_retries`.

use nutriparse_parser::CancellationToken;
use nutriparse_store::JobStore;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

pub async fn run_sweeper(
    store: Arc<dyn JobStore>,
    interval: Duration,
    max_attempts: u32,
    shutdown: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        if shutdown.is_cancelled() {
            break;
        }
        match store.sweep_expired(max_attempts) {
            Ok(report) if report.requeued > 0 || report.exhausted > 0 => {
                info!(
                    requeued = report.requeued,
                    exhausted = report.exhausted,
                    "sweeper pass"
                );
            }
            Ok(_) => {}
            Err(err) => error!(error = %err, "sweeper pass failed"),
        }
    }
}
