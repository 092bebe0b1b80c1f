//! Worker pool: leases jobs, runs the parsing pipeline, commits results,
//! and keeps the queue healthy (lease renewal, expired-lease sweeping,
//! retry backoff, terminal callbacks).

mod backoff;
mod callback;
mod pool;
mod progress;
mod sweeper;

pub use backoff::{retry_delay, IdleBackoff};
pub use callback::CallbackClient;
pub use pool::{WorkerPool, WorkerSettings};
pub use progress::CoalescingProgress;
pub use sweeper::run_sweeper;
