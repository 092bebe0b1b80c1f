//! Backoff policies for idle polling and failure retries.

use rand::Rng;
use std::time::Duration;

const IDLE_FLOOR: Duration = Duration::from_millis(50);
const IDLE_CEIL: Duration = Duration::from_secs(2);
const RETRY_BASE_SECS: u64 = 30;
const RETRY_CEIL_SECS: u64 = 600;

/// Jittered exponential backoff for idle lease polling, bounded at 2 s so
/// a newly queued job is picked up promptly.
#[derive(Debug)]
pub struct IdleBackoff {
    current: Duration,
}

impl Default for IdleBackoff {
    fn default() -> Self {
        Self::new()
    }
}

impl IdleBackoff {
    pub fn new() -> Self {
        Self {
            current: IDLE_FLOOR,
        }
    }

    /// Call after a lease returned nothing.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(IDLE_CEIL);
        jitter(delay)
    }

    /// Call after work was found.
    pub fn reset(&mut self) {
        self.current = IDLE_FLOOR;
    }
}

/// ±20% jitter so a fleet of idle workers does not poll in lockstep.
fn jitter(base: Duration) -> Duration {
    let millis = base.as_millis() as f64;
    let factor = rand::thread_rng().gen_range(0.8..1.2);
    Duration::from_millis((millis * factor) as u64)
}

/// Failure retry delay: `min(30s * 2^(attempts-1), 10m)`.
pub fn retry_delay(attempts: u32) -> Duration {
    let exponent = attempts.saturating_sub(1).min(16);
    let secs = RETRY_BASE_SECS.saturating_mul(1_u64 << exponent);
    Duration::from_secs(secs.min(RETRY_CEIL_SECS))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_delay_doubles_and_caps() {
        assert_eq!(retry_delay(1), Duration::from_secs(30));
        assert_eq!(retry_delay(2), Duration::from_secs(60));
        assert_eq!(retry_delay(3), Duration::from_secs(120));
        assert_eq!(retry_delay(6), Duration::from_secs(600));
        assert_eq!(retry_delay(40), Duration::from_secs(600));
    }

    #[test]
    fn idle_backoff_grows_to_ceiling() {
        let mut backoff = IdleBackoff::new();
        let mut last = Duration::ZERO;
        for _ in 0..10 {
            last = backoff.next_delay();
        }
        // Ceiling of 2 s with 20% jitter headroom.
        assert!(last <= Duration::from_millis(2400), "{last:?}");
        assert!(last >= Duration::from_millis(1600), "{last:?}");

        backoff.reset();
        assert!(backoff.next_delay() < Duration::from_millis(100));
    }
}
