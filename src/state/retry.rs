//! Optimistic-concurrency retry for load-modify-save sequences.
//!
//! `operation` is re-run from scratch after every ETag conflict, so it must
//! reload whatever it modifies. Any other error is returned immediately.

use std::future::Future;
use std::time::Duration;

use super::errors::StateResult;

/// Attempts before a conflict is surfaced to the caller
pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;

/// Back-off before retry number `attempt` (1-based), with `jitter` in `[0, 1)`.
///
/// `min(0.25 * attempt, 1.0) * (1 + jitter * 0.25)` seconds.
pub fn backoff_delay(attempt: u32, jitter: f64) -> Duration {
    let base = (0.25 * f64::from(attempt)).min(1.0);
    let jitter = jitter.clamp(0.0, 1.0);
    Duration::from_secs_f64(base * (1.0 + jitter * 0.25))
}

/// Run `operation` until it succeeds, fails with a non-conflict error, or
/// `max_attempts` attempts have been made. The last error is returned as-is.
pub async fn with_etag_retry<T, F, Fut>(max_attempts: u32, mut operation: F) -> StateResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = StateResult<T>>,
{
    let max_attempts = max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_conflict() && attempt < max_attempts => {
                let delay = backoff_delay(attempt, rand::random::<f64>());
                tracing::debug!(attempt, max_attempts, delay_ms = delay.as_millis() as u64, "ETag conflict, retrying: {}", e);
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => {
                if e.is_conflict() {
                    tracing::warn!(attempts = attempt, "giving up after repeated ETag conflicts: {}", e);
                }
                return Err(e);
            }
        }
    }
}
