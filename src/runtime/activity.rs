//! Activity registration types and at-least-once execution.

use futures_util::future::BoxFuture;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use super::history::ActivityOutcome;

/// What an activity knows about the call it is serving
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivityContext {
    pub instance_id: String,
    pub activity: String,
    /// 1-based attempt number; greater than 1 means an earlier attempt failed
    pub attempt: u32,
}

pub(crate) type ActivityFn =
    Arc<dyn Fn(ActivityContext, Value) -> BoxFuture<'static, anyhow::Result<Value>> + Send + Sync>;

/// Retry policy applied to every activity call before its failure is recorded
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ActivityRetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub backoff_coefficient: f64,
    pub max_delay: Duration,
}

impl Default for ActivityRetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(500),
            backoff_coefficient: 2.0,
            max_delay: Duration::from_secs(10),
        }
    }
}

impl ActivityRetryPolicy {
    /// Single attempt, failures are recorded immediately
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay after failed attempt `attempt` (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self.backoff_coefficient.max(1.0).powi(attempt.saturating_sub(1) as i32);
        self.initial_delay.mul_f64(factor).min(self.max_delay)
    }
}

/// Run `activity` under `policy`, turning the final error into a recorded failure
pub(crate) async fn execute_activity(
    activity: &ActivityFn,
    policy: &ActivityRetryPolicy,
    instance_id: &str,
    name: &str,
    input: &Value,
) -> ActivityOutcome {
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        let ctx = ActivityContext {
            instance_id: instance_id.to_string(),
            activity: name.to_string(),
            attempt,
        };

        match activity(ctx, input.clone()).await {
            Ok(result) => return ActivityOutcome::Completed { result },
            Err(e) if attempt < max_attempts => {
                let delay = policy.delay_for(attempt);
                tracing::warn!(
                    instance_id,
                    activity = name,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "activity attempt failed, retrying: {:#}",
                    e
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => {
                tracing::error!(instance_id, activity = name, attempt, "activity failed: {:#}", e);
                return ActivityOutcome::Failed {
                    error: format!("{:#}", e),
                };
            }
        }
    }
}
