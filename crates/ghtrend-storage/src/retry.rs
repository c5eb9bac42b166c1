//! Bounded retry with exponential backoff, shared by every network call.

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use ghtrend_core::{EventSink, PipelineEvent, TracingSink};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Retryable,
    NonRetryable,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(2),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Delay after the failed attempt `attempt` (1-based): `d0 * b^(attempt-1)`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let factor = self.multiplier.max(0.0).powi(exponent);
        let secs = self.initial_delay.as_secs_f64() * factor;
        if secs.is_finite() {
            Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
        } else {
            Duration::MAX
        }
    }
}

/// Runs an operation until it succeeds, fails with a non-retryable error, or
/// exhausts `max_attempts`. Every scheduled retry is reported to the sink.
#[derive(Clone)]
pub struct RetryExecutor {
    policy: RetryPolicy,
    sink: Arc<dyn EventSink>,
}

impl std::fmt::Debug for RetryExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryExecutor")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl Default for RetryExecutor {
    fn default() -> Self {
        Self::new(RetryPolicy::default(), Arc::new(TracingSink))
    }
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy, sink: Arc<dyn EventSink>) -> Self {
        Self { policy, sink }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn sink(&self) -> &Arc<dyn EventSink> {
        &self.sink
    }

    pub async fn run<T, E, Op, Fut, C>(&self, operation: &str, classify: C, mut op: Op) -> Result<T, E>
    where
        Op: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        C: Fn(&E) -> RetryDisposition,
        E: Display,
    {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            let err = match op().await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            if classify(&err) == RetryDisposition::NonRetryable || attempt >= max_attempts {
                return Err(err);
            }

            let delay = self.policy.delay_for_attempt(attempt);
            self.sink.emit(&PipelineEvent::RetryScheduled {
                operation: operation.to_string(),
                attempt,
                max_attempts,
                delay,
                error: err.to_string(),
            });
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}
