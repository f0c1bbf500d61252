use std::sync::Arc;
use std::time::Duration;

use super::backend::BackendError;
use crate::executor::Executor;

type Attempt<T> = Box<dyn FnOnce(Result<T, BackendError>) + Send + 'static>;
type Op<T> = Arc<dyn Fn(Attempt<T>) + Send + Sync + 'static>;

/// Bounded-retry policy for remote store calls.
///
/// Only retryable failures (see `BackendError::is_retryable`) are retried;
/// retries are re-dispatched through the executor after a fixed delay so no
/// worker thread is parked waiting.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 3,
            delay: Duration::from_millis(25),
        }
    }
}

impl RetryPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total attempts including the first (minimum 1).
    pub fn with_max_attempts(mut self, max: u32) -> Self {
        self.max_attempts = max.max(1);
        self
    }

    /// Delay between attempts.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Drive `op` until it succeeds, fails permanently, or attempts run out.
    /// `op` is invoked with a completion callback and must call it exactly
    /// once per invocation.
    pub fn run<T: Send + 'static>(
        &self,
        executor: &Arc<Executor>,
        op: impl Fn(Attempt<T>) + Send + Sync + 'static,
        done: Attempt<T>,
    ) {
        attempt(self.clone(), Arc::clone(executor), Arc::new(op), 1, done);
    }
}

fn attempt<T: Send + 'static>(
    policy: RetryPolicy,
    executor: Arc<Executor>,
    op: Op<T>,
    attempt_no: u32,
    done: Attempt<T>,
) {
    let retry_op = Arc::clone(&op);
    op(Box::new(move |result| match result {
        Err(err) if err.is_retryable() && attempt_no < policy.max_attempts => {
            let delay = policy.delay;
            let rescheduler = Arc::clone(&executor);
            rescheduler.execute_after(delay, move || {
                attempt(policy, executor, retry_op, attempt_no + 1, done);
            });
        }
        result => done(result),
    }));
}
