use std::sync::Arc;

use crate::executor::Executor;
use crate::object::ErrorPolicy;
use crate::storage::{RetryPolicy, StorageBackend};

/// Injected collaborators for the engine.
///
/// There is no process-wide state anywhere in this crate: whatever consumes
/// an executor, a storage backend, or a retry policy receives them through a
/// `Context` handed to its constructor. Cloning is cheap (everything is
/// Arc-backed) and clones share the same collaborators.
#[derive(Clone)]
pub struct Context {
    executor: Arc<Executor>,
    backend: Arc<dyn StorageBackend>,
    retry: RetryPolicy,
    error_policy: ErrorPolicy,
}

impl Context {
    pub fn new(executor: Arc<Executor>, backend: Arc<dyn StorageBackend>) -> Self {
        Context {
            executor,
            backend,
            retry: RetryPolicy::default(),
            error_policy: ErrorPolicy::FirstWins,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_error_policy(mut self, policy: ErrorPolicy) -> Self {
        self.error_policy = policy;
        self
    }

    pub fn executor(&self) -> &Arc<Executor> {
        &self.executor
    }

    pub fn backend(&self) -> &Arc<dyn StorageBackend> {
        &self.backend
    }

    pub fn retry(&self) -> &RetryPolicy {
        &self.retry
    }

    pub fn error_policy(&self) -> ErrorPolicy {
        self.error_policy
    }
}
