use std::sync::{Arc, Mutex};

use crate::context::Context;
use crate::entity::TreeObject;
use crate::error::EngineError;
use crate::executor::Executor;
use crate::storage::{LocalType, StorageLocation};

/// Completion callback for one recursive operation. Fires exactly once, on
/// an executor worker thread.
pub type OpCallback = Box<dyn FnOnce(Option<EngineError>) + Send + 'static>;

/// How child errors are aggregated when a fan-out round completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorPolicy {
    /// Report the first child error to finish; later errors are recorded on
    /// the children themselves but not propagated.
    FirstWins,
    /// Report every child error, wrapped in `EngineError::Multiple` when
    /// there is more than one.
    CollectAll,
}

struct RoundInner {
    outstanding: usize,
    sealed: bool,
    fired: bool,
    errors: Vec<EngineError>,
    on_complete: Option<OpCallback>,
}

/// One fan-out/fan-in round of child operations.
///
/// A round is created per recursive operation, children are registered
/// against it (each registration increments the outstanding counter under
/// the round mutex), and `seal()` marks registration finished. The
/// aggregate callback fires exactly once — when the round is sealed and the
/// counter has drained to zero — and is always re-dispatched through the
/// executor, so a round with zero children still completes asynchronously.
///
/// Sealing is what makes the zero-check safe: a child that completes before
/// its sibling is registered cannot fire the round early.
pub struct ChildRound {
    executor: Arc<Executor>,
    policy: ErrorPolicy,
    inner: Mutex<RoundInner>,
}

impl ChildRound {
    pub fn new(ctx: &Context, on_complete: OpCallback) -> Arc<Self> {
        Self::with_policy(Arc::clone(ctx.executor()), ctx.error_policy(), on_complete)
    }

    pub fn with_policy(
        executor: Arc<Executor>,
        policy: ErrorPolicy,
        on_complete: OpCallback,
    ) -> Arc<Self> {
        Arc::new(ChildRound {
            executor,
            policy,
            inner: Mutex::new(RoundInner {
                outstanding: 0,
                sealed: false,
                fired: false,
                errors: Vec::new(),
                on_complete: Some(on_complete),
            }),
        })
    }

    /// Register one unit of child work and get the callback that marks it
    /// complete. The returned callback must be invoked exactly once.
    pub fn track(self: &Arc<Self>) -> OpCallback {
        {
            let mut inner = self.inner.lock().unwrap();
            debug_assert!(!inner.sealed, "child registered after seal");
            inner.outstanding += 1;
        }
        let round = Arc::clone(self);
        Box::new(move |error| round.child_completed(error))
    }

    /// Fan out a recursive retrieval to `child`.
    pub fn retrieve_child(
        self: &Arc<Self>,
        child: Arc<dyn TreeObject>,
        location: StorageLocation,
        local_type: LocalType,
        force: bool,
    ) {
        let done = self.track();
        child.retrieve_recursive(location, local_type, force, done);
    }

    /// Fan out a recursive save to `child`.
    pub fn save_child(
        self: &Arc<Self>,
        child: Arc<dyn TreeObject>,
        location: StorageLocation,
        local_type: LocalType,
    ) {
        let done = self.track();
        child.save_recursive(location, local_type, done);
    }

    /// Fan out a recursive delete to `child`.
    pub fn delete_child(
        self: &Arc<Self>,
        child: Arc<dyn TreeObject>,
        location: StorageLocation,
        local_type: LocalType,
    ) {
        let done = self.track();
        child.delete_recursive(location, local_type, done);
    }

    /// Mark registration finished. Once sealed and drained, the aggregate
    /// callback fires.
    pub fn seal(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.sealed = true;
        self.fire_if_drained(&mut inner);
    }

    /// Children registered but not yet completed. Diagnostic only.
    pub fn outstanding(&self) -> usize {
        self.inner.lock().unwrap().outstanding
    }

    fn child_completed(&self, error: Option<EngineError>) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(error) = error {
            // First error wins; the rest are still recorded for the
            // collect-all policy.
            inner.errors.push(error);
        }
        inner.outstanding -= 1;
        self.fire_if_drained(&mut inner);
    }

    fn fire_if_drained(&self, inner: &mut RoundInner) {
        if inner.fired || !inner.sealed || inner.outstanding != 0 {
            return;
        }
        inner.fired = true;
        let callback = match inner.on_complete.take() {
            Some(callback) => callback,
            None => return,
        };
        let error = match self.policy {
            ErrorPolicy::FirstWins => inner.errors.first().cloned(),
            ErrorPolicy::CollectAll => {
                EngineError::from_collected(std::mem::take(&mut inner.errors))
            }
        };
        self.executor.execute(move || callback(error));
    }
}
