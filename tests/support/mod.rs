//! Shared fixtures for the integration tests: a context harness around the
//! in-memory backend, a scriptable stub child for fan-in tests, and small
//! synchronization helpers.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Arc;
use std::time::Duration;

use treesync::{
    Context, EngineError, Executor, InMemoryBackend, LocalType, ObjectCore, OpCallback,
    OperationState, StorageLocation, TreeObject,
};

pub const WAIT: Duration = Duration::from_secs(2);

pub fn harness() -> (Context, InMemoryBackend) {
    let executor = Executor::new(4);
    let backend = InMemoryBackend::new(&executor);
    let ctx = Context::new(executor, Arc::new(backend.clone()));
    (ctx, backend)
}

pub fn harness_with_latency(latency: Duration) -> (Context, InMemoryBackend) {
    let executor = Executor::new(4);
    let backend = InMemoryBackend::new(&executor).with_latency(latency);
    let ctx = Context::new(executor, Arc::new(backend.clone()));
    (ctx, backend)
}

/// Channel pair for collecting a single completion callback.
pub fn completion() -> (OpCallback, Receiver<Option<EngineError>>) {
    let (tx, rx): (Sender<Option<EngineError>>, _) = channel();
    (Box::new(move |error| tx.send(error).unwrap()), rx)
}

/// Wait for a completion, panicking on timeout.
pub fn wait(rx: &Receiver<Option<EngineError>>) -> Option<EngineError> {
    rx.recv_timeout(WAIT).expect("operation did not complete")
}

/// Poll until `check` passes or the timeout elapses.
pub fn wait_until(check: impl Fn() -> bool) {
    let deadline = std::time::Instant::now() + WAIT;
    while !check() {
        if std::time::Instant::now() > deadline {
            panic!("condition not reached in time");
        }
        std::thread::sleep(Duration::from_millis(5));
    }
}

/// A scriptable tree entity: completes each recursive operation after a
/// configurable delay, with a configurable error, and counts invocations.
pub struct StubChild {
    core: ObjectCore,
    executor: Arc<Executor>,
    delay: Duration,
    fail_with: Option<EngineError>,
    pub retrieve_calls: AtomicUsize,
    pub save_calls: AtomicUsize,
    pub delete_calls: AtomicUsize,
}

impl StubChild {
    pub fn new(executor: &Arc<Executor>, id: &str) -> Arc<Self> {
        Self::with_behavior(executor, id, Duration::ZERO, None)
    }

    pub fn with_behavior(
        executor: &Arc<Executor>,
        id: &str,
        delay: Duration,
        fail_with: Option<EngineError>,
    ) -> Arc<Self> {
        Arc::new(StubChild {
            core: ObjectCore::new("stub", id, OperationState::Modified),
            executor: Arc::clone(executor),
            delay,
            fail_with,
            retrieve_calls: AtomicUsize::new(0),
            save_calls: AtomicUsize::new(0),
            delete_calls: AtomicUsize::new(0),
        })
    }

    fn respond(&self, done: OpCallback) {
        let result = self.fail_with.clone();
        self.executor.execute_after(self.delay, move || done(result));
    }
}

impl TreeObject for StubChild {
    fn retrieve_recursive(
        self: Arc<Self>,
        _location: StorageLocation,
        _local_type: LocalType,
        _force: bool,
        done: OpCallback,
    ) {
        self.retrieve_calls.fetch_add(1, Ordering::SeqCst);
        self.respond(done);
    }

    fn save_recursive(
        self: Arc<Self>,
        _location: StorageLocation,
        _local_type: LocalType,
        done: OpCallback,
    ) {
        self.save_calls.fetch_add(1, Ordering::SeqCst);
        self.respond(done);
    }

    fn delete_recursive(
        self: Arc<Self>,
        _location: StorageLocation,
        _local_type: LocalType,
        done: OpCallback,
    ) {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        self.respond(done);
    }

    fn object_id(&self) -> String {
        self.core.id().to_string()
    }

    fn object_kind(&self) -> &'static str {
        "stub"
    }

    fn core(&self) -> &ObjectCore {
        &self.core
    }
}
