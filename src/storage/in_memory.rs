//! In-memory storage backend for testing and single-process scenarios.
//!
//! Answers every call asynchronously on the executor, like a real store
//! would. Tests can seed either store directly, inject failures for the
//! next N operations of a kind, and read back the operation log to assert
//! ordering (e.g. that a parent was saved only after its children).

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::thread;
use std::time::Duration;

use super::backend::{
    Ack, BackendError, ExistsCheck, LocalFetch, LocalType, RemoteFetch, StorageBackend,
};
use crate::executor::Executor;

/// Which backend operation a planned failure applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    RetrieveLocal,
    RetrieveRemote,
    SaveLocal,
    SaveRemote,
    DeleteLocal,
    DeleteRemote,
    ExistsRemote,
}

struct PlannedFailure {
    kind: FailureKind,
    id: Option<String>,
    remaining: u32,
    error: BackendError,
}

pub struct InMemoryBackend {
    local: Arc<RwLock<HashMap<(LocalType, String), Vec<u8>>>>,
    remote: Arc<RwLock<HashMap<String, Vec<u8>>>>,
    failures: Arc<Mutex<Vec<PlannedFailure>>>,
    op_log: Arc<Mutex<Vec<String>>>,
    executor: Arc<Executor>,
    latency: Option<Duration>,
}

impl Clone for InMemoryBackend {
    fn clone(&self) -> Self {
        InMemoryBackend {
            local: Arc::clone(&self.local),
            remote: Arc::clone(&self.remote),
            failures: Arc::clone(&self.failures),
            op_log: Arc::clone(&self.op_log),
            executor: Arc::clone(&self.executor),
            latency: self.latency,
        }
    }
}

impl InMemoryBackend {
    pub fn new(executor: &Arc<Executor>) -> Self {
        InMemoryBackend {
            local: Arc::new(RwLock::new(HashMap::new())),
            remote: Arc::new(RwLock::new(HashMap::new())),
            failures: Arc::new(Mutex::new(Vec::new())),
            op_log: Arc::new(Mutex::new(Vec::new())),
            executor: Arc::clone(executor),
            latency: None,
        }
    }

    /// Add an artificial delay before every operation completes.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Fail the next `count` operations of `kind` with `error`.
    pub fn fail_next(&self, kind: FailureKind, count: u32, error: BackendError) {
        self.failures.lock().unwrap().push(PlannedFailure {
            kind,
            id: None,
            remaining: count,
            error,
        });
    }

    /// Fail the next `count` operations of `kind` that target `id`.
    pub fn fail_next_for(&self, kind: FailureKind, id: &str, count: u32, error: BackendError) {
        self.failures.lock().unwrap().push(PlannedFailure {
            kind,
            id: Some(id.to_string()),
            remaining: count,
            error,
        });
    }

    pub fn seed_local(&self, id: &str, namespace: LocalType, payload: Vec<u8>) {
        self.local
            .write()
            .unwrap()
            .insert((namespace, id.to_string()), payload);
    }

    pub fn seed_remote(&self, id: &str, payload: Vec<u8>) {
        self.remote.write().unwrap().insert(id.to_string(), payload);
    }

    pub fn local_contains(&self, id: &str, namespace: LocalType) -> bool {
        self.local
            .read()
            .unwrap()
            .contains_key(&(namespace, id.to_string()))
    }

    pub fn remote_contains(&self, id: &str) -> bool {
        self.remote.read().unwrap().contains_key(id)
    }

    /// Operations the store answered, in completion order, as
    /// `"<op> <id>"` strings (local ops include the namespace, e.g.
    /// `"save_local draft j1"`). Failure-injected calls are not recorded.
    pub fn op_log(&self) -> Vec<String> {
        self.op_log.lock().unwrap().clone()
    }

    /// Count of completed operations whose log line starts with `prefix`.
    pub fn op_count(&self, prefix: &str) -> usize {
        self.op_log
            .lock()
            .unwrap()
            .iter()
            .filter(|line| line.starts_with(prefix))
            .count()
    }

    pub fn clear(&self) {
        self.local.write().unwrap().clear();
        self.remote.write().unwrap().clear();
        self.failures.lock().unwrap().clear();
        self.op_log.lock().unwrap().clear();
    }

    fn planned_failure(&self, kind: FailureKind, id: &str) -> Option<BackendError> {
        let mut failures = self.failures.lock().unwrap();
        for failure in failures.iter_mut() {
            let id_matches = failure.id.as_deref().map(|f| f == id).unwrap_or(true);
            if failure.kind == kind && failure.remaining > 0 && id_matches {
                failure.remaining -= 1;
                return Some(failure.error.clone());
            }
        }
        failures.retain(|failure| failure.remaining > 0);
        None
    }

    fn dispatch(&self, work: impl FnOnce() + Send + 'static) {
        let latency = self.latency;
        self.executor.execute(move || {
            if let Some(latency) = latency {
                thread::sleep(latency);
            }
            work();
        });
    }

    fn log(op_log: &Mutex<Vec<String>>, line: String) {
        op_log.lock().unwrap().push(line);
    }
}

impl StorageBackend for InMemoryBackend {
    fn retrieve_local(&self, id: &str, namespace: LocalType, done: LocalFetch) {
        let this = self.clone();
        let id = id.to_string();
        self.dispatch(move || {
            if let Some(error) = this.planned_failure(FailureKind::RetrieveLocal, &id) {
                return done(Err(error));
            }
            Self::log(
                &this.op_log,
                format!("retrieve_local {} {}", namespace.as_str(), id),
            );
            let payload = this
                .local
                .read()
                .unwrap()
                .get(&(namespace, id.clone()))
                .cloned();
            done(Ok(payload));
        });
    }

    fn retrieve_remote(&self, id: &str, done: RemoteFetch) {
        let this = self.clone();
        let id = id.to_string();
        self.dispatch(move || {
            if let Some(error) = this.planned_failure(FailureKind::RetrieveRemote, &id) {
                return done(Err(error));
            }
            Self::log(&this.op_log, format!("retrieve_remote {}", id));
            let payload = this.remote.read().unwrap().get(&id).cloned();
            match payload {
                Some(payload) => done(Ok(payload)),
                None => done(Err(BackendError::NotFound(id))),
            }
        });
    }

    fn save_local(&self, id: &str, namespace: LocalType, payload: Vec<u8>, done: Ack) {
        let this = self.clone();
        let id = id.to_string();
        self.dispatch(move || {
            if let Some(error) = this.planned_failure(FailureKind::SaveLocal, &id) {
                return done(Err(error));
            }
            this.local
                .write()
                .unwrap()
                .insert((namespace, id.clone()), payload);
            Self::log(
                &this.op_log,
                format!("save_local {} {}", namespace.as_str(), id),
            );
            done(Ok(()));
        });
    }

    fn save_remote(&self, id: &str, payload: Vec<u8>, done: Ack) {
        let this = self.clone();
        let id = id.to_string();
        self.dispatch(move || {
            if let Some(error) = this.planned_failure(FailureKind::SaveRemote, &id) {
                return done(Err(error));
            }
            this.remote.write().unwrap().insert(id.clone(), payload);
            Self::log(&this.op_log, format!("save_remote {}", id));
            done(Ok(()));
        });
    }

    fn delete_local(&self, id: &str, namespace: LocalType, done: Ack) {
        let this = self.clone();
        let id = id.to_string();
        self.dispatch(move || {
            if let Some(error) = this.planned_failure(FailureKind::DeleteLocal, &id) {
                return done(Err(error));
            }
            this.local.write().unwrap().remove(&(namespace, id.clone()));
            Self::log(
                &this.op_log,
                format!("delete_local {} {}", namespace.as_str(), id),
            );
            done(Ok(()));
        });
    }

    fn delete_remote(&self, id: &str, done: Ack) {
        let this = self.clone();
        let id = id.to_string();
        self.dispatch(move || {
            if let Some(error) = this.planned_failure(FailureKind::DeleteRemote, &id) {
                return done(Err(error));
            }
            this.remote.write().unwrap().remove(&id);
            Self::log(&this.op_log, format!("delete_remote {}", id));
            done(Ok(()));
        });
    }

    fn exists_remote(&self, id: &str, done: ExistsCheck) {
        let this = self.clone();
        let id = id.to_string();
        self.dispatch(move || {
            if let Some(error) = this.planned_failure(FailureKind::ExistsRemote, &id) {
                return done(Err(error));
            }
            Self::log(&this.op_log, format!("exists_remote {}", id));
            let exists = this.remote.read().unwrap().contains_key(&id);
            done(Ok(exists));
        });
    }
}
