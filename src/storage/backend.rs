use std::fmt;

/// Which stores an operation targets: the local cache/draft store only, or
/// local first and then the remote server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageLocation {
    Local,
    Both,
}

/// Local namespace an object is pinned under. An object may live under both
/// namespaces at once with independent lifecycles — a story being drafted
/// keeps its draft copy even while a read-only cached copy exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LocalType {
    Cache,
    Draft,
}

impl LocalType {
    pub fn as_str(self) -> &'static str {
        match self {
            LocalType::Cache => "cache",
            LocalType::Draft => "draft",
        }
    }
}

impl fmt::Display for LocalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// The object does not exist in the queried store.
    NotFound(String),
    /// Network or disk contention; a delayed retry may succeed.
    Transient(String),
    /// Rejected by the store; retrying the same request will not help.
    Permanent(String),
}

impl BackendError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, BackendError::Transient(_))
    }
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendError::NotFound(id) => write!(f, "object {} not found", id),
            BackendError::Transient(message) => write!(f, "transient failure: {}", message),
            BackendError::Permanent(message) => write!(f, "permanent failure: {}", message),
        }
    }
}

impl std::error::Error for BackendError {}

pub type LocalFetch = Box<dyn FnOnce(Result<Option<Vec<u8>>, BackendError>) + Send + 'static>;
pub type RemoteFetch = Box<dyn FnOnce(Result<Vec<u8>, BackendError>) + Send + 'static>;
pub type Ack = Box<dyn FnOnce(Result<(), BackendError>) + Send + 'static>;
pub type ExistsCheck = Box<dyn FnOnce(Result<bool, BackendError>) + Send + 'static>;

/// External collaborator abstracting the local cache/draft store and the
/// remote server store.
///
/// Every operation is asynchronous: the callback fires on an arbitrary
/// worker thread once the store has answered. A local miss is `Ok(None)`
/// from `retrieve_local`; a remote miss is `Err(NotFound)` from
/// `retrieve_remote`.
pub trait StorageBackend: Send + Sync {
    fn retrieve_local(&self, id: &str, namespace: LocalType, done: LocalFetch);
    fn retrieve_remote(&self, id: &str, done: RemoteFetch);
    fn save_local(&self, id: &str, namespace: LocalType, payload: Vec<u8>, done: Ack);
    fn save_remote(&self, id: &str, payload: Vec<u8>, done: Ack);
    fn delete_local(&self, id: &str, namespace: LocalType, done: Ack);
    fn delete_remote(&self, id: &str, done: Ack);
    fn exists_remote(&self, id: &str, done: ExistsCheck);
}
