mod backend;
mod in_memory;
mod retry;

pub use backend::{
    Ack, BackendError, ExistsCheck, LocalFetch, LocalType, RemoteFetch, StorageBackend,
    StorageLocation,
};
pub use in_memory::{FailureKind, InMemoryBackend};
pub use retry::RetryPolicy;
