mod context;
mod entity;
mod error;
mod executor;
mod object;
mod prefetch;
mod state;
mod storage;

pub use context::Context;
pub use entity::{
    Category, CategoryData, Journal, JournalData, Markup, MarkupData, MarkupKind, Media,
    MediaData, MediaKind, Moment, MomentData, TreeObject, Venue, VenueData,
};
pub use error::EngineError;
pub use executor::Executor;
pub use object::{ChildRound, ErrorPolicy, ObjectCore, OpCallback};
pub use prefetch::{PrefetchContext, PrefetchDelegate, PrefetchScheduler, PrefetchTicket};
pub use state::OperationState;
pub use storage::{
    Ack, BackendError, ExistsCheck, FailureKind, InMemoryBackend, LocalFetch, LocalType,
    RemoteFetch, RetryPolicy, StorageBackend, StorageLocation,
};
