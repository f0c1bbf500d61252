mod category;
mod journal;
mod markup;
mod media;
mod moment;
mod venue;

pub use category::{Category, CategoryData};
pub use journal::{Journal, JournalData};
pub use markup::{Markup, MarkupData, MarkupKind};
pub use media::{Media, MediaData, MediaKind};
pub use moment::{Moment, MomentData};
pub use venue::{Venue, VenueData};

use std::sync::Arc;

use serde::de::DeserializeOwned;

use crate::error::EngineError;
use crate::object::{ObjectCore, OpCallback};
use crate::Context;
use crate::state::OperationState;
use crate::storage::{LocalType, StorageLocation};

/// Capability interface every tree entity exposes to the engine.
///
/// The three recursive operations take `Arc<Self>` receivers so the engine
/// can hold and drive heterogeneous children as `Arc<dyn TreeObject>`.
/// Completion callbacks fire exactly once, on an executor worker thread.
pub trait TreeObject: Send + Sync {
    fn retrieve_recursive(
        self: Arc<Self>,
        location: StorageLocation,
        local_type: LocalType,
        force: bool,
        done: OpCallback,
    );

    fn save_recursive(
        self: Arc<Self>,
        location: StorageLocation,
        local_type: LocalType,
        done: OpCallback,
    );

    fn delete_recursive(
        self: Arc<Self>,
        location: StorageLocation,
        local_type: LocalType,
        done: OpCallback,
    );

    /// Storage identifier, unique across all entities.
    fn object_id(&self) -> String;

    /// Diagnostic tag naming the entity type.
    fn object_kind(&self) -> &'static str;

    /// The persistence state machine this entity wraps.
    fn core(&self) -> &ObjectCore;
}

/// Whether a child in this state has anything worth saving. Children that
/// are already synced are skipped to avoid redundant re-saves.
pub(crate) fn needs_save(state: OperationState) -> bool {
    matches!(
        state,
        OperationState::Modified | OperationState::SavedToLocal | OperationState::SaveError
    )
}

/// Decode a bitcode payload into an entity's data struct.
pub(crate) fn decode_payload<T: DeserializeOwned>(
    kind: &'static str,
    id: &str,
    bytes: &[u8],
) -> Result<T, EngineError> {
    bitcode::deserialize(bytes).map_err(|err| EngineError::Decode {
        kind,
        id: id.to_string(),
        message: err.to_string(),
    })
}

/// Encode an entity's data struct for storage.
pub(crate) fn encode_payload<T: serde::Serialize>(data: &T) -> Vec<u8> {
    bitcode::serialize(data).expect("failed to serialize payload")
}

/// Shared retrieval flow for leaf entities: fetch the payload, decode it,
/// hand it to `store`, and settle the retrieval on the core.
pub(crate) fn retrieve_leaf<O, T>(
    ctx: &Context,
    object: Arc<O>,
    location: StorageLocation,
    local_type: LocalType,
    force: bool,
    done: OpCallback,
    store: impl FnOnce(T) + Send + 'static,
) where
    O: TreeObject + 'static,
    T: DeserializeOwned,
{
    let target = Arc::clone(&object);
    crate::object::retrieve_payload(
        ctx,
        &object,
        location,
        local_type,
        force,
        Box::new(move |result| match result {
            Ok(None) => done(None),
            Ok(Some(bytes)) => {
                match decode_payload::<T>(target.object_kind(), &target.object_id(), &bytes) {
                    Ok(data) => {
                        store(data);
                        target.core().retrieval_completed(None);
                        done(None);
                    }
                    Err(error) => {
                        target.core().retrieval_completed(Some(error.clone()));
                        done(Some(error));
                    }
                }
            }
            Err(error) => done(Some(error)),
        }),
    );
}

/// Shared save flow for leaf entities. A leaf with no materialized data
/// has nothing to save and completes with success.
pub(crate) fn save_leaf<O, T>(
    ctx: &Context,
    object: Arc<O>,
    data: Option<T>,
    location: StorageLocation,
    local_type: LocalType,
    done: OpCallback,
) where
    O: TreeObject + 'static,
    T: serde::Serialize,
{
    match data {
        None => ctx.executor().execute(move || done(None)),
        Some(data) => {
            let payload = encode_payload(&data);
            crate::object::save_payload(ctx, &object, payload, location, local_type, done);
        }
    }
}

/// Shared delete flow for leaf entities.
pub(crate) fn delete_leaf<O>(
    ctx: &Context,
    object: Arc<O>,
    location: StorageLocation,
    local_type: LocalType,
    done: OpCallback,
) where
    O: TreeObject + 'static,
{
    if let Err(error) = object.core().mark_pending_delete() {
        ctx.executor().execute(move || done(Some(error)));
        return;
    }
    crate::object::delete_payload(ctx, &object, location, local_type, done);
}
