//! Leaf-level persistence flows: the non-recursive save/retrieve/delete of a
//! single entity's payload, driving the state machine on one side and the
//! storage backend (plus retry policy for the server half) on the other.
//!
//! Entity adapters serialize their payload, call into these flows, and
//! decode on the way back out; everything here is payload-agnostic bytes.

use std::sync::{Arc, Mutex};

use super::core::{RetrieveDisposition, SavePlan};
use super::round::OpCallback;
use crate::context::Context;
use crate::entity::TreeObject;
use crate::error::EngineError;
use crate::executor::Executor;
use crate::storage::{BackendError, LocalType, StorageLocation};

/// Completion for a payload retrieval. `Ok(None)` means the entity was
/// already materialized (or became materialized while this caller was
/// parked) and there are no new bytes to decode; `Ok(Some(bytes))` means
/// the caller must decode and then report `retrieval_completed` on the
/// core.
pub(crate) type FetchDone =
    Box<dyn FnOnce(Result<Option<Vec<u8>>, EngineError>) + Send + 'static>;

type FetchSlot = Arc<Mutex<Option<FetchDone>>>;

fn deliver(executor: &Arc<Executor>, slot: &FetchSlot, result: Result<Option<Vec<u8>>, EngineError>) {
    if let Some(done) = slot.lock().unwrap().take() {
        executor.execute(move || done(result));
    }
}

/// Retrieve one entity's payload bytes.
///
/// `Local` asks only the local store under the given namespace. `Both`
/// tries local first (unless `force`), falls back to the remote store
/// under the retry policy, and pins a fetched payload back into the local
/// namespace before completing. A pin failure is recorded on the core but
/// does not fail the retrieval — the payload is already in hand.
pub(crate) fn retrieve_payload<O>(
    ctx: &Context,
    object: &Arc<O>,
    location: StorageLocation,
    local_type: LocalType,
    force: bool,
    done: FetchDone,
) where
    O: TreeObject + ?Sized + 'static,
{
    let slot: FetchSlot = Arc::new(Mutex::new(Some(done)));
    let parked_slot = Arc::clone(&slot);
    let disposition = object.core().plan_retrieve(force, move || {
        Box::new(move |error: Option<EngineError>| {
            if let Some(done) = parked_slot.lock().unwrap().take() {
                match error {
                    None => done(Ok(None)),
                    Some(error) => done(Err(error)),
                }
            }
        })
    });

    match disposition {
        RetrieveDisposition::Parked => {}
        RetrieveDisposition::Skip => deliver(ctx.executor(), &slot, Ok(None)),
        RetrieveDisposition::Busy(error) => deliver(ctx.executor(), &slot, Err(error)),
        RetrieveDisposition::Fetch => fetch(ctx, object, location, local_type, force, slot),
    }
}

/// Retrieve for a caller that already claimed the entity (state moved from
/// `PendingRetrieval` to `Retrieving` through `retrieve_if_pending`), so
/// the planning gate is skipped.
pub(crate) fn retrieve_payload_claimed<O>(
    ctx: &Context,
    object: &Arc<O>,
    location: StorageLocation,
    local_type: LocalType,
    force: bool,
    done: FetchDone,
) where
    O: TreeObject + ?Sized + 'static,
{
    let slot: FetchSlot = Arc::new(Mutex::new(Some(done)));
    fetch(ctx, object, location, local_type, force, slot);
}

fn fetch<O>(
    ctx: &Context,
    object: &Arc<O>,
    location: StorageLocation,
    local_type: LocalType,
    force: bool,
    slot: FetchSlot,
) where
    O: TreeObject + ?Sized + 'static,
{
    let id = object.object_id();
    match location {
        StorageLocation::Local => {
            let ctx = ctx.clone();
            let object = Arc::clone(object);
            ctx.clone().backend().retrieve_local(
                &id,
                local_type,
                Box::new(move |result| match result {
                    Ok(Some(bytes)) => deliver(ctx.executor(), &slot, Ok(Some(bytes))),
                    Ok(None) => {
                        let error =
                            EngineError::Backend(BackendError::NotFound(object.object_id()));
                        object.core().retrieval_completed(Some(error.clone()));
                        deliver(ctx.executor(), &slot, Err(error));
                    }
                    Err(err) => {
                        let error = EngineError::Backend(err);
                        object.core().retrieval_completed(Some(error.clone()));
                        deliver(ctx.executor(), &slot, Err(error));
                    }
                }),
            );
        }
        StorageLocation::Both => {
            if force {
                fetch_remote(ctx, object, local_type, slot);
                return;
            }
            let ctx = ctx.clone();
            let object = Arc::clone(object);
            ctx.clone().backend().retrieve_local(
                &id,
                local_type,
                Box::new(move |result| match result {
                    Ok(Some(bytes)) => deliver(ctx.executor(), &slot, Ok(Some(bytes))),
                    // Local miss or local trouble: the server copy is the
                    // fallback either way.
                    Ok(None) | Err(_) => fetch_remote(&ctx, &object, local_type, slot),
                }),
            );
        }
    }
}

fn fetch_remote<O>(ctx: &Context, object: &Arc<O>, local_type: LocalType, slot: FetchSlot)
where
    O: TreeObject + ?Sized + 'static,
{
    let id = object.object_id();
    let backend = Arc::clone(ctx.backend());
    let fetch_id = id.clone();
    let op = move |attempt: Box<dyn FnOnce(Result<Vec<u8>, BackendError>) + Send>| {
        backend.retrieve_remote(&fetch_id, attempt);
    };

    let executor = Arc::clone(ctx.executor());
    let retry = ctx.retry().clone();
    let ctx = ctx.clone();
    let object = Arc::clone(object);
    retry.run(
        &executor,
        op,
        Box::new(move |result| match result {
            Ok(bytes) => {
                // Pin the fetched payload into the local namespace so the
                // next retrieval is served without the network.
                let pin = bytes.clone();
                let pin_ctx = ctx.clone();
                let pin_object = Arc::clone(&object);
                ctx.backend().save_local(
                    &id,
                    local_type,
                    pin,
                    Box::new(move |pin_result| {
                        if let Err(err) = pin_result {
                            pin_object.core().record_error(EngineError::Backend(err));
                        }
                        deliver(pin_ctx.executor(), &slot, Ok(Some(bytes)));
                    }),
                );
            }
            Err(err) => {
                let error = EngineError::Backend(err);
                object.core().retrieval_completed(Some(error.clone()));
                deliver(ctx.executor(), &slot, Err(error));
            }
        }),
    );
}

/// Save one entity's payload bytes, walking local-then-server as the
/// location demands and advancing/rolling back the state machine at each
/// step.
pub(crate) fn save_payload<O>(
    ctx: &Context,
    object: &Arc<O>,
    payload: Vec<u8>,
    location: StorageLocation,
    local_type: LocalType,
    done: OpCallback,
) where
    O: TreeObject + ?Sized + 'static,
{
    let plan = match object.core().plan_save(location) {
        Ok(plan) => plan,
        Err(error) => {
            ctx.executor().execute(move || done(Some(error)));
            return;
        }
    };

    match plan {
        SavePlan::Skip => ctx.executor().execute(move || done(None)),
        SavePlan::FromServer => save_remote(ctx, object, payload, done),
        SavePlan::FromLocal => {
            let id = object.object_id();
            let ctx = ctx.clone();
            let object = Arc::clone(object);
            let remote_payload = payload.clone();
            ctx.clone().backend().save_local(
                &id,
                local_type,
                payload,
                Box::new(move |result| match result {
                    Ok(()) => {
                        if object.core().local_save_succeeded(location) {
                            save_remote(&ctx, &object, remote_payload, done);
                        } else {
                            done(None);
                        }
                    }
                    Err(err) => {
                        let error = EngineError::Backend(err);
                        object.core().local_save_failed(error.clone());
                        done(Some(error));
                    }
                }),
            );
        }
    }
}

fn save_remote<O>(ctx: &Context, object: &Arc<O>, payload: Vec<u8>, done: OpCallback)
where
    O: TreeObject + ?Sized + 'static,
{
    let id = object.object_id();
    let backend = Arc::clone(ctx.backend());
    let op = move |attempt: Box<dyn FnOnce(Result<(), BackendError>) + Send>| {
        backend.save_remote(&id, payload.clone(), attempt);
    };

    let object = Arc::clone(object);
    ctx.retry().run(
        ctx.executor(),
        op,
        Box::new(move |result| match result {
            Ok(()) => {
                object.core().server_save_succeeded();
                done(None);
            }
            Err(err) => {
                let retryable = err.is_retryable();
                let error = EngineError::Backend(err);
                object.core().server_save_failed(error.clone(), retryable);
                done(Some(error));
            }
        }),
    );
}

/// Delete one entity's payload, local first, then (for `Both`) the server
/// copy under the retry policy. The caller must have marked the entity
/// `PendingDelete`.
pub(crate) fn delete_payload<O>(
    ctx: &Context,
    object: &Arc<O>,
    location: StorageLocation,
    local_type: LocalType,
    done: OpCallback,
) where
    O: TreeObject + ?Sized + 'static,
{
    if let Err(error) = object.core().begin_local_delete() {
        ctx.executor().execute(move || done(Some(error)));
        return;
    }

    let id = object.object_id();
    let ctx = ctx.clone();
    let object = Arc::clone(object);
    ctx.clone().backend().delete_local(
        &id,
        local_type,
        Box::new(move |result| match result {
            Ok(()) => {
                if object.core().local_delete_succeeded(location) {
                    delete_remote(&ctx, &object, done);
                } else {
                    done(None);
                }
            }
            Err(err) => {
                let error = EngineError::Backend(err);
                object.core().local_delete_failed(error.clone());
                done(Some(error));
            }
        }),
    );
}

fn delete_remote<O>(ctx: &Context, object: &Arc<O>, done: OpCallback)
where
    O: TreeObject + ?Sized + 'static,
{
    let id = object.object_id();
    let backend = Arc::clone(ctx.backend());
    let op = move |attempt: Box<dyn FnOnce(Result<(), BackendError>) + Send>| {
        backend.delete_remote(&id, attempt);
    };

    let object = Arc::clone(object);
    ctx.retry().run(
        ctx.executor(),
        op,
        Box::new(move |result| match result {
            Ok(()) => {
                object.core().server_delete_succeeded();
                done(None);
            }
            Err(err) => {
                let error = EngineError::Backend(err);
                object.core().server_delete_failed(error.clone());
                done(Some(error));
            }
        }),
    );
}
