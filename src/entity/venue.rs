use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use super::{needs_save, Category, TreeObject};
use crate::context::Context;
use crate::error::EngineError;
use crate::object::{self, ChildRound, ObjectCore, OpCallback, SavePlan};
use crate::state::OperationState;
use crate::storage::{BackendError, LocalType, StorageLocation};

const KIND: &str = "venue";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VenueData {
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    pub category_ids: Vec<String>,
}

/// A restaurant/location record sourced from the places provider.
///
/// Venues are shared: any number of journals may reference the same venue,
/// so no parent ever cascades a delete into one, and a save skips the
/// upload when the server already has the record.
pub struct Venue {
    ctx: Context,
    core: ObjectCore,
    data: Mutex<Option<VenueData>>,
    categories: Mutex<Vec<Arc<Category>>>,
}

impl Venue {
    pub fn create(ctx: &Context, id: impl Into<String>, data: VenueData) -> Arc<Self> {
        Arc::new(Venue {
            ctx: ctx.clone(),
            core: ObjectCore::new(KIND, id, OperationState::Modified),
            data: Mutex::new(Some(data)),
            categories: Mutex::new(Vec::new()),
        })
    }

    pub fn placeholder(ctx: &Context, id: impl Into<String>) -> Arc<Self> {
        Arc::new(Venue {
            ctx: ctx.clone(),
            core: ObjectCore::new(KIND, id, OperationState::NotAvailable),
            data: Mutex::new(None),
            categories: Mutex::new(Vec::new()),
        })
    }

    pub fn data(&self) -> Option<VenueData> {
        self.data.lock().unwrap().clone()
    }

    pub fn categories(&self) -> Vec<Arc<Category>> {
        self.categories.lock().unwrap().clone()
    }

    /// Materialize category placeholders for every referenced id that has
    /// no child entity yet.
    fn ensure_categories(&self) {
        let ids = match self.data.lock().unwrap().as_ref() {
            Some(data) => data.category_ids.clone(),
            None => return,
        };
        let mut categories = self.categories.lock().unwrap();
        for id in ids {
            if !categories.iter().any(|c| c.object_id() == id) {
                categories.push(Category::placeholder(&self.ctx, id));
            }
        }
    }

    /// Save the venue's own payload, skipping the upload when the server
    /// already has this venue (another journal published it first).
    fn save_own_payload(self: &Arc<Self>, location: StorageLocation, local_type: LocalType, done: OpCallback) {
        let ctx = self.ctx.clone();
        let data = self.data.lock().unwrap().clone();
        let data = match data {
            Some(data) => data,
            None => {
                ctx.executor().execute(move || done(None));
                return;
            }
        };

        let plan = match self.core.plan_save(location) {
            Ok(plan) => plan,
            Err(error) => {
                ctx.executor().execute(move || done(Some(error)));
                return;
            }
        };

        let payload = super::encode_payload(&data);
        match plan {
            SavePlan::Skip => ctx.executor().execute(move || done(None)),
            SavePlan::FromServer => self.upload_unless_present(payload, done),
            SavePlan::FromLocal => {
                let venue = Arc::clone(self);
                let id = self.object_id();
                let remote_payload = payload.clone();
                ctx.backend().save_local(
                    &id,
                    local_type,
                    payload,
                    Box::new(move |result| match result {
                        Ok(()) => {
                            if venue.core.local_save_succeeded(location) {
                                venue.upload_unless_present(remote_payload, done);
                            } else {
                                done(None);
                            }
                        }
                        Err(err) => {
                            let error = EngineError::Backend(err);
                            venue.core.local_save_failed(error.clone());
                            done(Some(error));
                        }
                    }),
                );
            }
        }
    }

    fn upload_unless_present(self: &Arc<Self>, payload: Vec<u8>, done: OpCallback) {
        let venue = Arc::clone(self);
        let id = self.object_id();
        self.ctx.backend().exists_remote(
            &id,
            Box::new(move |result| match result {
                Ok(true) => {
                    venue.core.server_save_succeeded();
                    done(None);
                }
                // Unknown or absent: upload and let the retry policy cope.
                Ok(false) | Err(_) => venue.upload(payload, done),
            }),
        );
    }

    fn upload(self: &Arc<Self>, payload: Vec<u8>, done: OpCallback) {
        let venue = Arc::clone(self);
        let id = self.object_id();
        let backend = Arc::clone(self.ctx.backend());
        let op = move |attempt: Box<dyn FnOnce(Result<(), BackendError>) + Send>| {
            backend.save_remote(&id, payload.clone(), attempt);
        };
        self.ctx.retry().run(
            self.ctx.executor(),
            op,
            Box::new(move |result| match result {
                Ok(()) => {
                    venue.core.server_save_succeeded();
                    done(None);
                }
                Err(err) => {
                    let retryable = err.is_retryable();
                    let error = EngineError::Backend(err);
                    venue.core.server_save_failed(error.clone(), retryable);
                    done(Some(error));
                }
            }),
        );
    }
}

impl TreeObject for Venue {
    fn retrieve_recursive(
        self: Arc<Self>,
        location: StorageLocation,
        local_type: LocalType,
        force: bool,
        done: OpCallback,
    ) {
        let ctx = self.ctx.clone();
        let venue = Arc::clone(&self);
        object::retrieve_payload(
            &ctx.clone(),
            &self,
            location,
            local_type,
            force,
            Box::new(move |result| {
                match result {
                    Ok(None) => {}
                    Ok(Some(bytes)) => {
                        match super::decode_payload::<VenueData>(KIND, venue.core.id(), &bytes) {
                            Ok(data) => {
                                *venue.data.lock().unwrap() = Some(data);
                                venue.core.retrieval_completed(None);
                            }
                            Err(error) => {
                                venue.core.retrieval_completed(Some(error.clone()));
                                return done(Some(error));
                            }
                        }
                    }
                    Err(error) => return done(Some(error)),
                }

                venue.ensure_categories();
                let round = ChildRound::new(&ctx, done);
                for category in venue.categories() {
                    round.retrieve_child(category, location, local_type, force);
                }
                round.seal();
            }),
        );
    }

    fn save_recursive(
        self: Arc<Self>,
        location: StorageLocation,
        local_type: LocalType,
        done: OpCallback,
    ) {
        let ctx = self.ctx.clone();
        let venue = Arc::clone(&self);
        let round = ChildRound::new(
            &ctx,
            Box::new(move |error| match error {
                Some(error) => {
                    // A failed child fails the whole subtree; the venue's
                    // own payload is not touched.
                    venue.core.record_error(error.clone());
                    done(Some(error));
                }
                None => venue.save_own_payload(location, local_type, done),
            }),
        );
        for category in self.categories() {
            if needs_save(category.core().state()) {
                round.save_child(category, location, local_type);
            }
        }
        round.seal();
    }

    fn delete_recursive(
        self: Arc<Self>,
        location: StorageLocation,
        local_type: LocalType,
        done: OpCallback,
    ) {
        // Deleting a venue drops only its own record: categories are shared
        // classification data and are never cascade-deleted.
        let ctx = self.ctx.clone();
        super::delete_leaf(&ctx, self, location, local_type, done);
    }

    fn object_id(&self) -> String {
        self.core.id().to_string()
    }

    fn object_kind(&self) -> &'static str {
        KIND
    }

    fn core(&self) -> &ObjectCore {
        &self.core
    }
}
