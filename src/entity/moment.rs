use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use super::{Markup, Media, TreeObject};
use crate::context::Context;
use crate::error::EngineError;
use crate::object::{self, ChildRound, ObjectCore, OpCallback};
use crate::state::OperationState;
use crate::storage::{LocalType, StorageLocation};

const KIND: &str = "moment";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MomentData {
    pub caption: String,
    pub media_id: Option<String>,
    pub markup_ids: Vec<String>,
}

#[derive(Default)]
struct MomentChildren {
    media: Option<Arc<Media>>,
    markups: Vec<Arc<Markup>>,
}

/// A single capture inside a journal: one media item plus its markup
/// annotations.
pub struct Moment {
    ctx: Context,
    core: ObjectCore,
    data: Mutex<Option<MomentData>>,
    children: Mutex<MomentChildren>,
}

impl Moment {
    pub fn create(ctx: &Context, id: impl Into<String>, data: MomentData) -> Arc<Self> {
        Arc::new(Moment {
            ctx: ctx.clone(),
            core: ObjectCore::new(KIND, id, OperationState::Modified),
            data: Mutex::new(Some(data)),
            children: Mutex::new(MomentChildren::default()),
        })
    }

    pub fn placeholder(ctx: &Context, id: impl Into<String>) -> Arc<Self> {
        Arc::new(Moment {
            ctx: ctx.clone(),
            core: ObjectCore::new(KIND, id, OperationState::NotAvailable),
            data: Mutex::new(None),
            children: Mutex::new(MomentChildren::default()),
        })
    }

    pub fn data(&self) -> Option<MomentData> {
        self.data.lock().unwrap().clone()
    }

    pub fn media(&self) -> Option<Arc<Media>> {
        self.children.lock().unwrap().media.clone()
    }

    pub fn markups(&self) -> Vec<Arc<Markup>> {
        self.children.lock().unwrap().markups.clone()
    }

    /// Attach the capture's media, recording the reference in the payload.
    pub fn set_media(&self, media: Arc<Media>) -> Result<(), EngineError> {
        self.core.mark_modified()?;
        if let Some(data) = self.data.lock().unwrap().as_mut() {
            data.media_id = Some(media.object_id());
        }
        self.children.lock().unwrap().media = Some(media);
        Ok(())
    }

    /// Attach a markup annotation, recording the reference in the payload.
    pub fn add_markup(&self, markup: Arc<Markup>) -> Result<(), EngineError> {
        self.core.mark_modified()?;
        if let Some(data) = self.data.lock().unwrap().as_mut() {
            data.markup_ids.push(markup.object_id());
        }
        self.children.lock().unwrap().markups.push(markup);
        Ok(())
    }

    /// Materialize child placeholders for every referenced id that has no
    /// entity yet. The media reference is required once the payload is
    /// resident.
    fn ensure_children(&self) -> Result<(), EngineError> {
        let data = match self.data.lock().unwrap().clone() {
            Some(data) => data,
            None => return Ok(()),
        };
        let mut children = self.children.lock().unwrap();
        match &data.media_id {
            Some(media_id) => {
                if children.media.is_none() {
                    children.media = Some(Media::placeholder(&self.ctx, media_id.clone()));
                }
            }
            None => {
                return Err(EngineError::MissingReference {
                    kind: KIND,
                    id: self.core.id().to_string(),
                    field: "media",
                })
            }
        }
        for id in data.markup_ids {
            if !children.markups.iter().any(|m| m.object_id() == id) {
                children.markups.push(Markup::placeholder(&self.ctx, id));
            }
        }
        Ok(())
    }

    /// Claim and run a retrieval previously marked pending.
    ///
    /// Returns true if this call claimed the pending mark (the callback
    /// will fire when the recursive retrieval completes); false — with the
    /// callback dropped unfired — when the moment is in any other state.
    /// Used by the journal's content sweep to walk its moments serially.
    pub fn retrieve_if_pending(
        self: &Arc<Self>,
        location: StorageLocation,
        local_type: LocalType,
        done: OpCallback,
    ) -> bool {
        if !self.core.retrieve_if_pending() {
            return false;
        }
        let ctx = self.ctx.clone();
        let fetch_done = self.make_fetch_done(location, local_type, false, done);
        object::retrieve_payload_claimed(&ctx, self, location, local_type, false, fetch_done);
        true
    }

    /// Continuation shared by the planned and pre-claimed retrieval paths:
    /// decode the payload if new bytes arrived, settle the core, then fan
    /// out to the media and markups.
    fn make_fetch_done(
        self: &Arc<Self>,
        location: StorageLocation,
        local_type: LocalType,
        force: bool,
        done: OpCallback,
    ) -> object::FetchDone {
        let ctx = self.ctx.clone();
        let moment = Arc::clone(self);
        Box::new(move |result| {
            match result {
                Ok(None) => {}
                Ok(Some(bytes)) => {
                    match super::decode_payload::<MomentData>(KIND, moment.core.id(), &bytes) {
                        Ok(data) => {
                            *moment.data.lock().unwrap() = Some(data);
                            moment.core.retrieval_completed(None);
                        }
                        Err(error) => {
                            moment.core.retrieval_completed(Some(error.clone()));
                            return done(Some(error));
                        }
                    }
                }
                Err(error) => return done(Some(error)),
            }

            if let Err(error) = moment.ensure_children() {
                moment.core.record_error(error.clone());
                return done(Some(error));
            }

            let round = ChildRound::new(&ctx, done);
            if let Some(media) = moment.media() {
                round.retrieve_child(media, location, local_type, force);
            }
            for markup in moment.markups() {
                round.retrieve_child(markup, location, local_type, force);
            }
            round.seal();
        })
    }

    fn cascade_delete(
        self: &Arc<Self>,
        location: StorageLocation,
        local_type: LocalType,
        done: OpCallback,
    ) {
        let round = ChildRound::new(&self.ctx, done);
        if let Some(media) = self.media() {
            round.delete_child(media, location, local_type);
        }
        for markup in self.markups() {
            round.delete_child(markup, location, local_type);
        }
        round.seal();
    }
}

impl TreeObject for Moment {
    fn retrieve_recursive(
        self: Arc<Self>,
        location: StorageLocation,
        local_type: LocalType,
        force: bool,
        done: OpCallback,
    ) {
        let ctx = self.ctx.clone();
        let fetch_done = self.make_fetch_done(location, local_type, force, done);
        object::retrieve_payload(&ctx, &self, location, local_type, force, fetch_done);
    }

    fn save_recursive(
        self: Arc<Self>,
        location: StorageLocation,
        local_type: LocalType,
        done: OpCallback,
    ) {
        let ctx = self.ctx.clone();
        let moment = Arc::clone(&self);
        let round = ChildRound::new(
            &ctx.clone(),
            Box::new(move |error| match error {
                Some(error) => {
                    moment.core.record_error(error.clone());
                    done(Some(error));
                }
                None => {
                    let data = moment.data.lock().unwrap().clone();
                    super::save_leaf(&ctx, Arc::clone(&moment), data, location, local_type, done);
                }
            }),
        );
        if let Some(media) = self.media() {
            round.save_child(media, location, local_type);
        }
        for markup in self.markups() {
            round.save_child(markup, location, local_type);
        }
        round.seal();
    }

    fn delete_recursive(
        self: Arc<Self>,
        location: StorageLocation,
        local_type: LocalType,
        done: OpCallback,
    ) {
        let ctx = self.ctx.clone();
        let moment = Arc::clone(&self);
        // Retrieve first so the children are resolvable for the cascade.
        self.retrieve_recursive(
            location,
            local_type,
            false,
            Box::new(move |_| {
                if let Err(error) = moment.core.mark_pending_delete() {
                    return done(Some(error));
                }
                let cascade_target = Arc::clone(&moment);
                object::delete_payload(
                    &ctx,
                    &Arc::clone(&moment),
                    location,
                    local_type,
                    Box::new(move |error| match error {
                        None => cascade_target.cascade_delete(location, local_type, done),
                        Some(error) => {
                            // Self-delete failed: still try to clear the
                            // children so partial state does not leak
                            // orphans, then surface the original error.
                            cascade_target.cascade_delete(
                                location,
                                local_type,
                                Box::new(move |_| done(Some(error))),
                            );
                        }
                    }),
                );
            }),
        );
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
