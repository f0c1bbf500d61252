use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use super::{needs_save, Markup, Media, Moment, TreeObject, Venue};
use crate::context::Context;
use crate::error::EngineError;
use crate::object::{self, ChildRound, ObjectCore, OpCallback};
use crate::prefetch::{PrefetchDelegate, PrefetchTicket};
use crate::state::OperationState;
use crate::storage::{LocalType, StorageLocation};

const KIND: &str = "journal";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalData {
    pub title: String,
    /// Opaque author reference. Authors are shared across journals and are
    /// never touched by any recursive operation.
    pub author_id: String,
    pub thumbnail_id: Option<String>,
    pub moment_ids: Vec<String>,
    pub markup_ids: Vec<String>,
    pub venue_id: Option<String>,
}

#[derive(Default)]
struct JournalChildren {
    thumbnail: Option<Arc<Media>>,
    moments: Vec<Arc<Moment>>,
    markups: Vec<Arc<Markup>>,
    venue: Option<Arc<Venue>>,
}

#[derive(Default)]
struct SweepState {
    running: bool,
    /// Another full sweep was requested while one was running; at most one
    /// re-run is queued no matter how many requests arrive.
    pending: bool,
    first_error: Option<EngineError>,
    runs: usize,
}

/// A user-authored story: a thumbnail, an ordered list of moments, story-
/// level markups, and a shared venue reference.
pub struct Journal {
    ctx: Context,
    core: ObjectCore,
    data: Mutex<Option<JournalData>>,
    children: Mutex<JournalChildren>,
    sweep: Mutex<SweepState>,
    prefetch_ticket: Mutex<Option<PrefetchTicket>>,
}

impl Journal {
    pub fn create(ctx: &Context, id: impl Into<String>, data: JournalData) -> Arc<Self> {
        Arc::new(Journal {
            ctx: ctx.clone(),
            core: ObjectCore::new(KIND, id, OperationState::Modified),
            data: Mutex::new(Some(data)),
            children: Mutex::new(JournalChildren::default()),
            sweep: Mutex::new(SweepState::default()),
            prefetch_ticket: Mutex::new(None),
        })
    }

    pub fn placeholder(ctx: &Context, id: impl Into<String>) -> Arc<Self> {
        Arc::new(Journal {
            ctx: ctx.clone(),
            core: ObjectCore::new(KIND, id, OperationState::NotAvailable),
            data: Mutex::new(None),
            children: Mutex::new(JournalChildren::default()),
            sweep: Mutex::new(SweepState::default()),
            prefetch_ticket: Mutex::new(None),
        })
    }

    pub fn data(&self) -> Option<JournalData> {
        self.data.lock().unwrap().clone()
    }

    pub fn moments(&self) -> Vec<Arc<Moment>> {
        self.children.lock().unwrap().moments.clone()
    }

    pub fn markups(&self) -> Vec<Arc<Markup>> {
        self.children.lock().unwrap().markups.clone()
    }

    pub fn thumbnail(&self) -> Option<Arc<Media>> {
        self.children.lock().unwrap().thumbnail.clone()
    }

    pub fn venue(&self) -> Option<Arc<Venue>> {
        self.children.lock().unwrap().venue.clone()
    }

    pub fn add_moment(&self, moment: Arc<Moment>) -> Result<(), EngineError> {
        self.core.mark_modified()?;
        if let Some(data) = self.data.lock().unwrap().as_mut() {
            data.moment_ids.push(moment.object_id());
        }
        self.children.lock().unwrap().moments.push(moment);
        Ok(())
    }

    pub fn add_markup(&self, markup: Arc<Markup>) -> Result<(), EngineError> {
        self.core.mark_modified()?;
        if let Some(data) = self.data.lock().unwrap().as_mut() {
            data.markup_ids.push(markup.object_id());
        }
        self.children.lock().unwrap().markups.push(markup);
        Ok(())
    }

    pub fn set_thumbnail(&self, media: Arc<Media>) -> Result<(), EngineError> {
        self.core.mark_modified()?;
        if let Some(data) = self.data.lock().unwrap().as_mut() {
            data.thumbnail_id = Some(media.object_id());
        }
        self.children.lock().unwrap().thumbnail = Some(media);
        Ok(())
    }

    pub fn set_venue(&self, venue: Arc<Venue>) -> Result<(), EngineError> {
        self.core.mark_modified()?;
        if let Some(data) = self.data.lock().unwrap().as_mut() {
            data.venue_id = Some(venue.object_id());
        }
        self.children.lock().unwrap().venue = Some(venue);
        Ok(())
    }

    /// How many sweep passes have started since this journal was created.
    pub fn content_sweep_count(&self) -> usize {
        self.sweep.lock().unwrap().runs
    }

    /// Whether a content sweep is currently walking the moment list.
    pub fn content_retrieval_active(&self) -> bool {
        self.sweep.lock().unwrap().running
    }

    /// First error the most recent sweep chain ran into, if any.
    pub fn last_content_error(&self) -> Option<EngineError> {
        self.sweep.lock().unwrap().first_error.clone()
    }

    /// Mark a contiguous range of moments for retrieval and make sure a
    /// sweep is servicing them.
    ///
    /// Bursts of requests coalesce: at most one sweep runs at a time and at
    /// most one re-run is queued behind it, no matter how many requests
    /// arrive while it walks.
    pub fn request_content_retrieval(self: &Arc<Self>, from: usize, count: usize) {
        let moments = self.moments();
        let start = from.min(moments.len());
        let end = moments.len().min(from.saturating_add(count));
        for moment in &moments[start..end] {
            moment.core().mark_pending_retrieval();
        }

        {
            let mut sweep = self.sweep.lock().unwrap();
            if sweep.running {
                sweep.pending = true;
                return;
            }
            sweep.running = true;
            sweep.runs += 1;
            sweep.first_error = None;
        }
        Journal::sweep_from(Arc::clone(self), 0);
    }

    /// Walk the moment list in index order, retrieving each pending moment
    /// serially: the next index is visited only after the current moment's
    /// retrieval (if one was needed) completes.
    fn sweep_from(journal: Arc<Journal>, start: usize) {
        let mut index = start;
        loop {
            let moments = journal.moments();
            if index >= moments.len() {
                return Journal::sweep_finished(journal);
            }
            let moment = Arc::clone(&moments[index]);
            let next = Arc::clone(&journal);
            let claimed = moment.retrieve_if_pending(
                StorageLocation::Both,
                LocalType::Cache,
                Box::new(move |error| {
                    if let Some(error) = error {
                        let mut sweep = next.sweep.lock().unwrap();
                        if sweep.first_error.is_none() {
                            sweep.first_error = Some(error);
                        }
                    }
                    Journal::sweep_from(next, index + 1);
                }),
            );
            if claimed {
                return;
            }
            index += 1;
        }
    }

    fn sweep_finished(journal: Arc<Journal>) {
        let restart = {
            let mut sweep = journal.sweep.lock().unwrap();
            if sweep.pending {
                sweep.pending = false;
                sweep.runs += 1;
                true
            } else {
                sweep.running = false;
                false
            }
        };
        if restart {
            return Journal::sweep_from(journal, 0);
        }
        let ticket = journal.prefetch_ticket.lock().unwrap().take();
        if let Some(ticket) = ticket {
            ticket.complete();
        }
    }

    /// Materialize child placeholders from the payload references. The
    /// thumbnail reference is required once the payload is resident.
    fn ensure_children(&self) -> Result<(), EngineError> {
        let data = match self.data.lock().unwrap().clone() {
            Some(data) => data,
            None => return Ok(()),
        };
        let mut children = self.children.lock().unwrap();
        match &data.thumbnail_id {
            Some(thumbnail_id) => {
                if children.thumbnail.is_none() {
                    children.thumbnail = Some(Media::placeholder(&self.ctx, thumbnail_id.clone()));
                }
            }
            None => {
                return Err(EngineError::MissingReference {
                    kind: KIND,
                    id: self.core.id().to_string(),
                    field: "thumbnail",
                })
            }
        }
        for id in &data.moment_ids {
            if !children.moments.iter().any(|m| m.object_id() == *id) {
                children.moments.push(Moment::placeholder(&self.ctx, id.clone()));
            }
        }
        for id in &data.markup_ids {
            if !children.markups.iter().any(|m| m.object_id() == *id) {
                children.markups.push(Markup::placeholder(&self.ctx, id.clone()));
            }
        }
        if let Some(venue_id) = &data.venue_id {
            if children.venue.is_none() {
                children.venue = Some(Venue::placeholder(&self.ctx, venue_id.clone()));
            }
        }
        Ok(())
    }

    /// Delete every owned child: thumbnail, moments, and markups. The venue
    /// and the author are shared with other journals and are never touched.
    fn cascade_delete(
        self: &Arc<Self>,
        location: StorageLocation,
        local_type: LocalType,
        done: OpCallback,
    ) {
        let round = ChildRound::new(&self.ctx, done);
        if let Some(thumbnail) = self.thumbnail() {
            round.delete_child(thumbnail, location, local_type);
        }
        for moment in self.moments() {
            round.delete_child(moment, location, local_type);
        }
        for markup in self.markups() {
            round.delete_child(markup, location, local_type);
        }
        round.seal();
    }
}

impl TreeObject for Journal {
    fn retrieve_recursive(
        self: Arc<Self>,
        location: StorageLocation,
        local_type: LocalType,
        force: bool,
        done: OpCallback,
    ) {
        let ctx = self.ctx.clone();
        let journal = Arc::clone(&self);
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
                        match super::decode_payload::<JournalData>(KIND, journal.core.id(), &bytes)
                        {
                            Ok(data) => {
                                *journal.data.lock().unwrap() = Some(data);
                                journal.core.retrieval_completed(None);
                            }
                            Err(error) => {
                                journal.core.retrieval_completed(Some(error.clone()));
                                return done(Some(error));
                            }
                        }
                    }
                    Err(error) => return done(Some(error)),
                }

                if let Err(error) = journal.ensure_children() {
                    journal.core.record_error(error.clone());
                    return done(Some(error));
                }

                // All branches fan out concurrently; a failure on one does
                // not stop the others.
                let round = ChildRound::new(&ctx, done);
                if let Some(thumbnail) = journal.thumbnail() {
                    round.retrieve_child(thumbnail, location, local_type, force);
                }
                for moment in journal.moments() {
                    round.retrieve_child(moment, location, local_type, force);
                }
                for markup in journal.markups() {
                    round.retrieve_child(markup, location, local_type, force);
                }
                if let Some(venue) = journal.venue() {
                    round.retrieve_child(venue, location, local_type, force);
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
        let journal = Arc::clone(&self);
        let round = ChildRound::new(
            &ctx.clone(),
            Box::new(move |error| match error {
                Some(error) => {
                    // A failed child fails the subtree; the journal's own
                    // payload is not saved.
                    journal.core.record_error(error.clone());
                    done(Some(error));
                }
                None => {
                    let data = journal.data.lock().unwrap().clone();
                    super::save_leaf(
                        &ctx,
                        Arc::clone(&journal),
                        data,
                        location,
                        local_type,
                        done,
                    );
                }
            }),
        );

        if let Some(thumbnail) = self.thumbnail() {
            round.save_child(thumbnail, location, local_type);
        }
        // Already-synced moments are skipped so a burst of saves does not
        // re-upload unchanged captures.
        for moment in self.moments() {
            if needs_save(moment.core().state()) {
                round.save_child(moment, location, local_type);
            }
        }
        for markup in self.markups() {
            round.save_child(markup, location, local_type);
        }
        if let Some(venue) = self.venue() {
            round.save_child(venue, location, local_type);
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
        let journal = Arc::clone(&self);
        // Retrieve first so the children are resolvable for the cascade.
        self.retrieve_recursive(
            location,
            local_type,
            false,
            Box::new(move |_| {
                if let Err(error) = journal.core.mark_pending_delete() {
                    return done(Some(error));
                }
                let cascade_target = Arc::clone(&journal);
                object::delete_payload(
                    &ctx,
                    &journal,
                    location,
                    local_type,
                    Box::new(move |error| match error {
                        None => cascade_target.cascade_delete(location, local_type, done),
                        Some(error) => {
                            // Self-delete failed: still clear the children
                            // so partial state does not leak orphans, then
                            // surface the original error.
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

impl PrefetchDelegate for Journal {
    /// Warm the cache for this journal: materialize it if needed, then
    /// sweep its moments. The scheduler ticket is completed when the sweep
    /// chain fully drains.
    fn do_prefetch(self: Arc<Self>, _object: Arc<dyn TreeObject>, ticket: PrefetchTicket) {
        *self.prefetch_ticket.lock().unwrap() = Some(ticket);
        if self.core.state().is_materialized() {
            let count = self.moments().len();
            self.request_content_retrieval(0, count);
            return;
        }
        let journal = Arc::clone(&self);
        self.retrieve_recursive(
            StorageLocation::Both,
            LocalType::Cache,
            false,
            Box::new(move |_| {
                let count = journal.moments().len();
                journal.request_content_retrieval(0, count);
            }),
        );
    }
}
