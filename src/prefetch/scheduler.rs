use std::sync::{Arc, Mutex};

use crate::entity::TreeObject;

/// A consumer of prefetch work: told to warm the cache for one object, and
/// notified when a queued context is dropped from the queue.
pub trait PrefetchDelegate: Send + Sync {
    /// Perform the prefetch. Call `ticket.complete()` when done — that
    /// removes the context from the queue and lets the next item start. A
    /// ticket dropped without completing counts as completed, so a panicky
    /// or forgetful delegate cannot stall the pipeline.
    fn do_prefetch(self: Arc<Self>, object: Arc<dyn TreeObject>, ticket: PrefetchTicket);

    /// The context was removed from the queue (completed, cancelled, or
    /// flushed). Lets the delegate drop its own reference.
    fn prefetch_removed(&self, context: &Arc<PrefetchContext>) {
        let _ = context;
    }
}

struct ContextFields {
    prev: Option<Arc<PrefetchContext>>,
    next: Option<Arc<PrefetchContext>>,
    delegate: Arc<dyn PrefetchDelegate>,
    object: Arc<dyn TreeObject>,
    /// Set when the scheduler hands this context to its delegate, so a
    /// racing unblock cannot start the same head twice.
    started: bool,
}

/// One queued unit of prefetch work.
///
/// All fields are populated while the context is queued and cleared as one
/// when it is removed; removal is re-entrant-safe (removing twice is a
/// no-op).
pub struct PrefetchContext {
    fields: Mutex<Option<ContextFields>>,
}

impl PrefetchContext {
    /// Whether this context is still linked into the queue.
    pub fn is_queued(&self) -> bool {
        self.fields.lock().unwrap().is_some()
    }
}

struct QueueEnds {
    head: Option<Arc<PrefetchContext>>,
    tail: Option<Arc<PrefetchContext>>,
}

/// Completion token for one in-flight prefetch. Completing (or dropping)
/// it removes the context from the queue and pulls the next item.
pub struct PrefetchTicket {
    scheduler: Arc<PrefetchScheduler>,
    context: Arc<PrefetchContext>,
    finished: bool,
}

impl PrefetchTicket {
    pub fn context(&self) -> &Arc<PrefetchContext> {
        &self.context
    }

    pub fn complete(mut self) {
        self.finish();
    }

    fn finish(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        self.scheduler.remove_prefetch_work(&self.context);
        self.scheduler.prefetch_next_if_no_block();
    }
}

impl Drop for PrefetchTicket {
    fn drop(&mut self) {
        self.finish();
    }
}

/// Serializes background cache warming: a doubly linked work queue with at
/// most one `do_prefetch` in flight system-wide, plus a reentrant block
/// counter for callers that need the bandwidth for foreground work.
pub struct PrefetchScheduler {
    queue: Mutex<QueueEnds>,
    blocks: Mutex<u32>,
}

impl PrefetchScheduler {
    pub fn new() -> Arc<Self> {
        Arc::new(PrefetchScheduler {
            queue: Mutex::new(QueueEnds {
                head: None,
                tail: None,
            }),
            blocks: Mutex::new(0),
        })
    }

    /// Append work to the queue. If the queue was empty, prefetching starts
    /// immediately (unless blocked).
    pub fn add_prefetch_work(
        self: &Arc<Self>,
        delegate: Arc<dyn PrefetchDelegate>,
        object: Arc<dyn TreeObject>,
    ) -> Arc<PrefetchContext> {
        let context = Arc::new(PrefetchContext {
            fields: Mutex::new(None),
        });

        let was_empty = {
            let mut queue = self.queue.lock().unwrap();
            let was_empty = queue.head.is_none();
            *context.fields.lock().unwrap() = Some(ContextFields {
                prev: queue.tail.clone(),
                next: None,
                delegate,
                object,
                started: false,
            });
            if let Some(tail) = &queue.tail {
                if let Some(fields) = tail.fields.lock().unwrap().as_mut() {
                    fields.next = Some(Arc::clone(&context));
                }
            }
            queue.tail = Some(Arc::clone(&context));
            if queue.head.is_none() {
                queue.head = Some(Arc::clone(&context));
            }
            was_empty
        };

        if was_empty {
            self.prefetch_next_if_no_block();
        }
        context
    }

    /// Start the item at the head of the queue, unless prefetching is
    /// blocked, the queue is empty, or the head is already in flight. The
    /// head stays queued while in flight — completion removes it and pulls
    /// the next.
    pub fn prefetch_next_if_no_block(self: &Arc<Self>) {
        if *self.blocks.lock().unwrap() > 0 {
            return;
        }

        let claimed = {
            let queue = self.queue.lock().unwrap();
            match &queue.head {
                None => None,
                Some(head) => {
                    let mut fields = head.fields.lock().unwrap();
                    match fields.as_mut() {
                        Some(fields) if !fields.started => {
                            fields.started = true;
                            Some((
                                Arc::clone(head),
                                Arc::clone(&fields.delegate),
                                Arc::clone(&fields.object),
                            ))
                        }
                        _ => None,
                    }
                }
            }
        };

        if let Some((context, delegate, object)) = claimed {
            let ticket = PrefetchTicket {
                scheduler: Arc::clone(self),
                context,
                finished: false,
            };
            delegate.do_prefetch(object, ticket);
        }
    }

    /// Unlink a context from the queue and clear its fields. Idempotent:
    /// a context already removed is left alone. The owning delegate is
    /// notified so it can drop its reference.
    pub fn remove_prefetch_work(&self, context: &Arc<PrefetchContext>) {
        let removed = {
            let mut queue = self.queue.lock().unwrap();
            let fields = context.fields.lock().unwrap().take();
            match fields {
                None => None,
                Some(fields) => {
                    match &fields.prev {
                        Some(prev) => {
                            if let Some(prev_fields) = prev.fields.lock().unwrap().as_mut() {
                                prev_fields.next = fields.next.clone();
                            }
                        }
                        None => queue.head = fields.next.clone(),
                    }
                    match &fields.next {
                        Some(next) => {
                            if let Some(next_fields) = next.fields.lock().unwrap().as_mut() {
                                next_fields.prev = fields.prev.clone();
                            }
                        }
                        None => queue.tail = fields.prev.clone(),
                    }
                    Some(fields.delegate)
                }
            }
        };

        if let Some(delegate) = removed {
            delegate.prefetch_removed(context);
        }
    }

    /// Drain the whole queue, notifying each delegate, without starting any
    /// further fetch. Used when queued warm-ups become irrelevant.
    pub fn remove_all_prefetch_work(&self) {
        loop {
            let head = self.queue.lock().unwrap().head.clone();
            match head {
                Some(context) => self.remove_prefetch_work(&context),
                None => return,
            }
        }
    }

    /// Suspend prefetching. Reentrant: each block must be matched by an
    /// unblock before prefetching resumes.
    pub fn block_prefetching(&self) {
        *self.blocks.lock().unwrap() += 1;
    }

    /// Release one block and, if none remain, resume servicing the queue —
    /// work enqueued while blocked is picked up automatically.
    pub fn unblock_prefetching(self: &Arc<Self>) {
        {
            let mut blocks = self.blocks.lock().unwrap();
            *blocks = blocks.saturating_sub(1);
        }
        self.prefetch_next_if_no_block();
    }

    /// Number of contexts currently queued (including any in flight).
    pub fn queued_len(&self) -> usize {
        let queue = self.queue.lock().unwrap();
        let mut len = 0;
        let mut cursor = queue.head.clone();
        while let Some(context) = cursor {
            len += 1;
            cursor = context
                .fields
                .lock()
                .unwrap()
                .as_ref()
                .and_then(|fields| fields.next.clone());
        }
        len
    }
}
