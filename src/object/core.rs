use std::sync::Mutex;

use super::round::OpCallback;
use crate::error::EngineError;
use crate::state::OperationState;
use crate::storage::StorageLocation;

/// Where a save resumes from, decided under the state lock.
#[derive(Debug)]
pub(crate) enum SavePlan {
    /// Nothing to do; complete with success.
    Skip,
    /// Save the local copy first (state is now `SavingToLocal`).
    FromLocal,
    /// Local copy already saved; go straight to the server (state is now
    /// `SavingToServer`).
    FromServer,
}

/// Outcome of asking to start a retrieval, decided under the state lock.
pub(crate) enum RetrieveDisposition {
    /// Payload already resident; complete with success.
    Skip,
    /// Caller must perform the retrieval (state is now `Retrieving`).
    Fetch,
    /// A retrieval is already in flight; the callback was parked on the
    /// wait-on-retrieve slot and fires when that retrieval completes.
    Parked,
    /// The entity cannot be retrieved right now.
    Busy(EngineError),
}

struct CoreState {
    state: OperationState,
    last_error: Option<EngineError>,
}

/// Per-entity persistence state machine.
///
/// Owned by value inside each entity. The state lock guards only this
/// entity's state; no operation ever takes two cores' locks at once, so
/// there is no lock ordering to get wrong.
pub struct ObjectCore {
    kind: &'static str,
    id: String,
    state: Mutex<CoreState>,
    wait_on_retrieve: Mutex<Option<OpCallback>>,
}

impl ObjectCore {
    pub fn new(kind: &'static str, id: impl Into<String>, initial: OperationState) -> Self {
        ObjectCore {
            kind,
            id: id.into(),
            state: Mutex::new(CoreState {
                state: initial,
                last_error: None,
            }),
            wait_on_retrieve: Mutex::new(None),
        }
    }

    pub fn kind(&self) -> &'static str {
        self.kind
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> OperationState {
        self.state.lock().unwrap().state
    }

    /// Most recent failure recorded against this entity.
    pub fn last_error(&self) -> Option<EngineError> {
        self.state.lock().unwrap().last_error.clone()
    }

    pub(crate) fn record_error(&self, error: EngineError) {
        self.state.lock().unwrap().last_error = Some(error);
    }

    fn busy_error(&self, state: OperationState) -> EngineError {
        EngineError::OperationInProgress {
            kind: self.kind,
            id: self.id.clone(),
            state,
        }
    }

    // ------------------------------------------------------------------
    // Retrieval
    // ------------------------------------------------------------------

    /// Mark the entity for a later retrieval sweep. Only a `NotAvailable`
    /// entity can become pending; returns whether the mark was applied.
    pub fn mark_pending_retrieval(&self) -> bool {
        let mut guard = self.state.lock().unwrap();
        if guard.state == OperationState::NotAvailable {
            guard.state = OperationState::PendingRetrieval;
            true
        } else {
            false
        }
    }

    /// Claim a pending retrieval. Returns true exactly once per pending
    /// mark: the caller that sees true must perform the retrieval; any
    /// other state returns false with no side effect.
    pub fn retrieve_if_pending(&self) -> bool {
        let mut guard = self.state.lock().unwrap();
        if guard.state == OperationState::PendingRetrieval {
            guard.state = OperationState::Retrieving;
            true
        } else {
            false
        }
    }

    /// Park a callback to fire when the in-flight retrieval completes.
    ///
    /// Returns `Ok(true)` if parked, `Ok(false)` — with the callback
    /// dropped unfired — if no retrieval is in flight, and an error if the
    /// single observer slot is already occupied.
    pub fn wait_on_retrieval(&self, waiter: OpCallback) -> Result<bool, EngineError> {
        let guard = self.state.lock().unwrap();
        if guard.state != OperationState::Retrieving {
            return Ok(false);
        }
        let mut slot = self.wait_on_retrieve.lock().unwrap();
        if slot.is_some() {
            return Err(self.busy_error(guard.state));
        }
        *slot = Some(waiter);
        Ok(true)
    }

    /// Decide how a requested retrieval should proceed. On `Parked` the
    /// provided waiter has been captured; otherwise it is dropped unused.
    pub(crate) fn plan_retrieve(
        &self,
        force: bool,
        make_waiter: impl FnOnce() -> OpCallback,
    ) -> RetrieveDisposition {
        let mut guard = self.state.lock().unwrap();
        match guard.state {
            OperationState::NotAvailable | OperationState::PendingRetrieval => {
                guard.state = OperationState::Retrieving;
                RetrieveDisposition::Fetch
            }
            OperationState::Synced if force => {
                guard.state = OperationState::Retrieving;
                RetrieveDisposition::Fetch
            }
            OperationState::Synced => RetrieveDisposition::Skip,
            // Unsaved or partially saved in-memory data is authoritative; a
            // retrieval must never clobber it.
            OperationState::Modified
            | OperationState::SavedToLocal
            | OperationState::SavedToServer
            | OperationState::SaveError => RetrieveDisposition::Skip,
            OperationState::Retrieving => {
                let mut slot = self.wait_on_retrieve.lock().unwrap();
                if slot.is_some() {
                    RetrieveDisposition::Busy(self.busy_error(OperationState::Retrieving))
                } else {
                    *slot = Some(make_waiter());
                    RetrieveDisposition::Parked
                }
            }
            state => RetrieveDisposition::Busy(self.busy_error(state)),
        }
    }

    /// Finish an in-flight retrieval. On success the entity is `Synced`;
    /// on failure it rolls back to `NotAvailable` so a later retry can
    /// re-mark it. The wait-on-retrieve observer, if any, is notified
    /// exactly once and cleared.
    pub fn retrieval_completed(&self, error: Option<EngineError>) {
        {
            let mut guard = self.state.lock().unwrap();
            if guard.state == OperationState::Retrieving {
                match &error {
                    None => guard.state = OperationState::Synced,
                    Some(err) => {
                        guard.state = OperationState::NotAvailable;
                        guard.last_error = Some(err.clone());
                    }
                }
            }
        }
        let waiter = self.wait_on_retrieve.lock().unwrap().take();
        if let Some(waiter) = waiter {
            waiter(error);
        }
    }

    // ------------------------------------------------------------------
    // Save
    // ------------------------------------------------------------------

    /// Mark in-memory data as changed and due for a save.
    pub fn mark_modified(&self) -> Result<(), EngineError> {
        let mut guard = self.state.lock().unwrap();
        if guard.state.is_in_flight() || guard.state.is_deleting() {
            return Err(self.busy_error(guard.state));
        }
        guard.state = OperationState::Modified;
        Ok(())
    }

    /// Decide where a save resumes from, transitioning into the matching
    /// saving state under the lock.
    pub(crate) fn plan_save(&self, location: StorageLocation) -> Result<SavePlan, EngineError> {
        let mut guard = self.state.lock().unwrap();
        match guard.state {
            OperationState::Modified | OperationState::SaveError => {
                guard.state = OperationState::SavingToLocal;
                Ok(SavePlan::FromLocal)
            }
            OperationState::SavedToLocal => match location {
                StorageLocation::Both => {
                    guard.state = OperationState::SavingToServer;
                    Ok(SavePlan::FromServer)
                }
                StorageLocation::Local => Ok(SavePlan::Skip),
            },
            OperationState::Synced | OperationState::SavedToServer => Ok(SavePlan::Skip),
            // Nothing materialized to save.
            OperationState::NotAvailable | OperationState::PendingRetrieval => Ok(SavePlan::Skip),
            state => Err(self.busy_error(state)),
        }
    }

    /// The local copy is durable. Returns true when the operation must
    /// continue to the server (state is then `SavingToServer`).
    pub(crate) fn local_save_succeeded(&self, location: StorageLocation) -> bool {
        let mut guard = self.state.lock().unwrap();
        guard.state = OperationState::SavedToLocal;
        match location {
            StorageLocation::Both => {
                guard.state = OperationState::SavingToServer;
                true
            }
            StorageLocation::Local => false,
        }
    }

    /// Local save failed: roll back one step so a retry starts from a
    /// consistent prior state.
    pub(crate) fn local_save_failed(&self, error: EngineError) {
        let mut guard = self.state.lock().unwrap();
        guard.state = OperationState::Modified;
        guard.last_error = Some(error);
    }

    pub(crate) fn server_save_succeeded(&self) {
        let mut guard = self.state.lock().unwrap();
        guard.state = OperationState::Synced;
    }

    /// Server save failed. Retryable failures roll back to `SavedToLocal`
    /// so the server half can be retried; permanent failures park the
    /// entity in `SaveError`.
    pub(crate) fn server_save_failed(&self, error: EngineError, retryable: bool) {
        let mut guard = self.state.lock().unwrap();
        guard.state = if retryable {
            OperationState::SavedToLocal
        } else {
            OperationState::SaveError
        };
        guard.last_error = Some(error);
    }

    // ------------------------------------------------------------------
    // Delete
    // ------------------------------------------------------------------

    /// Mark the entity for deletion. Rejected while any other operation
    /// holds the entity.
    pub fn mark_pending_delete(&self) -> Result<(), EngineError> {
        let mut guard = self.state.lock().unwrap();
        if guard.state.is_in_flight() {
            return Err(self.busy_error(guard.state));
        }
        if guard.state.is_deleting() && guard.state != OperationState::PendingDelete {
            return Err(self.busy_error(guard.state));
        }
        guard.state = OperationState::PendingDelete;
        Ok(())
    }

    pub(crate) fn begin_local_delete(&self) -> Result<(), EngineError> {
        let mut guard = self.state.lock().unwrap();
        if guard.state != OperationState::PendingDelete {
            return Err(self.busy_error(guard.state));
        }
        guard.state = OperationState::DeletingFromLocal;
        Ok(())
    }

    /// The local copy is gone. Returns true when the operation must
    /// continue to the server (state is then `DeletingFromServer`).
    pub(crate) fn local_delete_succeeded(&self, location: StorageLocation) -> bool {
        let mut guard = self.state.lock().unwrap();
        guard.state = OperationState::DeletedFromLocal;
        match location {
            StorageLocation::Both => {
                guard.state = OperationState::DeletingFromServer;
                true
            }
            StorageLocation::Local => false,
        }
    }

    pub(crate) fn local_delete_failed(&self, error: EngineError) {
        let mut guard = self.state.lock().unwrap();
        guard.state = OperationState::PendingDelete;
        guard.last_error = Some(error);
    }

    pub(crate) fn server_delete_succeeded(&self) {
        let mut guard = self.state.lock().unwrap();
        guard.state = OperationState::DeletedFromServer;
    }

    /// Server delete failed after the retry policy ran out. Terminal.
    pub(crate) fn server_delete_failed(&self, error: EngineError) {
        let mut guard = self.state.lock().unwrap();
        guard.state = OperationState::DeleteError;
        guard.last_error = Some(error);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn core(initial: OperationState) -> ObjectCore {
        ObjectCore::new("test", "t1", initial)
    }

    #[test]
    fn pending_retrieval_claimed_once() {
        let core = core(OperationState::NotAvailable);
        assert!(core.mark_pending_retrieval());
        assert!(core.retrieve_if_pending());
        assert!(!core.retrieve_if_pending());
        assert_eq!(core.state(), OperationState::Retrieving);
    }

    #[test]
    fn mark_pending_retrieval_only_from_not_available() {
        let core = core(OperationState::Synced);
        assert!(!core.mark_pending_retrieval());
        assert_eq!(core.state(), OperationState::Synced);
    }

    #[test]
    fn retrieval_failure_rolls_back_for_retry() {
        let core = core(OperationState::NotAvailable);
        core.mark_pending_retrieval();
        core.retrieve_if_pending();
        core.retrieval_completed(Some(EngineError::LockPoisoned("net")));
        assert_eq!(core.state(), OperationState::NotAvailable);
        assert!(core.last_error().is_some());

        // A later retry can re-mark and succeed.
        assert!(core.mark_pending_retrieval());
        core.retrieve_if_pending();
        core.retrieval_completed(None);
        assert_eq!(core.state(), OperationState::Synced);
    }

    #[test]
    fn single_waiter_notified_exactly_once() {
        let core = Arc::new(core(OperationState::NotAvailable));
        core.mark_pending_retrieval();
        core.retrieve_if_pending();

        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        assert_eq!(
            core.wait_on_retrieval(Box::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            })),
            Ok(true)
        );

        // Second waiter is rejected while the slot is occupied.
        assert!(core.wait_on_retrieval(Box::new(|_| {})).is_err());

        core.retrieval_completed(None);
        core.retrieval_completed(None);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn waiter_rejected_when_not_retrieving() {
        let core = core(OperationState::Synced);
        assert_eq!(core.wait_on_retrieval(Box::new(|_| {})), Ok(false));
    }

    #[test]
    fn save_plan_from_modified() {
        let core = core(OperationState::Modified);
        match core.plan_save(StorageLocation::Both) {
            Ok(SavePlan::FromLocal) => {}
            other => panic!("expected FromLocal, got: {:?}", other),
        }
        assert_eq!(core.state(), OperationState::SavingToLocal);
    }

    #[test]
    fn save_plan_resumes_from_server_half() {
        let core = core(OperationState::SavedToLocal);
        match core.plan_save(StorageLocation::Both) {
            Ok(SavePlan::FromServer) => {}
            other => panic!("expected FromServer, got: {:?}", other),
        }
        assert_eq!(core.state(), OperationState::SavingToServer);
    }

    #[test]
    fn save_plan_rejects_concurrent_save() {
        let core = core(OperationState::Modified);
        core.plan_save(StorageLocation::Both).unwrap();
        match core.plan_save(StorageLocation::Both) {
            Err(EngineError::OperationInProgress { state, .. }) => {
                assert_eq!(state, OperationState::SavingToLocal);
            }
            other => panic!("expected OperationInProgress, got: {:?}", other),
        }
    }

    #[test]
    fn local_save_failure_rolls_back_to_modified() {
        let core = core(OperationState::Modified);
        core.plan_save(StorageLocation::Both).unwrap();
        core.local_save_failed(EngineError::LockPoisoned("disk"));
        assert_eq!(core.state(), OperationState::Modified);
    }

    #[test]
    fn retryable_server_failure_rolls_back_to_saved_to_local() {
        let core = core(OperationState::Modified);
        core.plan_save(StorageLocation::Both).unwrap();
        assert!(core.local_save_succeeded(StorageLocation::Both));
        core.server_save_failed(EngineError::LockPoisoned("net"), true);
        assert_eq!(core.state(), OperationState::SavedToLocal);
    }

    #[test]
    fn permanent_server_failure_parks_in_save_error() {
        let core = core(OperationState::Modified);
        core.plan_save(StorageLocation::Both).unwrap();
        core.local_save_succeeded(StorageLocation::Both);
        core.server_save_failed(EngineError::LockPoisoned("rejected"), false);
        assert_eq!(core.state(), OperationState::SaveError);

        // SaveError is retryable from the top.
        match core.plan_save(StorageLocation::Both) {
            Ok(SavePlan::FromLocal) => {}
            other => panic!("expected FromLocal, got: {:?}", other),
        }
    }

    #[test]
    fn delete_walks_both_stores() {
        let core = core(OperationState::Synced);
        core.mark_pending_delete().unwrap();
        core.begin_local_delete().unwrap();
        assert!(core.local_delete_succeeded(StorageLocation::Both));
        assert_eq!(core.state(), OperationState::DeletingFromServer);
        core.server_delete_succeeded();
        assert_eq!(core.state(), OperationState::DeletedFromServer);
    }

    #[test]
    fn local_delete_failure_rolls_back_to_pending() {
        let core = core(OperationState::Synced);
        core.mark_pending_delete().unwrap();
        core.begin_local_delete().unwrap();
        core.local_delete_failed(EngineError::LockPoisoned("disk"));
        assert_eq!(core.state(), OperationState::PendingDelete);
    }

    #[test]
    fn server_delete_failure_is_terminal() {
        let core = core(OperationState::Synced);
        core.mark_pending_delete().unwrap();
        core.begin_local_delete().unwrap();
        core.local_delete_succeeded(StorageLocation::Both);
        core.server_delete_failed(EngineError::LockPoisoned("net"));
        assert_eq!(core.state(), OperationState::DeleteError);
    }

    #[test]
    fn mark_modified_rejected_mid_flight() {
        let core = core(OperationState::Modified);
        core.plan_save(StorageLocation::Local).unwrap();
        assert!(core.mark_modified().is_err());
    }
}
