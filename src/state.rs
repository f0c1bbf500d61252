use std::fmt;

/// Persistence lifecycle of a single entity.
///
/// Transitions are driven exclusively by `ObjectCore`; the enum itself only
/// answers classification questions so call sites stay readable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationState {
    NotAvailable,
    PendingRetrieval,
    Retrieving,
    Synced,
    Modified,
    SavingToLocal,
    SavedToLocal,
    SavingToServer,
    SavedToServer,
    SaveError,
    PendingDelete,
    DeletingFromLocal,
    DeletedFromLocal,
    DeletingFromServer,
    DeletedFromServer,
    DeleteError,
}

impl OperationState {
    /// True while a save, retrieve, or delete holds the entity exclusively.
    pub fn is_in_flight(self) -> bool {
        matches!(
            self,
            OperationState::Retrieving
                | OperationState::SavingToLocal
                | OperationState::SavingToServer
                | OperationState::DeletingFromLocal
                | OperationState::DeletingFromServer
        )
    }

    /// True once the entity's own payload is resident in memory.
    pub fn is_materialized(self) -> bool {
        matches!(
            self,
            OperationState::Synced
                | OperationState::Modified
                | OperationState::SavedToLocal
                | OperationState::SavedToServer
                | OperationState::SaveError
        )
    }

    /// True for any state on the delete half of the lifecycle.
    pub fn is_deleting(self) -> bool {
        matches!(
            self,
            OperationState::PendingDelete
                | OperationState::DeletingFromLocal
                | OperationState::DeletedFromLocal
                | OperationState::DeletingFromServer
                | OperationState::DeletedFromServer
                | OperationState::DeleteError
        )
    }
}

impl fmt::Display for OperationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OperationState::NotAvailable => "not-available",
            OperationState::PendingRetrieval => "pending-retrieval",
            OperationState::Retrieving => "retrieving",
            OperationState::Synced => "synced",
            OperationState::Modified => "modified",
            OperationState::SavingToLocal => "saving-to-local",
            OperationState::SavedToLocal => "saved-to-local",
            OperationState::SavingToServer => "saving-to-server",
            OperationState::SavedToServer => "saved-to-server",
            OperationState::SaveError => "save-error",
            OperationState::PendingDelete => "pending-delete",
            OperationState::DeletingFromLocal => "deleting-from-local",
            OperationState::DeletedFromLocal => "deleted-from-local",
            OperationState::DeletingFromServer => "deleting-from-server",
            OperationState::DeletedFromServer => "deleted-from-server",
            OperationState::DeleteError => "delete-error",
        };
        write!(f, "{}", name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_flight_states() {
        assert!(OperationState::Retrieving.is_in_flight());
        assert!(OperationState::SavingToLocal.is_in_flight());
        assert!(OperationState::SavingToServer.is_in_flight());
        assert!(OperationState::DeletingFromLocal.is_in_flight());
        assert!(OperationState::DeletingFromServer.is_in_flight());
        assert!(!OperationState::Synced.is_in_flight());
        assert!(!OperationState::PendingRetrieval.is_in_flight());
    }

    #[test]
    fn materialized_states() {
        assert!(OperationState::Modified.is_materialized());
        assert!(OperationState::Synced.is_materialized());
        assert!(OperationState::SavedToLocal.is_materialized());
        assert!(!OperationState::NotAvailable.is_materialized());
        assert!(!OperationState::Retrieving.is_materialized());
    }

    #[test]
    fn deleting_states() {
        assert!(OperationState::PendingDelete.is_deleting());
        assert!(OperationState::DeletedFromServer.is_deleting());
        assert!(OperationState::DeleteError.is_deleting());
        assert!(!OperationState::Modified.is_deleting());
    }

    #[test]
    fn display_is_kebab_case() {
        assert_eq!(OperationState::SavedToLocal.to_string(), "saved-to-local");
        assert_eq!(OperationState::NotAvailable.to_string(), "not-available");
    }
}
