use std::fmt;

use crate::state::OperationState;
use crate::storage::BackendError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    LockPoisoned(&'static str),
    OperationInProgress {
        kind: &'static str,
        id: String,
        state: OperationState,
    },
    MissingReference {
        kind: &'static str,
        id: String,
        field: &'static str,
    },
    Decode {
        kind: &'static str,
        id: String,
        message: String,
    },
    Backend(BackendError),
    Multiple(Vec<EngineError>),
}

impl EngineError {
    /// Flatten a list of child errors according to how many there are.
    /// Used by the collect-all aggregation policy.
    pub(crate) fn from_collected(mut errors: Vec<EngineError>) -> Option<EngineError> {
        match errors.len() {
            0 => None,
            1 => Some(errors.remove(0)),
            _ => Some(EngineError::Multiple(errors)),
        }
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::LockPoisoned(what) => {
                write!(f, "engine lock poisoned during {}", what)
            }
            EngineError::OperationInProgress { kind, id, state } => write!(
                f,
                "operation already in progress on {} {} (state {})",
                kind, id, state
            ),
            EngineError::MissingReference { kind, id, field } => {
                write!(f, "{} {} has no {} reference after retrieval", kind, id, field)
            }
            EngineError::Decode { kind, id, message } => {
                write!(f, "failed to decode {} {}: {}", kind, id, message)
            }
            EngineError::Backend(err) => write!(f, "storage backend error: {}", err),
            EngineError::Multiple(errors) => {
                write!(f, "{} child operations failed (first: ", errors.len())?;
                match errors.first() {
                    Some(first) => write!(f, "{})", first),
                    None => write!(f, "none)"),
                }
            }
        }
    }
}

impl std::error::Error for EngineError {}

impl From<BackendError> for EngineError {
    fn from(err: BackendError) -> Self {
        EngineError::Backend(err)
    }
}
