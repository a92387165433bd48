use super::domain::{ControllerId, OccurrenceId, ScopeCode, ValidationError};
use super::lifecycle::StatusReason;
use super::repository::RepositoryError;

/// Error raised by the event services to their synchronous callers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EventError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("controller {controller} lacks '{permission}' on scope {scope}")]
    Permission {
        controller: ControllerId,
        scope: ScopeCode,
        permission: &'static str,
    },
    #[error("signups for occurrence {occurrence} are closed ({reason:?})")]
    SignupClosed {
        occurrence: OccurrenceId,
        reason: StatusReason,
    },
    #[error("record not found")]
    NotFound,
    #[error(transparent)]
    Repository(RepositoryError),
}

impl From<RepositoryError> for EventError {
    fn from(value: RepositoryError) -> Self {
        match value {
            RepositoryError::Conflict(detail) => Self::Conflict(detail),
            RepositoryError::NotFound => Self::NotFound,
            other => Self::Repository(other),
        }
    }
}
