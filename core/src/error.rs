//! Error taxonomy for the closeout engine.
//!
//! Storage and collaborators report their own errors; the services translate
//! them into [`CloseoutError`], which is what callers (and the HTTP layer) see.
//! Degraded inputs, per-line persistence failures and best-effort failures are
//! logged and summarised, never returned as `Err`.

use crate::lifecycle::TransitionError;
use crate::rules::ContractValidationError;
use thiserror::Error;

/// Errors from the storage traits.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Entity does not exist
    #[error("{resource} not found: {id}")]
    NotFound {
        /// Entity kind
        resource: &'static str,
        /// Identifier that was looked up
        id: String,
    },

    /// A guarded write lost its precondition
    #[error("Conflict: {message}")]
    Conflict {
        /// Which precondition failed
        reason: ConflictReason,
        /// Human-readable detail
        message: String,
    },

    /// A lifecycle transition was refused
    #[error(transparent)]
    Transition(#[from] TransitionError),

    /// Database connection or query failed
    #[error("Database error: {0}")]
    Database(String),

    /// Stored data could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl StoreError {
    /// Creates a not-found error
    pub fn not_found(resource: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            resource,
            id: id.to_string(),
        }
    }

    /// Creates a conflict error
    pub fn conflict(reason: ConflictReason, message: impl Into<String>) -> Self {
        Self::Conflict {
            reason,
            message: message.into(),
        }
    }
}

/// Errors from external collaborators.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{collaborator} failed: {message}")]
pub struct CollaboratorError {
    /// Which collaborator failed
    pub collaborator: &'static str,
    /// What went wrong
    pub message: String,
}

impl CollaboratorError {
    /// Creates a collaborator error
    pub fn new(collaborator: &'static str, message: impl Into<String>) -> Self {
        Self {
            collaborator,
            message: message.into(),
        }
    }
}

/// Why a request conflicted with the current state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConflictReason {
    /// The event is already closed
    AlreadyClosed,
    /// Another finalize call holds the event
    FinalizeInProgress,
    /// Commission inputs for the event are frozen
    EventLocked,
    /// The booking is individually frozen for closeout
    CommissionLocked,
    /// The record already exists
    DuplicateRecord,
}

impl ConflictReason {
    /// Stable machine-readable code
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::AlreadyClosed => "already_closed",
            Self::FinalizeInProgress => "finalize_in_progress",
            Self::EventLocked => "event_locked",
            Self::CommissionLocked => "commission_locked",
            Self::DuplicateRecord => "duplicate_record",
        }
    }
}

/// Errors surfaced to callers of the closeout services.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CloseoutError {
    /// A referenced entity does not exist
    #[error("{resource} not found: {id}")]
    NotFound {
        /// Entity kind
        resource: &'static str,
        /// Identifier that was looked up
        id: String,
    },

    /// Contract terms were rejected
    #[error("Invalid contract: {0}")]
    InvalidContract(#[from] ContractValidationError),

    /// Request input was rejected
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Caller may not act on the event
    #[error("Forbidden: {0}")]
    Authorization(String),

    /// The request conflicts with the event or booking state
    #[error("{message}")]
    Conflict {
        /// Why
        reason: ConflictReason,
        /// Human-readable detail
        message: String,
    },

    /// Storage failed in a way the request cannot recover from
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// The request exceeded its time budget
    #[error("Timed out after {0:?}")]
    Timeout(std::time::Duration),
}

impl CloseoutError {
    /// Creates a not-found error
    pub fn not_found(resource: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            resource,
            id: id.to_string(),
        }
    }

    /// Creates a conflict error
    pub fn conflict(reason: ConflictReason, message: impl Into<String>) -> Self {
        Self::Conflict {
            reason,
            message: message.into(),
        }
    }

    /// Metric label for rejected requests
    #[must_use]
    pub const fn reason_label(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::InvalidContract(_) => "invalid_contract",
            Self::InvalidRequest(_) => "invalid_request",
            Self::Authorization(_) => "forbidden",
            Self::Conflict { reason, .. } => reason.as_str(),
            Self::Persistence(_) => "persistence",
            Self::Timeout(_) => "timeout",
        }
    }
}

impl From<StoreError> for CloseoutError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::NotFound { resource, id } => Self::NotFound { resource, id },
            StoreError::Transition(transition) => transition.into(),
            StoreError::Conflict { reason, message } => Self::Conflict { reason, message },
            StoreError::Database(message) | StoreError::Serialization(message) => {
                Self::Persistence(message)
            }
        }
    }
}

impl From<TransitionError> for CloseoutError {
    fn from(error: TransitionError) -> Self {
        let message = error.to_string();
        match error {
            TransitionError::AlreadyClosed { .. } => {
                Self::conflict(ConflictReason::AlreadyClosed, message)
            }
            TransitionError::InProgress { .. } => {
                Self::conflict(ConflictReason::FinalizeInProgress, message)
            }
            TransitionError::ClaimLost { .. } => Self::Persistence(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn transition_errors_map_to_conflicts() {
        let closed: CloseoutError = TransitionError::AlreadyClosed {
            closed_at: Utc::now(),
        }
        .into();
        assert_eq!(closed.reason_label(), "already_closed");

        let busy: CloseoutError = StoreError::Transition(TransitionError::InProgress {
            claimed_at: Utc::now(),
        })
        .into();
        assert_eq!(busy.reason_label(), "finalize_in_progress");
    }

    #[test]
    fn store_not_found_keeps_resource() {
        let error: CloseoutError = StoreError::not_found("Event", "abc").into();
        assert_eq!(error.to_string(), "Event not found: abc");
    }

    #[test]
    fn database_errors_are_persistence() {
        let error: CloseoutError = StoreError::Database("connection reset".to_string()).into();
        assert!(matches!(error, CloseoutError::Persistence(_)));
    }

    #[test]
    fn guarded_write_conflicts_keep_their_reason() {
        let error: CloseoutError =
            StoreError::conflict(ConflictReason::FinalizeInProgress, "event is finalizing").into();
        assert_eq!(
            error,
            CloseoutError::conflict(ConflictReason::FinalizeInProgress, "event is finalizing")
        );
        assert_eq!(error.reason_label(), "finalize_in_progress");
    }
}
