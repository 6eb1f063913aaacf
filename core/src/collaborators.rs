//! External collaborators.
//!
//! Authorization gates a request; the other three run after the event is closed
//! and are best effort: the closeout service logs their failures and moves on.
//! Retrying is their own concern.

use crate::error::CollaboratorError;
use crate::types::{Event, EventId, Money, PayoutLine, PayoutRun, PayoutRunId, PromoterId, UserId};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;

/// Boxed future returned by collaborators
pub type CollaboratorFuture<'a, T> =
    Pin<Box<dyn Future<Output = Result<T, CollaboratorError>> + Send + 'a>>;

/// Decides whether a caller may finalize or calculate for an event.
pub trait Authorizer: Send + Sync {
    /// Whether `caller` may manage `event_id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the check itself could not be performed.
    fn can_manage_event(&self, caller: UserId, event_id: EventId) -> CollaboratorFuture<'_, bool>;
}

/// Renders the audit statement for a payout run.
pub trait StatementGenerator: Send + Sync {
    /// Produce the statement and return a reference to it.
    ///
    /// # Errors
    ///
    /// Returns an error if rendering or storage fails.
    fn generate<'a>(
        &'a self,
        run: &'a PayoutRun,
        lines: &'a [PayoutLine],
        event: &'a Event,
    ) -> CollaboratorFuture<'a, String>;
}

/// A promoter's "payout ready" notice.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayoutNotice {
    /// Recipient
    pub promoter_id: PromoterId,
    /// Amount owed
    pub amount: Money,
    /// Event the payout is for
    pub event_id: EventId,
    /// Display name of the event
    pub event_name: String,
    /// Statement reference, if one was generated
    pub statement_ref: Option<String>,
}

/// Delivers payout notices.
pub trait Notifier: Send + Sync {
    /// Send one notice.
    ///
    /// # Errors
    ///
    /// Returns an error if delivery fails.
    fn payout_ready<'a>(&'a self, notice: &'a PayoutNotice) -> CollaboratorFuture<'a, ()>;
}

/// Domain events published by the engine.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DomainEvent {
    /// An event reached `CLOSED`
    EventClosed {
        /// The closed event
        event_id: EventId,
        /// Run produced by the closeout
        payout_run_id: PayoutRunId,
        /// Lines written in the run
        promoter_count: usize,
    },
}

impl DomainEvent {
    /// Event name on the bus
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::EventClosed { .. } => "event_closed",
        }
    }
}

/// Publishes domain events.
pub trait DomainEventEmitter: Send + Sync {
    /// Publish one event.
    ///
    /// # Errors
    ///
    /// Returns an error if publication fails.
    fn emit(&self, event: DomainEvent) -> CollaboratorFuture<'_, ()>;
}
