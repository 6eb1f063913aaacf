//! Collaborator doubles that record what they were asked to do.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)]

use closeout_core::collaborators::{
    Authorizer, CollaboratorFuture, DomainEvent, DomainEventEmitter, Notifier, PayoutNotice,
    StatementGenerator,
};
use closeout_core::error::CollaboratorError;
use closeout_core::types::{Event, EventId, PayoutLine, PayoutRun, PayoutRunId, UserId};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Authorizer with an explicit grant list.
#[derive(Clone, Debug, Default)]
pub struct StaticAuthorizer {
    allow_all: bool,
    grants: Arc<Mutex<HashSet<(UserId, EventId)>>>,
    broken: Arc<AtomicBool>,
}

impl StaticAuthorizer {
    /// Every caller may manage every event
    #[must_use]
    pub fn allow_all() -> Self {
        Self {
            allow_all: true,
            ..Self::default()
        }
    }

    /// Only explicit grants pass
    #[must_use]
    pub fn deny_all() -> Self {
        Self::default()
    }

    /// Grant `user` access to `event_id`
    pub fn grant(&self, user: UserId, event_id: EventId) {
        self.grants.lock().unwrap().insert((user, event_id));
    }

    /// Make every check fail with an error
    pub fn break_checks(&self) {
        self.broken.store(true, Ordering::SeqCst);
    }
}

impl Authorizer for StaticAuthorizer {
    fn can_manage_event(&self, caller: UserId, event_id: EventId) -> CollaboratorFuture<'_, bool> {
        let result = if self.broken.load(Ordering::SeqCst) {
            Err(CollaboratorError::new("authorizer", "directory unavailable"))
        } else {
            Ok(self.allow_all || self.grants.lock().unwrap().contains(&(caller, event_id)))
        };
        Box::pin(std::future::ready(result))
    }
}

/// Statement generator returning `statement://{run_id}`.
#[derive(Clone, Debug, Default)]
pub struct RecordingStatementGenerator {
    generated: Arc<Mutex<Vec<PayoutRunId>>>,
    rendered: Arc<Mutex<Vec<Event>>>,
    failing: Arc<AtomicBool>,
    delay: Option<Duration>,
}

impl RecordingStatementGenerator {
    /// Create a generator that succeeds immediately
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a generator that sleeps before answering
    #[must_use]
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    /// Make generation fail from now on
    pub fn fail(&self) {
        self.failing.store(true, Ordering::SeqCst);
    }

    /// Runs a statement was requested for
    #[must_use]
    pub fn generated(&self) -> Vec<PayoutRunId> {
        self.generated.lock().unwrap().clone()
    }

    /// Events the statements were rendered for
    #[must_use]
    pub fn rendered_events(&self) -> Vec<Event> {
        self.rendered.lock().unwrap().clone()
    }
}

impl StatementGenerator for RecordingStatementGenerator {
    fn generate<'a>(
        &'a self,
        run: &'a PayoutRun,
        _lines: &'a [PayoutLine],
        event: &'a Event,
    ) -> CollaboratorFuture<'a, String> {
        Box::pin(async move {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.generated.lock().unwrap().push(run.id);
            self.rendered.lock().unwrap().push(event.clone());
            if self.failing.load(Ordering::SeqCst) {
                return Err(CollaboratorError::new("statement generator", "renderer offline"));
            }
            Ok(format!("statement://{}", run.id))
        })
    }
}

/// Notifier that records every notice.
#[derive(Clone, Debug, Default)]
pub struct RecordingNotifier {
    sent: Arc<Mutex<Vec<PayoutNotice>>>,
    failing: Arc<AtomicBool>,
}

impl RecordingNotifier {
    /// Create a notifier that succeeds
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make delivery fail from now on (notices are still recorded)
    pub fn fail(&self) {
        self.failing.store(true, Ordering::SeqCst);
    }

    /// Notices handed to the notifier
    #[must_use]
    pub fn sent(&self) -> Vec<PayoutNotice> {
        self.sent.lock().unwrap().clone()
    }
}

impl Notifier for RecordingNotifier {
    fn payout_ready<'a>(&'a self, notice: &'a PayoutNotice) -> CollaboratorFuture<'a, ()> {
        self.sent.lock().unwrap().push(notice.clone());
        let result = if self.failing.load(Ordering::SeqCst) {
            Err(CollaboratorError::new("notifier", "mail relay refused"))
        } else {
            Ok(())
        };
        Box::pin(std::future::ready(result))
    }
}

/// Emitter that records every domain event.
#[derive(Clone, Debug, Default)]
pub struct RecordingEmitter {
    emitted: Arc<Mutex<Vec<DomainEvent>>>,
    failing: Arc<AtomicBool>,
}

impl RecordingEmitter {
    /// Create an emitter that succeeds
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make emission fail from now on (events are still recorded)
    pub fn fail(&self) {
        self.failing.store(true, Ordering::SeqCst);
    }

    /// Events handed to the emitter
    #[must_use]
    pub fn emitted(&self) -> Vec<DomainEvent> {
        self.emitted.lock().unwrap().clone()
    }
}

impl DomainEventEmitter for RecordingEmitter {
    fn emit(&self, event: DomainEvent) -> CollaboratorFuture<'_, ()> {
        self.emitted.lock().unwrap().push(event);
        let result = if self.failing.load(Ordering::SeqCst) {
            Err(CollaboratorError::new("event emitter", "broker unavailable"))
        } else {
            Ok(())
        };
        Box::pin(std::future::ready(result))
    }
}
