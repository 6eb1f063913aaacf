//! # Closeout Testing
//!
//! Testing utilities for the closeout engine.
//!
//! This crate provides:
//! - [`FixedClock`]: deterministic, manually advanced time
//! - [`InMemoryStore`]: both storage traits over one mutex
//! - Recording collaborators and a grant-list authorizer
//! - [`fixtures`]: builders for events, contracts, check-ins and bookings
//! - [`TestHarness`]: everything above wired into the two services
//!
//! ## Example
//!
//! ```ignore
//! use closeout_testing::{TestHarness, fixtures};
//!
//! #[tokio::test]
//! async fn closes_event() {
//!     let harness = TestHarness::new();
//!     let event = harness.seed_event("Warehouse Night");
//!     let outcome = harness
//!         .closeout_service()
//!         .finalize(event.id, harness.caller, Default::default())
//!         .await
//!         .unwrap();
//!     assert!(outcome.event.is_closed());
//! }
//! ```

pub mod collaborators;
pub mod fixtures;
pub mod memory_store;

use chrono::{DateTime, Utc};
use closeout_core::closeout::{CloseoutService, Collaborators};
use closeout_core::environment::Clock;
use closeout_core::settings::CloseoutSettings;
use closeout_core::table_commissions::TableCommissionService;
use closeout_core::types::{Event, UserId};
use std::sync::Arc;

/// Mock implementations of environment traits.
pub mod mocks {
    use super::{Clock, DateTime, Utc};
    use std::sync::{Arc, RwLock};

    /// Fixed clock for deterministic tests
    ///
    /// Returns the same time until explicitly advanced. Clones share the time.
    ///
    /// # Example
    ///
    /// ```
    /// use closeout_testing::mocks::FixedClock;
    /// use closeout_core::environment::Clock;
    /// use chrono::{Duration, Utc};
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// let time1 = clock.now();
    /// assert_eq!(time1, clock.now());
    /// clock.advance(Duration::minutes(10));
    /// assert_eq!(clock.now() - time1, Duration::minutes(10));
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: Arc<RwLock<DateTime<Utc>>>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub fn new(time: DateTime<Utc>) -> Self {
            Self {
                time: Arc::new(RwLock::new(time)),
            }
        }

        /// Move the clock forward
        #[allow(clippy::unwrap_used)]
        pub fn advance(&self, by: chrono::Duration) {
            let mut time = self.time.write().unwrap();
            *time += by;
        }
    }

    impl Clock for FixedClock {
        #[allow(clippy::unwrap_used)]
        fn now(&self) -> DateTime<Utc> {
            *self.time.read().unwrap()
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    ///
    /// # Panics
    ///
    /// This function will panic if the hardcoded timestamp fails to parse,
    /// which should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }
}

pub use collaborators::{
    RecordingEmitter, RecordingNotifier, RecordingStatementGenerator, StaticAuthorizer,
};
pub use memory_store::InMemoryStore;
pub use mocks::{FixedClock, test_clock};

/// Install a test-writer tracing subscriber (idempotent).
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "closeout_core=debug".into()),
        )
        .with_test_writer()
        .try_init();
}

/// All doubles wired together.
#[derive(Clone, Debug)]
pub struct TestHarness {
    /// Shared store
    pub store: InMemoryStore,
    /// Authorizer (allows everyone by default)
    pub authorizer: StaticAuthorizer,
    /// Statement generator
    pub statements: RecordingStatementGenerator,
    /// Notifier
    pub notifier: RecordingNotifier,
    /// Emitter
    pub emitter: RecordingEmitter,
    /// Clock
    pub clock: FixedClock,
    /// Engine settings
    pub settings: CloseoutSettings,
    /// Default caller
    pub caller: UserId,
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

impl TestHarness {
    /// Harness with an allow-all authorizer and default settings
    #[must_use]
    pub fn new() -> Self {
        Self {
            store: InMemoryStore::new(),
            authorizer: StaticAuthorizer::allow_all(),
            statements: RecordingStatementGenerator::new(),
            notifier: RecordingNotifier::new(),
            emitter: RecordingEmitter::new(),
            clock: test_clock(),
            settings: CloseoutSettings::default(),
            caller: UserId::new(),
        }
    }

    /// Replace the authorizer
    #[must_use]
    pub fn with_authorizer(mut self, authorizer: StaticAuthorizer) -> Self {
        self.authorizer = authorizer;
        self
    }

    /// Replace the statement generator
    #[must_use]
    pub fn with_statements(mut self, statements: RecordingStatementGenerator) -> Self {
        self.statements = statements;
        self
    }

    /// Insert an open event
    #[must_use]
    pub fn seed_event(&self, name: &str) -> Event {
        let event = fixtures::open_event(name);
        self.store.insert_event(event.clone());
        event
    }

    /// Collaborators backed by the harness doubles
    #[must_use]
    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            authorizer: Arc::new(self.authorizer.clone()),
            statements: Arc::new(self.statements.clone()),
            notifier: Arc::new(self.notifier.clone()),
            emitter: Arc::new(self.emitter.clone()),
        }
    }

    /// A closeout service over the harness doubles
    #[must_use]
    pub fn closeout_service(&self) -> CloseoutService {
        CloseoutService::new(
            Arc::new(self.store.clone()),
            self.collaborators(),
            Arc::new(self.clock.clone()),
            self.settings,
        )
    }

    /// A table commission service over the harness doubles
    #[must_use]
    pub fn table_service(&self) -> TableCommissionService {
        TableCommissionService::new(
            Arc::new(self.store.clone()),
            Arc::new(self.store.clone()),
            Arc::new(self.authorizer.clone()),
            Arc::new(self.clock.clone()),
            self.settings,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_clock() {
        let clock = test_clock();
        let time1 = clock.now();
        let time2 = clock.now();
        assert_eq!(time1, time2);
    }

    #[test]
    fn clones_share_time() {
        let clock = test_clock();
        let copy = clock.clone();
        clock.advance(chrono::Duration::seconds(30));
        assert_eq!(clock.now(), copy.now());
    }
}
