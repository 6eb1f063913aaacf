//! Application state for the closeout HTTP server.

use closeout_core::closeout::{CloseoutService, Collaborators};
use closeout_core::environment::Clock;
use closeout_core::settings::CloseoutSettings;
use closeout_core::store::{CloseoutStore, TableBookingStore};
use closeout_core::table_commissions::TableCommissionService;
use std::sync::Arc;
use std::time::Duration;

/// Application state shared across all HTTP handlers.
///
/// Cloned per request; the services are `Arc`-backed.
#[derive(Clone)]
pub struct AppState {
    /// Finalize, contracts and the closeout report
    pub closeout: CloseoutService,
    /// Table commission calculation and booking payments
    pub tables: TableCommissionService,
    /// Upper bound on a finalize request
    pub request_timeout: Duration,
}

impl AppState {
    /// Create a new application state from ready-made services.
    #[must_use]
    pub const fn new(
        closeout: CloseoutService,
        tables: TableCommissionService,
        request_timeout: Duration,
    ) -> Self {
        Self {
            closeout,
            tables,
            request_timeout,
        }
    }

    /// Wire both services over one store that implements both storage traits.
    #[must_use]
    pub fn from_store<S>(
        store: Arc<S>,
        collaborators: Collaborators,
        clock: Arc<dyn Clock>,
        settings: CloseoutSettings,
        request_timeout: Duration,
    ) -> Self
    where
        S: CloseoutStore + TableBookingStore + 'static,
    {
        let tables = TableCommissionService::new(
            store.clone(),
            store.clone(),
            collaborators.authorizer.clone(),
            clock.clone(),
            settings,
        );
        let closeout = CloseoutService::new(store, collaborators, clock, settings);
        Self::new(closeout, tables, request_timeout)
    }
}
