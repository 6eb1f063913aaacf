//! In-memory storage for fast, deterministic service tests.
//!
//! [`InMemoryStore`] implements both [`CloseoutStore`] and [`TableBookingStore`]
//! over one mutex, so every guarded write (lifecycle transitions, locked-record
//! updates, locked-booking payments) is a single check-and-set.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Panics only on a poisoned lock

use closeout_core::error::{ConflictReason, StoreError};
use closeout_core::lifecycle::{ClaimToken, TransitionError};
use closeout_core::rules::CommissionContract;
use closeout_core::store::{CloseoutStore, StoreFuture, TableBookingStore};
use closeout_core::table_spend::PromoterTableTerms;
use closeout_core::types::{
    AttributedCheckIn, BookingStatus, CloseoutRecord, Event, EventId, Money, PayoutLine,
    PayoutRun, PayoutRunId, PromoterId, TableBooking, TableBookingCommission, TableBookingId,
};
use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

#[derive(Debug, Default)]
struct State {
    events: HashMap<EventId, Event>,
    contracts: Vec<CommissionContract>,
    checkins: HashMap<EventId, Vec<AttributedCheckIn>>,
    runs: HashMap<PayoutRunId, PayoutRun>,
    lines: Vec<PayoutLine>,
    bookings: HashMap<TableBookingId, TableBooking>,
    promoter_terms: HashMap<PromoterId, PromoterTableTerms>,
    table_commissions: HashMap<TableBookingId, TableBookingCommission>,
    failing_line_promoters: HashSet<PromoterId>,
    fail_run_creation: bool,
    fail_close: bool,
    failing_commission_bookings: HashSet<TableBookingId>,
}

impl State {
    /// Drop every run of an event, with its lines.
    fn discard_runs(&mut self, event_id: EventId) {
        let discarded: HashSet<PayoutRunId> = self
            .runs
            .values()
            .filter(|run| run.event_id == event_id)
            .map(|run| run.id)
            .collect();
        self.runs.retain(|id, _| !discarded.contains(id));
        self.lines
            .retain(|line| !discarded.contains(&line.payout_run_id));
    }
}

/// In-memory store for events, payouts and table bookings.
///
/// # Example
///
/// ```
/// use closeout_testing::InMemoryStore;
/// use closeout_testing::fixtures::open_event;
///
/// let store = InMemoryStore::new();
/// let event = open_event("Warehouse Night");
/// store.insert_event(event.clone());
/// assert!(store.event(event.id).is_some());
/// ```
#[derive(Clone, Debug, Default)]
pub struct InMemoryStore {
    state: Arc<Mutex<State>>,
}

impl InMemoryStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn apply<T, F>(&self, f: F) -> StoreFuture<'_, T>
    where
        T: Send + 'static,
        F: FnOnce(&mut State) -> Result<T, StoreError>,
    {
        let result = f(&mut self.state.lock().unwrap());
        Box::pin(std::future::ready(result))
    }

    // ------------------------------------------------------------------
    // Seeding
    // ------------------------------------------------------------------

    /// Add or replace an event
    pub fn insert_event(&self, event: Event) {
        self.state.lock().unwrap().events.insert(event.id, event);
    }

    /// Add a contract without lock checks
    pub fn insert_contract(&self, contract: CommissionContract) {
        self.state.lock().unwrap().contracts.push(contract);
    }

    /// Record a check-in for an event
    pub fn add_checkin(&self, event_id: EventId, checkin: AttributedCheckIn) {
        self.state
            .lock()
            .unwrap()
            .checkins
            .entry(event_id)
            .or_default()
            .push(checkin);
    }

    /// Add or replace a table booking
    pub fn insert_booking(&self, booking: TableBooking) {
        self.state.lock().unwrap().bookings.insert(booking.id, booking);
    }

    /// Set a promoter's table-commission settings
    pub fn set_promoter_terms(&self, promoter_id: PromoterId, terms: PromoterTableTerms) {
        self.state
            .lock()
            .unwrap()
            .promoter_terms
            .insert(promoter_id, terms);
    }

    /// Seed a commission record directly (e.g. an already locked one)
    pub fn seed_table_commission(&self, record: TableBookingCommission) {
        self.state
            .lock()
            .unwrap()
            .table_commissions
            .insert(record.booking_id, record);
    }

    /// Make every `insert_payout_line` for this promoter fail
    pub fn fail_lines_for(&self, promoter_id: PromoterId) {
        self.state
            .lock()
            .unwrap()
            .failing_line_promoters
            .insert(promoter_id);
    }

    /// Make `create_payout_run` fail
    pub fn fail_run_creation(&self) {
        self.state.lock().unwrap().fail_run_creation = true;
    }

    /// Make `close_event` fail with a database error
    pub fn fail_close(&self) {
        self.state.lock().unwrap().fail_close = true;
    }

    /// Make every commission write for this booking fail
    pub fn fail_commission_writes_for(&self, booking_id: TableBookingId) {
        self.state
            .lock()
            .unwrap()
            .failing_commission_bookings
            .insert(booking_id);
    }

    // ------------------------------------------------------------------
    // Inspection
    // ------------------------------------------------------------------

    /// Current state of an event
    #[must_use]
    pub fn event(&self, event_id: EventId) -> Option<Event> {
        self.state.lock().unwrap().events.get(&event_id).cloned()
    }

    /// Payout runs of an event
    #[must_use]
    pub fn payout_runs(&self, event_id: EventId) -> Vec<PayoutRun> {
        self.state
            .lock()
            .unwrap()
            .runs
            .values()
            .filter(|run| run.event_id == event_id)
            .cloned()
            .collect()
    }

    /// All payout lines of an event
    #[must_use]
    pub fn payout_lines(&self, event_id: EventId) -> Vec<PayoutLine> {
        self.state
            .lock()
            .unwrap()
            .lines
            .iter()
            .filter(|line| line.event_id == event_id)
            .cloned()
            .collect()
    }

    /// Contracts of an event
    #[must_use]
    pub fn contracts(&self, event_id: EventId) -> Vec<CommissionContract> {
        self.state
            .lock()
            .unwrap()
            .contracts
            .iter()
            .filter(|contract| contract.event_id == event_id)
            .cloned()
            .collect()
    }

    /// Current state of a booking
    #[must_use]
    pub fn booking(&self, booking_id: TableBookingId) -> Option<TableBooking> {
        self.state.lock().unwrap().bookings.get(&booking_id).cloned()
    }

    /// Commission record of a booking
    #[must_use]
    pub fn table_commission(&self, booking_id: TableBookingId) -> Option<TableBookingCommission> {
        self.state
            .lock()
            .unwrap()
            .table_commissions
            .get(&booking_id)
            .cloned()
    }
}

fn event_mut(state: &mut State, event_id: EventId) -> Result<&mut Event, StoreError> {
    state
        .events
        .get_mut(&event_id)
        .ok_or_else(|| StoreError::not_found("Event", event_id))
}

impl CloseoutStore for InMemoryStore {
    fn get_event(&self, event_id: EventId) -> StoreFuture<'_, Event> {
        self.apply(move |state| event_mut(state, event_id).map(|event| event.clone()))
    }

    fn claim_closeout(
        &self,
        event_id: EventId,
        claim: ClaimToken,
        now: DateTime<Utc>,
        claim_ttl: Duration,
    ) -> StoreFuture<'_, Event> {
        self.apply(move |state| {
            let event = event_mut(state, event_id)?;
            event.closeout_phase = event.closeout_phase.claim(claim, now, claim_ttl)?;
            let claimed = event.clone();
            state.discard_runs(event_id);
            Ok(claimed)
        })
    }

    fn release_closeout(&self, event_id: EventId, claim: ClaimToken) -> StoreFuture<'_, ()> {
        self.apply(move |state| {
            let event = event_mut(state, event_id)?;
            event.closeout_phase = event.closeout_phase.release(claim)?;
            state.discard_runs(event_id);
            Ok(())
        })
    }

    fn close_event(
        &self,
        event_id: EventId,
        claim: ClaimToken,
        record: CloseoutRecord,
    ) -> StoreFuture<'_, Event> {
        self.apply(move |state| {
            if state.fail_close {
                return Err(StoreError::Database("injected close failure".to_string()));
            }
            let event = event_mut(state, event_id)?;
            event.closeout_phase.close(claim, record.closed_at)?;
            *event = event.clone().closed_with(&record);
            Ok(event.clone())
        })
    }

    fn list_contracts(&self, event_id: EventId) -> StoreFuture<'_, Vec<CommissionContract>> {
        self.apply(move |state| {
            Ok(state
                .contracts
                .iter()
                .filter(|contract| contract.event_id == event_id)
                .cloned()
                .collect())
        })
    }

    fn upsert_contract(
        &self,
        contract: CommissionContract,
    ) -> StoreFuture<'_, CommissionContract> {
        self.apply(move |state| {
            let event = event_mut(state, contract.event_id)?;
            if event.is_locked() {
                return Err(StoreError::conflict(
                    ConflictReason::EventLocked,
                    format!("event {} is locked", contract.event_id),
                ));
            }
            if event.is_finalizing() {
                return Err(StoreError::conflict(
                    ConflictReason::FinalizeInProgress,
                    format!("event {} is being finalized", contract.event_id),
                ));
            }
            match state.contracts.iter_mut().find(|existing| {
                existing.event_id == contract.event_id && existing.promoter_id == contract.promoter_id
            }) {
                Some(existing) => *existing = contract.clone(),
                None => state.contracts.push(contract.clone()),
            }
            Ok(contract)
        })
    }

    fn list_checkins(&self, event_id: EventId) -> StoreFuture<'_, Vec<AttributedCheckIn>> {
        self.apply(move |state| Ok(state.checkins.get(&event_id).cloned().unwrap_or_default()))
    }

    fn create_payout_run(&self, run: PayoutRun, claim: ClaimToken) -> StoreFuture<'_, ()> {
        self.apply(move |state| {
            if state.fail_run_creation {
                return Err(StoreError::Database("injected run failure".to_string()));
            }
            if !event_mut(state, run.event_id)?.closeout_phase.is_held_by(claim) {
                return Err(TransitionError::ClaimLost { claim }.into());
            }
            state.runs.insert(run.id, run);
            Ok(())
        })
    }

    fn insert_payout_line(&self, line: PayoutLine) -> StoreFuture<'_, ()> {
        self.apply(move |state| {
            if state.failing_line_promoters.contains(&line.promoter_id) {
                return Err(StoreError::Database(format!(
                    "injected line failure for promoter {}",
                    line.promoter_id
                )));
            }
            if !state.runs.contains_key(&line.payout_run_id) {
                return Err(StoreError::not_found("PayoutRun", line.payout_run_id));
            }
            state.lines.push(line);
            Ok(())
        })
    }

    fn attach_statement(&self, run_id: PayoutRunId, statement_ref: String) -> StoreFuture<'_, ()> {
        self.apply(move |state| {
            let run = state
                .runs
                .get_mut(&run_id)
                .ok_or_else(|| StoreError::not_found("PayoutRun", run_id))?;
            run.statement_ref = Some(statement_ref);
            Ok(())
        })
    }

    fn get_payout_run(&self, run_id: PayoutRunId) -> StoreFuture<'_, PayoutRun> {
        self.apply(move |state| {
            state
                .runs
                .get(&run_id)
                .cloned()
                .ok_or_else(|| StoreError::not_found("PayoutRun", run_id))
        })
    }

    fn list_payout_lines(&self, run_id: PayoutRunId) -> StoreFuture<'_, Vec<PayoutLine>> {
        self.apply(move |state| {
            Ok(state
                .lines
                .iter()
                .filter(|line| line.payout_run_id == run_id)
                .cloned()
                .collect())
        })
    }

    fn count_payout_runs(&self, event_id: EventId) -> StoreFuture<'_, u64> {
        self.apply(move |state| {
            Ok(state
                .runs
                .values()
                .filter(|run| run.event_id == event_id)
                .count() as u64)
        })
    }
}

impl TableBookingStore for InMemoryStore {
    fn list_table_bookings(&self, event_id: EventId) -> StoreFuture<'_, Vec<TableBooking>> {
        self.apply(move |state| {
            let mut bookings: Vec<TableBooking> = state
                .bookings
                .values()
                .filter(|booking| booking.event_id == event_id)
                .cloned()
                .collect();
            bookings.sort_by_key(|booking| booking.id);
            Ok(bookings)
        })
    }

    fn get_table_booking(&self, booking_id: TableBookingId) -> StoreFuture<'_, TableBooking> {
        self.apply(move |state| {
            state
                .bookings
                .get(&booking_id)
                .cloned()
                .ok_or_else(|| StoreError::not_found("TableBooking", booking_id))
        })
    }

    fn get_promoter_table_terms(
        &self,
        promoter_id: PromoterId,
    ) -> StoreFuture<'_, Option<PromoterTableTerms>> {
        self.apply(move |state| Ok(state.promoter_terms.get(&promoter_id).cloned()))
    }

    fn get_table_commission(
        &self,
        booking_id: TableBookingId,
    ) -> StoreFuture<'_, Option<TableBookingCommission>> {
        self.apply(move |state| Ok(state.table_commissions.get(&booking_id).cloned()))
    }

    fn insert_table_commission(&self, record: TableBookingCommission) -> StoreFuture<'_, ()> {
        self.apply(move |state| {
            if state.failing_commission_bookings.contains(&record.booking_id) {
                return Err(StoreError::Database(format!(
                    "injected commission failure for booking {}",
                    record.booking_id
                )));
            }
            if state.table_commissions.contains_key(&record.booking_id) {
                return Err(StoreError::conflict(
                    ConflictReason::DuplicateRecord,
                    format!("booking {} already has a commission record", record.booking_id),
                ));
            }
            state.table_commissions.insert(record.booking_id, record);
            Ok(())
        })
    }

    fn update_table_commission(&self, record: TableBookingCommission) -> StoreFuture<'_, bool> {
        self.apply(move |state| {
            if state.failing_commission_bookings.contains(&record.booking_id) {
                return Err(StoreError::Database(format!(
                    "injected commission failure for booking {}",
                    record.booking_id
                )));
            }
            let existing = state
                .table_commissions
                .get_mut(&record.booking_id)
                .ok_or_else(|| StoreError::not_found("TableBookingCommission", record.id))?;
            if existing.locked {
                return Ok(false);
            }
            *existing = record;
            Ok(true)
        })
    }

    fn record_booking_payment(
        &self,
        booking_id: TableBookingId,
        amount_paid: Money,
    ) -> StoreFuture<'_, TableBooking> {
        self.apply(move |state| {
            let booking = state
                .bookings
                .get_mut(&booking_id)
                .ok_or_else(|| StoreError::not_found("TableBooking", booking_id))?;
            if booking.closeout_locked {
                return Err(StoreError::conflict(
                    ConflictReason::CommissionLocked,
                    format!("table booking {booking_id} is locked for closeout"),
                ));
            }
            let actual_spend = booking
                .actual_spend
                .unwrap_or(Money::ZERO)
                .checked_add(amount_paid)
                .map_err(|overflow| StoreError::Database(overflow.to_string()))?;
            if booking.status != BookingStatus::Completed {
                booking.status = BookingStatus::Confirmed;
            }
            booking.actual_spend = Some(actual_spend);
            Ok(booking.clone())
        })
    }
}
