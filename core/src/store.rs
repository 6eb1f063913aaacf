//! Storage seams.
//!
//! Two traits, both object-safe and returning boxed futures so services can hold
//! them as `Arc<dyn ...>`:
//!
//! - [`CloseoutStore`]: events, contracts, check-ins, payout runs and lines.
//! - [`TableBookingStore`]: bookings, promoter table terms, commission records.
//!
//! Every guarded write is atomic in the implementation (a conditional `UPDATE`
//! in PostgreSQL, a check-and-set under one mutex in memory). Services never
//! read-then-write to enforce a state rule.

use crate::error::StoreError;
use crate::lifecycle::ClaimToken;
use crate::rules::CommissionContract;
use crate::table_spend::PromoterTableTerms;
use crate::types::{
    AttributedCheckIn, CloseoutRecord, Event, EventId, Money, PayoutLine, PayoutRun, PayoutRunId,
    PromoterId, TableBooking, TableBookingCommission, TableBookingId,
};
use chrono::{DateTime, Duration, Utc};
use std::future::Future;
use std::pin::Pin;

/// Boxed future returned by the storage traits
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

/// Persistence for the closeout lifecycle and its payout batch.
pub trait CloseoutStore: Send + Sync {
    /// Load an event.
    ///
    /// # Errors
    ///
    /// `NotFound` when the event does not exist.
    fn get_event(&self, event_id: EventId) -> StoreFuture<'_, Event>;

    /// Atomically apply [`crate::lifecycle::CloseoutPhase::claim`] to the event.
    ///
    /// In the same step, deletes any payout run (and its lines) left behind by
    /// an earlier claim: the event is not closed, so no run belongs to it yet.
    /// Returns the event as it is after the claim.
    ///
    /// # Errors
    ///
    /// `NotFound`, or `Transition` when the event is closed or claimed by a
    /// live finalize call.
    fn claim_closeout(
        &self,
        event_id: EventId,
        claim: ClaimToken,
        now: DateTime<Utc>,
        claim_ttl: Duration,
    ) -> StoreFuture<'_, Event>;

    /// Atomically return a claimed event to `OPEN`, deleting the payout runs
    /// and lines written under the claim.
    ///
    /// # Errors
    ///
    /// `Transition(ClaimLost)` when `claim` no longer holds the event.
    fn release_closeout(&self, event_id: EventId, claim: ClaimToken) -> StoreFuture<'_, ()>;

    /// Atomically move a claimed event to `CLOSED`, writing the closeout fields.
    ///
    /// # Errors
    ///
    /// `Transition` when `claim` no longer holds the event.
    fn close_event(
        &self,
        event_id: EventId,
        claim: ClaimToken,
        record: CloseoutRecord,
    ) -> StoreFuture<'_, Event>;

    /// All commission contracts attached to an event.
    ///
    /// # Errors
    ///
    /// `Database` or `Serialization` on storage failure.
    fn list_contracts(&self, event_id: EventId) -> StoreFuture<'_, Vec<CommissionContract>>;

    /// Insert or replace the contract for `(event_id, promoter_id)`.
    ///
    /// The write only succeeds while the event is `OPEN` and not locked.
    ///
    /// # Errors
    ///
    /// `NotFound` for a missing event, `Conflict(FinalizeInProgress)` while the
    /// event is claimed, `Conflict(EventLocked)` once it is locked.
    fn upsert_contract(&self, contract: CommissionContract)
    -> StoreFuture<'_, CommissionContract>;

    /// Every check-in for the event's registrations, with the registration's
    /// referring promoter.
    ///
    /// # Errors
    ///
    /// `Database` on storage failure.
    fn list_checkins(&self, event_id: EventId) -> StoreFuture<'_, Vec<AttributedCheckIn>>;

    /// Persist a new payout run, only while `claim` holds the run's event.
    ///
    /// # Errors
    ///
    /// `Transition(ClaimLost)` when `claim` no longer holds the event,
    /// `Database` on storage failure.
    fn create_payout_run(&self, run: PayoutRun, claim: ClaimToken) -> StoreFuture<'_, ()>;

    /// Persist one payout line.
    ///
    /// # Errors
    ///
    /// `NotFound` when its run no longer exists, `Database` on storage failure.
    fn insert_payout_line(&self, line: PayoutLine) -> StoreFuture<'_, ()>;

    /// Record the statement reference on a run.
    ///
    /// # Errors
    ///
    /// `NotFound` for a missing run.
    fn attach_statement(&self, run_id: PayoutRunId, statement_ref: String) -> StoreFuture<'_, ()>;

    /// Load a payout run.
    ///
    /// # Errors
    ///
    /// `NotFound` for a missing run.
    fn get_payout_run(&self, run_id: PayoutRunId) -> StoreFuture<'_, PayoutRun>;

    /// Lines of a run.
    ///
    /// # Errors
    ///
    /// `Database` on storage failure.
    fn list_payout_lines(&self, run_id: PayoutRunId) -> StoreFuture<'_, Vec<PayoutLine>>;

    /// Number of payout runs stored for an event.
    ///
    /// # Errors
    ///
    /// `Database` on storage failure.
    fn count_payout_runs(&self, event_id: EventId) -> StoreFuture<'_, u64>;
}

/// Persistence for table bookings and their commission records.
pub trait TableBookingStore: Send + Sync {
    /// Bookings for an event.
    ///
    /// # Errors
    ///
    /// `Database` on storage failure.
    fn list_table_bookings(&self, event_id: EventId) -> StoreFuture<'_, Vec<TableBooking>>;

    /// Load a booking.
    ///
    /// # Errors
    ///
    /// `NotFound` for a missing booking.
    fn get_table_booking(&self, booking_id: TableBookingId) -> StoreFuture<'_, TableBooking>;

    /// A promoter's table-commission settings, if the promoter exists.
    ///
    /// # Errors
    ///
    /// `Database` on storage failure.
    fn get_promoter_table_terms(
        &self,
        promoter_id: PromoterId,
    ) -> StoreFuture<'_, Option<PromoterTableTerms>>;

    /// The commission record for a booking, if one was ever calculated.
    ///
    /// # Errors
    ///
    /// `Database` on storage failure.
    fn get_table_commission(
        &self,
        booking_id: TableBookingId,
    ) -> StoreFuture<'_, Option<TableBookingCommission>>;

    /// Insert the first commission record for a booking.
    ///
    /// # Errors
    ///
    /// `Conflict` when the booking already has a record.
    fn insert_table_commission(&self, record: TableBookingCommission) -> StoreFuture<'_, ()>;

    /// Update a commission record in place, only while it is unlocked.
    ///
    /// Returns `false` when the record is locked and was left untouched.
    ///
    /// # Errors
    ///
    /// `NotFound` when the record does not exist.
    fn update_table_commission(&self, record: TableBookingCommission) -> StoreFuture<'_, bool>;

    /// Mark a booking confirmed and add `amount_paid` to its actual spend.
    ///
    /// # Errors
    ///
    /// `NotFound` for a missing booking, `Conflict` when the booking is
    /// `closeout_locked`.
    fn record_booking_payment(
        &self,
        booking_id: TableBookingId,
        amount_paid: Money,
    ) -> StoreFuture<'_, TableBooking>;
}
