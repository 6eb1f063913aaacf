//! Table commission calculation and the paid-booking hand-off.
//!
//! Calls for the same event are serialized through a per-event async lock held
//! for the whole read-modify-write pass, so two calculations (or a calculation
//! and a payment) never interleave on one event's bookings. A lock leaves the
//! map once nobody holds or waits on it.
//!
//! A booking that cannot be calculated or written is counted in
//! [`TableCommissionSummary::failed`] and the pass moves on to the next one.

use crate::closeout::{authorize, locked_event};
use crate::collaborators::Authorizer;
use crate::environment::Clock;
use crate::error::{CloseoutError, StoreError};
use crate::metrics;
use crate::settings::CloseoutSettings;
use crate::store::{CloseoutStore, TableBookingStore};
use crate::table_spend::{self, BookingSplit, PromoterTableTerms};
use crate::types::{
    AmountOverflow, EventId, Money, Percentage, PromoterId, TableBooking, TableBookingCommission,
    TableBookingId, TableCommissionId, UserId,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tokio::sync::OwnedMutexGuard;

/// Aggregate counters of one calculation pass.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableCommissionSummary {
    /// Records created or updated
    pub processed: u64,
    /// Records created
    pub created: u64,
    /// Records updated in place
    pub updated: u64,
    /// Locked records left untouched (not part of the other counters)
    pub skipped_locked: u64,
    /// Bookings whose record could not be calculated or written
    pub failed: u64,
    /// Sum of spend over processed records
    pub total_spend: Money,
    /// Sum of promoter shares over processed records
    pub total_promoter_commission: Money,
    /// Sum of venue shares over processed records
    pub total_venue_commission: Money,
    /// Venue rate used
    pub venue_commission_rate: Percentage,
}

impl TableCommissionSummary {
    fn new(venue_commission_rate: Percentage) -> Self {
        Self {
            processed: 0,
            created: 0,
            updated: 0,
            skipped_locked: 0,
            failed: 0,
            total_spend: Money::ZERO,
            total_promoter_commission: Money::ZERO,
            total_venue_commission: Money::ZERO,
            venue_commission_rate,
        }
    }

    /// Totals after adding `split`, checked before anything is written.
    fn totals_with(&self, split: &BookingSplit) -> Result<Totals, AmountOverflow> {
        Ok(Totals {
            spend: self.total_spend.checked_add(split.spend_amount)?,
            promoter: self
                .total_promoter_commission
                .checked_add(split.promoter_commission_amount)?,
            venue: self
                .total_venue_commission
                .checked_add(split.venue_commission_amount)?,
        })
    }

    fn record(&mut self, created: bool, totals: Totals) {
        if created {
            self.created += 1;
        } else {
            self.updated += 1;
        }
        self.processed += 1;
        self.total_spend = totals.spend;
        self.total_promoter_commission = totals.promoter;
        self.total_venue_commission = totals.venue;
    }
}

#[derive(Clone, Copy)]
struct Totals {
    spend: Money,
    promoter: Money,
    venue: Money,
}

/// A booking left out of a calculation pass.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedBooking {
    /// Booking that was skipped
    pub booking_id: TableBookingId,
    /// Why
    pub error: String,
}

/// Result of a calculation pass.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TableCommissionReport {
    /// Counters
    pub summary: TableCommissionSummary,
    /// Records created or updated by this pass
    pub commissions: Vec<TableBookingCommission>,
    /// Bookings counted in `summary.failed`
    pub failed_bookings: Vec<FailedBooking>,
}

#[derive(Debug, Error)]
enum BookingError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Overflow(#[from] AmountOverflow),
}

enum BookingOutcome {
    Written {
        record: TableBookingCommission,
        created: bool,
        totals: Totals,
    },
    SkippedLocked,
}

type LockMap = HashMap<EventId, Arc<tokio::sync::Mutex<()>>>;

/// Per-event async locks.
#[derive(Clone, Debug, Default)]
struct EventLocks(Arc<Mutex<LockMap>>);

impl EventLocks {
    fn map(&self) -> MutexGuard<'_, LockMap> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn acquire(&self, event_id: EventId) -> EventLockGuard {
        let lock = Arc::clone(self.map().entry(event_id).or_default());
        let guard = lock.lock_owned().await;
        EventLockGuard {
            locks: self.clone(),
            event_id,
            guard: Some(guard),
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.map().len()
    }
}

/// Holds an event's lock; on drop, removes the lock from the map when the map
/// holds the only remaining reference.
#[derive(Debug)]
struct EventLockGuard {
    locks: EventLocks,
    event_id: EventId,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for EventLockGuard {
    fn drop(&mut self) {
        let mut locks = self.locks.map();
        drop(self.guard.take());
        if locks
            .get(&self.event_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&self.event_id);
        }
    }
}

/// Computes venue/promoter splits for an event's table bookings.
#[derive(Clone)]
pub struct TableCommissionService {
    events: Arc<dyn CloseoutStore>,
    bookings: Arc<dyn TableBookingStore>,
    authorizer: Arc<dyn Authorizer>,
    clock: Arc<dyn Clock>,
    settings: CloseoutSettings,
    event_locks: EventLocks,
}

impl TableCommissionService {
    /// Creates a new table commission service
    #[must_use]
    pub fn new(
        events: Arc<dyn CloseoutStore>,
        bookings: Arc<dyn TableBookingStore>,
        authorizer: Arc<dyn Authorizer>,
        clock: Arc<dyn Clock>,
        settings: CloseoutSettings,
    ) -> Self {
        Self {
            events,
            bookings,
            authorizer,
            clock,
            settings,
            event_locks: EventLocks::default(),
        }
    }

    /// Creates or refreshes the commission record of every qualifying booking.
    ///
    /// Qualifying bookings are confirmed or completed and not `closeout_locked`.
    /// Locked commission records are skipped. Nothing is locked by this call.
    /// Per-booking failures are counted in the summary, not returned.
    ///
    /// # Errors
    ///
    /// - `NotFound` when the event does not exist
    /// - `Authorization` when `caller` may not manage the event
    /// - `Conflict(EventLocked)` once the event is locked
    /// - `Persistence` when the bookings cannot be listed
    pub async fn calculate(
        &self,
        event_id: EventId,
        caller: UserId,
    ) -> Result<TableCommissionReport, CloseoutError> {
        self.events.get_event(event_id).await?;
        authorize(self.authorizer.as_ref(), caller, event_id).await?;

        let _guard = self.event_locks.acquire(event_id).await;

        let event = self.events.get_event(event_id).await?;
        if event.is_locked() {
            return Err(locked_event(event_id));
        }

        let venue_rate = event
            .venue_commission_rate
            .unwrap_or(self.settings.default_venue_rate);
        let bookings = self.bookings.list_table_bookings(event_id).await?;
        let mut terms_cache: HashMap<PromoterId, Option<PromoterTableTerms>> = HashMap::new();

        let mut summary = TableCommissionSummary::new(venue_rate);
        let mut commissions = Vec::new();
        let mut failed_bookings = Vec::new();

        for booking in bookings
            .iter()
            .filter(|booking| booking.status.qualifies_for_commission() && !booking.closeout_locked)
        {
            let outcome = self
                .calculate_booking(event_id, booking, venue_rate, &summary, &mut terms_cache)
                .await;
            match outcome {
                Ok(BookingOutcome::Written {
                    record,
                    created,
                    totals,
                }) => {
                    summary.record(created, totals);
                    commissions.push(record);
                }
                Ok(BookingOutcome::SkippedLocked) => summary.skipped_locked += 1,
                Err(error) => {
                    summary.failed += 1;
                    tracing::warn!(
                        event_id = %event_id,
                        booking_id = %booking.id,
                        error = %error,
                        "Table commission not written"
                    );
                    failed_bookings.push(FailedBooking {
                        booking_id: booking.id,
                        error: error.to_string(),
                    });
                }
            }
        }

        metrics::record_table_run(
            summary.created,
            summary.updated,
            summary.skipped_locked,
            summary.failed,
        );
        tracing::info!(
            event_id = %event_id,
            processed = summary.processed,
            created = summary.created,
            updated = summary.updated,
            skipped_locked = summary.skipped_locked,
            failed = summary.failed,
            venue_commission_rate = %venue_rate,
            "Table commissions calculated"
        );

        Ok(TableCommissionReport {
            summary,
            commissions,
            failed_bookings,
        })
    }

    async fn calculate_booking(
        &self,
        event_id: EventId,
        booking: &TableBooking,
        venue_rate: Percentage,
        summary: &TableCommissionSummary,
        terms_cache: &mut HashMap<PromoterId, Option<PromoterTableTerms>>,
    ) -> Result<BookingOutcome, BookingError> {
        let terms = match booking.promoter_id {
            Some(promoter_id) => self.promoter_terms(terms_cache, promoter_id).await?,
            None => None,
        };
        let split = table_spend::split_booking(booking, venue_rate, terms.as_ref())?;
        let totals = summary.totals_with(&split)?;
        let now = self.clock.now();

        match self.bookings.get_table_commission(booking.id).await? {
            Some(existing) if existing.locked => Ok(BookingOutcome::SkippedLocked),
            Some(existing) => {
                let refreshed = TableBookingCommission {
                    promoter_id: booking.promoter_id,
                    spend_amount: split.spend_amount,
                    spend_source: split.spend_source,
                    promoter_commission_amount: split.promoter_commission_amount,
                    venue_commission_amount: split.venue_commission_amount,
                    venue_commission_rate: split.venue_commission_rate,
                    promoter_rule: split.promoter_rule,
                    updated_at: now,
                    ..existing
                };
                if self
                    .bookings
                    .update_table_commission(refreshed.clone())
                    .await?
                {
                    Ok(BookingOutcome::Written {
                        record: refreshed,
                        created: false,
                        totals,
                    })
                } else {
                    Ok(BookingOutcome::SkippedLocked)
                }
            }
            None => {
                let created = TableBookingCommission {
                    id: TableCommissionId::new(),
                    booking_id: booking.id,
                    event_id,
                    promoter_id: booking.promoter_id,
                    spend_amount: split.spend_amount,
                    spend_source: split.spend_source,
                    promoter_commission_amount: split.promoter_commission_amount,
                    venue_commission_amount: split.venue_commission_amount,
                    venue_commission_rate: split.venue_commission_rate,
                    promoter_rule: split.promoter_rule,
                    locked: false,
                    created_at: now,
                    updated_at: now,
                };
                self.bookings.insert_table_commission(created.clone()).await?;
                Ok(BookingOutcome::Written {
                    record: created,
                    created: true,
                    totals,
                })
            }
        }
    }

    async fn promoter_terms(
        &self,
        cache: &mut HashMap<PromoterId, Option<PromoterTableTerms>>,
        promoter_id: PromoterId,
    ) -> Result<Option<PromoterTableTerms>, StoreError> {
        if let Some(terms) = cache.get(&promoter_id) {
            return Ok(terms.clone());
        }
        let terms = self.bookings.get_promoter_table_terms(promoter_id).await?;
        cache.insert(promoter_id, terms.clone());
        Ok(terms)
    }

    /// Hands a paid booking to the engine: confirms it and adds `amount_paid`
    /// to its actual spend.
    ///
    /// # Errors
    ///
    /// - `InvalidRequest` when `amount_paid` is not positive
    /// - `NotFound` when the booking or its event does not exist
    /// - `Conflict(CommissionLocked)` when the booking is frozen for closeout
    /// - `Conflict(EventLocked)` when its event is locked
    pub async fn record_booking_payment(
        &self,
        booking_id: TableBookingId,
        amount_paid: Money,
    ) -> Result<TableBooking, CloseoutError> {
        if amount_paid.is_negative() || amount_paid.is_zero() {
            return Err(CloseoutError::InvalidRequest(format!(
                "amount_paid must be positive, got {amount_paid}"
            )));
        }

        let booking = self.bookings.get_table_booking(booking_id).await?;
        let _guard = self.event_locks.acquire(booking.event_id).await;

        let event = self.events.get_event(booking.event_id).await?;
        if event.is_locked() {
            return Err(locked_event(event.id));
        }

        let booking = self
            .bookings
            .record_booking_payment(booking_id, amount_paid)
            .await?;

        tracing::info!(
            booking_id = %booking_id,
            event_id = %booking.event_id,
            amount_paid = %amount_paid,
            actual_spend = ?booking.actual_spend,
            "Table booking payment recorded"
        );
        Ok(booking)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_pending, assert_ready, task};

    #[test]
    fn idle_event_locks_leave_the_map() {
        let locks = EventLocks::default();
        let event_id = EventId::new();

        let first = tokio_test::block_on(locks.acquire(event_id));
        assert_eq!(locks.len(), 1);
        drop(first);
        assert_eq!(locks.len(), 0);

        for _ in 0..100 {
            drop(tokio_test::block_on(locks.acquire(EventId::new())));
        }
        assert_eq!(locks.len(), 0);
    }

    #[test]
    fn lock_with_a_waiter_stays_until_the_waiter_is_done() {
        let locks = EventLocks::default();
        let event_id = EventId::new();

        let holder = tokio_test::block_on(locks.acquire(event_id));
        let mut waiter = task::spawn(locks.acquire(event_id));
        assert_pending!(waiter.poll());

        drop(holder);
        assert_eq!(locks.len(), 1);

        let second = assert_ready!(waiter.poll());
        assert_eq!(locks.len(), 1);
        drop(second);
        assert_eq!(locks.len(), 0);
    }
}
