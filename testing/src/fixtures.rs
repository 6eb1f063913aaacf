//! Builders for common test data.

use crate::mocks::test_clock;
use closeout_core::environment::Clock;
use closeout_core::rules::{CommissionContract, ContractTerms};
use closeout_core::types::{
    AttributedCheckIn, BookingStatus, CheckIn, CheckInId, ContractId, Event, EventId, Money,
    PromoterId, RegistrationId, TableBooking, TableBookingId,
};

/// An open, unlocked event
#[must_use]
pub fn open_event(name: &str) -> Event {
    Event::new(EventId::new(), name.to_string())
}

/// A contract for `promoter_id` at `event_id`
#[must_use]
pub fn contract(event_id: EventId, promoter_id: PromoterId, terms: ContractTerms) -> CommissionContract {
    let now = test_clock().now();
    CommissionContract {
        id: ContractId::new(),
        event_id,
        promoter_id,
        terms,
        created_at: now,
        updated_at: now,
    }
}

/// Flat per-head terms with a flat bonus
#[must_use]
pub fn per_head_with_bonus(rate: i64, bonus_threshold: u32, bonus_amount: i64) -> ContractTerms {
    ContractTerms {
        per_head_rate: Some(Money::from_units(rate)),
        bonus_threshold: Some(bonus_threshold),
        bonus_amount: Some(Money::from_units(bonus_amount)),
        ..ContractTerms::default()
    }
}

/// A valid check-in referred by `promoter_id` (or nobody)
#[must_use]
pub fn check_in(referred_by: Option<PromoterId>) -> AttributedCheckIn {
    AttributedCheckIn {
        check_in: CheckIn {
            id: CheckInId::new(),
            registration_id: RegistrationId::new(),
            checked_in_at: test_clock().now(),
            undo_at: None,
        },
        referred_by,
    }
}

/// An undone check-in referred by `promoter_id`
#[must_use]
pub fn undone_check_in(referred_by: PromoterId) -> AttributedCheckIn {
    let mut attributed = check_in(Some(referred_by));
    attributed.check_in.undo_at = Some(test_clock().now());
    attributed
}

/// A table booking with the given spend figures
#[must_use]
pub fn booking(
    event_id: EventId,
    promoter_id: Option<PromoterId>,
    status: BookingStatus,
    actual_spend: Option<Money>,
    minimum_spend: Option<Money>,
) -> TableBooking {
    TableBooking {
        id: TableBookingId::new(),
        event_id,
        promoter_id,
        status,
        actual_spend,
        minimum_spend,
        closeout_locked: false,
    }
}
