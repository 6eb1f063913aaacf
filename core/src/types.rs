//! Domain types for the closeout engine.
//!
//! Identifiers, money, and the persisted entities: events, check-ins, payout runs
//! and lines, table bookings and their commission records. Contract terms live in
//! [`crate::rules`] and the closeout phase in [`crate::lifecycle`].

use crate::lifecycle::CloseoutPhase;
use crate::payout::PayoutBreakdown;
use crate::table_spend::PromoterRateRule;
use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, AddAssign, Sub};
use thiserror::Error;
use uuid::Uuid;

// ============================================================================
// Identifiers
// ============================================================================

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            #[doc = concat!("Creates a new random `", stringify!($name), "`")]
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            #[doc = concat!("Create a `", stringify!($name), "` from a `Uuid`")]
            #[must_use]
            pub const fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Get the inner UUID
            #[must_use]
            pub const fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

define_id!(
    /// Unique identifier for an event
    EventId
);
define_id!(
    /// Unique identifier for a promoter
    PromoterId
);
define_id!(
    /// Unique identifier for a commission contract
    ContractId
);
define_id!(
    /// Unique identifier for a registration
    RegistrationId
);
define_id!(
    /// Unique identifier for a check-in
    CheckInId
);
define_id!(
    /// Unique identifier for a payout run
    PayoutRunId
);
define_id!(
    /// Unique identifier for a payout line
    PayoutLineId
);
define_id!(
    /// Unique identifier for a table booking
    TableBookingId
);
define_id!(
    /// Unique identifier for a table booking commission record
    TableCommissionId
);
define_id!(
    /// Unique identifier for an authenticated caller
    UserId
);

// ============================================================================
// Money and percentages
// ============================================================================

/// A monetary amount.
///
/// Backed by a `Decimal` so intermediate results keep full precision; rounding to
/// two decimal places happens once, at the end of a calculation, via
/// [`Money::round_cents`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(Decimal);

impl Money {
    /// Zero amount
    pub const ZERO: Self = Self(Decimal::ZERO);

    /// Creates a `Money` value from a decimal amount
    #[must_use]
    pub const fn new(amount: Decimal) -> Self {
        Self(amount)
    }

    /// Creates a `Money` value from a whole number of currency units
    #[must_use]
    pub fn from_units(units: i64) -> Self {
        Self(Decimal::from(units))
    }

    /// Returns the underlying decimal amount
    #[must_use]
    pub const fn amount(&self) -> Decimal {
        self.0
    }

    /// Checks if the amount is zero
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// Checks if the amount is below zero
    #[must_use]
    pub fn is_negative(&self) -> bool {
        self.0.is_sign_negative() && !self.0.is_zero()
    }

    /// Multiplies the amount by a head count
    ///
    /// # Errors
    ///
    /// [`AmountOverflow`] when the product does not fit a `Decimal`.
    pub fn checked_times(self, count: u32) -> Result<Self, AmountOverflow> {
        self.0
            .checked_mul(Decimal::from(count))
            .map(Self)
            .ok_or(AmountOverflow("per-head multiplication"))
    }

    /// Adds two amounts
    ///
    /// # Errors
    ///
    /// [`AmountOverflow`] when the sum does not fit a `Decimal`.
    pub fn checked_add(self, other: Self) -> Result<Self, AmountOverflow> {
        self.0
            .checked_add(other.0)
            .map(Self)
            .ok_or(AmountOverflow("addition"))
    }

    /// Rounds to two decimal places, half away from zero
    #[must_use]
    pub fn round_cents(self) -> Self {
        Self(
            self.0
                .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero),
        )
    }
}

impl Add for Money {
    type Output = Self;

    fn add(self, other: Self) -> Self {
        Self(self.0 + other.0)
    }
}

impl AddAssign for Money {
    fn add_assign(&mut self, other: Self) {
        self.0 += other.0;
    }
}

impl Sub for Money {
    type Output = Self;

    fn sub(self, other: Self) -> Self {
        Self(self.0 - other.0)
    }
}

/// Saturates at the `Decimal` bounds.
impl std::iter::Sum for Money {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::ZERO, |total, amount| Self(total.0.saturating_add(amount.0)))
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A percentage expressed on the 0-100 scale (`10` means ten percent).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Percentage(Decimal);

impl Percentage {
    /// Creates a percentage from its 0-100 value
    #[must_use]
    pub const fn new(value: Decimal) -> Self {
        Self(value)
    }

    /// Creates a percentage from a whole number
    #[must_use]
    pub fn from_whole(value: i64) -> Self {
        Self(Decimal::from(value))
    }

    /// Returns the 0-100 value
    #[must_use]
    pub const fn value(&self) -> Decimal {
        self.0
    }

    /// Applies the percentage to an amount (`amount × value / 100`), unrounded
    ///
    /// # Errors
    ///
    /// [`AmountOverflow`] when `amount × value` does not fit a `Decimal`.
    pub fn checked_of(&self, amount: Money) -> Result<Money, AmountOverflow> {
        amount
            .0
            .checked_mul(self.0)
            .and_then(|product| product.checked_div(Decimal::ONE_HUNDRED))
            .map(Money)
            .ok_or(AmountOverflow("percentage"))
    }
}

/// An amount outside the range a `Decimal` can hold.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("amount overflowed during {0}")]
pub struct AmountOverflow(pub &'static str);

impl fmt::Display for Percentage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}%", self.0)
    }
}

// ============================================================================
// Events
// ============================================================================

/// An event as seen by the closeout engine.
///
/// Only the fields the engine reads or owns are modelled; audience-facing fields
/// such as publication status are deliberately absent because closeout never
/// touches them.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Event identifier
    pub id: EventId,
    /// Display name
    pub name: String,
    /// Where the event sits in the closeout lifecycle
    pub closeout_phase: CloseoutPhase,
    /// Who closed the event
    pub closed_by: Option<UserId>,
    /// When commission inputs were frozen
    pub locked_at: Option<DateTime<Utc>>,
    /// Free-text notes entered at closeout
    pub closeout_notes: Option<String>,
    /// Revenue declared at closeout
    pub total_revenue: Option<Money>,
    /// The payout run produced by the closeout
    pub payout_run_id: Option<PayoutRunId>,
    /// The venue's configured table commission rate, if any
    pub venue_commission_rate: Option<Percentage>,
}

impl Event {
    /// Creates an open event with no closeout data
    #[must_use]
    pub const fn new(id: EventId, name: String) -> Self {
        Self {
            id,
            name,
            closeout_phase: CloseoutPhase::Open,
            closed_by: None,
            locked_at: None,
            closeout_notes: None,
            total_revenue: None,
            payout_run_id: None,
            venue_commission_rate: None,
        }
    }

    /// When the event was closed, if it has been
    #[must_use]
    pub const fn closed_at(&self) -> Option<DateTime<Utc>> {
        self.closeout_phase.closed_at()
    }

    /// Whether the event is terminal for commission purposes
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        self.closeout_phase.is_closed()
    }

    /// Whether commission inputs are frozen
    #[must_use]
    pub const fn is_locked(&self) -> bool {
        self.locked_at.is_some() || self.closeout_phase.is_closed()
    }

    /// Whether a finalize call holds the event
    #[must_use]
    pub const fn is_finalizing(&self) -> bool {
        matches!(self.closeout_phase, CloseoutPhase::Finalizing { .. })
    }

    /// The event as it reads once `record` closes it.
    #[must_use]
    pub fn closed_with(self, record: &CloseoutRecord) -> Self {
        Self {
            closeout_phase: CloseoutPhase::Closed {
                closed_at: record.closed_at,
            },
            closed_by: Some(record.closed_by),
            locked_at: Some(record.closed_at),
            closeout_notes: record.closeout_notes.clone(),
            total_revenue: record.total_revenue,
            payout_run_id: Some(record.payout_run_id),
            ..self
        }
    }
}

/// Everything written to an event when it transitions to closed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CloseoutRecord {
    /// Closing timestamp (also used as `locked_at`)
    pub closed_at: DateTime<Utc>,
    /// Who closed the event
    pub closed_by: UserId,
    /// Notes entered at closeout
    pub closeout_notes: Option<String>,
    /// Revenue declared at closeout
    pub total_revenue: Option<Money>,
    /// The run created by this closeout
    pub payout_run_id: PayoutRunId,
}

// ============================================================================
// Attendance
// ============================================================================

/// A recorded, reversible attendance confirmation for a registration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckIn {
    /// Check-in identifier
    pub id: CheckInId,
    /// The registration that checked in
    pub registration_id: RegistrationId,
    /// When the guest was checked in
    pub checked_in_at: DateTime<Utc>,
    /// When the check-in was undone (`None` while valid)
    pub undo_at: Option<DateTime<Utc>>,
}

impl CheckIn {
    /// Whether the check-in still counts
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.undo_at.is_none()
    }
}

/// A check-in joined with the referral field of its registration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributedCheckIn {
    /// The check-in
    pub check_in: CheckIn,
    /// Promoter that referred the registration, if any
    pub referred_by: Option<PromoterId>,
}

// ============================================================================
// Payouts
// ============================================================================

/// One closeout's generated batch of commission results for an event.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PayoutRun {
    /// Run identifier
    pub id: PayoutRunId,
    /// Event the run belongs to
    pub event_id: EventId,
    /// Who triggered the closeout
    pub created_by: UserId,
    /// When the run was created
    pub created_at: DateTime<Utc>,
    /// Reference to the generated statement document
    pub statement_ref: Option<String>,
}

/// Payment state of a payout line.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    /// Computed, not yet paid out
    PendingPayment,
    /// Paid to the promoter
    Paid,
    /// Withdrawn before payment
    Cancelled,
}

impl PaymentStatus {
    /// Convert status to database string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::PendingPayment => "pending_payment",
            Self::Paid => "paid",
            Self::Cancelled => "cancelled",
        }
    }

    /// Parse status from database string.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending_payment" => Some(Self::PendingPayment),
            "paid" => Some(Self::Paid),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

/// One promoter's computed result within a payout run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PayoutLine {
    /// Line identifier
    pub id: PayoutLineId,
    /// Owning run
    pub payout_run_id: PayoutRunId,
    /// Event the line belongs to
    pub event_id: EventId,
    /// Promoter being paid
    pub promoter_id: PromoterId,
    /// The effective count used in the payout math
    pub checkins_count: u32,
    /// The aggregated count, kept for audit when an override was used
    pub actual_checkins: u32,
    /// Why the count was overridden, when it was
    pub checkins_override_reason: Option<String>,
    /// Final rounded commission
    pub commission_amount: Money,
    /// Component-by-component breakdown
    pub breakdown: PayoutBreakdown,
    /// Payment state
    pub payment_status: PaymentStatus,
    /// When the line was written
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// Table bookings
// ============================================================================

/// Lifecycle status of a table booking.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    /// Requested, not yet paid or confirmed
    Pending,
    /// Paid or confirmed by the venue
    Confirmed,
    /// The party attended
    Completed,
    /// Cancelled before the event
    Cancelled,
    /// The party did not show up
    NoShow,
}

impl BookingStatus {
    /// Whether bookings in this status earn commission
    #[must_use]
    pub const fn qualifies_for_commission(&self) -> bool {
        matches!(self, Self::Confirmed | Self::Completed)
    }

    /// Convert status to database string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::NoShow => "no_show",
        }
    }

    /// Parse status from database string.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "confirmed" => Some(Self::Confirmed),
            "completed" => Some(Self::Completed),
            "cancelled" => Some(Self::Cancelled),
            "no_show" => Some(Self::NoShow),
            _ => None,
        }
    }
}

/// A table reservation at an event.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TableBooking {
    /// Booking identifier
    pub id: TableBookingId,
    /// Event the table is booked for
    pub event_id: EventId,
    /// Promoter credited with the booking
    pub promoter_id: Option<PromoterId>,
    /// Booking status
    pub status: BookingStatus,
    /// Spend recorded on the night
    pub actual_spend: Option<Money>,
    /// Contractual minimum spend
    pub minimum_spend: Option<Money>,
    /// Frozen individually for closeout
    pub closeout_locked: bool,
}

/// Whether a commission was based on recorded or contractual spend.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpendSource {
    /// `actual_spend` was recorded
    Actual,
    /// Fell back to `minimum_spend` (or zero)
    Minimum,
}

impl SpendSource {
    /// Convert to database string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Actual => "actual",
            Self::Minimum => "minimum",
        }
    }

    /// Parse from database string.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "actual" => Some(Self::Actual),
            "minimum" => Some(Self::Minimum),
            _ => None,
        }
    }
}

/// Venue/promoter commission split for one table booking.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TableBookingCommission {
    /// Record identifier
    pub id: TableCommissionId,
    /// Booking the record belongs to (one record per booking)
    pub booking_id: TableBookingId,
    /// Event of the booking
    pub event_id: EventId,
    /// Promoter credited, if any
    pub promoter_id: Option<PromoterId>,
    /// Spend the split was computed from
    pub spend_amount: Money,
    /// Where the spend figure came from
    pub spend_source: SpendSource,
    /// Promoter share
    pub promoter_commission_amount: Money,
    /// Venue share
    pub venue_commission_amount: Money,
    /// Venue rate used
    pub venue_commission_rate: Percentage,
    /// Which promoter rate rule produced the promoter share
    pub promoter_rule: PromoterRateRule,
    /// Frozen; recalculation leaves it untouched
    pub locked: bool,
    /// When first calculated
    pub created_at: DateTime<Utc>,
    /// When last recalculated
    pub updated_at: DateTime<Utc>,
}
