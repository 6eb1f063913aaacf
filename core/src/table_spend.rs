//! Table-Spend Commission Calculator (per-booking math).
//!
//! Pure functions: spend basis, venue rate, and the ordered promoter-rate
//! resolver. Persistence and upsert semantics live in
//! [`crate::table_commissions`].

use crate::types::{AmountOverflow, Money, Percentage, SpendSource, TableBooking};
use serde::{Deserialize, Serialize};

/// How a promoter is paid on table bookings.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableCommissionType {
    /// Share of spend
    Percentage,
    /// Fixed amount per booking
    FlatFee,
}

impl TableCommissionType {
    /// Convert to database string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Percentage => "percentage",
            Self::FlatFee => "flat_fee",
        }
    }

    /// Parse from database string.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "percentage" => Some(Self::Percentage),
            "flat_fee" => Some(Self::FlatFee),
            _ => None,
        }
    }
}

/// A promoter's stored table-commission settings.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromoterTableTerms {
    /// Selected table commission type
    pub table_commission_type: Option<TableCommissionType>,
    /// Per-booking fee for the flat-fee type
    pub table_flat_fee: Option<Money>,
    /// Table-specific share of spend
    pub table_commission_rate: Option<Percentage>,
    /// General (legacy) promoter commission rate
    pub commission_rate: Option<Percentage>,
}

/// Name of the precedence rule that produced a promoter share.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromoterRateRule {
    /// Booking-level flat fee
    FlatFee,
    /// Table-specific percentage
    TableRate,
    /// General promoter percentage
    LegacyRate,
    /// Nothing configured; promoter earns zero
    None,
}

impl PromoterRateRule {
    /// Convert to database string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::FlatFee => "flat_fee",
            Self::TableRate => "table_rate",
            Self::LegacyRate => "legacy_rate",
            Self::None => "none",
        }
    }

    /// Parse from database string.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "flat_fee" => Some(Self::FlatFee),
            "table_rate" => Some(Self::TableRate),
            "legacy_rate" => Some(Self::LegacyRate),
            "none" => Some(Self::None),
            _ => None,
        }
    }
}

/// A resolved promoter rate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PromoterRate {
    /// Fixed amount per booking
    FlatFee(Money),
    /// Table-specific percentage of spend
    TableRate(Percentage),
    /// General percentage of spend
    LegacyRate(Percentage),
    /// Zero
    None,
}

impl PromoterRate {
    /// Resolves the promoter rate; first matching rule wins:
    ///
    /// 1. `flat_fee` type with a configured fee
    /// 2. table-specific rate
    /// 3. legacy general rate
    /// 4. none
    #[must_use]
    pub fn resolve(terms: Option<&PromoterTableTerms>) -> Self {
        let Some(terms) = terms else {
            return Self::None;
        };
        if terms.table_commission_type == Some(TableCommissionType::FlatFee) {
            if let Some(fee) = terms.table_flat_fee {
                return Self::FlatFee(fee);
            }
        }
        if let Some(rate) = terms.table_commission_rate {
            return Self::TableRate(rate);
        }
        if let Some(rate) = terms.commission_rate {
            return Self::LegacyRate(rate);
        }
        Self::None
    }

    /// Rule name for audit
    #[must_use]
    pub const fn rule(&self) -> PromoterRateRule {
        match self {
            Self::FlatFee(_) => PromoterRateRule::FlatFee,
            Self::TableRate(_) => PromoterRateRule::TableRate,
            Self::LegacyRate(_) => PromoterRateRule::LegacyRate,
            Self::None => PromoterRateRule::None,
        }
    }

    /// Promoter share of `spend`, unrounded
    ///
    /// # Errors
    ///
    /// [`AmountOverflow`] when `spend × rate` leaves the `Decimal` range.
    pub fn commission(&self, spend: Money) -> Result<Money, AmountOverflow> {
        match self {
            Self::FlatFee(fee) => Ok(*fee),
            Self::TableRate(rate) | Self::LegacyRate(rate) => rate.checked_of(spend),
            Self::None => Ok(Money::ZERO),
        }
    }
}

/// `actual_spend ?? minimum_spend ?? 0`, with the source it came from.
#[must_use]
pub fn spend_basis(booking: &TableBooking) -> (Money, SpendSource) {
    match (booking.actual_spend, booking.minimum_spend) {
        (Some(actual), _) => (actual, SpendSource::Actual),
        (None, Some(minimum)) => (minimum, SpendSource::Minimum),
        (None, None) => (Money::ZERO, SpendSource::Minimum),
    }
}

/// The venue/promoter split for one booking.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingSplit {
    /// Spend the split was computed from
    pub spend_amount: Money,
    /// Where the spend came from
    pub spend_source: SpendSource,
    /// Venue share, rounded to cents
    pub venue_commission_amount: Money,
    /// Promoter share, rounded to cents
    pub promoter_commission_amount: Money,
    /// Venue rate used
    pub venue_commission_rate: Percentage,
    /// Rule that produced the promoter share
    pub promoter_rule: PromoterRateRule,
}

/// Splits one booking's spend between venue and promoter.
///
/// `promoter_terms` should be `None` for bookings without a promoter.
///
/// # Errors
///
/// [`AmountOverflow`] when a share leaves the `Decimal` range.
pub fn split_booking(
    booking: &TableBooking,
    venue_rate: Percentage,
    promoter_terms: Option<&PromoterTableTerms>,
) -> Result<BookingSplit, AmountOverflow> {
    let (spend_amount, spend_source) = spend_basis(booking);
    let promoter_rate = if booking.promoter_id.is_some() {
        PromoterRate::resolve(promoter_terms)
    } else {
        PromoterRate::None
    };

    Ok(BookingSplit {
        spend_amount,
        spend_source,
        venue_commission_amount: venue_rate.checked_of(spend_amount)?.round_cents(),
        promoter_commission_amount: promoter_rate.commission(spend_amount)?.round_cents(),
        venue_commission_rate: venue_rate,
        promoter_rule: promoter_rate.rule(),
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::types::{BookingStatus, EventId, PromoterId, TableBookingId};
    use rust_decimal_macros::dec;

    fn booking(actual: Option<i64>, minimum: Option<i64>) -> TableBooking {
        TableBooking {
            id: TableBookingId::new(),
            event_id: EventId::new(),
            promoter_id: Some(PromoterId::new()),
            status: BookingStatus::Confirmed,
            actual_spend: actual.map(Money::from_units),
            minimum_spend: minimum.map(Money::from_units),
            closeout_locked: false,
        }
    }

    fn all_rates() -> PromoterTableTerms {
        PromoterTableTerms {
            table_commission_type: Some(TableCommissionType::FlatFee),
            table_flat_fee: Some(Money::from_units(150)),
            table_commission_rate: Some(Percentage::from_whole(8)),
            commission_rate: Some(Percentage::from_whole(5)),
        }
    }

    #[test]
    fn minimum_spend_fallback() {
        let split =
            split_booking(&booking(None, Some(5_000_000)), Percentage::from_whole(10), None)
                .unwrap();
        assert_eq!(split.spend_amount, Money::from_units(5_000_000));
        assert_eq!(split.spend_source, SpendSource::Minimum);
        assert_eq!(split.venue_commission_amount, Money::from_units(500_000));
    }

    #[test]
    fn actual_spend_wins_over_minimum() {
        let (amount, source) = spend_basis(&booking(Some(1200), Some(5000)));
        assert_eq!(amount, Money::from_units(1200));
        assert_eq!(source, SpendSource::Actual);
    }

    #[test]
    fn no_spend_recorded_is_zero_minimum() {
        let (amount, source) = spend_basis(&booking(None, None));
        assert_eq!(amount, Money::ZERO);
        assert_eq!(source, SpendSource::Minimum);
    }

    #[test]
    fn rule_flat_fee_first() {
        let rate = PromoterRate::resolve(Some(&all_rates()));
        assert_eq!(rate, PromoterRate::FlatFee(Money::from_units(150)));
        assert_eq!(rate.commission(Money::from_units(10_000)), Ok(Money::from_units(150)));
    }

    #[test]
    fn rule_flat_fee_type_without_fee_falls_through() {
        let terms = PromoterTableTerms {
            table_flat_fee: None,
            ..all_rates()
        };
        assert_eq!(PromoterRate::resolve(Some(&terms)).rule(), PromoterRateRule::TableRate);
    }

    #[test]
    fn rule_table_rate_second() {
        let terms = PromoterTableTerms {
            table_commission_type: Some(TableCommissionType::Percentage),
            ..all_rates()
        };
        let rate = PromoterRate::resolve(Some(&terms));
        assert_eq!(rate.rule(), PromoterRateRule::TableRate);
        assert_eq!(rate.commission(Money::from_units(1000)), Ok(Money::from_units(80)));
    }

    #[test]
    fn rule_legacy_rate_third() {
        let terms = PromoterTableTerms {
            table_commission_type: None,
            table_flat_fee: None,
            table_commission_rate: None,
            commission_rate: Some(Percentage::new(dec!(7.5))),
        };
        let rate = PromoterRate::resolve(Some(&terms));
        assert_eq!(rate.rule(), PromoterRateRule::LegacyRate);
        assert_eq!(rate.commission(Money::from_units(1000)), Ok(Money::from_units(75)));
    }

    #[test]
    fn rule_none_last() {
        assert_eq!(PromoterRate::resolve(None), PromoterRate::None);
        assert_eq!(
            PromoterRate::resolve(Some(&PromoterTableTerms::default())),
            PromoterRate::None
        );
        assert_eq!(PromoterRate::None.commission(Money::from_units(1000)), Ok(Money::ZERO));
    }

    #[test]
    fn booking_without_promoter_pays_venue_only() {
        let mut unpromoted = booking(Some(2000), None);
        unpromoted.promoter_id = None;
        let split =
            split_booking(&unpromoted, Percentage::from_whole(10), Some(&all_rates())).unwrap();
        assert_eq!(split.promoter_rule, PromoterRateRule::None);
        assert_eq!(split.promoter_commission_amount, Money::ZERO);
        assert_eq!(split.venue_commission_amount, Money::from_units(200));
    }

    #[test]
    fn shares_are_rounded_to_cents() {
        let split = split_booking(
            &booking(Some(333), None),
            Percentage::new(dec!(12.5)),
            Some(&PromoterTableTerms {
                table_commission_rate: Some(Percentage::new(dec!(3.333))),
                ..PromoterTableTerms::default()
            }),
        )
        .unwrap();
        assert_eq!(split.venue_commission_amount, Money::new(dec!(41.63)));
        assert_eq!(split.promoter_commission_amount, Money::new(dec!(11.10)));
    }

    #[test]
    fn spend_beyond_decimal_range_overflows() {
        let mut whale = booking(None, None);
        whale.actual_spend = Some(Money::new(rust_decimal::Decimal::MAX));
        assert!(split_booking(&whale, Percentage::from_whole(10), None).is_err());
        assert!(PromoterRate::TableRate(Percentage::from_whole(8))
            .commission(Money::new(rust_decimal::Decimal::MAX))
            .is_err());
    }
}
