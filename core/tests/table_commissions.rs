//! Integration tests for table commission calculation and payment hand-off

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

use closeout_core::closeout::FinalizeRequest;
use closeout_core::environment::Clock;
use closeout_core::error::{CloseoutError, ConflictReason};
use closeout_core::table_spend::{PromoterRateRule, PromoterTableTerms, TableCommissionType};
use closeout_core::types::{
    BookingStatus, EventId, Money, Percentage, PromoterId, SpendSource, TableBookingCommission,
    TableBookingId, TableCommissionId,
};
use closeout_testing::fixtures::booking;
use closeout_testing::{StaticAuthorizer, TestHarness};
use rust_decimal_macros::dec;

fn legacy_rate(percent: i64) -> PromoterTableTerms {
    PromoterTableTerms {
        commission_rate: Some(Percentage::from_whole(percent)),
        ..PromoterTableTerms::default()
    }
}

#[tokio::test]
async fn minimum_spend_is_used_when_nothing_was_recorded() {
    let harness = TestHarness::new();
    let event = harness.seed_event("VIP Night");
    let table = booking(
        event.id,
        None,
        BookingStatus::Confirmed,
        None,
        Some(Money::from_units(5_000_000)),
    );
    harness.store.insert_booking(table.clone());

    let report = harness
        .table_service()
        .calculate(event.id, harness.caller)
        .await
        .unwrap();

    assert_eq!(report.summary.processed, 1);
    assert_eq!(report.summary.created, 1);
    assert_eq!(report.summary.venue_commission_rate, Percentage::from_whole(10));
    let record = &report.commissions[0];
    assert_eq!(record.booking_id, table.id);
    assert_eq!(record.spend_amount, Money::from_units(5_000_000));
    assert_eq!(record.spend_source, SpendSource::Minimum);
    assert_eq!(record.venue_commission_amount, Money::from_units(500_000));
    assert_eq!(record.promoter_rule, PromoterRateRule::None);
    assert_eq!(harness.store.table_commission(table.id).as_ref(), Some(record));
}

#[tokio::test]
async fn event_venue_rate_overrides_default() {
    let harness = TestHarness::new();
    let mut event = harness.seed_event("Terrace");
    event.venue_commission_rate = Some(Percentage::new(dec!(12.5)));
    harness.store.insert_event(event.clone());
    harness.store.insert_booking(booking(
        event.id,
        None,
        BookingStatus::Completed,
        Some(Money::from_units(2000)),
        None,
    ));

    let report = harness
        .table_service()
        .calculate(event.id, harness.caller)
        .await
        .unwrap();

    assert_eq!(report.summary.venue_commission_rate, Percentage::new(dec!(12.5)));
    assert_eq!(report.summary.total_venue_commission, Money::from_units(250));
    assert_eq!(report.commissions[0].spend_source, SpendSource::Actual);
}

#[tokio::test]
async fn recalculation_updates_records_in_place() {
    let harness = TestHarness::new();
    let event = harness.seed_event("Repeat");
    let promoter = PromoterId::new();
    harness.store.set_promoter_terms(promoter, legacy_rate(5));
    let table = booking(
        event.id,
        Some(promoter),
        BookingStatus::Confirmed,
        None,
        Some(Money::from_units(1000)),
    );
    harness.store.insert_booking(table.clone());
    let service = harness.table_service();

    let first = service.calculate(event.id, harness.caller).await.unwrap();
    assert_eq!(first.summary.created, 1);

    service
        .record_booking_payment(table.id, Money::from_units(1500))
        .await
        .unwrap();
    let second = service.calculate(event.id, harness.caller).await.unwrap();

    assert_eq!(second.summary.created, 0);
    assert_eq!(second.summary.updated, 1);
    let record = harness.store.table_commission(table.id).unwrap();
    assert_eq!(record.id, first.commissions[0].id);
    assert_eq!(record.spend_amount, Money::from_units(1500));
    assert_eq!(record.spend_source, SpendSource::Actual);
    assert_eq!(record.promoter_commission_amount, Money::from_units(75));
    assert_eq!(record.promoter_rule, PromoterRateRule::LegacyRate);
}

#[tokio::test]
async fn locked_records_are_never_mutated() {
    let harness = TestHarness::new();
    let event = harness.seed_event("Frozen Tables");
    let table = booking(
        event.id,
        None,
        BookingStatus::Confirmed,
        Some(Money::from_units(9000)),
        None,
    );
    harness.store.insert_booking(table.clone());
    let now = harness.clock.now();
    let locked = TableBookingCommission {
        id: TableCommissionId::new(),
        booking_id: table.id,
        event_id: event.id,
        promoter_id: None,
        spend_amount: Money::from_units(100),
        spend_source: SpendSource::Minimum,
        promoter_commission_amount: Money::ZERO,
        venue_commission_amount: Money::from_units(10),
        venue_commission_rate: Percentage::from_whole(10),
        promoter_rule: PromoterRateRule::None,
        locked: true,
        created_at: now,
        updated_at: now,
    };
    harness.store.seed_table_commission(locked.clone());

    let report = harness
        .table_service()
        .calculate(event.id, harness.caller)
        .await
        .unwrap();

    assert_eq!(report.summary.processed, 0);
    assert_eq!(report.summary.created, 0);
    assert_eq!(report.summary.updated, 0);
    assert_eq!(report.summary.skipped_locked, 1);
    assert_eq!(report.summary.total_spend, Money::ZERO);
    assert!(report.commissions.is_empty());
    assert_eq!(harness.store.table_commission(table.id), Some(locked));
}

#[tokio::test]
async fn only_qualifying_unlocked_bookings_are_processed() {
    let harness = TestHarness::new();
    let event = harness.seed_event("Mixed");
    let spend = Some(Money::from_units(1000));
    let confirmed = booking(event.id, None, BookingStatus::Confirmed, spend, None);
    let mut frozen = booking(event.id, None, BookingStatus::Completed, spend, None);
    frozen.closeout_locked = true;
    for table in [
        confirmed.clone(),
        frozen.clone(),
        booking(event.id, None, BookingStatus::Pending, spend, None),
        booking(event.id, None, BookingStatus::Cancelled, spend, None),
        booking(event.id, None, BookingStatus::NoShow, spend, None),
    ] {
        harness.store.insert_booking(table);
    }

    let report = harness
        .table_service()
        .calculate(event.id, harness.caller)
        .await
        .unwrap();

    assert_eq!(report.summary.processed, 1);
    assert_eq!(report.commissions[0].booking_id, confirmed.id);
    assert!(harness.store.table_commission(frozen.id).is_none());
}

#[tokio::test]
async fn failing_booking_does_not_stop_the_pass() {
    let harness = TestHarness::new();
    let event = harness.seed_event("Half Broken");
    let spend = Some(Money::from_units(1000));
    let first = booking(event.id, None, BookingStatus::Confirmed, spend, None);
    let broken = booking(event.id, None, BookingStatus::Confirmed, spend, None);
    let whale = booking(
        event.id,
        None,
        BookingStatus::Completed,
        Some(Money::new(rust_decimal::Decimal::MAX)),
        None,
    );
    let last = booking(event.id, None, BookingStatus::Completed, spend, None);
    for table in [first.clone(), broken.clone(), whale.clone(), last.clone()] {
        harness.store.insert_booking(table);
    }
    harness.store.fail_commission_writes_for(broken.id);

    let report = harness
        .table_service()
        .calculate(event.id, harness.caller)
        .await
        .unwrap();

    assert_eq!(report.summary.processed, 2);
    assert_eq!(report.summary.failed, 2);
    assert_eq!(report.summary.total_spend, Money::from_units(2000));
    let mut failed: Vec<_> = report.failed_bookings.iter().map(|f| f.booking_id).collect();
    failed.sort_by_key(|id| id.to_string());
    let mut expected = vec![broken.id, whale.id];
    expected.sort_by_key(|id| id.to_string());
    assert_eq!(failed, expected);
    assert!(harness.store.table_commission(first.id).is_some());
    assert!(harness.store.table_commission(last.id).is_some());
    assert!(harness.store.table_commission(broken.id).is_none());
    assert!(harness.store.table_commission(whale.id).is_none());
}

#[tokio::test]
async fn promoter_flat_fee_takes_precedence() {
    let harness = TestHarness::new();
    let event = harness.seed_event("Flat Fees");
    let promoter = PromoterId::new();
    harness.store.set_promoter_terms(
        promoter,
        PromoterTableTerms {
            table_commission_type: Some(TableCommissionType::FlatFee),
            table_flat_fee: Some(Money::from_units(200)),
            table_commission_rate: Some(Percentage::from_whole(8)),
            commission_rate: Some(Percentage::from_whole(5)),
        },
    );
    harness.store.insert_booking(booking(
        event.id,
        Some(promoter),
        BookingStatus::Confirmed,
        Some(Money::from_units(10_000)),
        None,
    ));
    harness.store.insert_booking(booking(
        event.id,
        Some(promoter),
        BookingStatus::Completed,
        Some(Money::from_units(4_000)),
        None,
    ));

    let report = harness
        .table_service()
        .calculate(event.id, harness.caller)
        .await
        .unwrap();

    assert!(report
        .commissions
        .iter()
        .all(|record| record.promoter_rule == PromoterRateRule::FlatFee));
    assert_eq!(report.summary.total_promoter_commission, Money::from_units(400));
    assert_eq!(report.summary.total_venue_commission, Money::from_units(1_400));
    assert_eq!(report.summary.total_spend, Money::from_units(14_000));
}

#[tokio::test]
async fn locked_event_rejects_calculation() {
    let harness = TestHarness::new();
    let event = harness.seed_event("Closed Club");
    harness
        .closeout_service()
        .finalize(event.id, harness.caller, FinalizeRequest::default())
        .await
        .unwrap();

    let result = harness.table_service().calculate(event.id, harness.caller).await;
    assert!(matches!(
        result,
        Err(CloseoutError::Conflict { reason: ConflictReason::EventLocked, .. })
    ));
}

#[tokio::test]
async fn calculation_requires_access_and_an_event() {
    let harness = TestHarness::new().with_authorizer(StaticAuthorizer::deny_all());
    let event = harness.seed_event("Guarded");
    let service = harness.table_service();

    assert!(matches!(
        service.calculate(event.id, harness.caller).await,
        Err(CloseoutError::Authorization(_))
    ));
    assert!(matches!(
        service.calculate(EventId::new(), harness.caller).await,
        Err(CloseoutError::NotFound { .. })
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_calculations_are_serialized_per_event() {
    let harness = TestHarness::new();
    let event = harness.seed_event("Rush");
    for _ in 0..20 {
        harness.store.insert_booking(booking(
            event.id,
            None,
            BookingStatus::Confirmed,
            Some(Money::from_units(500)),
            None,
        ));
    }
    let service = harness.table_service();
    let event_id = event.id;

    let mut handles = Vec::new();
    for _ in 0..6 {
        let service = service.clone();
        let caller = harness.caller;
        handles.push(tokio::spawn(async move {
            service.calculate(event_id, caller).await
        }));
    }

    let mut created = 0;
    for handle in handles {
        let report = handle.await.unwrap().unwrap();
        assert_eq!(report.summary.processed, 20);
        created += report.summary.created;
    }
    assert_eq!(created, 20);
}

// ============================================================================
// Paid-booking hand-off
// ============================================================================

#[tokio::test]
async fn payment_confirms_and_accumulates_spend() {
    let harness = TestHarness::new();
    let event = harness.seed_event("Deposits");
    let table = booking(event.id, None, BookingStatus::Pending, None, Some(Money::from_units(800)));
    harness.store.insert_booking(table.clone());
    let service = harness.table_service();

    let paid = service
        .record_booking_payment(table.id, Money::new(dec!(300.25)))
        .await
        .unwrap();
    assert_eq!(paid.status, BookingStatus::Confirmed);
    assert_eq!(paid.actual_spend, Some(Money::new(dec!(300.25))));

    let topped_up = service
        .record_booking_payment(table.id, Money::from_units(200))
        .await
        .unwrap();
    assert_eq!(topped_up.actual_spend, Some(Money::new(dec!(500.25))));
}

#[tokio::test]
async fn payment_on_locked_booking_is_a_conflict() {
    let harness = TestHarness::new();
    let event = harness.seed_event("Locked Table");
    let mut table = booking(event.id, None, BookingStatus::Confirmed, None, None);
    table.closeout_locked = true;
    harness.store.insert_booking(table.clone());

    let result = harness
        .table_service()
        .record_booking_payment(table.id, Money::from_units(100))
        .await;
    assert!(matches!(
        result,
        Err(CloseoutError::Conflict { reason: ConflictReason::CommissionLocked, .. })
    ));
    assert_eq!(harness.store.booking(table.id).unwrap().actual_spend, None);
}

#[tokio::test]
async fn payment_on_locked_event_is_a_conflict() {
    let harness = TestHarness::new();
    let event = harness.seed_event("Closed Tables");
    let table = booking(event.id, None, BookingStatus::Pending, None, None);
    harness.store.insert_booking(table.clone());
    harness
        .closeout_service()
        .finalize(event.id, harness.caller, FinalizeRequest::default())
        .await
        .unwrap();

    let result = harness
        .table_service()
        .record_booking_payment(table.id, Money::from_units(100))
        .await;
    assert!(matches!(
        result,
        Err(CloseoutError::Conflict { reason: ConflictReason::EventLocked, .. })
    ));
}

#[test]
fn payment_must_be_positive_and_for_a_known_booking() {
    let harness = TestHarness::new();
    let service = harness.table_service();

    let zero = tokio_test::block_on(service.record_booking_payment(TableBookingId::new(), Money::ZERO));
    assert!(matches!(zero, Err(CloseoutError::InvalidRequest(_))));

    let unknown = tokio_test::block_on(
        service.record_booking_payment(TableBookingId::new(), Money::from_units(10)),
    );
    assert!(matches!(unknown, Err(CloseoutError::NotFound { resource: "TableBooking", .. })));
}
