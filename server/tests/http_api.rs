//! HTTP API integration tests.
//!
//! Drives the real router over the in-memory harness: routing, caller
//! extraction, status mapping and the JSON contract of every endpoint.

#![allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect

use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum_test::TestServer;
use closeout_core::closeout::{CloseoutReport, FinalizeOutcome};
use closeout_core::lifecycle::CloseoutPhase;
use closeout_core::rules::CommissionContract;
use closeout_core::table_commissions::TableCommissionReport;
use closeout_core::types::{BookingStatus, EventId, Money, PromoterId, TableBooking, UserId};
use closeout_server::{build_router, AppState};
use closeout_testing::fixtures::{booking, check_in, contract, per_head_with_bonus};
use closeout_testing::{RecordingStatementGenerator, StaticAuthorizer, TestHarness};
use closeout_web::{ErrorResponse, CORRELATION_ID_HEADER, USER_ID_HEADER};
use serde_json::json;
use std::time::Duration;

fn server_for(harness: &TestHarness, request_timeout: Duration) -> TestServer {
    let state = AppState::new(
        harness.closeout_service(),
        harness.table_service(),
        request_timeout,
    );
    TestServer::new(build_router(state)).expect("router should build a test server")
}

fn server(harness: &TestHarness) -> TestServer {
    server_for(harness, Duration::from_secs(5))
}

fn user_header(user: UserId) -> (HeaderName, HeaderValue) {
    (
        HeaderName::from_static("x-user-id"),
        HeaderValue::from_str(&user.to_string()).unwrap(),
    )
}

fn closeout_path(event_id: EventId) -> String {
    format!("/api/events/{event_id}/closeout")
}

#[tokio::test]
async fn health_reports_ok() {
    let harness = TestHarness::new();
    let response = server(&harness).get("/health").await;

    assert_eq!(response.status_code(), StatusCode::OK);
    let body: serde_json::Value = response.json();
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn finalize_closes_the_event_and_returns_lines() {
    let harness = TestHarness::new();
    let event = harness.seed_event("Warehouse Night");
    let promoter = PromoterId::new();
    harness
        .store
        .insert_contract(contract(event.id, promoter, per_head_with_bonus(5, 50, 100)));
    for _ in 0..60 {
        harness.store.add_checkin(event.id, check_in(Some(promoter)));
    }

    let (name, value) = user_header(harness.caller);
    let response = server(&harness)
        .post(&closeout_path(event.id))
        .add_header(name, value)
        .json(&json!({ "total_revenue": "12500.00", "closeout_notes": "Sold out" }))
        .await;

    assert_eq!(response.status_code(), StatusCode::OK);
    let outcome: FinalizeOutcome = response.json();
    assert!(outcome.event.is_closed());
    assert_eq!(outcome.payout_lines.len(), 1);
    assert_eq!(outcome.payout_lines[0].commission_amount, Money::from_units(400));
    assert_eq!(
        harness.store.event(event.id).unwrap().closeout_notes.as_deref(),
        Some("Sold out")
    );
}

#[tokio::test]
async fn finalize_without_a_body_uses_defaults() {
    let harness = TestHarness::new();
    let event = harness.seed_event("No Body");
    let (name, value) = user_header(harness.caller);

    let response = server(&harness)
        .post(&closeout_path(event.id))
        .add_header(name, value)
        .await;

    assert_eq!(response.status_code(), StatusCode::OK);
    let outcome: FinalizeOutcome = response.json();
    assert!(outcome.payout_lines.is_empty());
    assert_eq!(outcome.event.total_revenue, None);
}

#[tokio::test]
async fn malformed_finalize_body_is_rejected_and_event_stays_open() {
    let harness = TestHarness::new();
    let event = harness.seed_event("Typo");
    let (name, value) = user_header(harness.caller);

    let response = server(&harness)
        .post(&closeout_path(event.id))
        .add_header(name, value)
        .json(&json!({ "total_revenue": "twelve thousand", "closeout_notes": "Sold out" }))
        .await;

    assert_eq!(response.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
    let error: ErrorResponse = response.json();
    assert_eq!(error.code, "VALIDATION_ERROR");
    let stored = harness.store.event(event.id).unwrap();
    assert_eq!(stored.closeout_phase, CloseoutPhase::Open);
    assert_eq!(stored.closeout_notes, None);
    assert!(harness.store.payout_runs(event.id).is_empty());
}

#[tokio::test]
async fn contract_write_during_finalize_is_a_conflict() {
    let harness = TestHarness::new()
        .with_statements(RecordingStatementGenerator::with_delay(Duration::from_millis(300)));
    let event = harness.seed_event("Mid Finalize");
    let promoter = PromoterId::new();
    harness
        .store
        .insert_contract(contract(event.id, promoter, per_head_with_bonus(5, 50, 100)));
    harness.store.add_checkin(event.id, check_in(Some(promoter)));
    let server = server(&harness);
    let (name, value) = user_header(harness.caller);
    let late_promoter = PromoterId::new();

    let finalize = async {
        server
            .post(&closeout_path(event.id))
            .add_header(name.clone(), value.clone())
            .await
    };
    let upsert = async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        server
            .put(&format!("/api/events/{}/promoters/{late_promoter}/contract", event.id))
            .add_header(name.clone(), value.clone())
            .json(&json!({ "per_head_rate": "7" }))
            .await
    };
    let (finalized, upserted) = tokio::join!(finalize, upsert);

    assert_eq!(upserted.status_code(), StatusCode::CONFLICT);
    let error: ErrorResponse = upserted.json();
    assert_eq!(error.code, "FINALIZE_IN_PROGRESS");
    assert_eq!(finalized.status_code(), StatusCode::OK);
    assert_eq!(harness.store.contracts(event.id).len(), 1);
    assert_eq!(harness.store.payout_lines(event.id).len(), 1);
}

#[tokio::test]
async fn overflow_sized_rate_is_an_invalid_contract() {
    let harness = TestHarness::new();
    let event = harness.seed_event("Huge Rate");
    let (name, value) = user_header(harness.caller);

    let response = server(&harness)
        .put(&format!(
            "/api/events/{}/promoters/{}/contract",
            event.id,
            PromoterId::new()
        ))
        .add_header(name, value)
        .json(&json!({ "per_head_rate": "79228162514264337593543950335" }))
        .await;

    assert_eq!(response.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
    let error: ErrorResponse = response.json();
    assert_eq!(error.code, "INVALID_CONTRACT");
    assert!(harness.store.contracts(event.id).is_empty());
}

#[tokio::test]
async fn second_finalize_is_a_conflict() {
    let harness = TestHarness::new();
    let event = harness.seed_event("Twice");
    let server = server(&harness);

    let (name, value) = user_header(harness.caller);
    let first = server
        .post(&closeout_path(event.id))
        .add_header(name.clone(), value.clone())
        .await;
    assert_eq!(first.status_code(), StatusCode::OK);

    let second = server
        .post(&closeout_path(event.id))
        .add_header(name, value)
        .await;
    assert_eq!(second.status_code(), StatusCode::CONFLICT);
    let error: ErrorResponse = second.json();
    assert_eq!(error.code, "ALREADY_CLOSED");
    assert_eq!(harness.store.payout_runs(event.id).len(), 1);
}

#[tokio::test]
async fn missing_caller_is_unauthorized() {
    let harness = TestHarness::new();
    let event = harness.seed_event("Anonymous");

    let response = server(&harness).post(&closeout_path(event.id)).await;

    assert_eq!(response.status_code(), StatusCode::UNAUTHORIZED);
    let error: ErrorResponse = response.json();
    assert_eq!(error.code, "UNAUTHORIZED");
    assert!(!harness.store.event(event.id).unwrap().is_closed());
}

#[tokio::test]
async fn malformed_caller_is_unauthorized() {
    let harness = TestHarness::new();
    let event = harness.seed_event("Garbled");

    let response = server(&harness)
        .post(&closeout_path(event.id))
        .add_header(
            HeaderName::from_static("x-user-id"),
            HeaderValue::from_static("not-a-uuid"),
        )
        .await;

    assert_eq!(response.status_code(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn denied_caller_is_forbidden() {
    let harness = TestHarness::new().with_authorizer(StaticAuthorizer::deny_all());
    let event = harness.seed_event("Private");
    let (name, value) = user_header(harness.caller);

    let response = server(&harness)
        .post(&closeout_path(event.id))
        .add_header(name, value)
        .await;

    assert_eq!(response.status_code(), StatusCode::FORBIDDEN);
    let error: ErrorResponse = response.json();
    assert_eq!(error.code, "FORBIDDEN");
}

#[tokio::test]
async fn unknown_event_is_not_found() {
    let harness = TestHarness::new();
    let (name, value) = user_header(harness.caller);

    let response = server(&harness)
        .post(&closeout_path(EventId::new()))
        .add_header(name, value)
        .await;

    assert_eq!(response.status_code(), StatusCode::NOT_FOUND);
    let error: ErrorResponse = response.json();
    assert_eq!(error.code, "NOT_FOUND");
}

#[tokio::test]
async fn slow_finalize_times_out_and_completes_in_background() {
    let harness = TestHarness::new()
        .with_statements(RecordingStatementGenerator::with_delay(Duration::from_millis(300)));
    let event = harness.seed_event("Slow Statements");
    let (name, value) = user_header(harness.caller);

    let response = server_for(&harness, Duration::from_millis(20))
        .post(&closeout_path(event.id))
        .add_header(name, value)
        .await;

    assert_eq!(response.status_code(), StatusCode::REQUEST_TIMEOUT);
    let error: ErrorResponse = response.json();
    assert_eq!(error.code, "TIMEOUT");

    let mut closed = false;
    for _ in 0..50 {
        if harness.store.event(event.id).unwrap().is_closed() {
            closed = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(closed, "background finalize should close the event");
}

#[tokio::test]
async fn report_reflects_the_closed_event() {
    let harness = TestHarness::new();
    let event = harness.seed_event("Reported");
    let promoter = PromoterId::new();
    harness
        .store
        .insert_contract(contract(event.id, promoter, per_head_with_bonus(10, 5, 20)));
    for _ in 0..6 {
        harness.store.add_checkin(event.id, check_in(Some(promoter)));
    }
    let server = server(&harness);
    let (name, value) = user_header(harness.caller);

    let before = server
        .get(&closeout_path(event.id))
        .add_header(name.clone(), value.clone())
        .await;
    assert_eq!(before.status_code(), StatusCode::OK);
    let report: CloseoutReport = before.json();
    assert_eq!(report.phase, CloseoutPhase::Open);
    assert!(report.lines.is_empty());

    server
        .post(&closeout_path(event.id))
        .add_header(name.clone(), value.clone())
        .await
        .assert_status_ok();

    let after: CloseoutReport = server
        .get(&closeout_path(event.id))
        .add_header(name, value)
        .await
        .json();
    assert!(matches!(after.phase, CloseoutPhase::Closed { .. }));
    assert_eq!(after.closed_by, Some(harness.caller));
    assert_eq!(after.lines.len(), 1);
    assert_eq!(after.total_commission, Money::from_units(80));
}

#[tokio::test]
async fn contract_upsert_returns_the_stored_contract() {
    let harness = TestHarness::new();
    let event = harness.seed_event("Contracts");
    let promoter = PromoterId::new();
    let (name, value) = user_header(harness.caller);

    let response = server(&harness)
        .put(&format!("/api/events/{}/promoters/{promoter}/contract", event.id))
        .add_header(name, value)
        .json(&json!({ "per_head_rate": "5.00", "bonus_threshold": 50, "bonus_amount": "150.00" }))
        .await;

    assert_eq!(response.status_code(), StatusCode::OK);
    let stored: CommissionContract = response.json();
    assert_eq!(stored.promoter_id, promoter);
    assert_eq!(stored.terms.per_head_rate, Some(Money::from_units(5)));
    assert_eq!(harness.store.contracts(event.id).len(), 1);
}

#[tokio::test]
async fn invalid_contract_is_unprocessable() {
    let harness = TestHarness::new();
    let event = harness.seed_event("Bad Terms");
    let (name, value) = user_header(harness.caller);

    let response = server(&harness)
        .put(&format!(
            "/api/events/{}/promoters/{}/contract",
            event.id,
            PromoterId::new()
        ))
        .add_header(name, value)
        .json(&json!({ "per_head_min": "500", "per_head_max": "50" }))
        .await;

    assert_eq!(response.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
    let error: ErrorResponse = response.json();
    assert_eq!(error.code, "INVALID_CONTRACT");
    assert!(harness.store.contracts(event.id).is_empty());
}

#[tokio::test]
async fn contract_write_after_close_is_a_conflict() {
    let harness = TestHarness::new();
    let event = harness.seed_event("Frozen");
    let server = server(&harness);
    let (name, value) = user_header(harness.caller);

    server
        .post(&closeout_path(event.id))
        .add_header(name.clone(), value.clone())
        .await
        .assert_status_ok();

    let response = server
        .put(&format!(
            "/api/events/{}/promoters/{}/contract",
            event.id,
            PromoterId::new()
        ))
        .add_header(name, value)
        .json(&json!({ "per_head_rate": "5" }))
        .await;

    assert_eq!(response.status_code(), StatusCode::CONFLICT);
    let error: ErrorResponse = response.json();
    assert_eq!(error.code, "EVENT_LOCKED");
}

#[tokio::test]
async fn table_commissions_are_calculated_over_http() {
    let harness = TestHarness::new();
    let event = harness.seed_event("Tables");
    harness.store.insert_booking(booking(
        event.id,
        None,
        BookingStatus::Confirmed,
        Some(Money::from_units(1000)),
        None,
    ));
    harness.store.insert_booking(booking(
        event.id,
        None,
        BookingStatus::Cancelled,
        Some(Money::from_units(9000)),
        None,
    ));
    let (name, value) = user_header(harness.caller);

    let response = server(&harness)
        .post(&format!("/api/events/{}/table-commissions", event.id))
        .add_header(name, value)
        .await;

    assert_eq!(response.status_code(), StatusCode::OK);
    let report: TableCommissionReport = response.json();
    assert_eq!(report.summary.processed, 1);
    assert_eq!(report.summary.total_spend, Money::from_units(1000));
    assert_eq!(report.summary.total_venue_commission, Money::from_units(100));
}

#[tokio::test]
async fn booking_payment_confirms_and_adds_spend() {
    let harness = TestHarness::new();
    let event = harness.seed_event("Payments");
    let table = booking(
        event.id,
        None,
        BookingStatus::Pending,
        Some(Money::from_units(200)),
        None,
    );
    harness.store.insert_booking(table.clone());

    let response = server(&harness)
        .post(&format!("/api/table-bookings/{}/payments", table.id))
        .json(&json!({ "amount_paid": "300" }))
        .await;

    assert_eq!(response.status_code(), StatusCode::OK);
    let updated: TableBooking = response.json();
    assert_eq!(updated.status, BookingStatus::Confirmed);
    assert_eq!(updated.actual_spend, Some(Money::from_units(500)));
}

#[tokio::test]
async fn booking_payment_on_locked_booking_is_a_conflict() {
    let harness = TestHarness::new();
    let event = harness.seed_event("Locked Table");
    let mut table = booking(
        event.id,
        None,
        BookingStatus::Confirmed,
        Some(Money::from_units(200)),
        None,
    );
    table.closeout_locked = true;
    harness.store.insert_booking(table.clone());

    let response = server(&harness)
        .post(&format!("/api/table-bookings/{}/payments", table.id))
        .json(&json!({ "amount_paid": "50" }))
        .await;

    assert_eq!(response.status_code(), StatusCode::CONFLICT);
    let error: ErrorResponse = response.json();
    assert_eq!(error.code, "COMMISSION_LOCKED");
    assert_eq!(
        harness.store.booking(table.id).unwrap().actual_spend,
        Some(Money::from_units(200))
    );
}

#[tokio::test]
async fn non_positive_payment_is_unprocessable() {
    let harness = TestHarness::new();
    let event = harness.seed_event("Zero");
    let table = booking(event.id, None, BookingStatus::Pending, None, None);
    harness.store.insert_booking(table.clone());

    let response = server(&harness)
        .post(&format!("/api/table-bookings/{}/payments", table.id))
        .json(&json!({ "amount_paid": "0" }))
        .await;

    assert_eq!(response.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn correlation_id_is_echoed() {
    let harness = TestHarness::new();
    let correlation = "5f0c6f3e-8a57-4c1e-9d8b-2b8f7d3a9c10";

    let response = server(&harness)
        .get("/health")
        .add_header(
            HeaderName::from_static("x-correlation-id"),
            HeaderValue::from_static(correlation),
        )
        .await;

    let echoed = response.header(CORRELATION_ID_HEADER);
    assert_eq!(echoed.to_str().unwrap(), correlation);
    assert_eq!(USER_ID_HEADER.to_ascii_lowercase(), "x-user-id");
}
