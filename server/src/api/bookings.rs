//! Table booking payment hand-off.
//!
//! - POST /api/table-bookings/:booking_id/payments
//!
//! Called by the payment-gateway integration once a booking is paid. It is not
//! a user-facing operation, so no caller identity is required.

use crate::server::state::AppState;
use axum::{
    extract::{Path, State},
    Json,
};
use closeout_core::types::{Money, TableBooking, TableBookingId};
use closeout_web::WebResult;
use serde::Deserialize;

/// Payment notification body.
#[derive(Debug, Deserialize)]
pub struct RecordPaymentRequest {
    /// Amount captured for the booking
    pub amount_paid: Money,
}

/// Confirm a booking and add the paid amount to its actual spend.
///
/// # Errors
///
/// 404, 422 for a non-positive amount, 409 (`COMMISSION_LOCKED`, `EVENT_LOCKED`).
pub async fn record_payment(
    State(state): State<AppState>,
    Path(booking_id): Path<TableBookingId>,
    Json(request): Json<RecordPaymentRequest>,
) -> WebResult<Json<TableBooking>> {
    let booking = state
        .tables
        .record_booking_payment(booking_id, request.amount_paid)
        .await?;
    Ok(Json(booking))
}
