//! Table commission endpoint.
//!
//! - POST /api/events/:event_id/table-commissions

use crate::server::state::AppState;
use axum::{
    extract::{Path, State},
    Json,
};
use closeout_core::table_commissions::TableCommissionReport;
use closeout_core::types::EventId;
use closeout_web::{CallerId, WebResult};

/// Create or refresh the commission record of every qualifying table booking.
///
/// # Errors
///
/// 401, 403, 404, 409 (`EVENT_LOCKED`).
pub async fn calculate_table_commissions(
    State(state): State<AppState>,
    caller: CallerId,
    Path(event_id): Path<EventId>,
) -> WebResult<Json<TableCommissionReport>> {
    let report = state.tables.calculate(event_id, caller.0).await?;
    Ok(Json(report))
}
