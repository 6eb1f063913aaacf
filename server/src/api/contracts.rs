//! Commission contract endpoint.
//!
//! - PUT /api/events/:event_id/promoters/:promoter_id/contract

use crate::server::state::AppState;
use axum::{
    extract::{Path, State},
    Json,
};
use closeout_core::rules::{CommissionContract, ContractTerms};
use closeout_core::types::{EventId, PromoterId};
use closeout_web::{CallerId, WebResult};

/// Attach a promoter to an event, or replace its terms.
///
/// ```bash
/// curl -X PUT http://localhost:8080/api/events/$EVENT_ID/promoters/$PROMOTER_ID/contract \
///   -H "X-User-Id: $USER_ID" \
///   -H "Content-Type: application/json" \
///   -d '{"per_head_rate": "5.00", "bonus_threshold": 50, "bonus_amount": "150.00"}'
/// ```
///
/// # Errors
///
/// 401, 403, 404, 422 (`INVALID_CONTRACT`), 409 (`EVENT_LOCKED`).
pub async fn upsert_contract(
    State(state): State<AppState>,
    caller: CallerId,
    Path((event_id, promoter_id)): Path<(EventId, PromoterId)>,
    Json(terms): Json<ContractTerms>,
) -> WebResult<Json<CommissionContract>> {
    let contract = state
        .closeout
        .upsert_contract(event_id, promoter_id, terms, caller.0)
        .await?;
    Ok(Json(contract))
}
