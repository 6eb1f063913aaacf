//! Event closeout endpoints.
//!
//! - POST /api/events/:event_id/closeout - Finalize the closeout
//! - GET /api/events/:event_id/closeout - Closeout state and payout lines

use crate::metrics::record_timeout;
use crate::server::state::AppState;
use axum::{
    body::Bytes,
    extract::{Path, State},
    Json,
};
use closeout_core::closeout::{CloseoutReport, FinalizeOutcome, FinalizeRequest};
use closeout_core::error::CloseoutError;
use closeout_core::types::EventId;
use closeout_web::{AppError, CallerId, CorrelationId, WebResult};

/// Finalize an event's closeout.
///
/// The body is optional: an empty body means no revenue and no notes, while a
/// body that is not a valid [`FinalizeRequest`] is rejected with 422 before
/// anything is claimed. The service runs on its own task: if the request
/// timeout elapses the caller gets 408 while the task finishes (or releases its
/// claim) in the background, so the event is never left half-written.
///
/// ```bash
/// curl -X POST http://localhost:8080/api/events/$EVENT_ID/closeout \
///   -H "X-User-Id: $USER_ID" \
///   -H "Content-Type: application/json" \
///   -d '{"total_revenue": "12500.00", "closeout_notes": "Sold out"}'
/// ```
///
/// # Errors
///
/// 401 without a caller, 403, 404, 422 (`VALIDATION_ERROR`) for a malformed
/// body, 409 (`ALREADY_CLOSED`, `FINALIZE_IN_PROGRESS`), 408 on timeout, 500 on
/// persistence failure.
pub async fn finalize_closeout(
    State(state): State<AppState>,
    caller: CallerId,
    correlation_id: CorrelationId,
    Path(event_id): Path<EventId>,
    body: Bytes,
) -> WebResult<Json<FinalizeOutcome>> {
    let request = parse_finalize_request(&body)?;
    let service = state.closeout.clone();
    let task =
        tokio::spawn(async move { service.finalize(event_id, caller.0, request).await });

    match tokio::time::timeout(state.request_timeout, task).await {
        Ok(Ok(outcome)) => Ok(Json(outcome?)),
        Ok(Err(join_error)) => Err(AppError::internal("Closeout task failed")
            .with_source(anyhow::Error::new(join_error))),
        Err(_elapsed) => {
            record_timeout("finalize");
            tracing::warn!(
                event_id = %event_id,
                correlation_id = %correlation_id.0,
                timeout = ?state.request_timeout,
                "Finalize exceeded request timeout; continuing in background"
            );
            Err(CloseoutError::Timeout(state.request_timeout).into())
        }
    }
}

fn parse_finalize_request(body: &[u8]) -> Result<FinalizeRequest, AppError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(FinalizeRequest::default());
    }
    serde_json::from_slice(body)
        .map_err(|error| AppError::validation(format!("Invalid closeout request: {error}")))
}

/// Closeout state of an event with its payout lines.
///
/// # Errors
///
/// 401, 403, 404.
pub async fn closeout_report(
    State(state): State<AppState>,
    caller: CallerId,
    Path(event_id): Path<EventId>,
) -> WebResult<Json<CloseoutReport>> {
    let report = state.closeout.closeout_report(event_id, caller.0).await?;
    Ok(Json(report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    #[test]
    fn empty_body_means_no_closeout_inputs() {
        assert_eq!(parse_finalize_request(b"").ok(), Some(FinalizeRequest::default()));
        assert_eq!(parse_finalize_request(b" \n").ok(), Some(FinalizeRequest::default()));
    }

    #[test]
    fn malformed_body_is_rejected() {
        let error = parse_finalize_request(
            br#"{"total_revenue":"twelve thousand","closeout_notes":"Sold out"}"#,
        )
        .err();
        assert_eq!(
            error.map(|error| error.status()),
            Some(StatusCode::UNPROCESSABLE_ENTITY)
        );
    }
}
