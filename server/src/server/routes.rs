//! Router configuration for the closeout server.

use super::state::AppState;
use crate::api::{bookings, closeout, contracts, table_commissions};
use axum::{
    routing::{get, post, put},
    Router,
};
use closeout_web::{correlation_id_layer, handlers::health_check};
use tower_http::trace::TraceLayer;

/// Build the complete Axum router.
///
/// ```text
/// GET  /health
/// POST /api/events/:event_id/closeout
/// GET  /api/events/:event_id/closeout
/// POST /api/events/:event_id/table-commissions
/// PUT  /api/events/:event_id/promoters/:promoter_id/contract
/// POST /api/table-bookings/:booking_id/payments
/// ```
pub fn build_router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route(
            "/events/:event_id/closeout",
            post(closeout::finalize_closeout).get(closeout::closeout_report),
        )
        .route(
            "/events/:event_id/table-commissions",
            post(table_commissions::calculate_table_commissions),
        )
        .route(
            "/events/:event_id/promoters/:promoter_id/contract",
            put(contracts::upsert_contract),
        )
        .route(
            "/table-bookings/:booking_id/payments",
            post(bookings::record_payment),
        );

    Router::new()
        .route("/health", get(health_check))
        .nest("/api", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(correlation_id_layer())
        .with_state(state)
}
