//! Axum integration for the closeout engine.
//!
//! The HTTP layer is a thin shell around the services in `closeout-core`:
//!
//! 1. **Extract** the caller ([`CallerId`]) and path/body parameters
//! 2. **Call** the service
//! 3. **Map** the result, or the [`CloseoutError`](closeout_core::error::CloseoutError)
//!    via [`AppError`], to a response
//!
//! ```ignore
//! async fn finalize_closeout(
//!     State(state): State<AppState>,
//!     caller: CallerId,
//!     Path(event_id): Path<EventId>,
//!     Json(request): Json<FinalizeRequest>,
//! ) -> WebResult<Json<FinalizeOutcome>> {
//!     Ok(Json(state.closeout.finalize(event_id, caller.0, request).await?))
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod extractors;
pub mod handlers;
pub mod middleware;

pub use error::{AppError, ErrorResponse};
pub use extractors::{CallerId, CorrelationId, USER_ID_HEADER};
pub use middleware::{correlation_id_layer, CORRELATION_ID_HEADER};

/// Result type alias for web handlers.
pub type WebResult<T> = Result<T, AppError>;
