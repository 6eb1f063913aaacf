//! HTTP server wiring: state and routes.

pub mod routes;
pub mod state;

pub use routes::build_router;
pub use state::AppState;
