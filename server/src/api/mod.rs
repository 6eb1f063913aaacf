//! REST API handlers.
//!
//! Every handler takes the caller from [`closeout_web::CallerId`] where the
//! operation is access-checked, calls one service method and lets
//! [`closeout_web::AppError`] map failures.

pub mod bookings;
pub mod closeout;
pub mod contracts;
pub mod table_commissions;
