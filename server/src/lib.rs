//! # Closeout Server
//!
//! HTTP surface and `PostgreSQL` storage for the closeout engine.
//!
//! - [`config`]: environment configuration
//! - [`store`]: `PostgreSQL` implementation of the storage traits
//! - [`collaborators`]: authorizer, statement generator, notifier, emitter
//! - [`api`] and [`server`]: Axum handlers, state and router
//! - [`metrics`]: Prometheus exporter

#![forbid(unsafe_code)]
#![warn(missing_docs, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod api;
pub mod collaborators;
pub mod config;
pub mod error;
pub mod metrics;
pub mod server;
pub mod store;

pub use config::Config;
pub use error::ServerError;
pub use server::{build_router, AppState};
pub use store::PostgresStore;
