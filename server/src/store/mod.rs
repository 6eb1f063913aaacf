//! Storage backends.

pub mod postgres;

pub use postgres::PostgresStore;
