//! Startup errors for the server binary.

use thiserror::Error;

/// Failures while bringing the server up.
#[derive(Error, Debug)]
pub enum ServerError {
    /// Database connection or query failure
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Embedded migrations failed
    #[error("Migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// The Prometheus exporter could not be installed
    #[error("Failed to install metrics exporter: {0}")]
    Metrics(String),

    /// Socket bind or serve failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
