//! services/sync_server/src/error.rs
//!
//! Defines the primary error type for the sync server.

use crate::config::ConfigError;

/// The primary error type for the `sync_server` service.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Represents an error that occurred during configuration loading.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Represents an error from the underlying database library.
    #[error("Database Error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration Error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// Represents a standard Input/Output error (e.g., binding to a network socket).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A catch-all for any other unexpected errors.
    #[error("An unexpected internal error occurred: {0}")]
    Internal(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_errors_convert_with_their_message() {
        let err: ServerError = ConfigError::MissingVar("DATABASE_URL".to_string()).into();
        assert!(matches!(err, ServerError::Config(_)));
        assert_eq!(
            err.to_string(),
            "Configuration error: Missing the environment variable DATABASE_URL"
        );
    }
}
