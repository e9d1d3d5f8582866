//! Error types for the Diesel integration.

use thiserror::Error;

/// Errors that can occur when using the Diesel integration.
#[derive(Error, Debug)]
pub enum DieselError {
    /// Connection pool error.
    #[error("Pool error: {0}")]
    Pool(String),

    /// Query execution error.
    #[error("Query error: {0}")]
    Query(#[from] diesel::result::Error),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Timeout error.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Invalid schema identifier.
    #[error("Invalid schema name '{0}'")]
    InvalidSchema(String),

    /// Datasource routing error.
    #[error(transparent)]
    Routing(#[from] waybill_cqrs::RoutingError),
}

impl DieselError {
    /// Whether retrying on the next tick may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            DieselError::Pool(_)
                | DieselError::Timeout(_)
                | DieselError::Query(diesel::result::Error::DatabaseError(
                    diesel::result::DatabaseErrorKind::SerializationFailure
                        | diesel::result::DatabaseErrorKind::ClosedConnection,
                    _
                ))
        )
    }
}

/// Result type alias for Diesel operations.
pub type DieselResult<T> = Result<T, DieselError>;
