//! Error types for the outbox relay.

use thiserror::Error;
use waybill_cqrs::RoutingError;
use waybill_events::EventError;
use waybill_messaging::MessagingError;

/// Result type for outbox operations.
pub type OutboxResult<T> = Result<T, OutboxError>;

/// Outbox errors.
#[derive(Debug, Error)]
pub enum OutboxError {
    /// Database error
    #[cfg(feature = "postgres")]
    #[error(transparent)]
    Database(#[from] waybill_diesel::DieselError),

    /// Storage error outside the database driver
    #[error("Store error: {0}")]
    Store(String),

    /// Event could not be resolved, decoded or encoded
    #[error(transparent)]
    Event(#[from] EventError),

    /// Broker error
    #[error(transparent)]
    Messaging(#[from] MessagingError),

    /// Datasource routing error
    #[error(transparent)]
    Routing(#[from] RoutingError),

    /// A stored value is outside what the outbox table allows
    #[error("Invalid outbox record: {0}")]
    InvalidRecord(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Relay already running
    #[error("Relay already running")]
    AlreadyRunning,

    /// Relay not running
    #[error("Relay not running")]
    NotRunning,
}

impl OutboxError {
    /// Whether the next pass may succeed without anyone intervening, e.g. a
    /// dropped broker channel or an exhausted pool.
    pub fn is_transient(&self) -> bool {
        match self {
            #[cfg(feature = "postgres")]
            OutboxError::Database(e) => e.is_transient(),
            OutboxError::Messaging(e) => e.is_retryable(),
            _ => false,
        }
    }
}

#[cfg(feature = "postgres")]
impl From<diesel::result::Error> for OutboxError {
    fn from(err: diesel::result::Error) -> Self {
        OutboxError::Database(waybill_diesel::DieselError::Query(err))
    }
}
