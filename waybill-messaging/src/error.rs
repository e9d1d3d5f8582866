//! Error types for messaging operations

use thiserror::Error;

/// Errors that can occur during messaging operations
#[derive(Error, Debug)]
pub enum MessagingError {
    /// Failed to connect to the broker
    #[error("Connection failed: {0}")]
    Connection(String),

    /// Failed to publish a message
    #[error("Publish failed: {0}")]
    Publish(String),

    /// Operation timed out
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    /// Channel/connection is closed
    #[error("Channel closed: {0}")]
    ChannelClosed(String),

    /// Internal broker error
    #[error("Broker error: {0}")]
    BrokerError(String),
}

impl MessagingError {
    /// Whether the broker may accept the same publish later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            MessagingError::Connection(_)
                | MessagingError::Timeout(_)
                | MessagingError::ChannelClosed(_)
                | MessagingError::BrokerError(_)
        )
    }

    /// Check if this error indicates a connection issue
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            MessagingError::Connection(_) | MessagingError::ChannelClosed(_)
        )
    }
}

#[cfg(feature = "rabbitmq")]
impl From<lapin::Error> for MessagingError {
    fn from(err: lapin::Error) -> Self {
        MessagingError::BrokerError(err.to_string())
    }
}
