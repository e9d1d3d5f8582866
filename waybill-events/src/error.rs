//! Event errors.

use thiserror::Error;

/// Errors raised while resolving, encoding or decoding domain events.
#[derive(Debug, Error)]
pub enum EventError {
    /// No decoder is registered for the `(module, type)` pair.
    #[error("Unknown event type '{type_name}' in module '{module}'")]
    UnknownEventType { module: String, type_name: String },

    /// Stored content could not be decoded into the registered shape.
    #[error("Malformed content for event '{module}.{type_name}': {source}")]
    Malformed {
        module: String,
        type_name: String,
        #[source]
        source: serde_json::Error,
    },

    /// An event could not be serialized.
    #[error("Failed to serialize event '{type_name}': {source}")]
    Serialization {
        type_name: String,
        #[source]
        source: serde_json::Error,
    },
}

impl EventError {
    /// Module the failing event belongs to, where known.
    pub fn module(&self) -> Option<&str> {
        match self {
            EventError::UnknownEventType { module, .. } | EventError::Malformed { module, .. } => {
                Some(module)
            }
            EventError::Serialization { .. } => None,
        }
    }
}

/// Result type for event operations.
pub type EventResult<T> = Result<T, EventError>;
