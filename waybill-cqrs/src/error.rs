//! Routing errors.

use crate::role::{CqrsMode, Role};
use thiserror::Error;

/// Errors raised while building or configuring a router.
#[derive(Debug, Error)]
pub enum RoutingError {
    /// Neither a write nor a read connection is available.
    #[error("No datasource available for CQRS mode '{mode}'")]
    NoDataSource { mode: CqrsMode },

    /// A connection factory failed.
    #[error("Failed to provision {role} datasource: {source}")]
    Provision {
        role: Role,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Unrecognized operating mode string.
    #[error("Invalid CQRS mode '{0}', expected read, write or both")]
    InvalidMode(String),
}

/// Result type for routing operations.
pub type RoutingResult<T> = Result<T, RoutingError>;
