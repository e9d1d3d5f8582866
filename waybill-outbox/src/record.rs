//! Outbox records.

use crate::error::{OutboxError, OutboxResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;
use waybill_events::DomainEvent;

/// Width of the `type` column.
pub const MAX_TYPE_LEN: usize = 50;

/// Delivery state of an outbox record.
///
/// `New -> Processing -> Published` or `Processing -> Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OutboxStatus {
    /// Waiting to be claimed
    New,
    /// Claimed by a relay, confirmation outstanding
    Processing,
    /// Broker acked
    Published,
    /// Broker nacked or returned the message
    Failed,
}

impl OutboxStatus {
    /// Value stored in the `status` column.
    pub fn as_str(&self) -> &'static str {
        match self {
            OutboxStatus::New => "NEW",
            OutboxStatus::Processing => "PROCESSING",
            OutboxStatus::Published => "PUBLISHED",
            OutboxStatus::Failed => "FAILED",
        }
    }

    /// Whether the record has reached its final state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, OutboxStatus::Published | OutboxStatus::Failed)
    }
}

impl fmt::Display for OutboxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutboxStatus {
    type Err = OutboxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NEW" => Ok(OutboxStatus::New),
            "PROCESSING" => Ok(OutboxStatus::Processing),
            "PUBLISHED" => Ok(OutboxStatus::Published),
            "FAILED" => Ok(OutboxStatus::Failed),
            other => Err(OutboxError::InvalidRecord(format!("unknown status '{}'", other))),
        }
    }
}

/// One row of a module's outbox table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxRecord {
    /// Domain event ID; also the broker correlation ID
    pub id: Uuid,
    /// Serialized event (JSON)
    pub content: String,
    /// Aggregate that raised the event
    pub aggregate_id: Uuid,
    /// Delivery state
    pub status: OutboxStatus,
    /// When the event occurred; claim order
    pub created_at: DateTime<Utc>,
    /// Short event type name
    pub event_type: String,
    /// When a relay last claimed the record
    pub claimed_at: Option<DateTime<Utc>>,
}

impl OutboxRecord {
    /// A `NEW` record carrying `event`.
    pub fn from_event(event: &dyn DomainEvent) -> OutboxResult<Self> {
        let event_type = event.event_type();
        if event_type.is_empty() || event_type.len() > MAX_TYPE_LEN {
            return Err(OutboxError::InvalidRecord(format!(
                "event type '{}' must be 1 to {} characters",
                event_type, MAX_TYPE_LEN
            )));
        }

        let metadata = event.metadata();
        Ok(Self {
            id: metadata.domain_event_id,
            content: event.encode()?,
            aggregate_id: metadata.aggregate_id,
            status: OutboxStatus::New,
            created_at: metadata.occurred_on,
            event_type: event_type.to_string(),
            claimed_at: None,
        })
    }
}
