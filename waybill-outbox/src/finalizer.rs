//! Outcome finalizer: turns broker confirmations into terminal record states.

use crate::error::OutboxResult;
use crate::record::OutboxStatus;
use crate::store::OutboxStore;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;
use waybill_log::{debug, info, warn};

/// What a confirmation callback needs to find the record again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmMetadata {
    /// Module, and so schema, the record lives in
    pub module: String,
    /// Outbox record ID
    pub correlation_id: Uuid,
}

/// Confirmation as delivered by an external callback:
/// `{"ack": true, "module": "company", "correlationId": "..."}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryConfirmation {
    pub ack: bool,
    pub module: String,
    pub correlation_id: Uuid,
}

impl DeliveryConfirmation {
    pub fn metadata(&self) -> ConfirmMetadata {
        ConfirmMetadata {
            module: self.module.clone(),
            correlation_id: self.correlation_id,
        }
    }
}

/// Receives the broker's verdict for a published record.
#[async_trait]
pub trait ConfirmHandler: Send + Sync {
    /// Broker acked the message. Returns whether a record transitioned.
    async fn on_success(&self, metadata: &ConfirmMetadata) -> OutboxResult<bool>;

    /// Broker nacked or returned the message. Returns whether a record transitioned.
    async fn on_failure(&self, metadata: &ConfirmMetadata) -> OutboxResult<bool>;
}

/// Finalizes records in the store, each in its own write transaction.
pub struct OutcomeFinalizer<S: OutboxStore> {
    store: Arc<S>,
}

impl<S: OutboxStore> OutcomeFinalizer<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Dispatch an external confirmation to the matching callback.
    pub async fn handle(&self, confirmation: &DeliveryConfirmation) -> OutboxResult<bool> {
        let metadata = confirmation.metadata();
        if confirmation.ack {
            self.on_success(&metadata).await
        } else {
            self.on_failure(&metadata).await
        }
    }

    async fn finalize(&self, metadata: &ConfirmMetadata, terminal: OutboxStatus) -> OutboxResult<bool> {
        let transitioned = self
            .store
            .finalize(&metadata.module, metadata.correlation_id, terminal)
            .await?;

        if transitioned {
            info!(
                { "schema" => metadata.module, "record_id" => metadata.correlation_id, "status" => terminal },
                "Outbox record finalized"
            );
        } else {
            debug!(
                { "schema" => metadata.module, "record_id" => metadata.correlation_id, "status" => terminal },
                "Outbox record not in PROCESSING, nothing to finalize"
            );
        }

        Ok(transitioned)
    }
}

#[async_trait]
impl<S: OutboxStore> ConfirmHandler for OutcomeFinalizer<S> {
    async fn on_success(&self, metadata: &ConfirmMetadata) -> OutboxResult<bool> {
        self.finalize(metadata, OutboxStatus::Published).await
    }

    async fn on_failure(&self, metadata: &ConfirmMetadata) -> OutboxResult<bool> {
        warn!(
            { "schema" => metadata.module, "record_id" => metadata.correlation_id },
            "Delivery failed, marking outbox record FAILED"
        );
        self.finalize(metadata, OutboxStatus::Failed).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_confirmation_wire_format() {
        let id = Uuid::new_v4();
        let raw = format!(r#"{{"ack":false,"module":"company","correlationId":"{}"}}"#, id);

        let confirmation: DeliveryConfirmation = serde_json::from_str(&raw).unwrap();

        assert!(!confirmation.ack);
        assert_eq!(
            confirmation.metadata(),
            ConfirmMetadata {
                module: "company".into(),
                correlation_id: id
            }
        );
        assert_eq!(serde_json::to_string(&confirmation).unwrap(), raw);
    }
}
