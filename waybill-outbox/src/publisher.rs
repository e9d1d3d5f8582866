//! Broker publisher.

use crate::error::OutboxResult;
use crate::finalizer::{ConfirmHandler, ConfirmMetadata};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use uuid::Uuid;
use waybill_events::DomainEvent;
use waybill_log::{debug, error, warn};
use waybill_messaging::{Confirmation, Message, MessageBroker, PendingConfirm, PublishOptions};

/// Content type of every published event.
pub const CONTENT_TYPE_JSON: &str = "application/json";

/// Publishes events and hands each broker confirmation to a [`ConfirmHandler`]
/// on a background task.
pub struct EventPublisher<B: MessageBroker> {
    broker: Arc<B>,
    confirm_timeout: Option<Duration>,
    in_flight: Mutex<Vec<JoinHandle<()>>>,
}

impl<B: MessageBroker + 'static> EventPublisher<B> {
    pub fn new(broker: Arc<B>) -> Self {
        Self {
            broker,
            confirm_timeout: None,
            in_flight: Mutex::new(Vec::new()),
        }
    }

    /// Count a confirmation as a failure when it takes longer than `timeout`.
    pub fn with_confirm_timeout(mut self, timeout: Duration) -> Self {
        self.confirm_timeout = Some(timeout);
        self
    }

    pub fn broker(&self) -> &Arc<B> {
        &self.broker
    }

    /// Send `event` to its exchange with its routing key, tagged with
    /// `correlation_id`.
    ///
    /// Returns once the message has left. The confirmation is awaited on a
    /// spawned task: ack calls `on_success`, nack and unroutable call
    /// `on_failure`.
    pub async fn publish(
        &self,
        event: &dyn DomainEvent,
        correlation_id: Uuid,
        module: &str,
        handler: Arc<dyn ConfirmHandler>,
    ) -> OutboxResult<()> {
        let payload = event.encode()?;
        let routing_key = event.routing_key();

        let message = Message::new(routing_key.clone(), payload)
            .with_id(correlation_id.to_string())
            .with_correlation_id(correlation_id.to_string())
            .with_content_type(CONTENT_TYPE_JSON)
            .with_timestamp(event.metadata().occurred_on)
            .with_header("module", module)
            .with_header("type", event.event_type());

        let mut options = PublishOptions::persistent()
            .mandatory()
            .with_exchange(event.router())
            .with_routing_key(routing_key.clone());
        if let Some(timeout) = self.confirm_timeout {
            options = options.with_confirm_timeout(timeout);
        }

        let pending = self.broker.publish(message, options).await?;

        debug!(
            {
                "schema" => module,
                "record_id" => correlation_id,
                "exchange" => event.router(),
                "routing_key" => routing_key
            },
            "Event sent, awaiting confirmation"
        );

        let metadata = ConfirmMetadata {
            module: module.to_string(),
            correlation_id,
        };
        let exchange = event.router().to_string();
        let task = tokio::spawn(await_confirmation(pending, metadata, exchange, routing_key, handler));

        let mut in_flight = self.in_flight.lock().await;
        in_flight.retain(|handle| !handle.is_finished());
        in_flight.push(task);
        Ok(())
    }

    /// Confirmations still outstanding.
    pub async fn in_flight(&self) -> usize {
        let mut in_flight = self.in_flight.lock().await;
        in_flight.retain(|handle| !handle.is_finished());
        in_flight.len()
    }

    /// Wait until every outstanding confirmation has been handled.
    pub async fn settle(&self) {
        loop {
            let handles = std::mem::take(&mut *self.in_flight.lock().await);
            if handles.is_empty() {
                return;
            }
            for handle in handles {
                if let Err(e) = handle.await {
                    error!({ "error" => e }, "Confirmation task panicked");
                }
            }
        }
    }
}

async fn await_confirmation(
    pending: PendingConfirm,
    metadata: ConfirmMetadata,
    exchange: String,
    routing_key: String,
    handler: Arc<dyn ConfirmHandler>,
) {
    let outcome = match pending.await {
        Ok(Confirmation::Ack) => handler.on_success(&metadata).await,
        Ok(Confirmation::Nack { reason }) => {
            warn!(
                {
                    "schema" => metadata.module,
                    "record_id" => metadata.correlation_id,
                    "reason" => reason.as_deref().unwrap_or("none")
                },
                "Broker nacked event"
            );
            handler.on_failure(&metadata).await
        }
        Ok(Confirmation::Returned {
            reply_code,
            reply_text,
        }) => {
            error!(
                {
                    "schema" => metadata.module,
                    "record_id" => metadata.correlation_id,
                    "exchange" => exchange,
                    "routing_key" => routing_key,
                    "reply_code" => reply_code,
                    "reply_text" => reply_text
                },
                "Event unroutable, no queue bound for routing key; check broker topology"
            );
            handler.on_failure(&metadata).await
        }
        Err(e) => {
            error!(
                { "schema" => metadata.module, "record_id" => metadata.correlation_id, "error" => e },
                "Confirmation lost"
            );
            handler.on_failure(&metadata).await
        }
    };

    if let Err(e) = outcome {
        error!(
            { "schema" => metadata.module, "record_id" => metadata.correlation_id, "error" => e },
            "Failed to finalize outbox record, it stays PROCESSING"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde::{Deserialize, Serialize};
    use waybill_events::{Event, EventMetadata};
    use waybill_messaging::memory::InMemoryBroker;

    #[derive(Debug, Clone, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct LoadTendered {
        #[serde(flatten)]
        metadata: EventMetadata,
        carrier: String,
    }

    impl Event for LoadTendered {
        const MODULE: &'static str = "tender";
        const TYPE: &'static str = "LoadTendered";

        fn event_metadata(&self) -> &EventMetadata {
            &self.metadata
        }
    }

    #[derive(Default)]
    struct Recorder {
        outcomes: Mutex<Vec<(bool, Uuid)>>,
    }

    #[async_trait]
    impl ConfirmHandler for Recorder {
        async fn on_success(&self, metadata: &ConfirmMetadata) -> OutboxResult<bool> {
            self.outcomes.lock().await.push((true, metadata.correlation_id));
            Ok(true)
        }

        async fn on_failure(&self, metadata: &ConfirmMetadata) -> OutboxResult<bool> {
            self.outcomes.lock().await.push((false, metadata.correlation_id));
            Ok(true)
        }
    }

    fn event() -> LoadTendered {
        LoadTendered {
            metadata: EventMetadata::new(Uuid::new_v4()),
            carrier: "Maersk".into(),
        }
    }

    #[tokio::test]
    async fn test_message_shape() {
        let broker = Arc::new(InMemoryBroker::new());
        broker.bind("tms.events", "integration.tender.*").await;
        let publisher = EventPublisher::new(broker.clone());
        let recorder = Arc::new(Recorder::default());

        let event = event();
        let id = event.metadata.domain_event_id;
        publisher.publish(&event, id, "tender", recorder.clone()).await.unwrap();
        publisher.settle().await;

        let published = broker.published().await;
        assert_eq!(published.len(), 1);
        let sent = &published[0];
        assert_eq!(sent.exchange, "tms.events");
        assert_eq!(sent.routing_key, "integration.tender.LoadTendered");
        assert_eq!(sent.message.correlation_id, Some(id.to_string()));
        assert_eq!(sent.message.headers.get("module").map(String::as_str), Some("tender"));
        assert_eq!(sent.message.headers.get("type").map(String::as_str), Some("LoadTendered"));
        assert_eq!(sent.message.content_type.as_deref(), Some(CONTENT_TYPE_JSON));
        assert!(sent.options.persistent && sent.options.mandatory);

        assert_eq!(*recorder.outcomes.lock().await, vec![(true, id)]);
    }

    #[tokio::test]
    async fn test_returned_message_fails() {
        let broker = Arc::new(InMemoryBroker::new());
        let publisher = EventPublisher::new(broker);
        let recorder = Arc::new(Recorder::default());

        let event = event();
        let id = event.metadata.domain_event_id;
        publisher.publish(&event, id, "tender", recorder.clone()).await.unwrap();
        publisher.settle().await;

        assert_eq!(*recorder.outcomes.lock().await, vec![(false, id)]);
    }

    #[tokio::test]
    async fn test_settle_waits_for_slow_confirms() {
        let broker = Arc::new(InMemoryBroker::new());
        broker.bind("tms.events", "#").await;
        broker.set_confirm_delay(Duration::from_millis(50)).await;
        let publisher = EventPublisher::new(broker);
        let recorder = Arc::new(Recorder::default());

        for _ in 0..3 {
            let event = event();
            let id = event.metadata.domain_event_id;
            publisher.publish(&event, id, "tender", recorder.clone()).await.unwrap();
        }
        assert!(recorder.outcomes.lock().await.len() < 3);

        publisher.settle().await;
        assert_eq!(recorder.outcomes.lock().await.len(), 3);
        assert_eq!(publisher.in_flight().await, 0);
    }

    #[tokio::test]
    async fn test_send_failure_is_returned() {
        let broker = Arc::new(InMemoryBroker::new());
        broker.fail_next_sends(1).await;
        let publisher = EventPublisher::new(broker);
        let recorder = Arc::new(Recorder::default());

        let event = event();
        let result = publisher
            .publish(&event, event.metadata.domain_event_id, "tender", recorder.clone())
            .await;

        assert!(result.is_err());
        publisher.settle().await;
        assert!(recorder.outcomes.lock().await.is_empty());
    }
}
