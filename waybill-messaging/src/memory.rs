//! In-process broker with AMQP topic routing semantics.
//!
//! Messages are matched against `(exchange, binding pattern)` pairs the way a
//! RabbitMQ topic exchange does (`*` matches one word, `#` zero or more). A
//! mandatory message that matches nothing is returned; a non-mandatory one is
//! acked and dropped. Nacks, send failures and slow confirms can be scripted.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::FutureExt;
use tokio::sync::Mutex;
use waybill_log::{debug, info};

use crate::{Confirmation, Message, MessageBroker, MessagingError, PendingConfirm, PublishOptions};

/// AMQP reply code for an unroutable mandatory message
pub const NO_ROUTE: u16 = 312;

/// A message as the broker received it
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedMessage {
    /// Target exchange
    pub exchange: String,
    /// Routing key used
    pub routing_key: String,
    /// The message
    pub message: Message,
    /// Options it was published with
    pub options: PublishOptions,
    /// Verdict the broker gave
    pub confirmation: Confirmation,
}

#[derive(Debug, Default)]
struct State {
    exchanges: HashSet<String>,
    bindings: Vec<(String, String)>,
    published: Vec<PublishedMessage>,
    nacks_pending: usize,
    send_failures_pending: usize,
    confirm_delay: Option<Duration>,
}

/// In-memory message broker
#[derive(Debug, Clone)]
pub struct InMemoryBroker {
    state: Arc<Mutex<State>>,
    connected: Arc<AtomicBool>,
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBroker {
    /// A connected broker with no bindings
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State::default())),
            connected: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Bind a queue to `exchange` with a topic `pattern`
    pub async fn bind(&self, exchange: &str, pattern: &str) {
        let mut state = self.state.lock().await;
        state.exchanges.insert(exchange.to_string());
        state
            .bindings
            .push((exchange.to_string(), pattern.to_string()));
    }

    /// Nack the next `count` messages
    pub async fn nack_next(&self, count: usize) {
        self.state.lock().await.nacks_pending += count;
    }

    /// Fail the next `count` sends before the message leaves
    pub async fn fail_next_sends(&self, count: usize) {
        self.state.lock().await.send_failures_pending += count;
    }

    /// Delay every confirmation
    pub async fn set_confirm_delay(&self, delay: Duration) {
        self.state.lock().await.confirm_delay = Some(delay);
    }

    /// Simulate losing or regaining the connection
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Everything published so far, in order
    pub async fn published(&self) -> Vec<PublishedMessage> {
        self.state.lock().await.published.clone()
    }

    /// Number of messages published so far
    pub async fn published_count(&self) -> usize {
        self.state.lock().await.published.len()
    }

    /// Whether `exchange` was declared or bound
    pub async fn has_exchange(&self, exchange: &str) -> bool {
        self.state.lock().await.exchanges.contains(exchange)
    }
}

impl State {
    fn is_routable(&self, exchange: &str, routing_key: &str) -> bool {
        self.bindings
            .iter()
            .any(|(bound, pattern)| bound == exchange && topic_matches(pattern, routing_key))
    }
}

/// Whether a topic binding `pattern` matches `routing_key`.
pub fn topic_matches(pattern: &str, routing_key: &str) -> bool {
    let pattern: Vec<&str> = pattern.split('.').collect();
    let key: Vec<&str> = routing_key.split('.').collect();
    match_words(&pattern, &key)
}

fn match_words(pattern: &[&str], key: &[&str]) -> bool {
    match (pattern.first(), key.first()) {
        (None, None) => true,
        (Some(&"#"), _) => {
            match_words(&pattern[1..], key) || (!key.is_empty() && match_words(pattern, &key[1..]))
        }
        (Some(&"*"), Some(_)) => match_words(&pattern[1..], &key[1..]),
        (Some(word), Some(part)) if word == part => match_words(&pattern[1..], &key[1..]),
        _ => false,
    }
}

#[async_trait]
impl MessageBroker for InMemoryBroker {
    async fn publish(
        &self,
        message: Message,
        options: PublishOptions,
    ) -> Result<PendingConfirm, MessagingError> {
        if !self.is_connected() {
            return Err(MessagingError::ChannelClosed("broker disconnected".into()));
        }

        let mut state = self.state.lock().await;

        if state.send_failures_pending > 0 {
            state.send_failures_pending -= 1;
            return Err(MessagingError::Publish(format!(
                "send of message {} failed",
                message.id
            )));
        }

        let exchange = options.exchange_name().to_string();
        let routing_key = options.routing_key_for(&message).to_string();

        let confirmation = if state.nacks_pending > 0 {
            state.nacks_pending -= 1;
            Confirmation::Nack {
                reason: Some("scripted nack".into()),
            }
        } else if options.mandatory && !state.is_routable(&exchange, &routing_key) {
            Confirmation::Returned {
                reply_code: NO_ROUTE,
                reply_text: "NO_ROUTE".into(),
            }
        } else {
            Confirmation::Ack
        };

        debug!(
            { "exchange" => exchange, "routing_key" => routing_key, "message_id" => message.id },
            "Message published"
        );

        state.published.push(PublishedMessage {
            exchange,
            routing_key,
            message,
            options,
            confirmation: confirmation.clone(),
        });

        let delay = state.confirm_delay;
        Ok(async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            Ok(confirmation)
        }
        .boxed())
    }

    async fn declare_exchange(&self, name: &str) -> Result<(), MessagingError> {
        self.state.lock().await.exchanges.insert(name.to_string());
        debug!({ "exchange" => name }, "Exchange declared");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn close(&self) -> Result<(), MessagingError> {
        info!("Closing in-memory broker");
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::assert_ok;

    fn options() -> PublishOptions {
        PublishOptions::persistent()
            .with_exchange("tms.events")
            .mandatory()
    }

    fn message(key: &str) -> Message {
        Message::new(key, b"{}".to_vec())
    }

    #[test]
    fn test_topic_matching() {
        assert!(topic_matches("integration.company.*", "integration.company.CompanyCreated"));
        assert!(topic_matches("integration.#", "integration.company.CompanyCreated"));
        assert!(topic_matches("#", "anything.at.all"));
        assert!(topic_matches("integration.#.CompanyCreated", "integration.CompanyCreated"));
        assert!(!topic_matches("integration.*", "integration.company.CompanyCreated"));
        assert!(!topic_matches("integration.fleet.*", "integration.company.CompanyCreated"));
    }

    #[tokio::test]
    async fn test_routed_message_is_acked() {
        let broker = InMemoryBroker::new();
        broker.bind("tms.events", "integration.#").await;

        let pending = assert_ok!(
            broker
                .publish(message("integration.company.CompanyCreated"), options())
                .await
        );
        assert_eq!(assert_ok!(pending.await), Confirmation::Ack);

        let published = broker.published().await;
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].exchange, "tms.events");
        assert_eq!(published[0].routing_key, "integration.company.CompanyCreated");
    }

    #[tokio::test]
    async fn test_unroutable_mandatory_is_returned() {
        let broker = InMemoryBroker::new();
        broker.bind("tms.events", "integration.fleet.*").await;

        let pending = assert_ok!(broker.publish(message("integration.company.X"), options()).await);
        assert!(matches!(
            assert_ok!(pending.await),
            Confirmation::Returned { reply_code: NO_ROUTE, .. }
        ));
    }

    #[tokio::test]
    async fn test_unroutable_non_mandatory_is_acked() {
        let broker = InMemoryBroker::new();
        let pending = assert_ok!(
            broker
                .publish(message("nowhere"), PublishOptions::persistent())
                .await
        );
        assert!(assert_ok!(pending.await).is_ack());
    }

    #[tokio::test]
    async fn test_scripted_nack_and_send_failure() {
        let broker = InMemoryBroker::new();
        broker.bind("tms.events", "#").await;
        broker.nack_next(1).await;
        broker.fail_next_sends(1).await;

        assert!(broker.publish(message("a.b"), options()).await.is_err());

        let pending = assert_ok!(broker.publish(message("a.b"), options()).await);
        assert!(matches!(assert_ok!(pending.await), Confirmation::Nack { .. }));

        let pending = assert_ok!(broker.publish(message("a.b"), options()).await);
        assert!(assert_ok!(pending.await).is_ack());
        assert_eq!(broker.published_count().await, 2);
    }

    #[tokio::test]
    async fn test_closed_broker_refuses() {
        let broker = InMemoryBroker::new();
        assert_ok!(broker.declare_exchange("tms.events").await);
        assert!(broker.has_exchange("tms.events").await);

        assert_ok!(broker.close().await);
        assert!(!broker.is_connected());
        let err = broker.publish(message("a"), options()).await.err().unwrap();
        assert!(err.is_connection_error());
    }
}
