//! # Waybill Messaging
//!
//! Publishing to a message broker with publisher confirms.
//!
//! Publishing is split in two steps. [`MessageBroker::publish`] resolves once
//! the message has been handed to the broker and returns a [`PendingConfirm`];
//! awaiting that resolves to the broker's verdict as a [`Confirmation`]
//! (ack, nack, or returned as unroutable). Callers that do not need to block
//! on the verdict spawn the pending confirm onto a task.
//!
//! ## Backends
//!
//! - [`memory::InMemoryBroker`] - topic routing in process, for tests and local runs
//! - `rabbitmq` feature - RabbitMQ via `lapin`, with confirms and mandatory routing
//!
//! ## Example
//!
//! ```rust
//! use waybill_messaging::memory::InMemoryBroker;
//! use waybill_messaging::{Confirmation, Message, MessageBroker, PublishOptions};
//!
//! # tokio_test::block_on(async {
//! let broker = InMemoryBroker::new();
//! broker.bind("tms.events", "integration.company.*").await;
//!
//! let message = Message::new("integration.company.CompanyCreated", br#"{"name":"Acme"}"#.to_vec())
//!     .with_content_type("application/json");
//! let options = PublishOptions::persistent()
//!     .with_exchange("tms.events")
//!     .mandatory();
//!
//! let pending = broker.publish(message, options).await.unwrap();
//! assert_eq!(pending.await.unwrap(), Confirmation::Ack);
//! # });
//! ```

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod config;
pub mod error;
pub mod memory;

#[cfg(feature = "rabbitmq")]
pub mod rabbitmq;

pub use config::*;
pub use error::*;

/// A message to be sent to a message broker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Unique message identifier
    pub id: String,
    /// Message payload as bytes
    pub payload: Vec<u8>,
    /// Message headers
    pub headers: HashMap<String, String>,
    /// Default routing key when the publish options name none
    pub topic: String,
    /// Timestamp when the message was created
    pub timestamp: DateTime<Utc>,
    /// Correlation ID echoed back with the delivery outcome
    pub correlation_id: Option<String>,
    /// Message content type (e.g., "application/json")
    pub content_type: Option<String>,
}

impl Message {
    /// Create a new message with the given payload
    pub fn new<T: Into<Vec<u8>>>(topic: impl Into<String>, payload: T) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            payload: payload.into(),
            headers: HashMap::new(),
            topic: topic.into(),
            timestamp: Utc::now(),
            correlation_id: None,
            content_type: None,
        }
    }

    /// Use a specific message ID
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Add a header to the message
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Set the correlation ID
    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    /// Set the content type
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// Set the creation timestamp
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Message {{ id: {}, topic: {}, size: {} bytes }}",
            self.id,
            self.topic,
            self.payload.len()
        )
    }
}

/// Options for publishing a message
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PublishOptions {
    /// Survive a broker restart
    pub persistent: bool,
    /// Ask the broker to return the message when no queue is bound for it
    pub mandatory: bool,
    /// Routing key; defaults to the message topic
    pub routing_key: Option<String>,
    /// Exchange; defaults to the broker's default exchange
    pub exchange: Option<String>,
    /// Give up waiting for the confirm after this long
    pub confirm_timeout: Option<Duration>,
}

impl PublishOptions {
    /// Create options for persistent delivery
    pub fn persistent() -> Self {
        Self {
            persistent: true,
            ..Default::default()
        }
    }

    /// Require the message to be routable
    pub fn mandatory(mut self) -> Self {
        self.mandatory = true;
        self
    }

    /// Set the routing key
    pub fn with_routing_key(mut self, key: impl Into<String>) -> Self {
        self.routing_key = Some(key.into());
        self
    }

    /// Set the exchange
    pub fn with_exchange(mut self, exchange: impl Into<String>) -> Self {
        self.exchange = Some(exchange.into());
        self
    }

    /// Bound the wait for the publisher confirm
    pub fn with_confirm_timeout(mut self, timeout: Duration) -> Self {
        self.confirm_timeout = Some(timeout);
        self
    }

    /// Routing key to use for `message`
    pub fn routing_key_for<'a>(&'a self, message: &'a Message) -> &'a str {
        self.routing_key.as_deref().unwrap_or(&message.topic)
    }

    /// Exchange to use, `""` being the default exchange
    pub fn exchange_name(&self) -> &str {
        self.exchange.as_deref().unwrap_or("")
    }
}

/// The broker's verdict on a published message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Confirmation {
    /// Accepted and routed
    Ack,
    /// Refused by the broker
    Nack {
        /// Reason, when the broker gave one
        reason: Option<String>,
    },
    /// Mandatory message that no queue was bound for
    Returned {
        /// AMQP reply code (312 NO_ROUTE)
        reply_code: u16,
        /// AMQP reply text
        reply_text: String,
    },
}

impl Confirmation {
    /// Whether the message was accepted and routed
    pub fn is_ack(&self) -> bool {
        matches!(self, Confirmation::Ack)
    }
}

impl fmt::Display for Confirmation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Confirmation::Ack => f.write_str("ack"),
            Confirmation::Nack { reason: Some(reason) } => write!(f, "nack ({})", reason),
            Confirmation::Nack { reason: None } => f.write_str("nack"),
            Confirmation::Returned {
                reply_code,
                reply_text,
            } => write!(f, "returned ({} {})", reply_code, reply_text),
        }
    }
}

/// A publisher confirm that has not resolved yet
pub type PendingConfirm = BoxFuture<'static, Result<Confirmation, MessagingError>>;

/// Core trait for message brokers
#[async_trait]
pub trait MessageBroker: Send + Sync {
    /// Send a message. Resolves once the message has left; the returned
    /// future resolves to the broker's confirmation.
    async fn publish(
        &self,
        message: Message,
        options: PublishOptions,
    ) -> Result<PendingConfirm, MessagingError>;

    /// Declare a durable topic exchange
    async fn declare_exchange(&self, name: &str) -> Result<(), MessagingError>;

    /// Check if connected to the broker
    fn is_connected(&self) -> bool;

    /// Close the connection
    async fn close(&self) -> Result<(), MessagingError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_creation() {
        let msg = Message::new("integration.company.CompanyCreated", b"{}".to_vec());
        assert_eq!(msg.topic, "integration.company.CompanyCreated");
        assert_eq!(msg.payload, b"{}");
        assert!(!msg.id.is_empty());
    }

    #[test]
    fn test_message_builder() {
        let msg = Message::new("topic", b"data".to_vec())
            .with_id("evt-1")
            .with_header("module", "company")
            .with_correlation_id("evt-1");

        assert_eq!(msg.id, "evt-1");
        assert_eq!(msg.headers.get("module"), Some(&"company".to_string()));
        assert_eq!(msg.correlation_id, Some("evt-1".to_string()));
    }

    #[test]
    fn test_publish_options() {
        let opts = PublishOptions::persistent()
            .mandatory()
            .with_routing_key("integration.company.CompanyCreated")
            .with_exchange("tms.events")
            .with_confirm_timeout(Duration::from_secs(5));

        assert!(opts.persistent);
        assert!(opts.mandatory);
        assert_eq!(opts.exchange_name(), "tms.events");
        assert_eq!(opts.confirm_timeout, Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_routing_key_defaults_to_topic() {
        let msg = Message::new("orders.created", Vec::new());
        assert_eq!(PublishOptions::default().routing_key_for(&msg), "orders.created");
        assert_eq!(PublishOptions::default().exchange_name(), "");
        assert_eq!(
            PublishOptions::default()
                .with_routing_key("x.y")
                .routing_key_for(&msg),
            "x.y"
        );
    }

    #[test]
    fn test_confirmation_display() {
        assert!(Confirmation::Ack.is_ack());
        assert_eq!(
            Confirmation::Returned {
                reply_code: 312,
                reply_text: "NO_ROUTE".into()
            }
            .to_string(),
            "returned (312 NO_ROUTE)"
        );
        assert!(!Confirmation::Nack { reason: None }.is_ack());
    }
}
