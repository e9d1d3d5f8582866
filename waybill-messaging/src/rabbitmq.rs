//! RabbitMQ message broker implementation

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use futures_util::FutureExt;
use lapin::publisher_confirm::Confirmation as LapinConfirmation;
use lapin::{
    BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind, options::*,
    types::{AMQPValue, FieldTable},
};
use waybill_log::{debug, error, info, warn};

use crate::{
    Confirmation, Message, MessageBroker, MessagingConfig, MessagingError, PendingConfirm,
    PublishOptions,
};

/// RabbitMQ message broker.
///
/// Publishes on a single channel in confirm mode. Each publish resolves once
/// the frame is written; the returned [`PendingConfirm`] resolves when the
/// broker acks, nacks or returns the message.
pub struct RabbitMqBroker {
    connection: Arc<Connection>,
    publish_channel: Channel,
    connected: Arc<AtomicBool>,
}

impl RabbitMqBroker {
    /// Connect, enable publisher confirms and declare the configured exchanges
    pub async fn connect(config: &MessagingConfig) -> Result<Self, MessagingError> {
        info!({ "url" => config.redacted_url() }, "Connecting to RabbitMQ");

        let connection = tokio::time::timeout(
            config.connection_timeout,
            Connection::connect(&config.url, ConnectionProperties::default()),
        )
        .await
        .map_err(|_| {
            MessagingError::Timeout(format!(
                "no connection to {} within {:?}",
                config.redacted_url(),
                config.connection_timeout
            ))
        })?
        .map_err(|e| MessagingError::Connection(e.to_string()))?;

        let publish_channel = connection.create_channel().await?;
        publish_channel
            .confirm_select(ConfirmSelectOptions::default())
            .await?;

        let broker = Self {
            connection: Arc::new(connection),
            publish_channel,
            connected: Arc::new(AtomicBool::new(true)),
        };

        for exchange in &config.exchanges {
            broker.declare_exchange(exchange).await?;
        }

        info!("Connected to RabbitMQ with publisher confirms");
        Ok(broker)
    }

    fn build_properties(message: &Message, options: &PublishOptions) -> BasicProperties {
        let mut props = BasicProperties::default().with_message_id(message.id.clone().into());

        // AMQP timestamps are unsigned seconds.
        if let Ok(seconds) = u64::try_from(message.timestamp.timestamp()) {
            props = props.with_timestamp(seconds);
        }

        if options.persistent {
            props = props.with_delivery_mode(2);
        }

        if let Some(ref content_type) = message.content_type {
            props = props.with_content_type(content_type.clone().into());
        }

        if let Some(ref correlation_id) = message.correlation_id {
            props = props.with_correlation_id(correlation_id.clone().into());
        }

        if !message.headers.is_empty() {
            let mut headers = FieldTable::default();
            for (key, value) in &message.headers {
                headers.insert(key.clone().into(), AMQPValue::LongString(value.clone().into()));
            }
            props = props.with_headers(headers);
        }

        props
    }

    fn translate(confirmation: LapinConfirmation) -> Confirmation {
        match confirmation {
            LapinConfirmation::Ack(None) => Confirmation::Ack,
            LapinConfirmation::Ack(Some(returned)) | LapinConfirmation::Nack(Some(returned)) => {
                Confirmation::Returned {
                    reply_code: returned.reply_code,
                    reply_text: returned.reply_text.as_str().to_string(),
                }
            }
            LapinConfirmation::Nack(None) => Confirmation::Nack { reason: None },
            LapinConfirmation::NotRequested => {
                warn!("Publisher confirms not enabled on channel, treating as nack");
                Confirmation::Nack {
                    reason: Some("confirms not requested".into()),
                }
            }
        }
    }
}

#[async_trait]
impl MessageBroker for RabbitMqBroker {
    async fn publish(
        &self,
        message: Message,
        options: PublishOptions,
    ) -> Result<PendingConfirm, MessagingError> {
        let exchange = options.exchange_name();
        let routing_key = options.routing_key_for(&message);
        let props = Self::build_properties(&message, &options);

        debug!(
            { "exchange" => exchange, "routing_key" => routing_key, "message_id" => message.id },
            "Publishing message"
        );

        let confirm = self
            .publish_channel
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions {
                    mandatory: options.mandatory,
                    ..Default::default()
                },
                &message.payload,
                props,
            )
            .await
            .map_err(|e| MessagingError::Publish(e.to_string()))?;

        let message_id = message.id.clone();
        let timeout = options.confirm_timeout;

        Ok(async move {
            let outcome = match timeout {
                Some(limit) => tokio::time::timeout(limit, confirm).await.map_err(|_| {
                    MessagingError::Timeout(format!(
                        "no confirm for message {} within {:?}",
                        message_id, limit
                    ))
                })?,
                None => confirm.await,
            };

            outcome.map(Self::translate).map_err(|e| {
                error!({ "message_id" => message_id, "error" => e }, "Publisher confirm failed");
                MessagingError::Publish(format!("Publisher confirm failed: {}", e))
            })
        }
        .boxed())
    }

    async fn declare_exchange(&self, name: &str) -> Result<(), MessagingError> {
        self.publish_channel
            .exchange_declare(
                name,
                ExchangeKind::Topic,
                ExchangeDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;
        debug!({ "exchange" => name }, "Exchange declared");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst) && self.connection.status().connected()
    }

    async fn close(&self) -> Result<(), MessagingError> {
        info!("Closing RabbitMQ connection");
        self.connected.store(false, Ordering::SeqCst);

        if let Err(e) = self.publish_channel.close(200, "Normal shutdown").await {
            warn!({ "error" => e }, "Error closing channel");
        }

        self.connection
            .close(200, "Normal shutdown")
            .await
            .map_err(|e| MessagingError::Connection(e.to_string()))?;

        Ok(())
    }
}
