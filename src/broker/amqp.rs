//! RabbitMQ access over AMQP 0-9-1.

use async_trait::async_trait;
use futures::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions, BasicQosOptions,
    ConfirmSelectOptions, QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties};

use crate::broker::Publisher;
use crate::error::{AppError, Disposition, Result};
use crate::models::BrokerConfig;
use crate::pipeline::worker::{self, MessageHandler};
use crate::utils::retry::RetryPolicy;

/// Persistent delivery mode.
const PERSISTENT: u8 = 2;

/// Connection with one channel for publishing and one for consuming.
pub struct AmqpBroker {
    connection: Connection,
    publish_channel: Channel,
    consume_channel: Channel,
    prefetch: u16,
}

impl AmqpBroker {
    /// Connect, retrying while the broker is unreachable.
    pub async fn connect(config: &BrokerConfig, policy: &RetryPolicy) -> Result<Self> {
        let uri = config.uri();
        let connection = policy
            .run(&format!("connect to broker at {}", config.host), || {
                let uri = uri.clone();
                async move { Ok(Connection::connect(&uri, ConnectionProperties::default()).await?) }
            })
            .await?;

        let publish_channel = connection.create_channel().await?;
        publish_channel
            .confirm_select(ConfirmSelectOptions::default())
            .await?;
        let consume_channel = connection.create_channel().await?;

        log::info!("Connected to broker {}:{}", config.host, config.port);
        Ok(Self {
            connection,
            publish_channel,
            consume_channel,
            prefetch: config.prefetch,
        })
    }

    /// Declare durable queues. Declaring an existing queue is a no-op.
    pub async fn declare(&self, queues: &[&str]) -> Result<()> {
        for queue in queues {
            self.publish_channel
                .queue_declare(
                    queue,
                    QueueDeclareOptions {
                        durable: true,
                        ..QueueDeclareOptions::default()
                    },
                    FieldTable::default(),
                )
                .await?;
            log::debug!("Declared queue {queue}");
        }
        Ok(())
    }

    /// Consume `queue` until the broker closes the stream.
    ///
    /// Every message is acked or nacked with requeue depending on the
    /// handler outcome. Returns an error when delivery stops.
    pub async fn consume(&self, queue: &str, handler: &dyn MessageHandler) -> Result<()> {
        self.consume_channel
            .basic_qos(self.prefetch, BasicQosOptions::default())
            .await?;
        let mut consumer = self
            .consume_channel
            .basic_consume(
                queue,
                handler.name(),
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await?;

        log::info!("[{}] waiting for messages on {queue}", handler.name());

        while let Some(delivery) = consumer.next().await {
            let delivery = delivery?;
            match worker::process(handler, &delivery.data).await {
                Disposition::Ack => delivery.ack(BasicAckOptions::default()).await?,
                Disposition::Requeue => {
                    delivery
                        .nack(BasicNackOptions {
                            requeue: true,
                            ..BasicNackOptions::default()
                        })
                        .await?
                }
            }
        }

        Err(AppError::ConsumerClosed {
            queue: queue.to_string(),
        })
    }

    pub async fn close(&self) {
        if let Err(e) = self.connection.close(200, "shutdown").await {
            log::debug!("Broker close: {e}");
        }
    }
}

#[async_trait]
impl Publisher for AmqpBroker {
    async fn publish(&self, queue: &str, payload: &[u8]) -> Result<()> {
        let confirmation = self
            .publish_channel
            .basic_publish(
                "",
                queue,
                BasicPublishOptions::default(),
                payload,
                BasicProperties::default().with_delivery_mode(PERSISTENT),
            )
            .await?
            .await?;
        if confirmation.is_nack() {
            return Err(AppError::PublishRejected {
                queue: queue.to_string(),
            });
        }
        Ok(())
    }
}
