use async_trait::async_trait;
use futures::StreamExt;
use lapin::{
    message::Delivery as AmqpDelivery,
    options::{
        BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions,
        BasicQosOptions, ConfirmSelectOptions, ExchangeDeclareOptions, ExchangeDeleteOptions,
        QueueBindOptions, QueueDeclareOptions, QueueDeleteOptions,
    },
    protocol::{AMQPErrorKind, AMQPSoftError},
    types::{AMQPValue, FieldTable},
    BasicProperties, Channel, Connection, ConnectionProperties,
};
use std::sync::Arc;
use tracing::info;

use crate::broker::{
    BindingSpec, BrokerChannel, BrokerConnection, BrokerConnector, BrokerResult, Delivery,
    DeliveryAcker, DeliveryStream, ExchangeKind, ExchangeSpec, QueueSpec,
};
use crate::connection_options::ConnectionOptions;
use crate::errors::BrokerError;

const PERSISTENT_DELIVERY_MODE: u8 = 2;
const TRANSIENT_DELIVERY_MODE: u8 = 1;
const REPLY_SUCCESS: u16 = 200;

/// RabbitMQ over AMQP 0-9-1.
#[derive(Debug, Clone, Default)]
pub struct AmqpConnector;

impl AmqpConnector {
    pub fn new() -> Self {
        AmqpConnector
    }
}

#[async_trait]
impl BrokerConnector for AmqpConnector {
    async fn connect(&self, options: &ConnectionOptions) -> BrokerResult<Arc<dyn BrokerConnection>> {
        info!("Establishing new AMQP connection to {}", options.display_uri());
        let connection = Connection::connect_uri(options.amqp_uri(), ConnectionProperties::default())
            .await
            .map_err(broker_error)?;
        Ok(Arc::new(AmqpConnection { connection }))
    }
}

struct AmqpConnection {
    connection: Connection,
}

#[async_trait]
impl BrokerConnection for AmqpConnection {
    async fn create_channel(&self) -> BrokerResult<Arc<dyn BrokerChannel>> {
        let channel = self.connection.create_channel().await.map_err(broker_error)?;
        Ok(Arc::new(AmqpChannel { channel }))
    }

    fn is_open(&self) -> bool {
        self.connection.status().connected()
    }

    async fn close(&self) -> BrokerResult<()> {
        if !self.is_open() {
            return Ok(());
        }
        self.connection
            .close(REPLY_SUCCESS, "closing")
            .await
            .map_err(broker_error)
    }
}

struct AmqpChannel {
    channel: Channel,
}

#[async_trait]
impl BrokerChannel for AmqpChannel {
    async fn exchange_declare(&self, exchange: &ExchangeSpec) -> BrokerResult<()> {
        let kind = match exchange.kind {
            ExchangeKind::Direct => lapin::ExchangeKind::Direct,
        };
        self.channel
            .exchange_declare(
                &exchange.name,
                kind,
                ExchangeDeclareOptions {
                    durable: exchange.durable,
                    ..ExchangeDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(broker_error)
    }

    async fn exchange_delete(&self, name: &str) -> BrokerResult<()> {
        self.channel
            .exchange_delete(name, ExchangeDeleteOptions::default())
            .await
            .map_err(broker_error)
    }

    async fn queue_declare(&self, queue: &QueueSpec) -> BrokerResult<()> {
        self.channel
            .queue_declare(
                &queue.name,
                QueueDeclareOptions {
                    durable: queue.durable,
                    ..QueueDeclareOptions::default()
                },
                queue_arguments(queue),
            )
            .await
            .map(|_| ())
            .map_err(broker_error)
    }

    async fn queue_delete(&self, name: &str) -> BrokerResult<()> {
        self.channel
            .queue_delete(name, QueueDeleteOptions::default())
            .await
            .map(|_| ())
            .map_err(broker_error)
    }

    async fn queue_bind(&self, binding: &BindingSpec) -> BrokerResult<()> {
        self.channel
            .queue_bind(
                &binding.queue,
                &binding.exchange,
                &binding.routing_key,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(broker_error)
    }

    async fn confirm_select(&self) -> BrokerResult<()> {
        self.channel
            .confirm_select(ConfirmSelectOptions::default())
            .await
            .map_err(broker_error)
    }

    async fn basic_publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
        persistent: bool,
    ) -> BrokerResult<()> {
        let delivery_mode = if persistent {
            PERSISTENT_DELIVERY_MODE
        } else {
            TRANSIENT_DELIVERY_MODE
        };
        let properties = BasicProperties::default()
            .with_delivery_mode(delivery_mode)
            .with_content_type("application/json".into());

        let confirmation = self
            .channel
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions::default(),
                payload,
                properties,
            )
            .await
            .map_err(broker_error)?
            .await
            .map_err(broker_error)?;

        if confirmation.is_nack() {
            return Err(BrokerError::ChannelClosed(
                "broker negatively confirmed the publish".to_string(),
            ));
        }
        Ok(())
    }

    async fn basic_qos(&self, prefetch_count: u16) -> BrokerResult<()> {
        self.channel
            .basic_qos(prefetch_count, BasicQosOptions::default())
            .await
            .map_err(broker_error)
    }

    async fn basic_consume(&self, queue: &str, consumer_tag: &str) -> BrokerResult<DeliveryStream> {
        let consumer = self
            .channel
            .basic_consume(
                queue,
                consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(broker_error)?;

        let deliveries = consumer.map(|item| item.map(into_delivery).map_err(broker_error));
        Ok(deliveries.boxed())
    }

    fn is_open(&self) -> bool {
        self.channel.status().connected()
    }

    async fn close(&self) -> BrokerResult<()> {
        if !self.is_open() {
            return Ok(());
        }
        self.channel
            .close(REPLY_SUCCESS, "closing")
            .await
            .map_err(broker_error)
    }
}

struct AmqpAcker {
    delivery: AmqpDelivery,
}

#[async_trait]
impl DeliveryAcker for AmqpAcker {
    async fn ack(&self) -> BrokerResult<()> {
        self.delivery
            .acker
            .ack(BasicAckOptions::default())
            .await
            .map(|_| ())
            .map_err(broker_error)
    }

    async fn nack(&self, requeue: bool) -> BrokerResult<()> {
        self.delivery
            .acker
            .nack(BasicNackOptions {
                requeue,
                ..BasicNackOptions::default()
            })
            .await
            .map(|_| ())
            .map_err(broker_error)
    }
}

fn into_delivery(mut delivery: AmqpDelivery) -> Delivery {
    let payload = std::mem::take(&mut delivery.data);
    Delivery::new(
        delivery.delivery_tag,
        delivery.redelivered,
        payload,
        Box::new(AmqpAcker { delivery }),
    )
}

fn queue_arguments(queue: &QueueSpec) -> FieldTable {
    let mut arguments = FieldTable::default();
    if let Some(ttl) = queue.message_ttl_ms {
        let ttl = i32::try_from(ttl).unwrap_or(i32::MAX);
        arguments.insert("x-message-ttl".into(), AMQPValue::LongInt(ttl));
    }
    if let Some(dlx) = &queue.dead_letter_exchange {
        arguments.insert(
            "x-dead-letter-exchange".into(),
            AMQPValue::LongString(dlx.as_str().into()),
        );
    }
    arguments
}

fn broker_error(error: lapin::Error) -> BrokerError {
    match error {
        lapin::Error::ProtocolError(amqp_error) => {
            let message = amqp_error.to_string();
            match amqp_error.kind() {
                AMQPErrorKind::Soft(AMQPSoftError::NOTFOUND) => BrokerError::NotFound(message),
                AMQPErrorKind::Soft(AMQPSoftError::PRECONDITIONFAILED) => {
                    BrokerError::PreconditionFailed(message)
                }
                AMQPErrorKind::Soft(AMQPSoftError::ACCESSREFUSED) => {
                    BrokerError::AccessRefused(message)
                }
                AMQPErrorKind::Soft(_) => BrokerError::ChannelClosed(message),
                AMQPErrorKind::Hard(_) => BrokerError::ConnectionClosed(message),
            }
        }
        lapin::Error::IOError(io_error) => BrokerError::Io(io_error.to_string()),
        lapin::Error::InvalidChannelState(state) => {
            BrokerError::ChannelClosed(format!("channel in state {:?}", state))
        }
        other => BrokerError::ConnectionClosed(other.to_string()),
    }
}
