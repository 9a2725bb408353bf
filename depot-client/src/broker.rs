use async_trait::async_trait;
use futures::stream::BoxStream;
use std::fmt::{self, Debug, Formatter};
use std::sync::Arc;

use crate::connection_options::ConnectionOptions;
use crate::errors::BrokerError;

pub type BrokerResult<T> = std::result::Result<T, BrokerError>;

/// Deliveries pushed by the broker for one subscription.
pub type DeliveryStream = BoxStream<'static, BrokerResult<Delivery>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeKind {
    Direct,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeSpec {
    pub name: String,
    pub kind: ExchangeKind,
    pub durable: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueSpec {
    pub name: String,
    pub durable: bool,
    /// `x-message-ttl`
    pub message_ttl_ms: Option<u32>,
    /// `x-dead-letter-exchange`
    pub dead_letter_exchange: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindingSpec {
    pub exchange: String,
    pub queue: String,
    pub routing_key: String,
}

/// Opens connections to a broker.
#[async_trait]
pub trait BrokerConnector: Send + Sync + Debug {
    /// One connection attempt; retries are the caller's business.
    async fn connect(&self, options: &ConnectionOptions) -> BrokerResult<Arc<dyn BrokerConnection>>;
}

#[async_trait]
pub trait BrokerConnection: Send + Sync {
    async fn create_channel(&self) -> BrokerResult<Arc<dyn BrokerChannel>>;

    fn is_open(&self) -> bool;

    async fn close(&self) -> BrokerResult<()>;
}

/// The AMQP channel operations the topology manager, publisher and consumer
/// rely on. A broker-side error on any of them closes the channel.
#[async_trait]
pub trait BrokerChannel: Send + Sync {
    async fn exchange_declare(&self, exchange: &ExchangeSpec) -> BrokerResult<()>;

    async fn exchange_delete(&self, name: &str) -> BrokerResult<()>;

    async fn queue_declare(&self, queue: &QueueSpec) -> BrokerResult<()>;

    async fn queue_delete(&self, name: &str) -> BrokerResult<()>;

    async fn queue_bind(&self, binding: &BindingSpec) -> BrokerResult<()>;

    /// Puts the channel in publisher-confirm mode.
    async fn confirm_select(&self) -> BrokerResult<()>;

    /// Returns once the broker has taken the message (and confirmed it, in
    /// confirm mode).
    async fn basic_publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
        persistent: bool,
    ) -> BrokerResult<()>;

    async fn basic_qos(&self, prefetch_count: u16) -> BrokerResult<()>;

    async fn basic_consume(&self, queue: &str, consumer_tag: &str) -> BrokerResult<DeliveryStream>;

    fn is_open(&self) -> bool;

    async fn close(&self) -> BrokerResult<()>;
}

/// Settles one delivery with the broker.
#[async_trait]
pub trait DeliveryAcker: Send + Sync {
    async fn ack(&self) -> BrokerResult<()>;

    async fn nack(&self, requeue: bool) -> BrokerResult<()>;
}

/// A message handed to a consumer, settled through its own acker.
pub struct Delivery {
    pub delivery_tag: u64,
    pub redelivered: bool,
    pub payload: Vec<u8>,
    acker: Box<dyn DeliveryAcker>,
}

impl Delivery {
    pub fn new(
        delivery_tag: u64,
        redelivered: bool,
        payload: Vec<u8>,
        acker: Box<dyn DeliveryAcker>,
    ) -> Self {
        Delivery {
            delivery_tag,
            redelivered,
            payload,
            acker,
        }
    }

    pub async fn ack(&self) -> BrokerResult<()> {
        self.acker.ack().await
    }

    pub async fn nack(&self, requeue: bool) -> BrokerResult<()> {
        self.acker.nack(requeue).await
    }
}

impl Debug for Delivery {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("delivery_tag", &self.delivery_tag)
            .field("redelivered", &self.redelivered)
            .field("payload_len", &self.payload.len())
            .finish()
    }
}
