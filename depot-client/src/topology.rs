use std::sync::Arc;
use tracing::{debug, info};

use crate::broker::{
    BindingSpec, BrokerChannel, BrokerConnection, ExchangeKind, ExchangeSpec, QueueSpec,
};
use crate::errors::{BrokerError, DepotError, Result};

/// Primary exchange, direct
pub const DEPLOYMENTS_EXCHANGE: &str = "deployments";
/// Primary queue, bound to the primary exchange
pub const DEPLOYMENTS_QUEUE: &str = "deployments";
/// Dead-letter exchange of the primary queue
pub const DEAD_LETTER_EXCHANGE: &str = "deployments.dlx";
/// Receives expired and rejected deployment messages
pub const DEAD_LETTER_QUEUE: &str = "deployments.dlq";
/// Routing key of both bindings
pub const ROUTING_KEY: &str = "deployment";
/// Time a message may wait on the primary queue before it is dead-lettered
pub const MESSAGE_TTL_MS: u32 = 60_000;

/// The exchanges, queues and bindings deployment events travel through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topology {
    pub exchange: ExchangeSpec,
    pub queue: QueueSpec,
    pub dead_letter_exchange: ExchangeSpec,
    pub dead_letter_queue: QueueSpec,
    pub bindings: Vec<BindingSpec>,
}

impl Default for Topology {
    fn default() -> Self {
        Topology::canonical()
    }
}

impl Topology {
    pub fn canonical() -> Self {
        Topology {
            exchange: ExchangeSpec {
                name: DEPLOYMENTS_EXCHANGE.to_string(),
                kind: ExchangeKind::Direct,
                durable: true,
            },
            queue: QueueSpec {
                name: DEPLOYMENTS_QUEUE.to_string(),
                durable: true,
                message_ttl_ms: Some(MESSAGE_TTL_MS),
                dead_letter_exchange: Some(DEAD_LETTER_EXCHANGE.to_string()),
            },
            dead_letter_exchange: ExchangeSpec {
                name: DEAD_LETTER_EXCHANGE.to_string(),
                kind: ExchangeKind::Direct,
                durable: true,
            },
            dead_letter_queue: QueueSpec {
                name: DEAD_LETTER_QUEUE.to_string(),
                durable: true,
                message_ttl_ms: None,
                dead_letter_exchange: None,
            },
            bindings: vec![
                BindingSpec {
                    exchange: DEPLOYMENTS_EXCHANGE.to_string(),
                    queue: DEPLOYMENTS_QUEUE.to_string(),
                    routing_key: ROUTING_KEY.to_string(),
                },
                BindingSpec {
                    exchange: DEAD_LETTER_EXCHANGE.to_string(),
                    queue: DEAD_LETTER_QUEUE.to_string(),
                    routing_key: ROUTING_KEY.to_string(),
                },
            ],
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Entity<'a> {
    Exchange(&'a str),
    Queue(&'a str),
}

impl std::fmt::Display for Entity<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Entity::Exchange(name) => write!(f, "exchange '{}'", name),
            Entity::Queue(name) => write!(f, "queue '{}'", name),
        }
    }
}

/// Converges the broker to the deployment topology.
#[derive(Debug, Clone, Default)]
pub struct TopologyManager {
    topology: Topology,
}

impl TopologyManager {
    pub fn new(topology: Topology) -> Self {
        TopologyManager { topology }
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    /// Deletes the primary exchange and queue, whatever their current
    /// arguments, then declares the whole topology.
    ///
    /// Safe to run on every process start: a missing entity counts as
    /// deleted. Messages waiting on the primary queue are dropped with it,
    /// the dead-letter queue is left untouched.
    pub async fn ensure_topology(&self, connection: &dyn BrokerConnection) -> Result<()> {
        let channel = connection.create_channel().await?;
        let channel = self
            .delete(connection, channel, Entity::Exchange(&self.topology.exchange.name))
            .await?;
        let channel = self
            .delete(connection, channel, Entity::Queue(&self.topology.queue.name))
            .await?;

        self.declare_topology(channel.as_ref()).await?;
        channel.close().await?;

        info!(
            exchange = %self.topology.exchange.name,
            queue = %self.topology.queue.name,
            dead_letter_queue = %self.topology.dead_letter_queue.name,
            "broker topology ensured"
        );
        Ok(())
    }

    /// Declares every entity and binding without deleting anything. Fails
    /// with a topology error if an entity exists with other arguments.
    pub async fn declare_topology(&self, channel: &dyn BrokerChannel) -> Result<()> {
        let topology = &self.topology;

        for exchange in [&topology.exchange, &topology.dead_letter_exchange] {
            channel
                .exchange_declare(exchange)
                .await
                .map_err(|e| DepotError::topology(Entity::Exchange(&exchange.name).to_string(), e))?;
        }

        for queue in [&topology.queue, &topology.dead_letter_queue] {
            channel
                .queue_declare(queue)
                .await
                .map_err(|e| DepotError::topology(Entity::Queue(&queue.name).to_string(), e))?;
        }

        for binding in &topology.bindings {
            channel.queue_bind(binding).await.map_err(|e| {
                DepotError::topology(
                    format!(
                        "binding '{}' -> '{}' ({})",
                        binding.exchange, binding.queue, binding.routing_key
                    ),
                    e,
                )
            })?;
        }

        debug!("broker topology declared");
        Ok(())
    }

    /// Deleting a missing entity closes the channel on the broker side, so a
    /// fresh one is handed back in that case.
    async fn delete(
        &self,
        connection: &dyn BrokerConnection,
        channel: Arc<dyn BrokerChannel>,
        entity: Entity<'_>,
    ) -> Result<Arc<dyn BrokerChannel>> {
        let outcome = match entity {
            Entity::Exchange(name) => channel.exchange_delete(name).await,
            Entity::Queue(name) => channel.queue_delete(name).await,
        };

        match outcome {
            Ok(()) => {
                info!("deleted existing {}", entity);
                Ok(channel)
            }
            Err(BrokerError::NotFound(_)) => {
                debug!("{} does not exist yet", entity);
                Ok(connection.create_channel().await?)
            }
            Err(error) => Err(DepotError::topology(entity.to_string(), error)),
        }
    }
}
