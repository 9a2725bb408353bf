//! Depot-Client
//!
//! Depot-Client -- moves deployment events from the control plane to the
//! consumer over a durable AMQP broker

pub mod errors;
pub use errors::{BrokerError, DepotError, Result};

pub mod broker;
pub use broker::{
    BindingSpec, BrokerChannel, BrokerConnection, BrokerConnector, Delivery, DeliveryStream,
    ExchangeKind, ExchangeSpec, QueueSpec,
};

mod amqp;
pub use amqp::AmqpConnector;

mod memory_broker;
pub use memory_broker::MemoryBroker;

mod connection_options;
pub use connection_options::ConnectionOptions;

mod connection_manager;
pub use connection_manager::ConnectionManager;

mod retry_manager;
pub use retry_manager::RetryManager;

pub mod topology;
pub use topology::{Topology, TopologyManager};

mod publisher;
pub use publisher::{Publisher, PublisherOptions};

mod consumer;
pub use consumer::{ConsumerHealth, ConsumerOptions, ConsumerState, DeploymentConsumer};

mod event_store;
pub use event_store::{ReceivedEvents, UpsertOutcome};

pub mod client_metrics;

#[cfg(test)]
mod memory_broker_tests;
