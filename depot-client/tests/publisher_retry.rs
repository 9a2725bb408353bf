//! # Publisher Retry Tests
//!
//! Validates the publisher's bounded retry on transport failures against the
//! in-memory broker, on tokio's paused clock.
//!
//! ## Tests:
//! - `three_transport_failures_are_permanent`: every attempt fails, the
//!   caller gets `PermanentPublish` and nothing is queued.
//! - `recovers_after_two_failures`: the third attempt succeeds and the
//!   message is queued exactly once, after two fixed 2 s pauses.
//! - `invalid_record_is_not_retried`: validation fails before connecting.
//! - `topology_conflict_is_not_retried`
//! - `reconnects_after_broker_restart`

mod common;

use anyhow::Result;
use common::{fast_connection, record};
use depot_client::topology::{DEPLOYMENTS_QUEUE, ROUTING_KEY, DEPLOYMENTS_EXCHANGE};
use depot_client::{
    BrokerConnection, BrokerConnector, DepotError, MemoryBroker, Publisher, PublisherOptions,
    QueueSpec,
};
use depot_core::DeploymentMessage;
use std::sync::Arc;
use tokio::time::{Duration, Instant};

fn publisher(broker: &MemoryBroker) -> Publisher {
    Publisher::new(
        Arc::new(broker.clone()),
        fast_connection(),
        PublisherOptions::default(),
    )
}

#[tokio::test(start_paused = true)]
async fn three_transport_failures_are_permanent() -> Result<()> {
    let broker = MemoryBroker::new();
    let mut publisher = publisher(&broker);
    broker.fail_publishes(3);

    let err = publisher.publish(&record(1, "api")).await.unwrap_err();

    match err {
        DepotError::PermanentPublish {
            attempts,
            last_error,
        } => {
            assert_eq!(attempts, 3);
            assert!(last_error.is_retryable());
        }
        other => panic!("expected PermanentPublish, got {other:?}"),
    }
    assert_eq!(broker.queue_depth(DEPLOYMENTS_QUEUE), 0);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn recovers_after_two_failures() -> Result<()> {
    let broker = MemoryBroker::new();
    let mut publisher = publisher(&broker);
    broker.fail_publishes(2);

    let started = Instant::now();
    publisher.publish(&record(1, "api")).await?;
    let elapsed = started.elapsed();

    assert!(elapsed >= Duration::from_secs(4), "elapsed {elapsed:?}");
    assert!(elapsed < Duration::from_secs(5), "elapsed {elapsed:?}");

    let queued = broker.queue_messages(DEPLOYMENTS_QUEUE);
    assert_eq!(queued.len(), 1);
    let message = DeploymentMessage::decode(&queued[0])?;
    assert_eq!(message, DeploymentMessage::from(&record(1, "api")));
    assert!(publisher.is_connected());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn invalid_record_is_not_retried() -> Result<()> {
    let broker = MemoryBroker::new();
    let mut publisher = publisher(&broker);

    let mut invalid = record(1, "api");
    invalid.required.cpu = -1.0;
    let err = publisher.publish(&invalid).await.unwrap_err();

    assert!(matches!(err, DepotError::Validation(_)), "got {err:?}");
    assert_eq!(broker.connect_attempts(), 0);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn topology_conflict_is_not_retried() -> Result<()> {
    let broker = MemoryBroker::new();
    let connection = broker.connect(&fast_connection()).await?;
    let channel = connection.create_channel().await?;
    channel
        .queue_declare(&QueueSpec {
            name: DEPLOYMENTS_QUEUE.to_string(),
            durable: true,
            message_ttl_ms: None,
            dead_letter_exchange: None,
        })
        .await?;

    let mut publisher = publisher(&broker);
    let err = publisher.publish(&record(1, "api")).await.unwrap_err();

    assert!(matches!(err, DepotError::Topology { .. }), "got {err:?}");
    assert_eq!(broker.connect_attempts(), 2);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn reconnects_after_broker_restart() -> Result<()> {
    let broker = MemoryBroker::new();
    let mut publisher = publisher(&broker);
    publisher.open().await?;
    assert!(publisher.is_connected());

    broker.restart();
    assert!(!publisher.is_connected());

    publisher.publish(&record(2, "worker")).await?;
    assert_eq!(broker.queue_depth(DEPLOYMENTS_QUEUE), 1);

    broker.publish(DEPLOYMENTS_EXCHANGE, ROUTING_KEY, b"raw")?;
    assert_eq!(broker.queue_depth(DEPLOYMENTS_QUEUE), 2);

    publisher.close().await?;
    assert_eq!(broker.open_connections(), 0);
    Ok(())
}
