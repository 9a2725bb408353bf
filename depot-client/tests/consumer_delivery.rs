//! # Consumer Delivery Tests
//!
//! Validates per-message handling of `DeploymentConsumer` against the
//! in-memory broker.
//!
//! ## Tests:
//! - `consumes_in_publish_order`: ids [1,2,3] are received as [1,2,3].
//! - `duplicate_delivery_is_idempotent`: the same event twice leaves one
//!   entry, equal to a single delivery.
//! - `malformed_message_is_dead_lettered`: an unparseable body is rejected,
//!   never stored, and lands on the dead-letter queue.
//! - `invalid_message_is_dead_lettered`: parseable but negative resources.
//! - `unconsumed_message_expires_to_dead_letter_queue`: the 60 s TTL.

mod common;

use anyhow::Result;
use common::{eventually, fast_connection, record, start_consumer};
use depot_client::topology::{
    DEAD_LETTER_QUEUE, DEPLOYMENTS_EXCHANGE, DEPLOYMENTS_QUEUE, ROUTING_KEY,
};
use depot_client::{
    ConnectionManager, MemoryBroker, Publisher, PublisherOptions, TopologyManager,
};
use depot_core::DeploymentMessage;
use serde_json::json;
use std::sync::Arc;
use tokio::time::Duration;

fn publisher(broker: &MemoryBroker) -> Publisher {
    Publisher::new(
        Arc::new(broker.clone()),
        fast_connection(),
        PublisherOptions::default(),
    )
}

#[tokio::test]
async fn consumes_in_publish_order() -> Result<()> {
    let broker = MemoryBroker::new();
    let consumer = start_consumer(&broker).await;
    let mut publisher = publisher(&broker);

    for (id, name) in [(1, "api"), (2, "worker"), (3, "cron")] {
        publisher.publish(&record(id, name)).await?;
    }

    let store = consumer.store.clone();
    assert!(eventually(|| store.len() == 3).await);
    let ids: Vec<u64> = store.list().iter().map(|m| m.id).collect();
    assert_eq!(ids, vec![1, 2, 3]);

    assert!(eventually(|| broker.unacked_count(DEPLOYMENTS_QUEUE) == 0).await);
    assert_eq!(broker.queue_depth(DEPLOYMENTS_QUEUE), 0);

    consumer.stop().await?;
    Ok(())
}

#[tokio::test]
async fn duplicate_delivery_is_idempotent() -> Result<()> {
    let broker = MemoryBroker::new();
    let consumer = start_consumer(&broker).await;
    let mut publisher = publisher(&broker);

    let deployment = record(7, "api");
    publisher.publish(&deployment).await?;
    publisher.publish(&deployment).await?;

    assert!(
        eventually(|| {
            broker.queue_depth(DEPLOYMENTS_QUEUE) == 0
                && broker.unacked_count(DEPLOYMENTS_QUEUE) == 0
        })
        .await
    );

    let store = &consumer.store;
    assert_eq!(store.len(), 1);
    assert_eq!(store.get(7), Some(DeploymentMessage::from(&deployment)));

    consumer.stop().await?;
    Ok(())
}

#[tokio::test]
async fn malformed_message_is_dead_lettered() -> Result<()> {
    let broker = MemoryBroker::new();
    let consumer = start_consumer(&broker).await;

    broker.publish(DEPLOYMENTS_EXCHANGE, ROUTING_KEY, b"{not json")?;
    let valid = DeploymentMessage::from(&record(2, "worker")).encode()?;
    broker.publish(DEPLOYMENTS_EXCHANGE, ROUTING_KEY, &valid)?;

    let store = consumer.store.clone();
    assert!(eventually(|| store.len() == 1).await);
    assert!(eventually(|| broker.queue_depth(DEAD_LETTER_QUEUE) == 1).await);

    assert_eq!(
        broker.queue_messages(DEAD_LETTER_QUEUE),
        vec![b"{not json".to_vec()]
    );
    assert!(store.get(2).is_some());
    assert_eq!(broker.queue_depth(DEPLOYMENTS_QUEUE), 0);

    consumer.stop().await?;
    Ok(())
}

#[tokio::test]
async fn invalid_message_is_dead_lettered() -> Result<()> {
    let broker = MemoryBroker::new();
    let consumer = start_consumer(&broker).await;

    let body = serde_json::to_vec(&json!({
        "id": 9,
        "name": "gpu-job",
        "cluster": 1,
        "docker_image": "trainer:2",
        "required_cpu": 1.0,
        "required_ram": 4.0,
        "required_gpu": -1.0,
        "status": "pending",
        "created_at": "2024-05-01T12:00:00Z",
        "updated_at": "2024-05-01T12:00:00Z"
    }))?;
    broker.publish(DEPLOYMENTS_EXCHANGE, ROUTING_KEY, &body)?;

    assert!(eventually(|| broker.queue_depth(DEAD_LETTER_QUEUE) == 1).await);
    assert!(consumer.store.get(9).is_none());

    consumer.stop().await?;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn unconsumed_message_expires_to_dead_letter_queue() -> Result<()> {
    let broker = MemoryBroker::new();
    let connection = ConnectionManager::new(Arc::new(broker.clone()), fast_connection())
        .connect()
        .await?;
    TopologyManager::default()
        .ensure_topology(connection.as_ref())
        .await?;

    let mut publisher = publisher(&broker);
    publisher.publish(&record(4, "batch")).await?;

    tokio::time::advance(Duration::from_secs(59)).await;
    assert_eq!(broker.queue_depth(DEPLOYMENTS_QUEUE), 1);
    assert_eq!(broker.queue_depth(DEAD_LETTER_QUEUE), 0);

    tokio::time::advance(Duration::from_secs(1)).await;
    assert_eq!(broker.queue_depth(DEPLOYMENTS_QUEUE), 0);

    let dead = broker.queue_messages(DEAD_LETTER_QUEUE);
    assert_eq!(dead.len(), 1);
    assert_eq!(DeploymentMessage::decode(&dead[0])?.id, 4);
    Ok(())
}
