use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

use crate::broker::{
    BindingSpec, BrokerChannel, BrokerConnection, BrokerConnector, Delivery, DeliveryStream,
    ExchangeKind, ExchangeSpec, QueueSpec,
};
use crate::connection_options::ConnectionOptions;
use crate::errors::BrokerError;
use crate::memory_broker::MemoryBroker;

const EXCHANGE: &str = "jobs";
const QUEUE: &str = "jobs";
const DLX: &str = "jobs.dlx";
const DLQ: &str = "jobs.dlq";
const KEY: &str = "job";

fn exchange(name: &str) -> ExchangeSpec {
    ExchangeSpec {
        name: name.to_string(),
        kind: ExchangeKind::Direct,
        durable: true,
    }
}

fn queue(name: &str, dead_letter_exchange: Option<&str>) -> QueueSpec {
    QueueSpec {
        name: name.to_string(),
        durable: true,
        message_ttl_ms: None,
        dead_letter_exchange: dead_letter_exchange.map(str::to_string),
    }
}

fn binding(exchange: &str, queue: &str) -> BindingSpec {
    BindingSpec {
        exchange: exchange.to_string(),
        queue: queue.to_string(),
        routing_key: KEY.to_string(),
    }
}

async fn connect(broker: &MemoryBroker) -> Arc<dyn BrokerConnection> {
    broker
        .connect(&ConnectionOptions::default())
        .await
        .expect("memory broker accepts connections")
}

/// jobs -> jobs (dead-lettering to jobs.dlx -> jobs.dlq)
async fn declare(connection: &Arc<dyn BrokerConnection>) -> Arc<dyn BrokerChannel> {
    let channel = connection.create_channel().await.unwrap();
    channel.exchange_declare(&exchange(EXCHANGE)).await.unwrap();
    channel.exchange_declare(&exchange(DLX)).await.unwrap();
    channel.queue_declare(&queue(QUEUE, Some(DLX))).await.unwrap();
    channel.queue_declare(&queue(DLQ, None)).await.unwrap();
    channel.queue_bind(&binding(EXCHANGE, QUEUE)).await.unwrap();
    channel.queue_bind(&binding(DLX, DLQ)).await.unwrap();
    channel
}

async fn next(deliveries: &mut DeliveryStream) -> Delivery {
    timeout(Duration::from_secs(2), deliveries.next())
        .await
        .expect("delivery in time")
        .expect("stream open")
        .expect("delivery ok")
}

#[tokio::test]
async fn prefetch_one_holds_back_until_ack() {
    let broker = MemoryBroker::new();
    let connection = connect(&broker).await;
    let channel = declare(&connection).await;

    for body in [b"1", b"2", b"3"] {
        channel.basic_publish(EXCHANGE, KEY, body, true).await.unwrap();
    }

    channel.basic_qos(1).await.unwrap();
    let mut deliveries = channel.basic_consume(QUEUE, "test").await.unwrap();

    let first = next(&mut deliveries).await;
    assert_eq!(first.payload, b"1");
    assert!(
        timeout(Duration::from_millis(150), deliveries.next())
            .await
            .is_err(),
        "second delivery must wait for the first ack"
    );
    assert_eq!(broker.unacked_count(QUEUE), 1);

    first.ack().await.unwrap();
    let second = next(&mut deliveries).await;
    assert_eq!(second.payload, b"2");
    second.ack().await.unwrap();
    let third = next(&mut deliveries).await;
    assert_eq!(third.payload, b"3");
    third.ack().await.unwrap();

    assert_eq!(broker.queue_depth(QUEUE), 0);
    assert_eq!(broker.unacked_count(QUEUE), 0);
}

#[tokio::test]
async fn nack_with_requeue_redelivers_at_head() {
    let broker = MemoryBroker::new();
    let connection = connect(&broker).await;
    let channel = declare(&connection).await;
    channel.basic_publish(EXCHANGE, KEY, b"a", true).await.unwrap();
    channel.basic_publish(EXCHANGE, KEY, b"b", true).await.unwrap();

    channel.basic_qos(1).await.unwrap();
    let mut deliveries = channel.basic_consume(QUEUE, "test").await.unwrap();

    let first = next(&mut deliveries).await;
    assert!(!first.redelivered);
    first.nack(true).await.unwrap();

    let again = next(&mut deliveries).await;
    assert_eq!(again.payload, b"a");
    assert!(again.redelivered);
}

#[tokio::test]
async fn nack_without_requeue_dead_letters() {
    let broker = MemoryBroker::new();
    let connection = connect(&broker).await;
    let channel = declare(&connection).await;
    channel.basic_publish(EXCHANGE, KEY, b"poison", true).await.unwrap();

    let mut deliveries = channel.basic_consume(QUEUE, "test").await.unwrap();
    next(&mut deliveries).await.nack(false).await.unwrap();

    assert_eq!(broker.queue_depth(QUEUE), 0);
    assert_eq!(broker.queue_messages(DLQ), vec![b"poison".to_vec()]);
}

#[tokio::test]
async fn closing_the_connection_requeues_unacked_deliveries() {
    let broker = MemoryBroker::new();
    let connection = connect(&broker).await;
    let channel = declare(&connection).await;
    channel.basic_publish(EXCHANGE, KEY, b"x", true).await.unwrap();

    let mut deliveries = channel.basic_consume(QUEUE, "test").await.unwrap();
    let delivery = next(&mut deliveries).await;
    assert_eq!(broker.queue_depth(QUEUE), 0);

    connection.close().await.unwrap();
    assert!(!channel.is_open());
    assert_eq!(broker.queue_depth(QUEUE), 1);
    assert!(matches!(
        delivery.ack().await,
        Err(BrokerError::ChannelClosed(_))
    ));

    let connection = connect(&broker).await;
    let channel = connection.create_channel().await.unwrap();
    let mut deliveries = channel.basic_consume(QUEUE, "test").await.unwrap();
    let redelivered = next(&mut deliveries).await;
    assert_eq!(redelivered.payload, b"x");
    assert!(redelivered.redelivered);
}

#[tokio::test]
async fn inequivalent_declaration_fails_and_closes_the_channel() {
    let broker = MemoryBroker::new();
    let connection = connect(&broker).await;
    let channel = declare(&connection).await;

    let mut with_ttl = queue(QUEUE, Some(DLX));
    with_ttl.message_ttl_ms = Some(1_000);
    let result = channel.queue_declare(&with_ttl).await;

    assert!(matches!(result, Err(BrokerError::PreconditionFailed(_))));
    assert!(!channel.is_open());
    assert!(connection.is_open());
    assert_eq!(broker.queue(QUEUE), Some(queue(QUEUE, Some(DLX))));
}

#[tokio::test]
async fn deleting_a_missing_entity_is_not_found() {
    let broker = MemoryBroker::new();
    let connection = connect(&broker).await;

    let channel = connection.create_channel().await.unwrap();
    assert!(matches!(
        channel.queue_delete("nope").await,
        Err(BrokerError::NotFound(_))
    ));
    assert!(!channel.is_open());
    assert!(matches!(
        channel.exchange_delete("nope").await,
        Err(BrokerError::ChannelClosed(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn expired_messages_move_to_the_dead_letter_queue() {
    let broker = MemoryBroker::new();
    let connection = connect(&broker).await;
    let channel = connection.create_channel().await.unwrap();
    channel.exchange_declare(&exchange(EXCHANGE)).await.unwrap();
    channel.exchange_declare(&exchange(DLX)).await.unwrap();
    let mut short_lived = queue(QUEUE, Some(DLX));
    short_lived.message_ttl_ms = Some(500);
    channel.queue_declare(&short_lived).await.unwrap();
    channel.queue_declare(&queue(DLQ, None)).await.unwrap();
    channel.queue_bind(&binding(EXCHANGE, QUEUE)).await.unwrap();
    channel.queue_bind(&binding(DLX, DLQ)).await.unwrap();

    channel.basic_publish(EXCHANGE, KEY, b"late", true).await.unwrap();

    tokio::time::advance(Duration::from_millis(499)).await;
    assert_eq!(broker.queue_depth(QUEUE), 1);
    assert_eq!(broker.queue_depth(DLQ), 0);

    tokio::time::advance(Duration::from_millis(1)).await;
    assert_eq!(broker.queue_depth(QUEUE), 0);
    assert_eq!(broker.queue_messages(DLQ), vec![b"late".to_vec()]);
}

#[tokio::test]
async fn fault_injection() {
    let broker = MemoryBroker::new();
    broker.refuse_connections(2);
    let options = ConnectionOptions::default();
    assert!(broker.connect(&options).await.is_err());
    assert!(broker.connect(&options).await.is_err());
    let connection = broker.connect(&options).await.unwrap();
    assert_eq!(broker.connect_attempts(), 3);

    let channel = declare(&connection).await;
    broker.fail_publishes(1);
    assert!(matches!(
        channel.basic_publish(EXCHANGE, KEY, b"lost", true).await,
        Err(BrokerError::ConnectionClosed(_))
    ));
    assert!(!connection.is_open());
    assert_eq!(broker.queue_depth(QUEUE), 0);

    broker.set_available(false);
    assert!(matches!(
        broker.connect(&options).await,
        Err(BrokerError::Io(_))
    ));
    broker.set_available(true);
    let connection = broker.connect(&options).await.unwrap();
    broker.restart();
    assert!(!connection.is_open());
    assert_eq!(broker.open_connections(), 0);
    assert!(broker.exchange(EXCHANGE).is_some());
}

#[tokio::test(start_paused = true)]
async fn delayed_settlement_keeps_the_delivery_unacked() {
    let broker = MemoryBroker::new();
    let connection = connect(&broker).await;
    let channel = declare(&connection).await;
    channel.basic_publish(EXCHANGE, KEY, b"slow", true).await.unwrap();
    broker.delay_settlements(Duration::from_secs(1));

    let mut deliveries = channel.basic_consume(QUEUE, "test").await.unwrap();
    let delivery = next(&mut deliveries).await;
    let ack = tokio::spawn(async move { delivery.ack().await });

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(broker.unacked_count(QUEUE), 1);

    ack.await.unwrap().unwrap();
    assert_eq!(broker.unacked_count(QUEUE), 0);
    assert_eq!(broker.queue_depth(QUEUE), 0);
}
