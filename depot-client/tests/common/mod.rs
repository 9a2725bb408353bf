//! Shared helpers for depot-client integration tests
#![allow(dead_code)]

use chrono::{TimeZone, Utc};
use depot_client::{
    ConnectionOptions, ConsumerHealth, ConsumerOptions, ConsumerState, DeploymentConsumer,
    MemoryBroker, ReceivedEvents,
};
use depot_core::{DeploymentRecord, DeploymentStatus, Resources};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Duration, Instant};

/// One connection attempt per connect call, short pauses.
pub fn fast_connection() -> ConnectionOptions {
    ConnectionOptions {
        connection_attempts: 1,
        retry_delay_ms: 10,
        ..ConnectionOptions::default()
    }
}

pub fn fast_consumer() -> ConsumerOptions {
    ConsumerOptions {
        reconnect_delay_ms: 50,
        ..ConsumerOptions::default()
    }
}

pub fn record(id: u64, name: &str) -> DeploymentRecord {
    let at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
    DeploymentRecord {
        id,
        name: name.to_string(),
        cluster_id: 1,
        docker_image: format!("registry.local/{}:1.0", name),
        required: Resources::new(1.0, 2.0, 0.0),
        status: DeploymentStatus::Pending,
        created_at: at,
        updated_at: at,
    }
}

pub struct RunningConsumer {
    pub health: ConsumerHealth,
    pub store: ReceivedEvents,
    pub shutdown: watch::Sender<bool>,
    pub handle: JoinHandle<depot_client::Result<()>>,
}

impl RunningConsumer {
    pub async fn stop(self) -> depot_client::Result<()> {
        let _ = self.shutdown.send(true);
        timeout(Duration::from_secs(5), self.handle)
            .await
            .expect("consumer stops in time")
            .expect("consumer task not panicked")
    }
}

/// Spawns a consumer and waits until it is subscribed.
pub async fn start_consumer(broker: &MemoryBroker) -> RunningConsumer {
    let store = ReceivedEvents::new();
    let mut consumer = DeploymentConsumer::new(
        Arc::new(broker.clone()),
        fast_connection(),
        fast_consumer(),
        store.clone(),
    );
    let health = consumer.health();
    let (shutdown, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(async move { consumer.run(shutdown_rx).await });

    let subscribed = timeout(Duration::from_secs(5), health.wait_for(ConsumerState::Consuming))
        .await
        .expect("consumer subscribes in time");
    assert!(subscribed);

    RunningConsumer {
        health,
        store,
        shutdown,
        handle,
    }
}

/// Polls `condition` until it holds or five seconds passed.
pub async fn eventually(condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        sleep(Duration::from_millis(10)).await;
    }
    condition()
}
