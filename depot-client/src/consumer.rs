use depot_core::DeploymentMessage;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::broker::{BrokerChannel, BrokerConnection, BrokerConnector, Delivery, DeliveryStream};
use crate::client_metrics::{
    BROKER_CONNECTED, CONSUMED_MESSAGES_TOTAL, DEAD_LETTERED_MESSAGES_TOTAL, RECONNECTS_TOTAL,
};
use crate::connection_manager::ConnectionManager;
use crate::connection_options::ConnectionOptions;
use crate::errors::{BrokerError, DepotError, Result};
use crate::event_store::ReceivedEvents;
use crate::topology::{TopologyManager, DEPLOYMENTS_QUEUE};

/// Lifecycle of a [`DeploymentConsumer`].
///
/// `Disconnected -> Connecting -> Consuming`, back to `Disconnected` on any
/// transport failure, and `Stopped` once shutdown was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsumerState {
    Disconnected,
    Connecting,
    Consuming,
    Stopped,
}

impl Display for ConsumerState {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let state = match self {
            ConsumerState::Disconnected => "disconnected",
            ConsumerState::Connecting => "connecting",
            ConsumerState::Consuming => "consuming",
            ConsumerState::Stopped => "stopped",
        };
        f.write_str(state)
    }
}

/// Configuration options for the consumer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsumerOptions {
    /// Unacknowledged deliveries allowed in flight
    pub prefetch: u16,
    /// Setup attempts before the consumer reports a fatal startup failure
    pub startup_attempts: usize,
    /// Pause before reconnecting after the connection was lost, in milliseconds
    pub reconnect_delay_ms: u64,
    pub consumer_tag: String,
}

impl Default for ConsumerOptions {
    fn default() -> Self {
        ConsumerOptions {
            prefetch: 1,
            startup_attempts: 5,
            reconnect_delay_ms: 2_000,
            consumer_tag: "depot-consumer".to_string(),
        }
    }
}

impl ConsumerOptions {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

/// Read-only view of a running consumer, for health probes.
#[derive(Debug, Clone)]
pub struct ConsumerHealth {
    state: watch::Receiver<ConsumerState>,
}

impl ConsumerHealth {
    pub fn state(&self) -> ConsumerState {
        *self.state.borrow()
    }

    /// True while the consumer holds an open subscription.
    pub fn is_connected(&self) -> bool {
        self.state() == ConsumerState::Consuming
    }

    /// Waits until the consumer enters `state`. Returns false if the
    /// consumer was dropped first.
    pub async fn wait_for(&self, state: ConsumerState) -> bool {
        let mut receiver = self.state.clone();
        let reached = receiver.wait_for(|current| *current == state).await.is_ok();
        reached
    }
}

enum Setup {
    /// First connection of the process: reset the topology
    Reset,
    /// Reconnect: declare only, keep what is queued
    Declare,
}

enum Interrupted {
    Shutdown,
    Disconnected(DepotError),
}

/// Long-lived subscription to the `deployments` queue.
///
/// Messages are handled one at a time: a valid body is stored in
/// [`ReceivedEvents`] and then acknowledged, anything else is rejected
/// without requeue so the broker dead-letters it.
pub struct DeploymentConsumer {
    cnx_manager: ConnectionManager,
    topology: TopologyManager,
    options: ConsumerOptions,
    store: ReceivedEvents,
    state: watch::Sender<ConsumerState>,
    connection: Option<Arc<dyn BrokerConnection>>,
    channel: Option<Arc<dyn BrokerChannel>>,
}

impl DeploymentConsumer {
    pub fn new(
        connector: Arc<dyn BrokerConnector>,
        connection_options: ConnectionOptions,
        options: ConsumerOptions,
        store: ReceivedEvents,
    ) -> Self {
        let (state, _) = watch::channel(ConsumerState::Disconnected);
        DeploymentConsumer {
            cnx_manager: ConnectionManager::new(connector, connection_options),
            topology: TopologyManager::default(),
            options,
            store,
            state,
            connection: None,
            channel: None,
        }
    }

    pub fn health(&self) -> ConsumerHealth {
        ConsumerHealth {
            state: self.state.subscribe(),
        }
    }

    pub fn store(&self) -> &ReceivedEvents {
        &self.store
    }

    pub fn state(&self) -> ConsumerState {
        *self.state.borrow()
    }

    /// Consumes until `shutdown` turns true.
    ///
    /// Fails only when the first connection cannot be set up within
    /// `startup_attempts` attempts, or at once on a topology error. Once
    /// consuming, lost connections are re-established indefinitely.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let Some(mut deliveries) = self.startup(&mut shutdown).await? else {
            self.stop().await;
            return Ok(());
        };

        loop {
            match self.consume(&mut deliveries, &mut shutdown).await {
                Interrupted::Shutdown => break,
                Interrupted::Disconnected(e) => {
                    warn!(error = %e, "consumer lost its broker connection");
                    self.set_state(ConsumerState::Disconnected);
                    metrics::counter!(RECONNECTS_TOTAL.name).increment(1);
                    match self.reconnect(&mut shutdown).await {
                        Some(stream) => deliveries = stream,
                        None => break,
                    }
                }
            }
        }

        self.stop().await;
        Ok(())
    }

    async fn startup(
        &mut self,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<Option<DeliveryStream>> {
        let attempts = self.options.startup_attempts.max(1);
        let pause = self.cnx_manager.connection_options().retry_delay();

        for attempt in 1..=attempts {
            if *shutdown.borrow() {
                return Ok(None);
            }
            match self.subscribe(Setup::Reset).await {
                Ok(deliveries) => return Ok(Some(deliveries)),
                Err(e) if !e.is_retryable() => {
                    error!(error = %e, "consumer setup failed");
                    self.teardown().await;
                    self.set_state(ConsumerState::Disconnected);
                    return Err(e);
                }
                Err(e) if attempt == attempts => {
                    error!(attempts, error = %e, "consumer could not start");
                    self.teardown().await;
                    self.set_state(ConsumerState::Disconnected);
                    return Err(DepotError::StartupFailed {
                        attempts,
                        last_error: Box::new(e),
                    });
                }
                Err(e) => {
                    warn!(attempt, attempts, error = %e, "consumer setup failed, retrying");
                    self.teardown().await;
                    self.set_state(ConsumerState::Disconnected);
                    if !pause_unless_shutdown(pause, shutdown).await {
                        return Ok(None);
                    }
                }
            }
        }
        Ok(None)
    }

    async fn reconnect(&mut self, shutdown: &mut watch::Receiver<bool>) -> Option<DeliveryStream> {
        loop {
            self.teardown().await;
            if !pause_unless_shutdown(self.options.reconnect_delay(), shutdown).await {
                return None;
            }
            match self.subscribe(Setup::Declare).await {
                Ok(deliveries) => {
                    info!("consumer reconnected");
                    return Some(deliveries);
                }
                Err(e) => {
                    warn!(error = %e, "consumer reconnect failed, retrying");
                    self.set_state(ConsumerState::Disconnected);
                }
            }
        }
    }

    /// Connects, sets up the topology, applies the prefetch limit and
    /// registers the subscription.
    async fn subscribe(&mut self, setup: Setup) -> Result<DeliveryStream> {
        self.set_state(ConsumerState::Connecting);

        let connection = self.cnx_manager.connect().await?;
        self.connection = Some(Arc::clone(&connection));

        match setup {
            Setup::Reset => self.topology.ensure_topology(connection.as_ref()).await?,
            Setup::Declare => {
                let channel = connection.create_channel().await?;
                self.topology.declare_topology(channel.as_ref()).await?;
                channel.close().await?;
            }
        }

        let channel = connection.create_channel().await?;
        self.channel = Some(Arc::clone(&channel));
        channel.basic_qos(self.options.prefetch).await?;
        let deliveries = channel
            .basic_consume(DEPLOYMENTS_QUEUE, &self.options.consumer_tag)
            .await?;

        self.set_state(ConsumerState::Consuming);
        info!(
            queue = DEPLOYMENTS_QUEUE,
            prefetch = self.options.prefetch,
            "consumer subscribed"
        );
        Ok(deliveries)
    }

    /// Handles deliveries until the stream fails or shutdown is requested.
    /// Shutdown is only observed between messages.
    async fn consume(
        &mut self,
        deliveries: &mut DeliveryStream,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Interrupted {
        loop {
            let next = tokio::select! {
                biased;
                _ = shutdown_requested(shutdown) => return Interrupted::Shutdown,
                next = deliveries.next() => next,
            };

            match next {
                Some(Ok(delivery)) => {
                    if let Err(e) = self.handle(delivery).await {
                        return Interrupted::Disconnected(e);
                    }
                }
                Some(Err(e)) => return Interrupted::Disconnected(e.into()),
                None => {
                    return Interrupted::Disconnected(DepotError::Transport(
                        BrokerError::ChannelClosed("delivery stream ended".to_string()),
                    ))
                }
            }
        }
    }

    async fn handle(&self, delivery: Delivery) -> Result<()> {
        if delivery.redelivered {
            info!(delivery_tag = delivery.delivery_tag, "processing redelivered message");
        }

        match DeploymentMessage::decode(&delivery.payload) {
            Ok(message) => {
                let deployment_id = message.id;
                let outcome = self.store.upsert(deployment_id, message);
                delivery.ack().await?;
                metrics::counter!(CONSUMED_MESSAGES_TOTAL.name).increment(1);
                info!(deployment_id, outcome = ?outcome, "deployment event received");
            }
            Err(e) => {
                warn!(
                    delivery_tag = delivery.delivery_tag,
                    error = %e,
                    "rejecting malformed deployment message"
                );
                delivery.nack(false).await?;
                metrics::counter!(DEAD_LETTERED_MESSAGES_TOTAL.name).increment(1);
            }
        }
        Ok(())
    }

    async fn teardown(&mut self) {
        if let Some(channel) = self.channel.take() {
            if let Err(e) = channel.close().await {
                debug!(error = %e, "closing consumer channel");
            }
        }
        if let Some(connection) = self.connection.take() {
            if let Err(e) = connection.close().await {
                debug!(error = %e, "closing consumer connection");
            }
        }
    }

    async fn stop(&mut self) {
        self.teardown().await;
        self.set_state(ConsumerState::Stopped);
        info!("consumer stopped");
    }

    fn set_state(&self, state: ConsumerState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!(from = %previous, to = %state, "consumer state changed");
        }
        let connected = if state == ConsumerState::Consuming { 1.0 } else { 0.0 };
        metrics::gauge!(BROKER_CONNECTED.name).set(connected);
    }
}

impl fmt::Debug for DeploymentConsumer {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeploymentConsumer")
            .field("options", &self.options)
            .field("state", &self.state())
            .finish()
    }
}

/// Resolves once shutdown is requested. Never resolves if the sender is gone.
async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    let requested = shutdown.wait_for(|stop| *stop).await.is_ok();
    if !requested {
        std::future::pending::<()>().await;
    }
}

/// Sleeps for `pause`; false if shutdown was requested meanwhile.
async fn pause_unless_shutdown(pause: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = shutdown_requested(shutdown) => false,
        _ = tokio::time::sleep(pause) => true,
    }
}
