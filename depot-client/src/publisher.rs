use depot_core::{DeploymentMessage, DeploymentRecord};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::broker::{BrokerChannel, BrokerConnection, BrokerConnector};
use crate::client_metrics::{PUBLISHED_MESSAGES_TOTAL, PUBLISH_FAILURES_TOTAL, PUBLISH_RETRIES_TOTAL};
use crate::connection_manager::ConnectionManager;
use crate::connection_options::ConnectionOptions;
use crate::errors::{BrokerError, DepotError, Result};
use crate::retry_manager::RetryManager;
use crate::topology::{TopologyManager, DEPLOYMENTS_EXCHANGE, ROUTING_KEY};

/// Configuration options for the publisher
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PublisherOptions {
    /// Attempts per `publish` call, the first one included
    pub max_attempts: usize,
    /// Fixed pause between two attempts, in milliseconds
    pub retry_delay_ms: u64,
    /// Publish with delivery mode 2 so messages survive a broker restart
    pub persistent: bool,
    /// Wait for the broker to confirm every publish
    pub confirms: bool,
}

impl Default for PublisherOptions {
    fn default() -> Self {
        PublisherOptions {
            max_attempts: 3,
            retry_delay_ms: 2_000,
            persistent: true,
            confirms: true,
        }
    }
}

impl PublisherOptions {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

/// Publishes deployment events to the `deployments` exchange.
///
/// The publisher owns one connection and one channel at a time. Every
/// `publish` goes through [`Publisher::ensure_connection`], which replaces a
/// closed connection and redeclares the topology, so a broker restart heals
/// on the next call.
///
/// Transport failures are retried up to `max_attempts` times with a fixed
/// pause; anything else is returned at once.
pub struct Publisher {
    cnx_manager: ConnectionManager,
    topology: TopologyManager,
    retry_manager: RetryManager,
    options: PublisherOptions,
    connection: Option<Arc<dyn BrokerConnection>>,
    channel: Option<Arc<dyn BrokerChannel>>,
}

impl Publisher {
    /// Creates a publisher that is not connected yet.
    pub fn new(
        connector: Arc<dyn BrokerConnector>,
        connection_options: ConnectionOptions,
        options: PublisherOptions,
    ) -> Self {
        Publisher {
            cnx_manager: ConnectionManager::new(connector, connection_options),
            topology: TopologyManager::default(),
            retry_manager: RetryManager::new(options.max_attempts, options.retry_delay()),
            options,
            connection: None,
            channel: None,
        }
    }

    /// Connects and declares the topology.
    pub async fn open(&mut self) -> Result<()> {
        self.ensure_connection().await
    }

    pub fn is_connected(&self) -> bool {
        let connection_open = self
            .connection
            .as_ref()
            .is_some_and(|connection| connection.is_open());
        let channel_open = self.channel.as_ref().is_some_and(|channel| channel.is_open());
        connection_open && channel_open
    }

    /// No-op while the connection and channel are open. Otherwise drops the
    /// stale handles, opens a fresh connection and channel and declares the
    /// topology on it.
    pub async fn ensure_connection(&mut self) -> Result<()> {
        if self.is_connected() {
            return Ok(());
        }
        self.teardown().await;

        let connection = self.cnx_manager.connect().await?;
        let channel = connection.create_channel().await?;
        if self.options.confirms {
            channel.confirm_select().await?;
        }
        self.topology.declare_topology(channel.as_ref()).await?;

        debug!("publisher connected");
        self.connection = Some(connection);
        self.channel = Some(channel);
        Ok(())
    }

    /// Publishes a snapshot of `record`.
    ///
    /// Returns [`DepotError::PermanentPublish`] once every attempt failed on
    /// transport errors. Validation, serialization and topology failures are
    /// returned without retrying.
    pub async fn publish(&mut self, record: &DeploymentRecord) -> Result<()> {
        record.validate()?;
        let payload = DeploymentMessage::from(record).encode()?;

        let mut attempt = 1;
        loop {
            match self.try_publish(&payload).await {
                Ok(()) => {
                    metrics::counter!(PUBLISHED_MESSAGES_TOTAL.name).increment(1);
                    info!(deployment_id = record.id, attempt, "deployment event published");
                    return Ok(());
                }
                Err(e) if self.retry_manager.should_retry(attempt, &e) => {
                    metrics::counter!(PUBLISH_RETRIES_TOTAL.name).increment(1);
                    warn!(
                        deployment_id = record.id,
                        attempt,
                        error = %e,
                        "publish attempt failed, reconnecting before retry"
                    );
                    self.teardown().await;
                    tokio::time::sleep(self.retry_manager.backoff(attempt)).await;
                    attempt += 1;
                }
                Err(e) if self.retry_manager.is_retryable_error(&e) => {
                    metrics::counter!(PUBLISH_FAILURES_TOTAL.name).increment(1);
                    error!(
                        deployment_id = record.id,
                        attempts = attempt,
                        error = %e,
                        "publish failed permanently"
                    );
                    self.teardown().await;
                    return Err(DepotError::PermanentPublish {
                        attempts: attempt,
                        last_error: Box::new(e),
                    });
                }
                Err(e) => {
                    metrics::counter!(PUBLISH_FAILURES_TOTAL.name).increment(1);
                    error!(deployment_id = record.id, error = %e, "publish rejected");
                    return Err(e);
                }
            }
        }
    }

    async fn try_publish(&mut self, payload: &[u8]) -> Result<()> {
        self.ensure_connection().await?;
        let channel = self.channel.clone().ok_or_else(|| {
            DepotError::Transport(BrokerError::ChannelClosed(
                "publisher channel is not open".to_string(),
            ))
        })?;
        channel
            .basic_publish(DEPLOYMENTS_EXCHANGE, ROUTING_KEY, payload, self.options.persistent)
            .await?;
        Ok(())
    }

    /// Closes the channel and the connection.
    pub async fn close(&mut self) -> Result<()> {
        if let Some(channel) = self.channel.take() {
            if channel.is_open() {
                channel.close().await?;
            }
        }
        if let Some(connection) = self.connection.take() {
            if connection.is_open() {
                connection.close().await?;
            }
        }
        info!("publisher closed");
        Ok(())
    }

    async fn teardown(&mut self) {
        if let Some(channel) = self.channel.take() {
            if let Err(e) = channel.close().await {
                debug!(error = %e, "closing stale publisher channel");
            }
        }
        if let Some(connection) = self.connection.take() {
            if let Err(e) = connection.close().await {
                debug!(error = %e, "closing stale publisher connection");
            }
        }
    }
}

impl std::fmt::Debug for Publisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Publisher")
            .field("options", &self.options)
            .field("connected", &self.is_connected())
            .finish()
    }
}
