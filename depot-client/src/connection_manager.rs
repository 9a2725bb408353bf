use std::sync::Arc;
use tracing::{info, warn};

use crate::broker::{BrokerConnection, BrokerConnector};
use crate::connection_options::ConnectionOptions;
use crate::errors::{DepotError, Result};

/// Opens broker connections, making up to `connection_attempts` attempts
/// with `retry_delay_ms` between them.
#[derive(Debug, Clone)]
pub struct ConnectionManager {
    connector: Arc<dyn BrokerConnector>,
    pub(crate) connection_options: ConnectionOptions,
}

impl ConnectionManager {
    pub fn new(connector: Arc<dyn BrokerConnector>, connection_options: ConnectionOptions) -> Self {
        ConnectionManager {
            connector,
            connection_options,
        }
    }

    pub fn connection_options(&self) -> &ConnectionOptions {
        &self.connection_options
    }

    pub async fn connect(&self) -> Result<Arc<dyn BrokerConnection>> {
        let options = &self.connection_options;
        let attempts = options.connection_attempts.max(1);

        info!(
            "Establishing new broker connection to {}",
            options.display_uri()
        );

        let mut attempt = 1;
        loop {
            match self.connector.connect(options).await {
                Ok(connection) => return Ok(connection),
                Err(error) if attempt < attempts && error.is_transport() => {
                    warn!(
                        attempt,
                        attempts,
                        error = %error,
                        "broker connection attempt failed, retrying"
                    );
                    tokio::time::sleep(options.retry_delay()).await;
                    attempt += 1;
                }
                Err(error) => {
                    return Err(DepotError::topology(
                        format!("connection to {}", options.display_uri()),
                        error,
                    ))
                }
            }
        }
    }
}
