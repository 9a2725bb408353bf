use anyhow::{Context, Result};
use clap::Parser;
use depot_client::{AmqpConnector, BrokerConnection, ConnectionManager, TopologyManager};
use std::sync::Arc;
use tracing::info;

use crate::broker_args::BrokerArgs;

#[derive(Debug, Parser)]
pub struct Topology {
    #[command(flatten)]
    pub broker: BrokerArgs,
}

pub async fn handle_topology(topology: Topology) -> Result<()> {
    let options = topology.broker.connection_options();
    options.validate()?;

    let cnx_manager = ConnectionManager::new(Arc::new(AmqpConnector::new()), options);
    let connection = cnx_manager
        .connect()
        .await
        .context("Failed to connect to the broker")?;

    TopologyManager::default()
        .ensure_topology(connection.as_ref())
        .await
        .context("Failed to set up the deployment topology")?;
    connection.close().await?;

    info!("deployment topology is in place");
    Ok(())
}
