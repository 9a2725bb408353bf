mod broker_args;
mod control;
mod deploy;
mod publish;
mod topology;

use anyhow::Result;
use clap::{Parser, Subcommand};
use deploy::Deploy;
use publish::Publish;
use topology::Topology;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "depot-cli")]
#[command(about = "Control-plane tool for deployment events: topology, admission and publishing")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Reset and declare the deployment topology on the broker")]
    Topology(Topology),

    #[command(about = "Publish a deployment snapshot read from a JSON file")]
    Publish(Publish),

    #[command(about = "Admit a deployment against the cluster ledger and publish its event")]
    Deploy(Deploy),
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Topology(topology) => topology::handle_topology(topology).await?,
        Commands::Publish(publish) => publish::handle_publish(publish).await?,
        Commands::Deploy(deploy) => deploy::handle_deploy(deploy).await?,
    }

    Ok(())
}
