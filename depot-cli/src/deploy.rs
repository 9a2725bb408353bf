use anyhow::{Context, Result};
use clap::Parser;
use depot_client::{AmqpConnector, Publisher, PublisherOptions};
use depot_core::Resources;
use depot_ledger::{Ledger, NewCluster, NewDeployment};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use crate::broker_args::BrokerArgs;
use crate::control::DeploymentService;

#[derive(Debug, Parser)]
#[command(after_help = EXAMPLES_TEXT)]
pub struct Deploy {
    #[command(flatten)]
    pub broker: BrokerArgs,

    #[arg(
        long,
        default_value = "config/clusters.yml",
        help = "YAML list of clusters registered in the ledger, ids are assigned in order from 1"
    )]
    pub clusters: PathBuf,

    #[arg(long, help = "Cluster the deployment is admitted on")]
    pub cluster_id: u64,

    #[arg(long, short = 'n', help = "Deployment name")]
    pub name: String,

    #[arg(long, short = 'i', help = "Container image reference")]
    pub image: String,

    #[arg(long, default_value_t = 0.0)]
    pub cpu: f64,

    #[arg(long, default_value_t = 0.0)]
    pub ram: f64,

    #[arg(long, default_value_t = 0.0)]
    pub gpu: f64,
}

const EXAMPLES_TEXT: &str = r#"
EXAMPLES:
    depot-cli deploy --cluster-id 1 --name api --image registry.local/api:1.4 --cpu 2 --ram 4
    depot-cli deploy --clusters clusters.yml --cluster-id 2 -n trainer -i trainer:7 --gpu 1
"#;

pub async fn handle_deploy(deploy: Deploy) -> Result<()> {
    let ledger = Ledger::new();
    for cluster in read_clusters(&deploy.clusters)? {
        let cluster = ledger.add_cluster(cluster).await?;
        info!(cluster_id = cluster.id, name = %cluster.name, "cluster registered");
    }

    let publisher = Publisher::new(
        Arc::new(AmqpConnector::new()),
        deploy.broker.connection_options(),
        PublisherOptions::default(),
    );
    let service = DeploymentService::new(ledger, publisher);

    let outcome = service
        .create(NewDeployment {
            name: deploy.name,
            cluster_id: deploy.cluster_id,
            docker_image: deploy.image,
            required: Resources::new(deploy.cpu, deploy.ram, deploy.gpu),
        })
        .await
        .context("Deployment was not admitted")?;

    if !outcome.delivered {
        warn!(
            deployment_id = outcome.deployment.id,
            "deployment admitted, its event is not delivered"
        );
    }
    if let Err(e) = service.close().await {
        warn!(error = %e, "closing the publisher");
    }

    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(())
}

pub fn read_clusters(path: &Path) -> Result<Vec<NewCluster>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_yaml::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
}
