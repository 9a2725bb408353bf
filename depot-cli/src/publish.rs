use anyhow::{Context, Result};
use clap::Parser;
use depot_client::{AmqpConnector, Publisher, PublisherOptions};
use depot_core::{DeploymentMessage, DeploymentRecord};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

use crate::broker_args::BrokerArgs;

#[derive(Debug, Parser)]
#[command(after_help = EXAMPLES_TEXT)]
pub struct Publish {
    #[command(flatten)]
    pub broker: BrokerArgs,

    #[arg(
        long,
        short = 'f',
        help = "JSON file holding one deployment snapshot in wire format"
    )]
    pub file: PathBuf,

    #[arg(long, default_value_t = 3, help = "Publish attempts, the first one included")]
    pub max_attempts: usize,

    #[arg(
        long,
        default_value_t = 2000,
        help = "Pause between publish attempts, in milliseconds"
    )]
    pub retry_delay_ms: u64,
}

const EXAMPLES_TEXT: &str = r#"
EXAMPLES:
    depot-cli publish --file deployment.json
    depot-cli publish --host rabbit.internal --file deployment.json --max-attempts 5
"#;

pub async fn handle_publish(publish: Publish) -> Result<()> {
    let record = read_record(&publish.file)?;

    let options = PublisherOptions {
        max_attempts: publish.max_attempts,
        retry_delay_ms: publish.retry_delay_ms,
        ..PublisherOptions::default()
    };
    let mut publisher = Publisher::new(
        Arc::new(AmqpConnector::new()),
        publish.broker.connection_options(),
        options,
    );

    publisher
        .publish(&record)
        .await
        .with_context(|| format!("Failed to publish deployment {}", record.id))?;
    publisher.close().await?;

    info!(deployment_id = record.id, "deployment event sent");
    Ok(())
}

/// Reads and validates a snapshot file.
pub fn read_record(path: &Path) -> Result<DeploymentRecord> {
    let content = std::fs::read(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let message = DeploymentMessage::decode(&content)
        .with_context(|| format!("{} is not a valid deployment snapshot", path.display()))?;
    Ok(message.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn reads_a_wire_snapshot() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"id":5,"name":"api","cluster":2,"docker_image":"api:3","required_cpu":1.5,
                "required_ram":2.0,"required_gpu":0.0,"status":"running",
                "created_at":"2024-05-01T12:00:00Z","updated_at":"2024-05-01T12:30:00Z"}}"#
        )
        .unwrap();

        let record = read_record(file.path()).unwrap();
        assert_eq!(record.id, 5);
        assert_eq!(record.cluster_id, 2);
        assert_eq!(record.required.cpu, 1.5);
    }

    #[test]
    fn rejects_a_snapshot_with_negative_resources() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"id":5,"name":"api","cluster":2,"docker_image":"api:3","required_cpu":-1.0,
                "required_ram":2.0,"required_gpu":0.0,"status":"running",
                "created_at":"2024-05-01T12:00:00Z","updated_at":"2024-05-01T12:30:00Z"}}"#
        )
        .unwrap();

        assert!(read_record(file.path()).is_err());
    }
}
