use depot_client::Publisher;
use depot_core::DeploymentRecord;
use depot_ledger::{DeploymentUpdate, Ledger, LedgerError, NewDeployment};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{error, info};

/// Result of a write: the committed record and whether its event reached
/// the broker.
#[derive(Debug, Clone, Serialize)]
pub struct WriteOutcome {
    pub deployment: DeploymentRecord,
    pub delivered: bool,
}

/// Control-plane write path: admission and persistence in one ledger
/// transaction, then the deployment event.
///
/// The ledger is authoritative. A failed publish is logged and reported
/// through `delivered`, the committed record is kept and nothing is retried
/// later.
pub struct DeploymentService {
    ledger: Ledger,
    publisher: Mutex<Publisher>,
}

impl DeploymentService {
    pub fn new(ledger: Ledger, publisher: Publisher) -> Self {
        DeploymentService {
            ledger,
            publisher: Mutex::new(publisher),
        }
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub async fn create(&self, new_deployment: NewDeployment) -> Result<WriteOutcome, LedgerError> {
        let deployment = self.ledger.create_deployment(new_deployment).await?;
        info!(
            deployment_id = deployment.id,
            cluster_id = deployment.cluster_id,
            "deployment admitted"
        );
        let delivered = self.notify(&deployment).await;
        Ok(WriteOutcome {
            deployment,
            delivered,
        })
    }

    pub async fn update(
        &self,
        deployment_id: u64,
        update: DeploymentUpdate,
    ) -> Result<WriteOutcome, LedgerError> {
        let deployment = self.ledger.update_deployment(deployment_id, update).await?;
        info!(deployment_id, "deployment updated");
        let delivered = self.notify(&deployment).await;
        Ok(WriteOutcome {
            deployment,
            delivered,
        })
    }

    pub async fn close(&self) -> depot_client::Result<()> {
        self.publisher.lock().await.close().await
    }

    async fn notify(&self, deployment: &DeploymentRecord) -> bool {
        let mut publisher = self.publisher.lock().await;
        match publisher.publish(deployment).await {
            Ok(()) => true,
            Err(e) => {
                error!(
                    deployment_id = deployment.id,
                    error = %e,
                    "deployment recorded but its event was not delivered"
                );
                false
            }
        }
    }
}
