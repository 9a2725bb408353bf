use chrono::Utc;
use depot_core::{DeploymentRecord, DeploymentStatus, Resources, ValidationError};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info};

use crate::capacity::{available, check_admission};
use crate::cluster::{Cluster, NewCluster, ResourceUsage};
use crate::errors::{LedgerError, Result};

/// Input for creating a deployment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewDeployment {
    pub name: String,
    pub cluster_id: u64,
    pub docker_image: String,
    pub required: Resources,
}

/// Partial change to an existing deployment; `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeploymentUpdate {
    pub name: Option<String>,
    pub docker_image: Option<String>,
    pub required: Option<Resources>,
    pub status: Option<DeploymentStatus>,
}

/// Proof that `requested` fitted into the cluster when checked inside the
/// transaction that issued it. Consumed by [`LedgerTxn::insert_deployment`].
#[derive(Debug, PartialEq)]
#[must_use = "a reservation does nothing until the deployment is inserted"]
pub struct ReservationToken {
    cluster_id: u64,
    requested: Resources,
}

impl ReservationToken {
    pub fn cluster_id(&self) -> u64 {
        self.cluster_id
    }

    pub fn requested(&self) -> Resources {
        self.requested
    }
}

#[derive(Debug, Clone, Default)]
struct LedgerState {
    clusters: BTreeMap<u64, Cluster>,
    deployments: BTreeMap<u64, DeploymentRecord>,
    usages: BTreeMap<u64, ResourceUsage>,
    // deployment id -> usage row id
    usage_of: HashMap<u64, u64>,
    last_cluster_id: u64,
    last_deployment_id: u64,
    last_usage_id: u64,
}

impl LedgerState {
    fn cluster(&self, cluster_id: u64) -> Result<&Cluster> {
        self.clusters
            .get(&cluster_id)
            .ok_or(LedgerError::ClusterNotFound(cluster_id))
    }

    fn available(&self, cluster_id: u64) -> Result<Resources> {
        let cluster = self.cluster(cluster_id)?;
        Ok(available(cluster, self.usages.values()))
    }
}

/// In-memory relational store for clusters, deployments and usage rows.
///
/// Every mutation runs inside a [`LedgerTxn`], which holds the store lock
/// from the capacity check until commit. Concurrent admissions against the
/// same cluster are serialized and can never both observe the same free
/// capacity.
#[derive(Debug, Clone, Default)]
pub struct Ledger {
    state: Arc<Mutex<LedgerState>>,
}

impl Ledger {
    pub fn new() -> Self {
        Ledger::default()
    }

    /// Opens a transaction. Changes are applied on [`LedgerTxn::commit`] and
    /// discarded when the transaction is dropped.
    pub async fn begin(&self) -> LedgerTxn {
        let guard = Arc::clone(&self.state).lock_owned().await;
        let staged = guard.clone();
        LedgerTxn { guard, staged }
    }

    pub async fn add_cluster(&self, new_cluster: NewCluster) -> Result<Cluster> {
        let mut txn = self.begin().await;
        let cluster = txn.add_cluster(new_cluster)?;
        txn.commit();
        Ok(cluster)
    }

    pub async fn cluster(&self, cluster_id: u64) -> Result<Cluster> {
        let state = self.state.lock().await;
        state.cluster(cluster_id).cloned()
    }

    /// Capacity left on the cluster, computed from its usage rows now.
    pub async fn available(&self, cluster_id: u64) -> Result<Resources> {
        let state = self.state.lock().await;
        state.available(cluster_id)
    }

    pub async fn usage_rows(&self, cluster_id: u64) -> Result<Vec<ResourceUsage>> {
        let state = self.state.lock().await;
        state.cluster(cluster_id)?;
        Ok(state
            .usages
            .values()
            .filter(|usage| usage.cluster_id == cluster_id)
            .cloned()
            .collect())
    }

    pub async fn deployment(&self, deployment_id: u64) -> Result<DeploymentRecord> {
        let state = self.state.lock().await;
        state
            .deployments
            .get(&deployment_id)
            .cloned()
            .ok_or(LedgerError::DeploymentNotFound(deployment_id))
    }

    pub async fn deployments(&self) -> Vec<DeploymentRecord> {
        let state = self.state.lock().await;
        state.deployments.values().cloned().collect()
    }

    /// Admits the request and records the deployment and its usage row in a
    /// single transaction. Nothing is written when admission fails.
    pub async fn create_deployment(&self, new_deployment: NewDeployment) -> Result<DeploymentRecord> {
        let mut txn = self.begin().await;
        let token = txn.admit(new_deployment.cluster_id, &new_deployment.required)?;
        let record = txn.insert_deployment(token, new_deployment)?;
        txn.commit();
        Ok(record)
    }

    pub async fn update_deployment(
        &self,
        deployment_id: u64,
        update: DeploymentUpdate,
    ) -> Result<DeploymentRecord> {
        let mut txn = self.begin().await;
        let record = txn.update_deployment(deployment_id, update)?;
        txn.commit();
        Ok(record)
    }

    pub async fn set_status(
        &self,
        deployment_id: u64,
        status: DeploymentStatus,
    ) -> Result<DeploymentRecord> {
        self.update_deployment(
            deployment_id,
            DeploymentUpdate {
                status: Some(status),
                ..Default::default()
            },
        )
        .await
    }
}

/// A serialized unit of work over the ledger.
///
/// Reads observe the staged state, so an admission sees the rows inserted
/// earlier in the same transaction.
pub struct LedgerTxn {
    guard: OwnedMutexGuard<LedgerState>,
    staged: LedgerState,
}

impl LedgerTxn {
    pub fn available(&self, cluster_id: u64) -> Result<Resources> {
        self.staged.available(cluster_id)
    }

    /// Checks `requested` against the cluster's available capacity.
    pub fn admit(&self, cluster_id: u64, requested: &Resources) -> Result<ReservationToken> {
        let free = self.staged.available(cluster_id)?;
        check_admission(cluster_id, requested, &free)?;
        debug!(cluster_id, %requested, available = %free, "admission granted");
        Ok(ReservationToken {
            cluster_id,
            requested: *requested,
        })
    }

    pub fn add_cluster(&mut self, new_cluster: NewCluster) -> Result<Cluster> {
        if new_cluster.name.trim().is_empty() {
            return Err(ValidationError::EmptyField("name").into());
        }
        self.staged.last_cluster_id += 1;
        let cluster = Cluster {
            id: self.staged.last_cluster_id,
            name: new_cluster.name,
            owner_id: new_cluster.owner_id,
            total_cpu: new_cluster.total_cpu,
            total_ram: new_cluster.total_ram,
            total_gpu: new_cluster.total_gpu,
            created_at: Utc::now(),
        };
        self.staged.clusters.insert(cluster.id, cluster.clone());
        Ok(cluster)
    }

    /// Inserts the deployment together with its usage row.
    pub fn insert_deployment(
        &mut self,
        token: ReservationToken,
        new_deployment: NewDeployment,
    ) -> Result<DeploymentRecord> {
        if token.cluster_id != new_deployment.cluster_id || token.requested != new_deployment.required {
            return Err(LedgerError::ReservationMismatch {
                name: new_deployment.name,
            });
        }

        let now = Utc::now();
        let record = DeploymentRecord {
            id: self.staged.last_deployment_id + 1,
            name: new_deployment.name,
            cluster_id: new_deployment.cluster_id,
            docker_image: new_deployment.docker_image,
            required: new_deployment.required,
            status: DeploymentStatus::Pending,
            created_at: now,
            updated_at: now,
        };
        record.validate()?;

        self.staged.last_deployment_id = record.id;
        self.staged.last_usage_id += 1;
        let usage = ResourceUsage {
            id: self.staged.last_usage_id,
            cluster_id: record.cluster_id,
            deployment_id: record.id,
            used: record.required,
            created_at: now,
            updated_at: now,
        };
        self.staged.usage_of.insert(record.id, usage.id);
        self.staged.usages.insert(usage.id, usage);
        self.staged.deployments.insert(record.id, record.clone());

        info!(
            deployment_id = record.id,
            cluster_id = record.cluster_id,
            required = %record.required,
            "deployment admitted"
        );
        Ok(record)
    }

    /// Applies `update`. A change of requirements is re-admitted against the
    /// cluster's free capacity plus what the deployment already holds, and
    /// rewrites the deployment's own usage row.
    pub fn update_deployment(
        &mut self,
        deployment_id: u64,
        update: DeploymentUpdate,
    ) -> Result<DeploymentRecord> {
        let mut record = self
            .staged
            .deployments
            .get(&deployment_id)
            .cloned()
            .ok_or(LedgerError::DeploymentNotFound(deployment_id))?;
        let now = Utc::now();

        if let Some(name) = update.name {
            record.name = name;
        }
        if let Some(docker_image) = update.docker_image {
            record.docker_image = docker_image;
        }
        if let Some(status) = update.status {
            record.status = status;
        }

        if let Some(required) = update.required {
            if required != record.required {
                let usage_id = *self
                    .staged
                    .usage_of
                    .get(&deployment_id)
                    .ok_or(LedgerError::UsageNotFound(deployment_id))?;
                let held = self
                    .staged
                    .usages
                    .get(&usage_id)
                    .map(|usage| usage.used)
                    .ok_or(LedgerError::UsageNotFound(deployment_id))?;

                let free = self.staged.available(record.cluster_id)?.plus(&held);
                check_admission(record.cluster_id, &required, &free)?;

                if let Some(usage) = self.staged.usages.get_mut(&usage_id) {
                    usage.used = required;
                    usage.updated_at = now;
                }
                record.required = required;
            }
        }

        record.validate()?;
        record.updated_at = now;
        self.staged.deployments.insert(deployment_id, record.clone());
        Ok(record)
    }

    /// Makes the staged changes visible and releases the lock.
    pub fn commit(self) {
        let LedgerTxn { mut guard, staged } = self;
        *guard = staged;
    }
}
