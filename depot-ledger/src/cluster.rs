use chrono::{DateTime, Utc};
use depot_core::Resources;
use serde::{Deserialize, Serialize};

/// A cluster and its fixed total capacity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cluster {
    pub id: u64,
    pub name: String,
    pub owner_id: u64,
    pub total_cpu: u32,
    pub total_ram: u32,
    pub total_gpu: u32,
    pub created_at: DateTime<Utc>,
}

impl Cluster {
    pub fn totals(&self) -> Resources {
        Resources::new(
            f64::from(self.total_cpu),
            f64::from(self.total_ram),
            f64::from(self.total_gpu),
        )
    }
}

/// Input for registering a cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewCluster {
    pub name: String,
    #[serde(default)]
    pub owner_id: u64,
    pub total_cpu: u32,
    pub total_ram: u32,
    pub total_gpu: u32,
}

/// The share of a cluster held by one admitted deployment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceUsage {
    pub id: u64,
    pub cluster_id: u64,
    pub deployment_id: u64,
    pub used: Resources,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
