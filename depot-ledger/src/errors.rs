use depot_core::{ResourceKind, ValidationError};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, LedgerError>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum LedgerError {
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("insufficient {resource} on cluster {cluster_id}: requested {requested}, available {available}")]
    Capacity {
        cluster_id: u64,
        resource: ResourceKind,
        requested: f64,
        available: f64,
    },

    #[error("cluster {0} not found")]
    ClusterNotFound(u64),

    #[error("deployment {0} not found")]
    DeploymentNotFound(u64),

    #[error("resource usage for deployment {0} not found")]
    UsageNotFound(u64),

    #[error("reservation does not cover deployment {name:?}")]
    ReservationMismatch { name: String },
}
