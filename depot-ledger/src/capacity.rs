use depot_core::{ResourceKind, Resources};

use crate::cluster::{Cluster, ResourceUsage};
use crate::errors::{LedgerError, Result};

/// Slack allowed when comparing a request with what is free, absorbing the
/// rounding left behind by summing fractional usage rows.
pub const ADMISSION_TOLERANCE: f64 = 1e-9;

/// `total - Σ used` for every dimension, over the usage rows of `cluster`.
///
/// Rows that belong to other clusters are ignored.
pub fn available<'a>(
    cluster: &Cluster,
    usages: impl IntoIterator<Item = &'a ResourceUsage>,
) -> Resources {
    let used = usages
        .into_iter()
        .filter(|usage| usage.cluster_id == cluster.id)
        .fold(Resources::default(), |acc, usage| acc.plus(&usage.used));
    cluster.totals().minus(&used)
}

/// Fails on the first dimension (cpu, ram, gpu order) where `requested`
/// exceeds `available` by more than [`ADMISSION_TOLERANCE`].
pub fn check_admission(cluster_id: u64, requested: &Resources, available: &Resources) -> Result<()> {
    requested.validate()?;
    for resource in ResourceKind::ALL {
        let wanted = requested.get(resource);
        let free = available.get(resource);
        if wanted - free > ADMISSION_TOLERANCE {
            return Err(LedgerError::Capacity {
                cluster_id,
                resource,
                requested: wanted,
                available: free,
            });
        }
    }
    Ok(())
}
