//! Depot-Ledger
//!
//! Capacity bookkeeping for clusters. Available capacity is always derived
//! from the usage rows at read time; there is no cached counter.

mod errors;
pub use errors::{LedgerError, Result};

mod cluster;
pub use cluster::{Cluster, NewCluster, ResourceUsage};

mod capacity;
pub use capacity::{available, check_admission, ADMISSION_TOLERANCE};

mod ledger;
pub use ledger::{DeploymentUpdate, Ledger, LedgerTxn, NewDeployment, ReservationToken};
