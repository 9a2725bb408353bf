//! Depot-Core
//!
//! Types shared by the control plane, the publisher and the consumer.

pub mod deployment;
pub mod errors;
pub mod message;
pub mod resources;

pub use deployment::{DeploymentRecord, DeploymentStatus};
pub use errors::{MessageError, ValidationError};
pub use message::DeploymentMessage;
pub use resources::{ResourceKind, Resources};
