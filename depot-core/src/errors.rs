use thiserror::Error;

use crate::resources::ResourceKind;

/// Malformed or out-of-range input, rejected before anything is mutated.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("{0} must not be empty")]
    EmptyField(&'static str),

    #[error("required {resource} cannot be negative (got {value})")]
    NegativeResource { resource: ResourceKind, value: f64 },

    #[error("required {resource} must be a finite number")]
    NonFiniteResource { resource: ResourceKind },

    #[error("unknown deployment status: {0}")]
    UnknownStatus(String),
}

/// A delivery body that cannot be turned into a deployment snapshot.
#[derive(Debug, Error)]
pub enum MessageError {
    #[error("unable to decode message body: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("invalid message content: {0}")]
    Invalid(#[from] ValidationError),
}
