use depot_core::{MessageError, ValidationError};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, DepotError>;

/// Failures reported by a broker backend.
///
/// The first three are answers from the broker about the request itself; the
/// rest mean the channel or connection is gone and the operation may succeed
/// on a fresh one.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BrokerError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("precondition failed: {0}")]
    PreconditionFailed(String),

    #[error("access refused: {0}")]
    AccessRefused(String),

    #[error("channel closed: {0}")]
    ChannelClosed(String),

    #[error("connection closed: {0}")]
    ConnectionClosed(String),

    #[error("io error: {0}")]
    Io(String),
}

impl BrokerError {
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            BrokerError::ChannelClosed(_) | BrokerError::ConnectionClosed(_) | BrokerError::Io(_)
        )
    }
}

#[derive(Debug, Error)]
pub enum DepotError {
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("unable to serialize message: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("malformed message: {0}")]
    MessageFormat(#[from] MessageError),

    #[error("transport error: {0}")]
    Transport(BrokerError),

    #[error("broker rejected topology for {entity}: {source}")]
    Topology {
        entity: String,
        #[source]
        source: BrokerError,
    },

    #[error("publish failed permanently after {attempts} attempt(s): {last_error}")]
    PermanentPublish {
        attempts: usize,
        last_error: Box<DepotError>,
    },

    #[error("consumer could not start after {attempts} attempt(s): {last_error}")]
    StartupFailed {
        attempts: usize,
        last_error: Box<DepotError>,
    },

    #[error("invalid configuration: {0}")]
    Configuration(String),
}

impl DepotError {
    /// Only transport failures are worth another attempt on a fresh connection.
    pub fn is_retryable(&self) -> bool {
        matches!(self, DepotError::Transport(_))
    }

    /// Classifies a failure met while declaring `entity`.
    pub(crate) fn topology(entity: impl Into<String>, source: BrokerError) -> Self {
        if source.is_transport() {
            DepotError::Transport(source)
        } else {
            DepotError::Topology {
                entity: entity.into(),
                source,
            }
        }
    }
}

// Outside of topology declaration any broker failure leaves the channel closed,
// so it is handled like a transport failure.
impl From<BrokerError> for DepotError {
    fn from(error: BrokerError) -> Self {
        DepotError::Transport(error)
    }
}
