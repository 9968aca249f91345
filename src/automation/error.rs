//! Error types for queued automation work

use thiserror::Error;

use crate::adapters::AdapterError;
use crate::broker::BrokerClientError;

/// Failure of a queued operation.
#[derive(Debug, Error)]
pub enum AutomationError {
    /// The operation observed its cancellation signal
    #[error("action was cancelled")]
    Cancelled,

    /// An OS adapter failed
    #[error(transparent)]
    Adapter(AdapterError),

    /// A broker round trip failed
    #[error(transparent)]
    Broker(#[from] BrokerClientError),

    /// Any other failure
    #[error("{0}")]
    Failed(String),
}

impl From<AdapterError> for AutomationError {
    fn from(err: AdapterError) -> Self {
        match err {
            AdapterError::Cancelled => AutomationError::Cancelled,
            other => AutomationError::Adapter(other),
        }
    }
}

/// Result alias for queued operations
pub type AutomationResult<T> = std::result::Result<T, AutomationError>;
