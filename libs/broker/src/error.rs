//! Error types for the broker transport library.

use thiserror::Error;

/// Result type alias for broker operations.
pub type BrokerResult<T> = Result<T, BrokerError>;

/// Errors that can occur while talking to the message broker.
#[derive(Error, Debug)]
pub enum BrokerError {
    #[error("broker connection error: {0}")]
    Connection(#[from] lapin::Error),

    #[error("broker publish failed: {0}")]
    PublishFailed(String),

    #[error("delivery has no retry-count header slot left (cap={0})")]
    RetryCountExceeded(u32),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("broker error: {0}")]
    Other(#[from] anyhow::Error),
}
