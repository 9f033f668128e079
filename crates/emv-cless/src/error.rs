//! Errors reported by the external collaborators of the decision flow

use thiserror::Error;

/// Online authorisation failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HostError {
    #[error("host unreachable: {0}")]
    Unreachable(String),
    #[error("authorisation timed out")]
    Timeout,
    #[error("malformed host response: {0}")]
    MalformedResponse(String),
}

/// Batch store failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BatchError {
    #[error("batch is full")]
    Full,
    #[error("unable to store transaction: {0}")]
    Storage(String),
}
