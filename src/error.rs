//! Error types for the transaction client

use thiserror::Error;

/// Main error type for the client
///
/// Errors are `Clone` so a single failure can be delivered in a pipeline
/// [`Response`](crate::message::Response) and recorded by the message tracker.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    #[error("Chain query error: {0}")]
    ChainQuery(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("No signer registered")]
    NoSigner,

    #[error("Not authorized to sign for account")]
    NotAuthorized,

    #[error("Gas estimation error: {0}")]
    GasEstimation(String),

    #[error("Signing error: {0}")]
    Signing(String),

    #[error("Nonce storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Broadcast pipeline is closed")]
    PipelineClosed,
}

impl ClientError {
    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ClientError::ChainQuery(_) | ClientError::GasEstimation(_)
        )
    }

    /// Short label used for metrics and structured logs
    pub fn kind(&self) -> &'static str {
        match self {
            ClientError::ChainQuery(_) => "chain_query",
            ClientError::InvalidRequest(_) => "invalid_request",
            ClientError::NoSigner => "no_signer",
            ClientError::NotAuthorized => "not_authorized",
            ClientError::GasEstimation(_) => "gas_estimation",
            ClientError::Signing(_) => "signing",
            ClientError::Storage(_) => "storage",
            ClientError::Config(_) => "config",
            ClientError::PipelineClosed => "pipeline_closed",
        }
    }
}

/// Result type for client operations
pub type ClientResult<T> = Result<T, ClientError>;
