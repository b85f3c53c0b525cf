use std::time::Duration;
use thiserror::Error;

use crate::database::DatabaseError;
use crate::error::ApiError;

/// Why a pipeline run ended without reaching (or finishing) its handler
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Access denied: {0}")]
    Authorization(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Transaction error: {0}")]
    Transaction(DatabaseError),

    #[error("Lookup failed: {0}")]
    Lookup(DatabaseError),

    #[error("A transaction is already open for this request")]
    TransactionAlreadyOpen,

    #[error("Stage '{stage}' requires {missing}, which no earlier stage provided")]
    MissingContext {
        stage: &'static str,
        missing: &'static str,
    },

    #[error("Misconfigured: {0}")]
    Misconfigured(String),

    #[error("Handler panicked: {0}")]
    Panic(String),

    #[error("Request exceeded deadline of {0:?}")]
    Timeout(Duration),
}

impl PipelineError {
    /// Caller-caused rejections, logged at a lower level than server faults
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            PipelineError::Authentication(_)
                | PipelineError::Authorization(_)
                | PipelineError::BadRequest(_)
        )
    }
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::Authentication(msg) => ApiError::unauthorized(msg),
            PipelineError::Authorization(msg) => ApiError::forbidden(msg),
            PipelineError::BadRequest(msg) => ApiError::bad_request(msg),
            PipelineError::Timeout(_) => ApiError::gateway_timeout("Request timed out"),
            // Server-side faults never expose internals to clients
            PipelineError::Transaction(_)
            | PipelineError::Lookup(_)
            | PipelineError::TransactionAlreadyOpen
            | PipelineError::MissingContext { .. }
            | PipelineError::Misconfigured(_)
            | PipelineError::Panic(_) => {
                ApiError::internal_server_error("An error occurred while processing your request")
            }
        }
    }
}
