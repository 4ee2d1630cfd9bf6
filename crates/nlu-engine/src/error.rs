//! Engine error types

use nlu_core::RequestId;
use nlu_infra::BulkheadError;
use thiserror::Error;

/// Errors raised while understanding a request
#[derive(Error, Debug, Clone, PartialEq)]
pub enum NluError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Processing error: {0}")]
    Processing(String),

    #[error("Inference error: {0}")]
    Inference(String),

    #[error("Validation error: {0}")]
    MergeValidation(String),

    #[error("Initialization error: {0}")]
    Initialization(String),

    #[error("Service overloaded: {0}")]
    Overloaded(String),

    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl NluError {
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn processing(msg: impl Into<String>) -> Self {
        Self::Processing(msg.into())
    }

    pub fn inference(msg: impl Into<String>) -> Self {
        Self::Inference(msg.into())
    }

    pub fn merge_validation(msg: impl Into<String>) -> Self {
        Self::MergeValidation(msg.into())
    }

    pub fn initialization(msg: impl Into<String>) -> Self {
        Self::Initialization(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "INVALID_INPUT",
            Self::Processing(_) => "PROCESSING_ERROR",
            Self::Inference(_) => "INFERENCE_ERROR",
            Self::MergeValidation(_) => "VALIDATION_ERROR",
            Self::Initialization(_) => "INITIALIZATION_ERROR",
            Self::Overloaded(_) => "OVERLOADED",
            Self::Unavailable(_) => "SERVICE_UNAVAILABLE",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Whether the caller, not the service, is at fault
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::InvalidInput(_))
    }

    /// Whether retrying later may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Overloaded(_) | Self::Unavailable(_))
    }
}

impl From<BulkheadError> for NluError {
    fn from(err: BulkheadError) -> Self {
        match err {
            BulkheadError::QueueFull { .. } | BulkheadError::Timeout { .. } => {
                Self::Overloaded(err.to_string())
            }
            BulkheadError::Closed => Self::Unavailable("processor is shut down".to_string()),
        }
    }
}

impl From<nlu_core::CoreError> for NluError {
    fn from(err: nlu_core::CoreError) -> Self {
        Self::Initialization(err.to_string())
    }
}

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, NluError>;

/// A failed single-text or batch request, tagged with its correlation id
#[derive(Error, Debug, Clone, PartialEq)]
#[error("request {request_id} failed: {error}")]
pub struct RequestFailure {
    pub request_id: RequestId,
    #[source]
    pub error: NluError,
}

impl RequestFailure {
    pub fn new(request_id: RequestId, error: NluError) -> Self {
        Self { request_id, error }
    }

    pub fn code(&self) -> &'static str {
        self.error.code()
    }
}
