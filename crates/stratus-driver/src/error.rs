//! Driver error types and their gRPC mapping

use crate::id::IdParseError;
use crate::reconciler::ReconcileError;
use stratus_cloud::CloudError;
use thiserror::Error;
use tonic::Status;
use tracing::warn;

/// Driver error
#[derive(Error, Debug)]
pub enum DriverError {
    /// A required field is missing or malformed
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Capacity range outside the supported bounds
    #[error("Out of range: {0}")]
    OutOfRange(String),

    /// The referenced volume or node does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Operation is permanently unsupported
    #[error("Unimplemented: {0}")]
    Unimplemented(&'static str),

    /// Remote control-plane failure
    #[error("Control plane error: {0}")]
    Cloud(#[from] CloudError),

    /// Attachment reconciler failure
    #[error("Reconcile error: {0}")]
    Reconcile(#[from] ReconcileError),

    /// Anything else
    #[error("Internal error: {0}")]
    Internal(String),
}

impl DriverError {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }
}

impl From<IdParseError> for DriverError {
    fn from(err: IdParseError) -> Self {
        Self::InvalidArgument(err.to_string())
    }
}

// Every failed RPC funnels through here; log once instead of per service
// method.
impl From<DriverError> for Status {
    fn from(err: DriverError) -> Self {
        warn!(error = %err, "RPC failed");
        match err {
            DriverError::InvalidArgument(msg) => Self::invalid_argument(msg),
            DriverError::OutOfRange(msg) => Self::out_of_range(msg),
            DriverError::NotFound(msg) | DriverError::Cloud(CloudError::NotFound(msg)) => {
                Self::not_found(msg)
            }
            DriverError::Unimplemented(msg) => Self::unimplemented(msg),
            DriverError::Cloud(CloudError::Auth(msg)) => Self::unauthenticated(msg),
            DriverError::Reconcile(ReconcileError::ShuttingDown) => {
                Self::unavailable("driver is shutting down")
            }
            DriverError::Reconcile(ReconcileError::Cloud(e)) => Self::internal(e.to_string()),
            DriverError::Cloud(e) => Self::internal(e.to_string()),
            DriverError::Internal(msg) => Self::internal(msg),
        }
    }
}

/// Result type for driver operations
pub type DriverResult<T> = Result<T, DriverError>;
