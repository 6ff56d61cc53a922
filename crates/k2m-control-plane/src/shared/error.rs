use k2m_core::CoreError;
use thiserror::Error;

/// Control plane specific errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ControlPlaneError {
    #[error("Validation error: {0}")]
    ValidationError(String),
    #[error("Instance not found: {0}")]
    InstanceNotFound(String),
    #[error("Upstream verification failed: {0}")]
    VerificationFailed(String),
    #[error("Backend error: {0}")]
    BackendError(String),
    #[error("Storage error: {0}")]
    StorageError(String),
    #[error("Permission service error: {0}")]
    PermissionServiceError(String),
    #[error("Upstream error: {0}")]
    UpstreamError(String),
    #[error("Timeout: {0}")]
    Timeout(String),
}

impl ControlPlaneError {
    pub fn code(&self) -> &'static str {
        match self {
            ControlPlaneError::ValidationError(_) => "VALIDATION_ERROR",
            ControlPlaneError::InstanceNotFound(_) => "INSTANCE_NOT_FOUND",
            ControlPlaneError::VerificationFailed(_) => "UPSTREAM_VERIFICATION_FAILED",
            ControlPlaneError::BackendError(_) => "BACKEND_ERROR",
            ControlPlaneError::StorageError(_) => "STORAGE_ERROR",
            ControlPlaneError::PermissionServiceError(_) => "PERMISSION_SERVICE_ERROR",
            ControlPlaneError::UpstreamError(_) => "UPSTREAM_ERROR",
            ControlPlaneError::Timeout(_) => "TIMEOUT",
        }
    }

    fn message(&self) -> &str {
        match self {
            ControlPlaneError::ValidationError(msg)
            | ControlPlaneError::InstanceNotFound(msg)
            | ControlPlaneError::VerificationFailed(msg)
            | ControlPlaneError::BackendError(msg)
            | ControlPlaneError::StorageError(msg)
            | ControlPlaneError::PermissionServiceError(msg)
            | ControlPlaneError::UpstreamError(msg)
            | ControlPlaneError::Timeout(msg) => msg,
        }
    }
}

impl From<CoreError> for ControlPlaneError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::WorkloadNotFound(id) => {
                ControlPlaneError::BackendError(format!("workload not found: {id}"))
            }
            CoreError::Backend(msg) | CoreError::Serialization(msg) | CoreError::Configuration(msg) => {
                ControlPlaneError::BackendError(msg)
            }
        }
    }
}

impl From<ControlPlaneError> for k2m_core::ErrorResponse {
    fn from(err: ControlPlaneError) -> Self {
        k2m_core::ErrorResponse::new(err.code(), err.message())
    }
}

pub type ControlPlaneResult<T> = std::result::Result<T, ControlPlaneError>;
