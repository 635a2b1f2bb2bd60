//! Unified error handling for edgelist.
//!
//! Every service operation returns a [`ServiceError`]. The RPC layer turns it
//! into a status code and JSON body, and metrics label it by
//! [`ServiceError::error_code`].

use crate::db::DbError;
use crate::security::range::RangeError;
use thiserror::Error;

// ============================================================================
// Service Errors (gateway, sync, resolver)
// ============================================================================

/// Errors returned by list and item operations.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Malformed or missing input; nothing was written.
    #[error("{0}")]
    Validation(String),

    #[error(transparent)]
    InvalidRange(#[from] RangeError),

    #[error("missing or unknown credentials")]
    Unauthenticated,

    /// Caller class not allowed, or tenant does not own the target.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("ip list {0} not found")]
    ListNotFound(i64),

    #[error("ip item {0} not found")]
    ItemNotFound(i64),

    /// Transaction or commit failure, propagated unchanged.
    #[error(transparent)]
    Storage(#[from] DbError),
}

impl ServiceError {
    /// Get a static error code string for metrics labeling.
    #[inline]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::InvalidRange(_) => "invalid_range",
            Self::Unauthenticated => "unauthenticated",
            Self::PermissionDenied(_) => "permission_denied",
            Self::ListNotFound(_) => "list_not_found",
            Self::ItemNotFound(_) => "item_not_found",
            Self::Storage(_) => "storage",
        }
    }

    /// Whether the caller can fix the request and retry.
    pub fn is_client_error(&self) -> bool {
        !matches!(self, Self::Storage(_))
    }
}

impl From<sqlx::Error> for ServiceError {
    fn from(err: sqlx::Error) -> Self {
        ServiceError::Storage(DbError::from(err))
    }
}

/// Result type for service operations.
pub type ServiceResult<T> = Result<T, ServiceError>;
