//! Storage-layer error model.

use thiserror::Error;

use comptoir_core::DomainError;

pub type StoreResult<T> = Result<T, StoreError>;

/// Error surfaced by storage operations and the reconciliation engine.
///
/// Business failures travel as [`DomainError`] so the API layer can map them
/// to the right status codes; everything else is infrastructure.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    /// The backing store failed (connection, constraint, io).
    #[error("storage failure during {operation}: {message}")]
    Storage {
        operation: &'static str,
        message: String,
    },

    /// The external document renderer failed.
    #[error("document rendering failed: {0}")]
    Render(String),
}

impl StoreError {
    pub fn storage(operation: &'static str, err: impl core::fmt::Display) -> Self {
        Self::Storage {
            operation,
            message: err.to_string(),
        }
    }

    /// The domain error inside, if this is a business failure.
    pub fn as_domain(&self) -> Option<&DomainError> {
        match self {
            StoreError::Domain(e) => Some(e),
            _ => None,
        }
    }
}

/// Map a sqlx error for an operation, keeping the operation name for logs.
pub(crate) fn map_sqlx_error(operation: &'static str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::RowNotFound => StoreError::Domain(DomainError::NotFound),
        other => StoreError::storage(operation, other),
    }
}
