//! Error mapping to the stable JSON error envelope.
//!
//! Every failure leaves the API as
//! `{"success": false, "error": {"message": ..., "details"?: ...}}` with the
//! status code of its taxonomy class.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use comptoir_core::DomainError;
use comptoir_store::StoreError;

/// An API-visible failure.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, message)
    }

    pub fn internal() -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut error = json!({ "message": self.message });
        if let Some(details) = self.details {
            error["details"] = details;
        }
        (
            self.status,
            Json(json!({ "success": false, "error": error })),
        )
            .into_response()
    }
}

impl From<DomainError> for ApiError {
    fn from(err: DomainError) -> Self {
        match &err {
            DomainError::Validation(_)
            | DomainError::InvalidId(_)
            | DomainError::InvalidQuantity(_)
            | DomainError::InvalidPaymentMode(_)
            | DomainError::OrderImmutable(_)
            | DomainError::OrderAlreadySettled
            | DomainError::CannotCancelSettledOrder => {
                ApiError::new(StatusCode::BAD_REQUEST, err.to_string())
            }
            DomainError::InsufficientStock {
                product,
                available,
                requested,
            } => ApiError::new(StatusCode::BAD_REQUEST, err.to_string()).with_details(json!({
                "product": product,
                "available": available,
                "requested": requested,
            })),
            DomainError::NotFound => ApiError::not_found("not found"),
            DomainError::Conflict(_) => ApiError::new(StatusCode::CONFLICT, err.to_string()),
            DomainError::Forbidden(_) => ApiError::new(StatusCode::FORBIDDEN, err.to_string()),
            DomainError::Unauthorized => {
                ApiError::new(StatusCode::UNAUTHORIZED, "unauthorized")
            }
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Domain(domain) => domain.into(),
            other => {
                tracing::error!(error = %other, "storage failure");
                ApiError::internal()
            }
        }
    }
}
