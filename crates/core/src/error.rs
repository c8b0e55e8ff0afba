//! Domain error model.

use thiserror::Error;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Keep this focused on deterministic, business/domain failures (validation,
/// invariants, conflicts). Infrastructure concerns belong elsewhere.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DomainError {
    /// A value failed validation (e.g. malformed input).
    #[error("validation failed: {0}")]
    Validation(String),

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// A requested resource was not found (domain-level).
    #[error("not found")]
    NotFound,

    /// A conflict occurred (e.g. duplicate document, stale state).
    #[error("conflict: {0}")]
    Conflict(String),

    /// The authenticated principal lacks the role for the operation.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// No valid authenticated principal.
    #[error("unauthorized")]
    Unauthorized,

    /// A stock subtraction would have driven a product below zero.
    #[error("insufficient stock for {product}: available {available}, requested {requested}")]
    InsufficientStock {
        product: String,
        available: i64,
        requested: i64,
    },

    /// A stock quantity was out of range for the requested adjustment.
    #[error("invalid quantity: {0}")]
    InvalidQuantity(String),

    /// A payment mode outside the enumerated set was supplied.
    #[error("invalid payment mode: {0}")]
    InvalidPaymentMode(String),

    /// A payment was attempted against a fully settled order.
    #[error("order is already settled")]
    OrderAlreadySettled,

    /// Cancellation was attempted on an order with recorded payments.
    #[error("cannot cancel an order with recorded payments")]
    CannotCancelSettledOrder,

    /// A mutation was attempted on an order that no longer accepts edits.
    #[error("order is immutable: {0}")]
    OrderImmutable(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::Forbidden(msg.into())
    }

    pub fn immutable(msg: impl Into<String>) -> Self {
        Self::OrderImmutable(msg.into())
    }

    pub fn invalid_quantity(msg: impl Into<String>) -> Self {
        Self::InvalidQuantity(msg.into())
    }

    pub fn insufficient_stock(
        product: impl Into<String>,
        available: i64,
        requested: i64,
    ) -> Self {
        Self::InsufficientStock {
            product: product.into(),
            available,
            requested,
        }
    }

    pub fn not_found() -> Self {
        Self::NotFound
    }
}
