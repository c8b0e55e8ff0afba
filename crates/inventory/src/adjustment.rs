//! Stock adjustment rules.

use serde::{Deserialize, Serialize};

use comptoir_core::{DomainError, DomainResult};

/// Stock level at or below which a low-stock notification is emitted.
pub const LOW_STOCK_THRESHOLD: i64 = 5;

/// A requested mutation of a product's stock level.
///
/// Closed set, exhaustively matched; there is deliberately no string-keyed
/// dispatch anywhere in the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StockAdjustment {
    /// Increase stock by a positive quantity.
    Add(i64),
    /// Decrease stock by a positive quantity; never below zero.
    Subtract(i64),
    /// Replace stock with a non-negative target level.
    Set(i64),
}

impl StockAdjustment {
    /// Compute the resulting stock level for `current`.
    ///
    /// `product_name` only feeds error messages.
    pub fn apply(self, current: i64, product_name: &str) -> DomainResult<i64> {
        match self {
            StockAdjustment::Add(qty) => {
                if qty <= 0 {
                    return Err(DomainError::invalid_quantity(
                        "quantity to add must be positive",
                    ));
                }
                Ok(current + qty)
            }
            StockAdjustment::Subtract(qty) => {
                if qty <= 0 {
                    return Err(DomainError::invalid_quantity(
                        "quantity to subtract must be positive",
                    ));
                }
                if current < qty {
                    return Err(DomainError::insufficient_stock(product_name, current, qty));
                }
                Ok(current - qty)
            }
            StockAdjustment::Set(target) => {
                if target < 0 {
                    return Err(DomainError::invalid_quantity(
                        "stock level cannot be negative",
                    ));
                }
                Ok(target)
            }
        }
    }
}

/// Low-stock predicate applied after every successful mutation.
pub fn is_low_stock(stock: i64) -> bool {
    stock <= LOW_STOCK_THRESHOLD
}
