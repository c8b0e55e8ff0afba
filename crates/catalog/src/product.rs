use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use comptoir_core::{DomainError, DomainResult, ProductId};

/// A sellable, stock-tracked catalog product.
///
/// The `stock` field is a mirror owned by the stock ledger; nothing outside
/// the ledger may write it. Soft deletion keeps historical order lines
/// resolvable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    pub description: Option<String>,
    pub unit_price: f64,
    pub stock: i64,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Product {
    /// Build a new product, enforcing the catalog invariants.
    pub fn new(
        name: impl Into<String>,
        description: Option<String>,
        unit_price: f64,
        stock: i64,
    ) -> DomainResult<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(DomainError::validation("product name cannot be empty"));
        }
        if !unit_price.is_finite() || unit_price < 0.0 {
            return Err(DomainError::validation("unit price must be non-negative"));
        }
        if stock < 0 {
            return Err(DomainError::invalid_quantity("stock cannot be negative"));
        }

        let now = Utc::now();
        Ok(Self {
            id: ProductId::new(),
            name,
            description,
            unit_price,
            stock,
            active: true,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        })
    }

    /// Check if the product can appear on a new or edited order line.
    pub fn is_sellable(&self) -> bool {
        self.active && self.deleted_at.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_product_is_sellable() {
        let p = Product::new("Clavier", None, 100.0, 10).unwrap();
        assert!(p.is_sellable());
        assert_eq!(p.stock, 10);
    }

    #[test]
    fn rejects_blank_name() {
        let err = Product::new("   ", None, 100.0, 10).unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn rejects_negative_price_and_stock() {
        assert!(matches!(
            Product::new("Clavier", None, -1.0, 0).unwrap_err(),
            DomainError::Validation(_)
        ));
        assert!(matches!(
            Product::new("Clavier", None, 1.0, -3).unwrap_err(),
            DomainError::InvalidQuantity(_)
        ));
    }

    #[test]
    fn soft_deleted_product_is_not_sellable() {
        let mut p = Product::new("Clavier", None, 100.0, 10).unwrap();
        p.deleted_at = Some(Utc::now());
        assert!(!p.is_sellable());

        let mut q = Product::new("Souris", None, 50.0, 10).unwrap();
        q.active = false;
        assert!(!q.is_sellable());
    }
}
