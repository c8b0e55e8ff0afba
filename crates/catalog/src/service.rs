use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use comptoir_core::{DomainError, DomainResult, ServiceId};

/// A billable service (no stock dimension).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Service {
    pub id: ServiceId,
    pub name: String,
    pub description: Option<String>,
    pub unit_price: f64,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Service {
    pub fn new(
        name: impl Into<String>,
        description: Option<String>,
        unit_price: f64,
    ) -> DomainResult<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(DomainError::validation("service name cannot be empty"));
        }
        if !unit_price.is_finite() || unit_price < 0.0 {
            return Err(DomainError::validation("unit price must be non-negative"));
        }

        let now = Utc::now();
        Ok(Self {
            id: ServiceId::new(),
            name,
            description,
            unit_price,
            active: true,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        })
    }

    pub fn is_sellable(&self) -> bool {
        self.active && self.deleted_at.is_none()
    }
}
