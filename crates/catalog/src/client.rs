use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use comptoir_core::{ClientId, DomainError, DomainResult};

/// A customer an order can belong to.
///
/// Client CRUD lives outside this system's core; orders only need existence
/// and activity checks plus the identity block printed on documents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Client {
    pub id: ClientId,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Client {
    pub fn new(name: impl Into<String>, email: Option<String>, phone: Option<String>) -> DomainResult<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(DomainError::validation("client name cannot be empty"));
        }
        Ok(Self {
            id: ClientId::new(),
            name,
            email,
            phone,
            active: true,
            created_at: Utc::now(),
            deleted_at: None,
        })
    }

    pub fn is_active(&self) -> bool {
        self.active && self.deleted_at.is_none()
    }
}
