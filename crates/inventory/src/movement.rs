//! Append-only stock movement records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use comptoir_core::{MovementId, ProductId, UserId};

/// Direction of a stock movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MovementDirection {
    In,
    Out,
}

impl MovementDirection {
    pub fn as_str(self) -> &'static str {
        match self {
            MovementDirection::In => "IN",
            MovementDirection::Out => "OUT",
        }
    }
}

/// What caused a stock movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MovementSource {
    /// A manual stock adjustment through the stock endpoint.
    Manual,
    /// An order finalization/settlement decrementing stock.
    Sale,
}

impl MovementSource {
    pub fn as_str(self) -> &'static str {
        match self {
            MovementSource::Manual => "MANUAL",
            MovementSource::Sale => "SALE",
        }
    }
}

/// One audit record per stock-affecting operation.
///
/// Pure append; recording carries no business validation of its own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Movement {
    pub id: MovementId,
    pub product_id: ProductId,
    pub quantity: i64,
    pub direction: MovementDirection,
    pub source: MovementSource,
    pub user_id: Option<UserId>,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Movement {
    pub fn new(
        product_id: ProductId,
        quantity: i64,
        direction: MovementDirection,
        source: MovementSource,
        user_id: Option<UserId>,
        note: Option<String>,
    ) -> Self {
        Self {
            id: MovementId::new(),
            product_id,
            quantity,
            direction,
            source,
            user_id,
            note,
            created_at: Utc::now(),
        }
    }

    /// Build the movement describing a stock delta, or `None` when the level
    /// did not change (a SET to the current value leaves no audit row).
    pub fn for_delta(
        product_id: ProductId,
        delta: i64,
        source: MovementSource,
        user_id: Option<UserId>,
        note: Option<String>,
    ) -> Option<Self> {
        if delta == 0 {
            return None;
        }
        let direction = if delta > 0 {
            MovementDirection::In
        } else {
            MovementDirection::Out
        };
        Some(Self::new(
            product_id,
            delta.abs(),
            direction,
            source,
            user_id,
            note,
        ))
    }
}
