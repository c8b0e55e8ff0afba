use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use comptoir_core::{InvoiceId, OrderId};
use comptoir_orders::Order;

/// Client identity block printed on documents.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PartyInfo {
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
}

/// One printed document line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoiceLine {
    pub name: String,
    pub quantity: i64,
    pub unit_price: f64,
    pub total: f64,
}

/// Structured input handed to the renderer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoiceData {
    pub number: String,
    pub code: String,
    pub date: DateTime<Utc>,
    pub client: Option<PartyInfo>,
    pub lines: Vec<InvoiceLine>,
    pub total: f64,
    /// Free-form annotation, e.g. a partial-payment notice.
    pub note: Option<String>,
}

/// Persisted reference to a rendered invoice. At most one per order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invoice {
    pub id: InvoiceId,
    pub code: String,
    pub number: String,
    pub order_id: OrderId,
    pub png_path: String,
    pub pdf_path: String,
    pub issued_at: DateTime<Utc>,
}

/// Build the invoice data for an order's current state.
///
/// The total printed is the order's persisted total (the lines are a
/// faithful copy of the surviving order lines).
pub fn invoice_data_from_order(
    order: &Order,
    number: String,
    code: String,
    client: Option<PartyInfo>,
    note: Option<String>,
) -> InvoiceData {
    let lines = order
        .lines
        .iter()
        .map(|l| InvoiceLine {
            name: l.name.clone(),
            quantity: l.quantity,
            unit_price: l.unit_price,
            total: l.total,
        })
        .collect();

    InvoiceData {
        number,
        code,
        date: Utc::now(),
        client,
        lines,
        total: order.total,
        note,
    }
}
