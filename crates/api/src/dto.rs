//! Request payloads and JSON projections.
//!
//! Successful responses use the `{"success": true, "data": ...}` envelope;
//! the error half of the contract lives in [`crate::errors`].

use core::str::FromStr;

use serde::Deserialize;
use serde_json::{Value, json};

use comptoir_billing::Invoice;
use comptoir_catalog::Product;
use comptoir_inventory::Movement;
use comptoir_orders::{LineItem, LineSpec, Order, OrderLine, Payment, PaymentSummary};

use crate::errors::ApiError;

// ── Requests ────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderDto {
    pub client_id: Option<String>,
    #[serde(default)]
    pub produits: Vec<NewLineDto>,
    #[serde(default)]
    pub services: Vec<NewLineDto>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewLineDto {
    pub product_id: Option<String>,
    pub service_id: Option<String>,
    pub quantity: i64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateOrderDto {
    pub client_id: Option<String>,
    pub status: Option<String>,
    pub produits: Option<Vec<LineSpecDto>>,
    pub services: Option<Vec<LineSpecDto>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineSpecDto {
    pub line_id: Option<String>,
    pub product_id: Option<String>,
    pub service_id: Option<String>,
    pub quantity: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentDto {
    pub amount: f64,
    pub mode: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StockAdjustDto {
    pub quantity: i64,
    pub mode: String,
    pub note: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddProductLineDto {
    pub product_id: String,
    pub quantity: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddServiceLineDto {
    pub service_id: String,
    pub quantity: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateLineDto {
    pub quantity: i64,
}

// ── Parsing helpers ─────────────────────────────────────────────────────────

pub fn parse_id<T: FromStr>(value: &str, what: &str) -> Result<T, ApiError> {
    value
        .parse::<T>()
        .map_err(|_| ApiError::validation(format!("invalid {what}: {value}")))
}

impl LineSpecDto {
    pub fn into_spec(self, kind: LineKind) -> Result<LineSpec, ApiError> {
        let line_id = self
            .line_id
            .as_deref()
            .map(|s| parse_id(s, "line id"))
            .transpose()?;

        let item = match kind {
            LineKind::Product => self
                .product_id
                .as_deref()
                .map(|s| parse_id(s, "product id").map(LineItem::Product))
                .transpose()?,
            LineKind::Service => self
                .service_id
                .as_deref()
                .map(|s| parse_id(s, "service id").map(LineItem::Service))
                .transpose()?,
        };

        Ok(LineSpec {
            line_id,
            item,
            quantity: self.quantity,
        })
    }
}

#[derive(Debug, Clone, Copy)]
pub enum LineKind {
    Product,
    Service,
}

// ── JSON projections ────────────────────────────────────────────────────────

fn line_json(line: &OrderLine) -> Value {
    let mut value = json!({
        "lineId": line.id,
        "name": line.name,
        "quantity": line.quantity,
        "unitPrice": line.unit_price,
        "total": line.total,
    });
    match line.item {
        LineItem::Product(id) => value["productId"] = json!(id),
        LineItem::Service(id) => value["serviceId"] = json!(id),
    }
    value
}

pub fn order_json(order: &Order) -> Value {
    order_with_summary_json(order, order.summary())
}

/// Order projection with an externally computed payment summary (the list
/// endpoint feeds authoritative batch sums here).
pub fn order_with_summary_json(order: &Order, summary: PaymentSummary) -> Value {
    let (produits, services): (Vec<&OrderLine>, Vec<&OrderLine>) = order
        .lines
        .iter()
        .partition(|l| matches!(l.item, LineItem::Product(_)));

    json!({
        "id": order.id,
        "number": order.number,
        "clientId": order.client_id,
        "createdBy": order.created_by,
        "status": order.status,
        "total": order.total,
        "paidTotal": summary.paid_total,
        "remaining": summary.remaining,
        "settlementStatus": summary.status,
        "stockCommittedAt": order.stock_committed_at,
        "createdAt": order.created_at,
        "updatedAt": order.updated_at,
        "deletedAt": order.deleted_at,
        "produits": produits.iter().map(|l| line_json(l)).collect::<Vec<_>>(),
        "services": services.iter().map(|l| line_json(l)).collect::<Vec<_>>(),
    })
}

pub fn payment_json(payment: &Payment) -> Value {
    json!({
        "id": payment.id,
        "orderId": payment.order_id,
        "amount": payment.amount,
        "mode": payment.mode,
        "paidAt": payment.paid_at,
    })
}

pub fn summary_json(summary: &PaymentSummary) -> Value {
    json!({
        "paidTotal": summary.paid_total,
        "remaining": summary.remaining,
        "settlementStatus": summary.status,
    })
}

pub fn invoice_json(invoice: &Invoice) -> Value {
    json!({
        "id": invoice.id,
        "code": invoice.code,
        "number": invoice.number,
        "orderId": invoice.order_id,
        "issuedAt": invoice.issued_at,
    })
}

pub fn product_json(product: &Product) -> Value {
    json!({
        "id": product.id,
        "name": product.name,
        "unitPrice": product.unit_price,
        "stock": product.stock,
        "active": product.active,
        "updatedAt": product.updated_at,
    })
}

pub fn movement_json(movement: &Movement) -> Value {
    json!({
        "id": movement.id,
        "productId": movement.product_id,
        "quantity": movement.quantity,
        "direction": movement.direction,
        "source": movement.source,
        "userId": movement.user_id,
        "note": movement.note,
        "createdAt": movement.created_at,
    })
}
