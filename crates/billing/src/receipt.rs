use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use comptoir_core::{OrderId, PaymentId, ReceiptId};
use comptoir_orders::{Order, Payment, PaymentSummary};

use crate::invoice::PartyInfo;

/// Structured input for rendering one payment receipt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReceiptData {
    pub number: String,
    pub code: String,
    pub date: DateTime<Utc>,
    pub order_number: String,
    pub client: Option<PartyInfo>,
    /// Amount of this payment event.
    pub amount: f64,
    pub mode: String,
    /// Running totals after the payment.
    pub paid_total: f64,
    pub remaining: f64,
}

/// Persisted reference to a rendered receipt. One per payment event;
/// receipts are deliberately not deduplicated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Receipt {
    pub id: ReceiptId,
    pub code: String,
    pub number: String,
    pub order_id: OrderId,
    pub payment_id: PaymentId,
    pub amount: f64,
    pub png_path: String,
    pub pdf_path: String,
    pub created_at: DateTime<Utc>,
}

/// Build the receipt data for a recorded payment.
pub fn receipt_data(
    order: &Order,
    payment: &Payment,
    summary: PaymentSummary,
    number: String,
    code: String,
    client: Option<PartyInfo>,
) -> ReceiptData {
    ReceiptData {
        number,
        code,
        date: Utc::now(),
        order_number: order.number.clone(),
        client,
        amount: payment.amount,
        mode: payment.mode.to_string(),
        paid_total: summary.paid_total,
        remaining: summary.remaining,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use comptoir_core::ProductId;
    use comptoir_orders::{LineItem, OrderLine, PaymentMode};

    #[test]
    fn receipt_reflects_the_payment_and_running_totals() {
        let order = Order::create(
            "C000009".into(),
            None,
            None,
            vec![OrderLine::new(
                LineItem::Product(ProductId::new()),
                "Clavier",
                3,
                100.0,
            )],
        )
        .unwrap();
        let payment = Payment::new(order.id, 200.0, PaymentMode::Cash);
        let summary = PaymentSummary::compute(order.total, 200.0);

        let data = receipt_data(&order, &payment, summary, "R000001".into(), "REC-1".into(), None);
        assert_eq!(data.amount, 200.0);
        assert_eq!(data.paid_total, 200.0);
        assert_eq!(data.remaining, 100.0);
        assert_eq!(data.mode, "cash");
        assert_eq!(data.order_number, "C000009");
    }
}
