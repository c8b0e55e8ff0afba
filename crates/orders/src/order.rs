//! The order aggregate: header, lines, totals, immutability guard.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use comptoir_core::{
    ClientId, DomainError, DomainResult, OrderId, OrderLineId, ProductId, ServiceId, UserId,
};

use crate::payment::{PaymentSummary, SettlementStatus};
use crate::status::OrderStatus;

/// What an order line points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LineItem {
    Product(ProductId),
    Service(ServiceId),
}

impl LineItem {
    pub fn product_id(self) -> Option<ProductId> {
        match self {
            LineItem::Product(id) => Some(id),
            LineItem::Service(_) => None,
        }
    }

    pub fn service_id(self) -> Option<ServiceId> {
        match self {
            LineItem::Product(_) => None,
            LineItem::Service(id) => Some(id),
        }
    }
}

/// One product or service entry on an order.
///
/// `unit_price` is a snapshot taken from the catalog at reconciliation time;
/// it is never client-supplied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderLine {
    pub id: OrderLineId,
    pub item: LineItem,
    pub name: String,
    pub quantity: i64,
    pub unit_price: f64,
    pub total: f64,
}

impl OrderLine {
    pub fn new(item: LineItem, name: impl Into<String>, quantity: i64, unit_price: f64) -> Self {
        Self {
            id: OrderLineId::new(),
            item,
            name: name.into(),
            quantity,
            unit_price,
            total: quantity as f64 * unit_price,
        }
    }
}

/// The order header plus its lines.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    /// Human-readable sequential number (`C000001`).
    pub number: String,
    pub client_id: Option<ClientId>,
    pub created_by: Option<UserId>,
    pub status: OrderStatus,
    /// Persisted derived total; always the sum of surviving line totals.
    pub total: f64,
    /// Mirror of the payment aggregate, maintained transactionally.
    pub paid_total: f64,
    pub settlement: SettlementStatus,
    /// Set the first (and only) time stock is decremented for this order.
    pub stock_committed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub lines: Vec<OrderLine>,
}

impl Order {
    /// Build a new pending order from planned lines.
    pub fn create(
        number: String,
        client_id: Option<ClientId>,
        created_by: Option<UserId>,
        lines: Vec<OrderLine>,
    ) -> DomainResult<Self> {
        if lines.is_empty() {
            return Err(DomainError::validation(
                "order must contain at least one product or service line",
            ));
        }

        let now = Utc::now();
        let mut order = Self {
            id: OrderId::new(),
            number,
            client_id,
            created_by,
            status: OrderStatus::Pending,
            total: 0.0,
            paid_total: 0.0,
            settlement: SettlementStatus::Unpaid,
            stock_committed_at: None,
            created_at: now,
            updated_at: now,
            deleted_at: None,
            lines,
        };
        order.recompute_total();
        Ok(order)
    }

    /// Re-derive the persisted total from the lines.
    pub fn recompute_total(&mut self) {
        self.total = self.lines.iter().map(|l| l.total).sum();
    }

    /// Current payment summary against the persisted total.
    pub fn summary(&self) -> PaymentSummary {
        PaymentSummary::compute(self.total, self.paid_total)
    }

    /// Guard for line/field edits.
    ///
    /// An order stops accepting edits the moment it has a recorded payment or
    /// leaves PENDING; only payment recording and the explicitly permitted
    /// status transitions bypass this.
    pub fn ensure_mutable(&self, has_payments: bool) -> DomainResult<()> {
        if has_payments || self.settlement != SettlementStatus::Unpaid {
            return Err(DomainError::immutable(
                "order has recorded payments and can no longer be edited",
            ));
        }
        if self.status.is_terminal() {
            return Err(DomainError::immutable(format!(
                "order is {} and can no longer be edited",
                self.status
            )));
        }
        Ok(())
    }

    /// Product lines only, with their quantities (used for stock commitment).
    pub fn product_demand(&self) -> Vec<(ProductId, i64)> {
        self.lines
            .iter()
            .filter_map(|l| l.item.product_id().map(|id| (id, l.quantity)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn product_line(qty: i64, price: f64) -> OrderLine {
        OrderLine::new(LineItem::Product(ProductId::new()), "Produit", qty, price)
    }

    fn service_line(qty: i64, price: f64) -> OrderLine {
        OrderLine::new(LineItem::Service(ServiceId::new()), "Service", qty, price)
    }

    #[test]
    fn creation_requires_at_least_one_line() {
        let err = Order::create("C000001".into(), None, None, vec![]).unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn total_is_the_sum_of_line_totals() {
        let order = Order::create(
            "C000001".into(),
            None,
            None,
            vec![product_line(3, 100.0), service_line(1, 50.0)],
        )
        .unwrap();
        assert_eq!(order.total, 350.0);
        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(order.settlement, SettlementStatus::Unpaid);
        assert!(order.stock_committed_at.is_none());
    }

    #[test]
    fn recompute_follows_line_changes() {
        let mut order =
            Order::create("C000001".into(), None, None, vec![product_line(2, 10.0)]).unwrap();
        order.lines.push(service_line(4, 5.0));
        order.recompute_total();
        assert_eq!(order.total, 40.0);
    }

    #[test]
    fn pending_unpaid_order_is_mutable() {
        let order =
            Order::create("C000001".into(), None, None, vec![product_line(1, 10.0)]).unwrap();
        assert!(order.ensure_mutable(false).is_ok());
    }

    #[test]
    fn any_payment_freezes_the_order() {
        let order =
            Order::create("C000001".into(), None, None, vec![product_line(1, 10.0)]).unwrap();
        let err = order.ensure_mutable(true).unwrap_err();
        assert!(matches!(err, DomainError::OrderImmutable(_)));

        let mut partially_paid = order.clone();
        partially_paid.paid_total = 5.0;
        partially_paid.settlement = SettlementStatus::Partial;
        assert!(partially_paid.ensure_mutable(false).is_err());
    }

    #[test]
    fn finalized_order_is_immutable() {
        let mut order =
            Order::create("C000001".into(), None, None, vec![product_line(1, 10.0)]).unwrap();
        order.status = OrderStatus::Confirmed;
        let err = order.ensure_mutable(false).unwrap_err();
        assert!(matches!(err, DomainError::OrderImmutable(_)));
    }

    #[test]
    fn product_demand_skips_service_lines() {
        let order = Order::create(
            "C000001".into(),
            None,
            None,
            vec![product_line(3, 100.0), service_line(1, 50.0)],
        )
        .unwrap();
        let demand = order.product_demand();
        assert_eq!(demand.len(), 1);
        assert_eq!(demand[0].1, 3);
    }
}
