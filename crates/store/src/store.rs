//! The storage contract: plain reads on [`Store`], transactional work on
//! [`Uow`].
//!
//! Every mutation of order/stock/payment state goes through a unit of work
//! obtained from [`Store::begin`]; dropping it without [`Uow::commit`] rolls
//! everything back. Implementations must guarantee that
//! [`Uow::lock_products`] takes exclusive locks and that two units of work
//! touching the same product or order serialize.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use comptoir_billing::{Invoice, Receipt};
use comptoir_catalog::{Client, Product, Service};
use comptoir_core::{ClientId, OrderId, PaymentId, ProductId, ServiceId};
use comptoir_inventory::{Movement, MovementDirection};
use comptoir_orders::{LinePlan, Order, OrderStatus, Payment};

use crate::error::StoreResult;
use crate::jobs::Job;

/// Pagination + filters for the order list endpoints.
#[derive(Debug, Clone, Default)]
pub struct OrderFilter {
    /// Substring match against the order number.
    pub search: Option<String>,
    pub status: Option<OrderStatus>,
    pub client_id: Option<ClientId>,
    pub date_from: Option<DateTime<Utc>>,
    pub date_to: Option<DateTime<Utc>>,
    pub page: u32,
    pub limit: u32,
}

impl OrderFilter {
    pub fn page(&self) -> u32 {
        self.page.max(1)
    }

    pub fn limit(&self) -> u32 {
        self.limit.clamp(1, 100)
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.page() - 1) * u64::from(self.limit())
    }
}

/// Filters for the movement audit listing.
#[derive(Debug, Clone, Default)]
pub struct MovementFilter {
    pub product_id: Option<ProductId>,
    pub direction: Option<MovementDirection>,
    pub page: u32,
    pub limit: u32,
}

impl MovementFilter {
    pub fn limit(&self) -> u32 {
        self.limit.clamp(1, 200)
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.page.max(1) - 1) * u64::from(self.limit())
    }
}

/// One page of results.
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u32,
    pub limit: u32,
}

impl<T> Page<T> {
    pub fn total_pages(&self) -> u64 {
        if self.limit == 0 {
            0
        } else {
            self.total.div_ceil(u64::from(self.limit))
        }
    }
}

/// Read side plus the entry point into transactional work.
#[async_trait]
pub trait Store: Send + Sync + 'static {
    type Uow: Uow;

    /// Open a unit of work. All locking reads and writes go through it.
    async fn begin(&self) -> StoreResult<Self::Uow>;

    async fn get_product(&self, id: ProductId) -> StoreResult<Option<Product>>;
    async fn get_service(&self, id: ServiceId) -> StoreResult<Option<Service>>;
    async fn get_client(&self, id: ClientId) -> StoreResult<Option<Client>>;

    /// Order with its lines; excludes soft-deleted orders.
    async fn get_order(&self, id: OrderId) -> StoreResult<Option<Order>>;
    async fn list_orders(&self, filter: &OrderFilter) -> StoreResult<Page<Order>>;
    async fn list_deleted_orders(&self, filter: &OrderFilter) -> StoreResult<Page<Order>>;

    async fn payments_for_order(&self, id: OrderId) -> StoreResult<Vec<Payment>>;
    /// Batch payment sums keyed by order id (list-endpoint enrichment).
    async fn payment_sums(&self, ids: &[OrderId]) -> StoreResult<HashMap<OrderId, f64>>;

    async fn latest_invoice(&self, order_id: OrderId) -> StoreResult<Option<Invoice>>;
    async fn latest_receipt(&self, order_id: OrderId) -> StoreResult<Option<Receipt>>;

    async fn list_movements(&self, filter: &MovementFilter) -> StoreResult<Vec<Movement>>;

    // Catalog writes: used by fixtures/seeding; catalog CRUD itself is out of
    // the core's scope.
    async fn insert_product(&self, product: &Product) -> StoreResult<()>;
    async fn insert_service(&self, service: &Service) -> StoreResult<()>;
    async fn insert_client(&self, client: &Client) -> StoreResult<()>;
}

/// One transaction. Dropping without commit rolls back.
#[async_trait]
pub trait Uow: Send + Sized {
    /// Exclusively lock the given product rows and return their current
    /// state. Implementations must acquire the locks in ascending product-id
    /// order regardless of input order.
    async fn lock_products(&mut self, ids: &[ProductId]) -> StoreResult<Vec<Product>>;

    /// Exclusively lock the order row and return the order with its lines.
    /// This is the serialization point for payments and status changes.
    async fn lock_order(&mut self, id: OrderId) -> StoreResult<Order>;

    // Non-locking reads inside the transaction.
    async fn get_products(&mut self, ids: &[ProductId]) -> StoreResult<Vec<Product>>;
    async fn get_services(&mut self, ids: &[ServiceId]) -> StoreResult<Vec<Service>>;
    async fn get_client(&mut self, id: ClientId) -> StoreResult<Option<Client>>;
    async fn get_payment(&mut self, id: PaymentId) -> StoreResult<Option<Payment>>;

    async fn sum_payments(&mut self, order_id: OrderId) -> StoreResult<f64>;
    async fn count_payments(&mut self, order_id: OrderId) -> StoreResult<i64>;
    async fn insert_payment(&mut self, payment: &Payment) -> StoreResult<()>;

    /// Write a new absolute stock level for a previously locked product.
    async fn update_product_stock(&mut self, id: ProductId, stock: i64) -> StoreResult<()>;
    async fn insert_movement(&mut self, movement: &Movement) -> StoreResult<()>;

    async fn insert_order(&mut self, order: &Order) -> StoreResult<()>;
    /// Persist header fields (status, totals, aggregates, timestamps).
    async fn update_order_header(&mut self, order: &Order) -> StoreResult<()>;
    /// Apply a line-reconciliation plan (upserts + deletes).
    async fn replace_lines(&mut self, order_id: OrderId, plan: &LinePlan) -> StoreResult<()>;

    /// Highest allocated sequential counters, for number allocation under
    /// the surrounding lock.
    async fn max_order_number(&mut self) -> StoreResult<u64>;
    async fn max_invoice_number(&mut self) -> StoreResult<u64>;
    async fn max_receipt_number(&mut self) -> StoreResult<u64>;

    async fn invoice_for_order(&mut self, order_id: OrderId) -> StoreResult<Option<Invoice>>;
    async fn insert_invoice(&mut self, invoice: &Invoice) -> StoreResult<()>;
    async fn insert_receipt(&mut self, receipt: &Receipt) -> StoreResult<()>;

    /// Durably enqueue a post-commit job in this transaction (outbox write).
    async fn enqueue_job(&mut self, job: &Job) -> StoreResult<()>;

    async fn commit(self) -> StoreResult<()>;
}
