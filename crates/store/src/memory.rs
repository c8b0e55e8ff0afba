//! In-memory backend for dev and tests.
//!
//! Semantics mirror the Postgres backend at a coarser grain: a unit of work
//! holds the single state lock for its whole lifetime (every transaction is
//! serialized) and operates on a snapshot, so dropping it without commit is
//! a true rollback. The invariants the engine relies on (exclusive product
//! access, payment serialization per order) hold trivially.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{Mutex, OwnedMutexGuard};

use comptoir_billing::{Invoice, Receipt};
use comptoir_catalog::{Client, Product, Service};
use comptoir_core::{
    ClientId, DomainError, OrderId, PaymentId, ProductId, ServiceId, parse_sequential,
};
use comptoir_inventory::Movement;
use comptoir_orders::{LinePlan, Order, Payment};

use crate::error::StoreResult;
use crate::jobs::{DeadLetterEntry, Job, JobId, JobStore, JobStoreError};
use crate::store::{MovementFilter, OrderFilter, Page, Store, Uow};

#[derive(Debug, Clone, Default)]
struct State {
    products: HashMap<ProductId, Product>,
    services: HashMap<ServiceId, Service>,
    clients: HashMap<ClientId, Client>,
    orders: HashMap<OrderId, Order>,
    payments: Vec<Payment>,
    movements: Vec<Movement>,
    invoices: Vec<Invoice>,
    receipts: Vec<Receipt>,
    jobs: HashMap<JobId, Job>,
    dead_letters: Vec<DeadLetterEntry>,
}

/// In-memory store. Cheap to clone; all clones share the same state.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Snapshot-based unit of work over the whole state.
pub struct MemoryUow {
    guard: OwnedMutexGuard<State>,
    working: State,
}

#[async_trait]
impl Store for MemoryStore {
    type Uow = MemoryUow;

    async fn begin(&self) -> StoreResult<MemoryUow> {
        let guard = self.state.clone().lock_owned().await;
        let working = guard.clone();
        Ok(MemoryUow { guard, working })
    }

    async fn get_product(&self, id: ProductId) -> StoreResult<Option<Product>> {
        Ok(self.state.lock().await.products.get(&id).cloned())
    }

    async fn get_service(&self, id: ServiceId) -> StoreResult<Option<Service>> {
        Ok(self.state.lock().await.services.get(&id).cloned())
    }

    async fn get_client(&self, id: ClientId) -> StoreResult<Option<Client>> {
        Ok(self.state.lock().await.clients.get(&id).cloned())
    }

    async fn get_order(&self, id: OrderId) -> StoreResult<Option<Order>> {
        Ok(self
            .state
            .lock()
            .await
            .orders
            .get(&id)
            .filter(|o| o.deleted_at.is_none())
            .cloned())
    }

    async fn list_orders(&self, filter: &OrderFilter) -> StoreResult<Page<Order>> {
        Ok(list_orders_where(
            &*self.state.lock().await,
            filter,
            false,
        ))
    }

    async fn list_deleted_orders(&self, filter: &OrderFilter) -> StoreResult<Page<Order>> {
        Ok(list_orders_where(&*self.state.lock().await, filter, true))
    }

    async fn payments_for_order(&self, id: OrderId) -> StoreResult<Vec<Payment>> {
        let state = self.state.lock().await;
        let mut payments: Vec<Payment> = state
            .payments
            .iter()
            .filter(|p| p.order_id == id)
            .cloned()
            .collect();
        payments.sort_by(|a, b| b.paid_at.cmp(&a.paid_at));
        Ok(payments)
    }

    async fn payment_sums(&self, ids: &[OrderId]) -> StoreResult<HashMap<OrderId, f64>> {
        let state = self.state.lock().await;
        let mut sums: HashMap<OrderId, f64> = HashMap::new();
        for payment in &state.payments {
            if ids.contains(&payment.order_id) {
                *sums.entry(payment.order_id).or_default() += payment.amount;
            }
        }
        Ok(sums)
    }

    async fn latest_invoice(&self, order_id: OrderId) -> StoreResult<Option<Invoice>> {
        let state = self.state.lock().await;
        Ok(state
            .invoices
            .iter()
            .filter(|i| i.order_id == order_id)
            .max_by_key(|i| i.issued_at)
            .cloned())
    }

    async fn latest_receipt(&self, order_id: OrderId) -> StoreResult<Option<Receipt>> {
        let state = self.state.lock().await;
        Ok(state
            .receipts
            .iter()
            .filter(|r| r.order_id == order_id)
            .max_by_key(|r| r.created_at)
            .cloned())
    }

    async fn list_movements(&self, filter: &MovementFilter) -> StoreResult<Vec<Movement>> {
        let state = self.state.lock().await;
        let mut movements: Vec<Movement> = state
            .movements
            .iter()
            .filter(|m| filter.product_id.is_none_or(|pid| m.product_id == pid))
            .filter(|m| filter.direction.is_none_or(|d| m.direction == d))
            .cloned()
            .collect();
        movements.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        let offset = filter.offset() as usize;
        let limit = filter.limit() as usize;
        Ok(movements.into_iter().skip(offset).take(limit).collect())
    }

    async fn insert_product(&self, product: &Product) -> StoreResult<()> {
        self.state
            .lock()
            .await
            .products
            .insert(product.id, product.clone());
        Ok(())
    }

    async fn insert_service(&self, service: &Service) -> StoreResult<()> {
        self.state
            .lock()
            .await
            .services
            .insert(service.id, service.clone());
        Ok(())
    }

    async fn insert_client(&self, client: &Client) -> StoreResult<()> {
        self.state
            .lock()
            .await
            .clients
            .insert(client.id, client.clone());
        Ok(())
    }
}

fn list_orders_where(state: &State, filter: &OrderFilter, deleted: bool) -> Page<Order> {
    let mut orders: Vec<Order> = state
        .orders
        .values()
        .filter(|o| o.deleted_at.is_some() == deleted)
        .filter(|o| {
            filter
                .search
                .as_deref()
                .is_none_or(|s| o.number.to_lowercase().contains(&s.to_lowercase()))
        })
        .filter(|o| filter.status.is_none_or(|s| o.status == s))
        .filter(|o| filter.client_id.is_none_or(|c| o.client_id == Some(c)))
        .filter(|o| filter.date_from.is_none_or(|d| o.created_at >= d))
        .filter(|o| filter.date_to.is_none_or(|d| o.created_at <= d))
        .cloned()
        .collect();
    orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));

    let total = orders.len() as u64;
    let items = orders
        .into_iter()
        .skip(filter.offset() as usize)
        .take(filter.limit() as usize)
        .collect();
    Page {
        items,
        total,
        page: filter.page(),
        limit: filter.limit(),
    }
}

#[async_trait]
impl Uow for MemoryUow {
    async fn lock_products(&mut self, ids: &[ProductId]) -> StoreResult<Vec<Product>> {
        // The state lock is already exclusive; ordering only needs to match
        // the contract so callers see deterministic results.
        let mut sorted: Vec<ProductId> = ids.to_vec();
        sorted.sort();
        sorted.dedup();

        let mut products = Vec::with_capacity(sorted.len());
        for id in sorted {
            let product = self
                .working
                .products
                .get(&id)
                .cloned()
                .ok_or(DomainError::NotFound)?;
            products.push(product);
        }
        Ok(products)
    }

    async fn lock_order(&mut self, id: OrderId) -> StoreResult<Order> {
        self.working
            .orders
            .get(&id)
            .filter(|o| o.deleted_at.is_none())
            .cloned()
            .ok_or_else(|| DomainError::NotFound.into())
    }

    async fn get_products(&mut self, ids: &[ProductId]) -> StoreResult<Vec<Product>> {
        Ok(ids
            .iter()
            .filter_map(|id| self.working.products.get(id).cloned())
            .collect())
    }

    async fn get_services(&mut self, ids: &[ServiceId]) -> StoreResult<Vec<Service>> {
        Ok(ids
            .iter()
            .filter_map(|id| self.working.services.get(id).cloned())
            .collect())
    }

    async fn get_client(&mut self, id: ClientId) -> StoreResult<Option<Client>> {
        Ok(self.working.clients.get(&id).cloned())
    }

    async fn get_payment(&mut self, id: PaymentId) -> StoreResult<Option<Payment>> {
        Ok(self.working.payments.iter().find(|p| p.id == id).cloned())
    }

    async fn sum_payments(&mut self, order_id: OrderId) -> StoreResult<f64> {
        Ok(self
            .working
            .payments
            .iter()
            .filter(|p| p.order_id == order_id)
            .map(|p| p.amount)
            .sum())
    }

    async fn count_payments(&mut self, order_id: OrderId) -> StoreResult<i64> {
        Ok(self
            .working
            .payments
            .iter()
            .filter(|p| p.order_id == order_id)
            .count() as i64)
    }

    async fn insert_payment(&mut self, payment: &Payment) -> StoreResult<()> {
        self.working.payments.push(payment.clone());
        Ok(())
    }

    async fn update_product_stock(&mut self, id: ProductId, stock: i64) -> StoreResult<()> {
        let product = self
            .working
            .products
            .get_mut(&id)
            .ok_or(DomainError::NotFound)?;
        product.stock = stock;
        product.updated_at = Utc::now();
        Ok(())
    }

    async fn insert_movement(&mut self, movement: &Movement) -> StoreResult<()> {
        self.working.movements.push(movement.clone());
        Ok(())
    }

    async fn insert_order(&mut self, order: &Order) -> StoreResult<()> {
        self.working.orders.insert(order.id, order.clone());
        Ok(())
    }

    async fn update_order_header(&mut self, order: &Order) -> StoreResult<()> {
        let existing = self
            .working
            .orders
            .get_mut(&order.id)
            .ok_or(DomainError::NotFound)?;
        let lines = std::mem::take(&mut existing.lines);
        *existing = order.clone();
        existing.lines = lines;
        Ok(())
    }

    async fn replace_lines(&mut self, order_id: OrderId, plan: &LinePlan) -> StoreResult<()> {
        let order = self
            .working
            .orders
            .get_mut(&order_id)
            .ok_or(DomainError::NotFound)?;
        order.lines = plan.lines.clone();
        Ok(())
    }

    async fn max_order_number(&mut self) -> StoreResult<u64> {
        Ok(self
            .working
            .orders
            .values()
            .filter_map(|o| parse_sequential('C', &o.number))
            .max()
            .unwrap_or(0))
    }

    async fn max_invoice_number(&mut self) -> StoreResult<u64> {
        Ok(self
            .working
            .invoices
            .iter()
            .filter_map(|i| parse_sequential('F', &i.number))
            .max()
            .unwrap_or(0))
    }

    async fn max_receipt_number(&mut self) -> StoreResult<u64> {
        Ok(self
            .working
            .receipts
            .iter()
            .filter_map(|r| parse_sequential('R', &r.number))
            .max()
            .unwrap_or(0))
    }

    async fn invoice_for_order(&mut self, order_id: OrderId) -> StoreResult<Option<Invoice>> {
        Ok(self
            .working
            .invoices
            .iter()
            .find(|i| i.order_id == order_id)
            .cloned())
    }

    async fn insert_invoice(&mut self, invoice: &Invoice) -> StoreResult<()> {
        self.working.invoices.push(invoice.clone());
        Ok(())
    }

    async fn insert_receipt(&mut self, receipt: &Receipt) -> StoreResult<()> {
        self.working.receipts.push(receipt.clone());
        Ok(())
    }

    async fn enqueue_job(&mut self, job: &Job) -> StoreResult<()> {
        self.working.jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn commit(self) -> StoreResult<()> {
        let MemoryUow { mut guard, working } = self;
        *guard = working;
        Ok(())
    }
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn claim_next(&self) -> Result<Option<Job>, JobStoreError> {
        let mut state = self.state.lock().await;
        let now = Utc::now();

        let mut candidates: Vec<JobId> = state
            .jobs
            .values()
            .filter(|j| j.status.is_claimable() && j.is_ready(now))
            .map(|j| j.id)
            .collect();
        candidates.sort_by_key(|id| state.jobs[id].created_at);

        if let Some(id) = candidates.first() {
            if let Some(job) = state.jobs.get_mut(id) {
                job.mark_running();
                return Ok(Some(job.clone()));
            }
        }
        Ok(None)
    }

    async fn update_job(&self, job: &Job) -> Result<(), JobStoreError> {
        let mut state = self.state.lock().await;
        if !state.jobs.contains_key(&job.id) {
            return Err(JobStoreError::NotFound(job.id));
        }
        state.jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn dead_letter(&self, job: Job, reason: String) -> Result<(), JobStoreError> {
        let mut state = self.state.lock().await;
        state.jobs.remove(&job.id);
        state.dead_letters.push(DeadLetterEntry::new(job, reason));
        Ok(())
    }

    async fn list_dead_letters(&self, limit: usize) -> Result<Vec<DeadLetterEntry>, JobStoreError> {
        let state = self.state.lock().await;
        let mut entries = state.dead_letters.clone();
        entries.sort_by_key(|e| e.dead_lettered_at);
        entries.truncate(limit);
        Ok(entries)
    }

    async fn pending_jobs(&self) -> Result<usize, JobStoreError> {
        let state = self.state.lock().await;
        Ok(state
            .jobs
            .values()
            .filter(|j| j.status.is_claimable())
            .count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::JobStatus;
    use comptoir_catalog::Product;

    #[tokio::test]
    async fn commit_makes_writes_visible() {
        let store = MemoryStore::new();
        let product = Product::new("Clavier", None, 100.0, 10).unwrap();
        store.insert_product(&product).await.unwrap();

        let mut uow = store.begin().await.unwrap();
        uow.update_product_stock(product.id, 7).await.unwrap();
        uow.commit().await.unwrap();

        let stored = store.get_product(product.id).await.unwrap().unwrap();
        assert_eq!(stored.stock, 7);
    }

    #[tokio::test]
    async fn dropping_a_unit_of_work_rolls_back() {
        let store = MemoryStore::new();
        let product = Product::new("Clavier", None, 100.0, 10).unwrap();
        store.insert_product(&product).await.unwrap();

        {
            let mut uow = store.begin().await.unwrap();
            uow.update_product_stock(product.id, 0).await.unwrap();
            // No commit.
        }

        let stored = store.get_product(product.id).await.unwrap().unwrap();
        assert_eq!(stored.stock, 10);
    }

    #[tokio::test]
    async fn enqueued_jobs_commit_with_the_transaction() {
        let store = MemoryStore::new();

        {
            let mut uow = store.begin().await.unwrap();
            uow.enqueue_job(&Job::notification("t", "m", serde_json::json!({})))
                .await
                .unwrap();
            // Dropped: the job must not exist.
        }
        assert!(store.claim_next().await.unwrap().is_none());

        let mut uow = store.begin().await.unwrap();
        uow.enqueue_job(&Job::notification("t", "m", serde_json::json!({})))
            .await
            .unwrap();
        uow.commit().await.unwrap();

        let claimed = store.claim_next().await.unwrap().unwrap();
        assert!(matches!(claimed.status, JobStatus::Running));
        assert!(store.claim_next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn lock_products_reports_missing_rows() {
        let store = MemoryStore::new();
        let mut uow = store.begin().await.unwrap();
        let err = uow.lock_products(&[ProductId::new()]).await.unwrap_err();
        assert!(matches!(
            err.as_domain(),
            Some(comptoir_core::DomainError::NotFound)
        ));
    }
}
