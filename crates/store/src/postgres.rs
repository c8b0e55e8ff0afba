//! PostgreSQL backend.
//!
//! Runtime sqlx queries; one `Transaction` per unit of work. Row locks are
//! taken with `FOR UPDATE`, and product locks are always acquired in
//! ascending id order so concurrent reconciliations over overlapping product
//! sets cannot deadlock.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgRow};
use sqlx::{Postgres, Row, Transaction};
use uuid::Uuid;

use comptoir_billing::{Invoice, Receipt};
use comptoir_catalog::{Client, Product, Service};
use comptoir_core::{ClientId, DomainError, OrderId, PaymentId, ProductId, ServiceId};
use comptoir_inventory::{Movement, MovementDirection, MovementSource};
use comptoir_orders::{
    LineItem, LinePlan, Order, OrderLine, OrderStatus, Payment, PaymentMode, SettlementStatus,
};

use crate::error::{StoreError, StoreResult, map_sqlx_error};
use crate::jobs::{
    DeadLetterEntry, Job, JobId, JobKind, JobStatus, JobStore, JobStoreError, RetryPolicy,
};
use crate::store::{MovementFilter, OrderFilter, Page, Store, Uow};

const ORDER_COLUMNS: &str = "id, number, client_id, created_by, status, total, paid_total, \
     settlement, stock_committed_at, created_at, updated_at, deleted_at";

const LINE_COLUMNS: &str = "id, order_id, product_id, service_id, name, quantity, unit_price, total";

const PRODUCT_COLUMNS: &str =
    "id, name, description, unit_price, stock, active, created_at, updated_at, deleted_at";

const JOB_COLUMNS: &str = "id, kind, payload, status, error, attempt, max_attempts, \
     base_delay_ms, scheduled_at, created_at, updated_at";

/// Postgres-backed store.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> StoreResult<Self> {
        let pool = PgPool::connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }

    /// Apply the embedded schema migrations.
    pub async fn migrate(&self) -> StoreResult<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::storage("migrate", e))?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn fetch_lines_for(&self, order_ids: &[Uuid]) -> StoreResult<HashMap<Uuid, Vec<OrderLine>>> {
        let rows = sqlx::query(&format!(
            "SELECT {LINE_COLUMNS} FROM order_lines WHERE order_id = ANY($1) ORDER BY created_at"
        ))
        .bind(order_ids)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("fetch_lines", e))?;

        let mut by_order: HashMap<Uuid, Vec<OrderLine>> = HashMap::new();
        for row in rows {
            let order_id: Uuid = row.try_get("order_id").map_err(decode_err)?;
            by_order.entry(order_id).or_default().push(line_from_row(&row)?);
        }
        Ok(by_order)
    }

    async fn list_orders_where(
        &self,
        filter: &OrderFilter,
        deleted: bool,
    ) -> StoreResult<Page<Order>> {
        let deleted_clause = if deleted {
            "deleted_at IS NOT NULL"
        } else {
            "deleted_at IS NULL"
        };
        let where_clause = format!(
            "{deleted_clause} \
             AND ($1::text IS NULL OR number ILIKE '%' || $1 || '%') \
             AND ($2::text IS NULL OR status = $2) \
             AND ($3::uuid IS NULL OR client_id = $3) \
             AND ($4::timestamptz IS NULL OR created_at >= $4) \
             AND ($5::timestamptz IS NULL OR created_at <= $5)"
        );

        let status = filter.status.map(|s| s.as_str().to_string());
        let client_id = filter.client_id.map(|c| *c.as_uuid());

        let rows = sqlx::query(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE {where_clause} \
             ORDER BY created_at DESC LIMIT $6 OFFSET $7"
        ))
        .bind(&filter.search)
        .bind(&status)
        .bind(client_id)
        .bind(filter.date_from)
        .bind(filter.date_to)
        .bind(i64::from(filter.limit()))
        .bind(filter.offset() as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_orders", e))?;

        let total: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(*) FROM orders WHERE {where_clause}"
        ))
        .bind(&filter.search)
        .bind(&status)
        .bind(client_id)
        .bind(filter.date_from)
        .bind(filter.date_to)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("count_orders", e))?;

        let mut orders = Vec::with_capacity(rows.len());
        for row in &rows {
            orders.push(order_from_row(row)?);
        }

        let ids: Vec<Uuid> = orders.iter().map(|o| *o.id.as_uuid()).collect();
        let mut lines = self.fetch_lines_for(&ids).await?;
        for order in &mut orders {
            order.lines = lines.remove(order.id.as_uuid()).unwrap_or_default();
        }

        Ok(Page {
            items: orders,
            total: total as u64,
            page: filter.page(),
            limit: filter.limit(),
        })
    }
}

/// One Postgres transaction.
pub struct PgUow {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl Store for PgStore {
    type Uow = PgUow;

    async fn begin(&self) -> StoreResult<PgUow> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin", e))?;
        Ok(PgUow { tx })
    }

    async fn get_product(&self, id: ProductId) -> StoreResult<Option<Product>> {
        let row = sqlx::query(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM products WHERE id = $1"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_product", e))?;
        row.as_ref().map(product_from_row).transpose()
    }

    async fn get_service(&self, id: ServiceId) -> StoreResult<Option<Service>> {
        let row = sqlx::query(
            "SELECT id, name, description, unit_price, active, created_at, updated_at, deleted_at \
             FROM services WHERE id = $1",
        )
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_service", e))?;
        row.as_ref().map(service_from_row).transpose()
    }

    async fn get_client(&self, id: ClientId) -> StoreResult<Option<Client>> {
        let row = sqlx::query(
            "SELECT id, name, email, phone, active, created_at, deleted_at \
             FROM clients WHERE id = $1",
        )
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_client", e))?;
        row.as_ref().map(client_from_row).transpose()
    }

    async fn get_order(&self, id: OrderId) -> StoreResult<Option<Order>> {
        let row = sqlx::query(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1 AND deleted_at IS NULL"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_order", e))?;

        let Some(row) = row else { return Ok(None) };
        let mut order = order_from_row(&row)?;
        let mut lines = self.fetch_lines_for(&[*order.id.as_uuid()]).await?;
        order.lines = lines.remove(order.id.as_uuid()).unwrap_or_default();
        Ok(Some(order))
    }

    async fn list_orders(&self, filter: &OrderFilter) -> StoreResult<Page<Order>> {
        self.list_orders_where(filter, false).await
    }

    async fn list_deleted_orders(&self, filter: &OrderFilter) -> StoreResult<Page<Order>> {
        self.list_orders_where(filter, true).await
    }

    async fn payments_for_order(&self, id: OrderId) -> StoreResult<Vec<Payment>> {
        let rows = sqlx::query(
            "SELECT id, order_id, amount, mode, paid_at, created_at \
             FROM payments WHERE order_id = $1 ORDER BY paid_at DESC, id DESC",
        )
        .bind(id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("payments_for_order", e))?;
        rows.iter().map(payment_from_row).collect()
    }

    async fn payment_sums(&self, ids: &[OrderId]) -> StoreResult<HashMap<OrderId, f64>> {
        let uuids: Vec<Uuid> = ids.iter().map(|id| *id.as_uuid()).collect();
        let rows = sqlx::query(
            "SELECT order_id, COALESCE(SUM(amount), 0) AS total \
             FROM payments WHERE order_id = ANY($1) GROUP BY order_id",
        )
        .bind(&uuids)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("payment_sums", e))?;

        let mut sums = HashMap::with_capacity(rows.len());
        for row in rows {
            let order_id: Uuid = row.try_get("order_id").map_err(decode_err)?;
            let total: f64 = row.try_get("total").map_err(decode_err)?;
            sums.insert(OrderId::from_uuid(order_id), total);
        }
        Ok(sums)
    }

    async fn latest_invoice(&self, order_id: OrderId) -> StoreResult<Option<Invoice>> {
        let row = sqlx::query(
            "SELECT id, code, number, order_id, png_path, pdf_path, issued_at \
             FROM invoices WHERE order_id = $1 ORDER BY issued_at DESC LIMIT 1",
        )
        .bind(order_id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("latest_invoice", e))?;
        row.as_ref().map(invoice_from_row).transpose()
    }

    async fn latest_receipt(&self, order_id: OrderId) -> StoreResult<Option<Receipt>> {
        let row = sqlx::query(
            "SELECT id, code, number, order_id, payment_id, amount, png_path, pdf_path, created_at \
             FROM receipts WHERE order_id = $1 ORDER BY created_at DESC LIMIT 1",
        )
        .bind(order_id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("latest_receipt", e))?;
        row.as_ref().map(receipt_from_row).transpose()
    }

    async fn list_movements(&self, filter: &MovementFilter) -> StoreResult<Vec<Movement>> {
        let product_id = filter.product_id.map(|p| *p.as_uuid());
        let direction = filter.direction.map(|d| d.as_str().to_string());

        let rows = sqlx::query(
            "SELECT id, product_id, quantity, direction, source, user_id, note, created_at \
             FROM inventory_movements \
             WHERE ($1::uuid IS NULL OR product_id = $1) \
               AND ($2::text IS NULL OR direction = $2) \
             ORDER BY created_at DESC LIMIT $3 OFFSET $4",
        )
        .bind(product_id)
        .bind(&direction)
        .bind(i64::from(filter.limit()))
        .bind(filter.offset() as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_movements", e))?;
        rows.iter().map(movement_from_row).collect()
    }

    async fn insert_product(&self, product: &Product) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO products \
             (id, name, description, unit_price, stock, active, created_at, updated_at, deleted_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(product.id.as_uuid())
        .bind(&product.name)
        .bind(&product.description)
        .bind(product.unit_price)
        .bind(product.stock)
        .bind(product.active)
        .bind(product.created_at)
        .bind(product.updated_at)
        .bind(product.deleted_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_product", e))?;
        Ok(())
    }

    async fn insert_service(&self, service: &Service) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO services \
             (id, name, description, unit_price, active, created_at, updated_at, deleted_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(service.id.as_uuid())
        .bind(&service.name)
        .bind(&service.description)
        .bind(service.unit_price)
        .bind(service.active)
        .bind(service.created_at)
        .bind(service.updated_at)
        .bind(service.deleted_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_service", e))?;
        Ok(())
    }

    async fn insert_client(&self, client: &Client) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO clients (id, name, email, phone, active, created_at, deleted_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(client.id.as_uuid())
        .bind(&client.name)
        .bind(&client.email)
        .bind(&client.phone)
        .bind(client.active)
        .bind(client.created_at)
        .bind(client.deleted_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_client", e))?;
        Ok(())
    }
}

#[async_trait]
impl Uow for PgUow {
    async fn lock_products(&mut self, ids: &[ProductId]) -> StoreResult<Vec<Product>> {
        let mut sorted: Vec<Uuid> = ids.iter().map(|id| *id.as_uuid()).collect();
        sorted.sort();
        sorted.dedup();

        // ORDER BY id makes Postgres take the row locks in ascending order,
        // which is the global lock ordering every call site relies on.
        let rows = sqlx::query(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM products WHERE id = ANY($1) ORDER BY id FOR UPDATE"
        ))
        .bind(&sorted)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("lock_products", e))?;

        if rows.len() != sorted.len() {
            return Err(DomainError::NotFound.into());
        }
        rows.iter().map(product_from_row).collect()
    }

    async fn lock_order(&mut self, id: OrderId) -> StoreResult<Order> {
        let row = sqlx::query(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1 AND deleted_at IS NULL FOR UPDATE"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("lock_order", e))?
        .ok_or(DomainError::NotFound)?;

        let mut order = order_from_row(&row)?;

        let line_rows = sqlx::query(&format!(
            "SELECT {LINE_COLUMNS} FROM order_lines WHERE order_id = $1 ORDER BY created_at"
        ))
        .bind(id.as_uuid())
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("lock_order_lines", e))?;
        order.lines = line_rows
            .iter()
            .map(line_from_row)
            .collect::<StoreResult<Vec<_>>>()?;
        Ok(order)
    }

    async fn get_products(&mut self, ids: &[ProductId]) -> StoreResult<Vec<Product>> {
        let uuids: Vec<Uuid> = ids.iter().map(|id| *id.as_uuid()).collect();
        let rows = sqlx::query(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM products WHERE id = ANY($1)"
        ))
        .bind(&uuids)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("get_products", e))?;
        rows.iter().map(product_from_row).collect()
    }

    async fn get_services(&mut self, ids: &[ServiceId]) -> StoreResult<Vec<Service>> {
        let uuids: Vec<Uuid> = ids.iter().map(|id| *id.as_uuid()).collect();
        let rows = sqlx::query(
            "SELECT id, name, description, unit_price, active, created_at, updated_at, deleted_at \
             FROM services WHERE id = ANY($1)",
        )
        .bind(&uuids)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("get_services", e))?;
        rows.iter().map(service_from_row).collect()
    }

    async fn get_client(&mut self, id: ClientId) -> StoreResult<Option<Client>> {
        let row = sqlx::query(
            "SELECT id, name, email, phone, active, created_at, deleted_at \
             FROM clients WHERE id = $1",
        )
        .bind(id.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("get_client", e))?;
        row.as_ref().map(client_from_row).transpose()
    }

    async fn get_payment(&mut self, id: PaymentId) -> StoreResult<Option<Payment>> {
        let row = sqlx::query(
            "SELECT id, order_id, amount, mode, paid_at, created_at FROM payments WHERE id = $1",
        )
        .bind(id.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("get_payment", e))?;
        row.as_ref().map(payment_from_row).transpose()
    }

    async fn sum_payments(&mut self, order_id: OrderId) -> StoreResult<f64> {
        let total: f64 = sqlx::query_scalar(
            "SELECT COALESCE(SUM(amount), 0) FROM payments WHERE order_id = $1",
        )
        .bind(order_id.as_uuid())
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("sum_payments", e))?;
        Ok(total)
    }

    async fn count_payments(&mut self, order_id: OrderId) -> StoreResult<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM payments WHERE order_id = $1")
                .bind(order_id.as_uuid())
                .fetch_one(&mut *self.tx)
                .await
                .map_err(|e| map_sqlx_error("count_payments", e))?;
        Ok(count)
    }

    async fn insert_payment(&mut self, payment: &Payment) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO payments (id, order_id, amount, mode, paid_at, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(payment.id.as_uuid())
        .bind(payment.order_id.as_uuid())
        .bind(payment.amount)
        .bind(payment.mode.as_str())
        .bind(payment.paid_at)
        .bind(payment.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("insert_payment", e))?;
        Ok(())
    }

    async fn update_product_stock(&mut self, id: ProductId, stock: i64) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE products SET stock = $2, updated_at = now() WHERE id = $1",
        )
        .bind(id.as_uuid())
        .bind(stock)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("update_product_stock", e))?;

        if result.rows_affected() == 0 {
            return Err(DomainError::NotFound.into());
        }
        Ok(())
    }

    async fn insert_movement(&mut self, movement: &Movement) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO inventory_movements \
             (id, product_id, quantity, direction, source, user_id, note, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(movement.id.as_uuid())
        .bind(movement.product_id.as_uuid())
        .bind(movement.quantity)
        .bind(movement.direction.as_str())
        .bind(movement.source.as_str())
        .bind(movement.user_id.map(|u| *u.as_uuid()))
        .bind(&movement.note)
        .bind(movement.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("insert_movement", e))?;
        Ok(())
    }

    async fn insert_order(&mut self, order: &Order) -> StoreResult<()> {
        sqlx::query(&format!(
            "INSERT INTO orders ({ORDER_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)"
        ))
        .bind(order.id.as_uuid())
        .bind(&order.number)
        .bind(order.client_id.map(|c| *c.as_uuid()))
        .bind(order.created_by.map(|u| *u.as_uuid()))
        .bind(order.status.as_str())
        .bind(order.total)
        .bind(order.paid_total)
        .bind(order.settlement.as_str())
        .bind(order.stock_committed_at)
        .bind(order.created_at)
        .bind(order.updated_at)
        .bind(order.deleted_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("insert_order", e))?;

        for line in &order.lines {
            insert_line(&mut self.tx, order.id, line).await?;
        }
        Ok(())
    }

    async fn update_order_header(&mut self, order: &Order) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE orders SET client_id = $2, status = $3, total = $4, paid_total = $5, \
             settlement = $6, stock_committed_at = $7, updated_at = $8, deleted_at = $9 \
             WHERE id = $1",
        )
        .bind(order.id.as_uuid())
        .bind(order.client_id.map(|c| *c.as_uuid()))
        .bind(order.status.as_str())
        .bind(order.total)
        .bind(order.paid_total)
        .bind(order.settlement.as_str())
        .bind(order.stock_committed_at)
        .bind(order.updated_at)
        .bind(order.deleted_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("update_order_header", e))?;

        if result.rows_affected() == 0 {
            return Err(DomainError::NotFound.into());
        }
        Ok(())
    }

    async fn replace_lines(&mut self, order_id: OrderId, plan: &LinePlan) -> StoreResult<()> {
        if !plan.deleted.is_empty() {
            let ids: Vec<Uuid> = plan.deleted.iter().map(|id| *id.as_uuid()).collect();
            sqlx::query("DELETE FROM order_lines WHERE order_id = $1 AND id = ANY($2)")
                .bind(order_id.as_uuid())
                .bind(&ids)
                .execute(&mut *self.tx)
                .await
                .map_err(|e| map_sqlx_error("delete_lines", e))?;
        }

        for line in &plan.lines {
            sqlx::query(
                "INSERT INTO order_lines \
                 (id, order_id, product_id, service_id, name, quantity, unit_price, total, created_at) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, now()) \
                 ON CONFLICT (id) DO UPDATE SET \
                 name = EXCLUDED.name, quantity = EXCLUDED.quantity, \
                 unit_price = EXCLUDED.unit_price, total = EXCLUDED.total",
            )
            .bind(line.id.as_uuid())
            .bind(order_id.as_uuid())
            .bind(line.item.product_id().map(|p| *p.as_uuid()))
            .bind(line.item.service_id().map(|s| *s.as_uuid()))
            .bind(&line.name)
            .bind(line.quantity)
            .bind(line.unit_price)
            .bind(line.total)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("upsert_line", e))?;
        }
        Ok(())
    }

    async fn max_order_number(&mut self) -> StoreResult<u64> {
        max_sequential(&mut self.tx, "orders", "number", 'C').await
    }

    async fn max_invoice_number(&mut self) -> StoreResult<u64> {
        max_sequential(&mut self.tx, "invoices", "number", 'F').await
    }

    async fn max_receipt_number(&mut self) -> StoreResult<u64> {
        max_sequential(&mut self.tx, "receipts", "number", 'R').await
    }

    async fn invoice_for_order(&mut self, order_id: OrderId) -> StoreResult<Option<Invoice>> {
        let row = sqlx::query(
            "SELECT id, code, number, order_id, png_path, pdf_path, issued_at \
             FROM invoices WHERE order_id = $1 LIMIT 1",
        )
        .bind(order_id.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("invoice_for_order", e))?;
        row.as_ref().map(invoice_from_row).transpose()
    }

    async fn insert_invoice(&mut self, invoice: &Invoice) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO invoices (id, code, number, order_id, png_path, pdf_path, issued_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(invoice.id.as_uuid())
        .bind(&invoice.code)
        .bind(&invoice.number)
        .bind(invoice.order_id.as_uuid())
        .bind(&invoice.png_path)
        .bind(&invoice.pdf_path)
        .bind(invoice.issued_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("insert_invoice", e))?;
        Ok(())
    }

    async fn insert_receipt(&mut self, receipt: &Receipt) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO receipts \
             (id, code, number, order_id, payment_id, amount, png_path, pdf_path, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(receipt.id.as_uuid())
        .bind(&receipt.code)
        .bind(&receipt.number)
        .bind(receipt.order_id.as_uuid())
        .bind(receipt.payment_id.as_uuid())
        .bind(receipt.amount)
        .bind(&receipt.png_path)
        .bind(&receipt.pdf_path)
        .bind(receipt.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("insert_receipt", e))?;
        Ok(())
    }

    async fn enqueue_job(&mut self, job: &Job) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO jobs \
             (id, kind, payload, status, error, attempt, max_attempts, base_delay_ms, \
              scheduled_at, created_at, updated_at) \
             VALUES ($1, $2, $3, 'pending', NULL, 0, $4, $5, $6, $7, $8)",
        )
        .bind(job.id.0)
        .bind(job.kind.type_name())
        .bind(&job.payload)
        .bind(job.retry_policy.max_attempts as i32)
        .bind(job.retry_policy.base_delay.as_millis() as i64)
        .bind(job.scheduled_at)
        .bind(job.created_at)
        .bind(job.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("enqueue_job", e))?;
        Ok(())
    }

    async fn commit(self) -> StoreResult<()> {
        self.tx
            .commit()
            .await
            .map_err(|e| map_sqlx_error("commit", e))
    }
}

async fn insert_line(
    tx: &mut Transaction<'static, Postgres>,
    order_id: OrderId,
    line: &OrderLine,
) -> StoreResult<()> {
    sqlx::query(
        "INSERT INTO order_lines \
         (id, order_id, product_id, service_id, name, quantity, unit_price, total, created_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, now())",
    )
    .bind(line.id.as_uuid())
    .bind(order_id.as_uuid())
    .bind(line.item.product_id().map(|p| *p.as_uuid()))
    .bind(line.item.service_id().map(|s| *s.as_uuid()))
    .bind(&line.name)
    .bind(line.quantity)
    .bind(line.unit_price)
    .bind(line.total)
    .execute(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("insert_line", e))?;
    Ok(())
}

async fn max_sequential(
    tx: &mut Transaction<'static, Postgres>,
    table: &str,
    column: &str,
    prefix: char,
) -> StoreResult<u64> {
    let max: Option<i64> = sqlx::query_scalar(&format!(
        "SELECT MAX(substring({column} from 2)::bigint) FROM {table} \
         WHERE {column} ~ '^{prefix}[0-9]+$'"
    ))
    .fetch_one(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("max_sequential", e))?;
    Ok(max.unwrap_or(0).max(0) as u64)
}

#[async_trait]
impl JobStore for PgStore {
    async fn claim_next(&self) -> Result<Option<Job>, JobStoreError> {
        let row = sqlx::query(&format!(
            "UPDATE jobs SET status = 'running', attempt = attempt + 1, updated_at = now() \
             WHERE id = ( \
                 SELECT id FROM jobs \
                 WHERE status IN ('pending', 'failed') \
                   AND (scheduled_at IS NULL OR scheduled_at <= now()) \
                 ORDER BY created_at \
                 LIMIT 1 \
                 FOR UPDATE SKIP LOCKED \
             ) \
             RETURNING {JOB_COLUMNS}"
        ))
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| JobStoreError::Storage(e.to_string()))?;

        row.as_ref()
            .map(job_from_row)
            .transpose()
            .map_err(|e| JobStoreError::Storage(e.to_string()))
    }

    async fn update_job(&self, job: &Job) -> Result<(), JobStoreError> {
        let (status, error) = job_status_columns(&job.status);
        let result = sqlx::query(
            "UPDATE jobs SET status = $2, error = $3, attempt = $4, scheduled_at = $5, \
             updated_at = now() WHERE id = $1",
        )
        .bind(job.id.0)
        .bind(status)
        .bind(error)
        .bind(job.attempt as i32)
        .bind(job.scheduled_at)
        .execute(&self.pool)
        .await
        .map_err(|e| JobStoreError::Storage(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(JobStoreError::NotFound(job.id));
        }
        Ok(())
    }

    async fn dead_letter(&self, job: Job, reason: String) -> Result<(), JobStoreError> {
        sqlx::query(
            "UPDATE jobs SET status = 'dead_lettered', error = $2, updated_at = now() \
             WHERE id = $1",
        )
        .bind(job.id.0)
        .bind(&reason)
        .execute(&self.pool)
        .await
        .map_err(|e| JobStoreError::Storage(e.to_string()))?;
        Ok(())
    }

    async fn list_dead_letters(&self, limit: usize) -> Result<Vec<DeadLetterEntry>, JobStoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE status = 'dead_lettered' \
             ORDER BY updated_at LIMIT $1"
        ))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| JobStoreError::Storage(e.to_string()))?;

        rows.iter()
            .map(|row| {
                let job = job_from_row(row).map_err(|e| JobStoreError::Storage(e.to_string()))?;
                let reason = match &job.status {
                    JobStatus::DeadLettered { error, .. } => error.clone(),
                    _ => String::new(),
                };
                let dead_lettered_at: DateTime<Utc> = row
                    .try_get("updated_at")
                    .map_err(|e| JobStoreError::Storage(e.to_string()))?;
                Ok(DeadLetterEntry {
                    job,
                    dead_lettered_at,
                    reason,
                })
            })
            .collect()
    }

    async fn pending_jobs(&self) -> Result<usize, JobStoreError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM jobs WHERE status IN ('pending', 'failed')",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(|e| JobStoreError::Storage(e.to_string()))?;
        Ok(count as usize)
    }
}

fn decode_err(e: impl core::fmt::Display) -> StoreError {
    StoreError::storage("decode_row", e)
}

fn product_from_row(row: &PgRow) -> StoreResult<Product> {
    Ok(Product {
        id: ProductId::from_uuid(row.try_get("id").map_err(decode_err)?),
        name: row.try_get("name").map_err(decode_err)?,
        description: row.try_get("description").map_err(decode_err)?,
        unit_price: row.try_get("unit_price").map_err(decode_err)?,
        stock: row.try_get("stock").map_err(decode_err)?,
        active: row.try_get("active").map_err(decode_err)?,
        created_at: row.try_get("created_at").map_err(decode_err)?,
        updated_at: row.try_get("updated_at").map_err(decode_err)?,
        deleted_at: row.try_get("deleted_at").map_err(decode_err)?,
    })
}

fn service_from_row(row: &PgRow) -> StoreResult<Service> {
    Ok(Service {
        id: ServiceId::from_uuid(row.try_get("id").map_err(decode_err)?),
        name: row.try_get("name").map_err(decode_err)?,
        description: row.try_get("description").map_err(decode_err)?,
        unit_price: row.try_get("unit_price").map_err(decode_err)?,
        active: row.try_get("active").map_err(decode_err)?,
        created_at: row.try_get("created_at").map_err(decode_err)?,
        updated_at: row.try_get("updated_at").map_err(decode_err)?,
        deleted_at: row.try_get("deleted_at").map_err(decode_err)?,
    })
}

fn client_from_row(row: &PgRow) -> StoreResult<Client> {
    Ok(Client {
        id: ClientId::from_uuid(row.try_get("id").map_err(decode_err)?),
        name: row.try_get("name").map_err(decode_err)?,
        email: row.try_get("email").map_err(decode_err)?,
        phone: row.try_get("phone").map_err(decode_err)?,
        active: row.try_get("active").map_err(decode_err)?,
        created_at: row.try_get("created_at").map_err(decode_err)?,
        deleted_at: row.try_get("deleted_at").map_err(decode_err)?,
    })
}

fn order_from_row(row: &PgRow) -> StoreResult<Order> {
    let status: String = row.try_get("status").map_err(decode_err)?;
    let settlement: String = row.try_get("settlement").map_err(decode_err)?;

    Ok(Order {
        id: OrderId::from_uuid(row.try_get("id").map_err(decode_err)?),
        number: row.try_get("number").map_err(decode_err)?,
        client_id: row
            .try_get::<Option<Uuid>, _>("client_id")
            .map_err(decode_err)?
            .map(ClientId::from_uuid),
        created_by: row
            .try_get::<Option<Uuid>, _>("created_by")
            .map_err(decode_err)?
            .map(comptoir_core::UserId::from_uuid),
        status: status.parse::<OrderStatus>().map_err(StoreError::Domain)?,
        total: row.try_get("total").map_err(decode_err)?,
        paid_total: row.try_get("paid_total").map_err(decode_err)?,
        settlement: settlement
            .parse::<SettlementStatus>()
            .map_err(StoreError::Domain)?,
        stock_committed_at: row.try_get("stock_committed_at").map_err(decode_err)?,
        created_at: row.try_get("created_at").map_err(decode_err)?,
        updated_at: row.try_get("updated_at").map_err(decode_err)?,
        deleted_at: row.try_get("deleted_at").map_err(decode_err)?,
        lines: Vec::new(),
    })
}

fn line_from_row(row: &PgRow) -> StoreResult<OrderLine> {
    let product_id: Option<Uuid> = row.try_get("product_id").map_err(decode_err)?;
    let service_id: Option<Uuid> = row.try_get("service_id").map_err(decode_err)?;
    let item = match (product_id, service_id) {
        (Some(p), None) => LineItem::Product(ProductId::from_uuid(p)),
        (None, Some(s)) => LineItem::Service(ServiceId::from_uuid(s)),
        _ => {
            return Err(StoreError::storage(
                "decode_row",
                "order line must reference exactly one of product/service",
            ));
        }
    };

    Ok(OrderLine {
        id: comptoir_core::OrderLineId::from_uuid(row.try_get("id").map_err(decode_err)?),
        item,
        name: row.try_get("name").map_err(decode_err)?,
        quantity: row.try_get("quantity").map_err(decode_err)?,
        unit_price: row.try_get("unit_price").map_err(decode_err)?,
        total: row.try_get("total").map_err(decode_err)?,
    })
}

fn payment_from_row(row: &PgRow) -> StoreResult<Payment> {
    let mode: String = row.try_get("mode").map_err(decode_err)?;
    Ok(Payment {
        id: PaymentId::from_uuid(row.try_get("id").map_err(decode_err)?),
        order_id: OrderId::from_uuid(row.try_get("order_id").map_err(decode_err)?),
        amount: row.try_get("amount").map_err(decode_err)?,
        mode: mode.parse::<PaymentMode>().map_err(StoreError::Domain)?,
        paid_at: row.try_get("paid_at").map_err(decode_err)?,
        created_at: row.try_get("created_at").map_err(decode_err)?,
    })
}

fn movement_from_row(row: &PgRow) -> StoreResult<Movement> {
    let direction: String = row.try_get("direction").map_err(decode_err)?;
    let source: String = row.try_get("source").map_err(decode_err)?;
    Ok(Movement {
        id: comptoir_core::MovementId::from_uuid(row.try_get("id").map_err(decode_err)?),
        product_id: ProductId::from_uuid(row.try_get("product_id").map_err(decode_err)?),
        quantity: row.try_get("quantity").map_err(decode_err)?,
        direction: match direction.as_str() {
            "IN" => MovementDirection::In,
            "OUT" => MovementDirection::Out,
            other => return Err(decode_err(format!("unknown direction: {other}"))),
        },
        source: match source.as_str() {
            "MANUAL" => MovementSource::Manual,
            "SALE" => MovementSource::Sale,
            other => return Err(decode_err(format!("unknown source: {other}"))),
        },
        user_id: row
            .try_get::<Option<Uuid>, _>("user_id")
            .map_err(decode_err)?
            .map(comptoir_core::UserId::from_uuid),
        note: row.try_get("note").map_err(decode_err)?,
        created_at: row.try_get("created_at").map_err(decode_err)?,
    })
}

fn invoice_from_row(row: &PgRow) -> StoreResult<Invoice> {
    Ok(Invoice {
        id: comptoir_core::InvoiceId::from_uuid(row.try_get("id").map_err(decode_err)?),
        code: row.try_get("code").map_err(decode_err)?,
        number: row.try_get("number").map_err(decode_err)?,
        order_id: OrderId::from_uuid(row.try_get("order_id").map_err(decode_err)?),
        png_path: row.try_get("png_path").map_err(decode_err)?,
        pdf_path: row.try_get("pdf_path").map_err(decode_err)?,
        issued_at: row.try_get("issued_at").map_err(decode_err)?,
    })
}

fn receipt_from_row(row: &PgRow) -> StoreResult<Receipt> {
    Ok(Receipt {
        id: comptoir_core::ReceiptId::from_uuid(row.try_get("id").map_err(decode_err)?),
        code: row.try_get("code").map_err(decode_err)?,
        number: row.try_get("number").map_err(decode_err)?,
        order_id: OrderId::from_uuid(row.try_get("order_id").map_err(decode_err)?),
        payment_id: PaymentId::from_uuid(row.try_get("payment_id").map_err(decode_err)?),
        amount: row.try_get("amount").map_err(decode_err)?,
        png_path: row.try_get("png_path").map_err(decode_err)?,
        pdf_path: row.try_get("pdf_path").map_err(decode_err)?,
        created_at: row.try_get("created_at").map_err(decode_err)?,
    })
}

fn job_from_row(row: &PgRow) -> StoreResult<Job> {
    let status: String = row.try_get("status").map_err(decode_err)?;
    let error: Option<String> = row.try_get("error").map_err(decode_err)?;
    let attempt: i32 = row.try_get("attempt").map_err(decode_err)?;
    let max_attempts: i32 = row.try_get("max_attempts").map_err(decode_err)?;
    let base_delay_ms: i64 = row.try_get("base_delay_ms").map_err(decode_err)?;
    let kind: String = row.try_get("kind").map_err(decode_err)?;

    let status = match status.as_str() {
        "pending" => JobStatus::Pending,
        "running" => JobStatus::Running,
        "completed" => JobStatus::Completed,
        "failed" => JobStatus::Failed {
            error: error.clone().unwrap_or_default(),
            attempt: attempt as u32,
        },
        "dead_lettered" => JobStatus::DeadLettered {
            error: error.clone().unwrap_or_default(),
            attempts: attempt as u32,
        },
        "cancelled" => JobStatus::Cancelled,
        other => return Err(decode_err(format!("unknown job status: {other}"))),
    };

    Ok(Job {
        id: JobId::from_uuid(row.try_get("id").map_err(decode_err)?),
        kind: JobKind::from_type_name(&kind),
        payload: row.try_get("payload").map_err(decode_err)?,
        status,
        retry_policy: RetryPolicy {
            max_attempts: max_attempts as u32,
            base_delay: Duration::from_millis(base_delay_ms.max(0) as u64),
            ..Default::default()
        },
        attempt: attempt as u32,
        created_at: row.try_get("created_at").map_err(decode_err)?,
        updated_at: row.try_get("updated_at").map_err(decode_err)?,
        scheduled_at: row.try_get("scheduled_at").map_err(decode_err)?,
        history: Vec::new(),
    })
}

fn job_status_columns(status: &JobStatus) -> (&'static str, Option<String>) {
    match status {
        JobStatus::Pending => ("pending", None),
        JobStatus::Running => ("running", None),
        JobStatus::Completed => ("completed", None),
        JobStatus::Failed { error, .. } => ("failed", Some(error.clone())),
        JobStatus::DeadLettered { error, .. } => ("dead_lettered", Some(error.clone())),
        JobStatus::Cancelled => ("cancelled", None),
    }
}
