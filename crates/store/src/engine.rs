//! The order reconciliation engine.
//!
//! Every order mutation runs inside one unit of work: lock the order row,
//! lock the referenced product rows in ascending id order, validate, mutate,
//! enqueue the post-commit jobs, commit. Stock is decremented at most once
//! per order lifetime, guarded by `stock_committed_at` checked and set under
//! the locks.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use comptoir_auth::Role;
use comptoir_billing::{
    DocumentRenderer, Invoice, PartyInfo, Receipt, generate_code, invoice_data_from_order,
    receipt_data,
};
use comptoir_catalog::{Client, Product};
use comptoir_core::{
    ClientId, DomainError, InvoiceId, OrderId, PaymentId, ProductId, ReceiptId, ServiceId, UserId,
    next_sequential,
};
use comptoir_inventory::{
    Movement, MovementSource, StockAdjustment, is_low_stock,
};
use comptoir_orders::{
    CatalogProduct, CatalogService, CatalogSnapshot, LineItem, LineSpec, Order, OrderStatus,
    Payment, PaymentMode, PaymentSummary, SettlementStatus, check_transition, plan_lines,
    validate_payment_amount,
};

use crate::error::{StoreError, StoreResult};
use crate::jobs::Job;
use crate::notify::NotificationSink;
use crate::store::{Store, Uow};

/// The authenticated actor driving a mutation.
#[derive(Debug, Clone)]
pub struct ActorContext {
    pub user_id: Option<UserId>,
    pub roles: Vec<Role>,
}

/// Input for order creation.
#[derive(Debug, Clone, Default)]
pub struct CreateOrderRequest {
    pub client_id: Option<ClientId>,
    pub product_lines: Vec<(ProductId, i64)>,
    pub service_lines: Vec<(ServiceId, i64)>,
}

/// Input for the branching order update (status / lines / client).
#[derive(Debug, Clone, Default)]
pub struct OrderPatch {
    pub client_id: Option<ClientId>,
    pub status: Option<OrderStatus>,
    pub product_lines: Option<Vec<LineSpec>>,
    pub service_lines: Option<Vec<LineSpec>>,
}

impl OrderPatch {
    fn line_specs(&self) -> Vec<LineSpec> {
        let mut specs = Vec::new();
        if let Some(products) = &self.product_lines {
            specs.extend(products.iter().cloned());
        }
        if let Some(services) = &self.service_lines {
            specs.extend(services.iter().cloned());
        }
        specs
    }
}

/// Orchestrates order/stock/payment/document mutations over a [`Store`].
pub struct OrderEngine<S: Store> {
    store: Arc<S>,
    renderer: Arc<dyn DocumentRenderer>,
    notifier: Arc<dyn NotificationSink>,
}

impl<S: Store> OrderEngine<S> {
    pub fn new(
        store: Arc<S>,
        renderer: Arc<dyn DocumentRenderer>,
        notifier: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            store,
            renderer,
            notifier,
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn notifier(&self) -> &Arc<dyn NotificationSink> {
        &self.notifier
    }

    /// Create a pending order. Stock is checked but not reserved.
    pub async fn create_order(
        &self,
        actor: &ActorContext,
        request: CreateOrderRequest,
    ) -> StoreResult<Order> {
        if request.product_lines.is_empty() && request.service_lines.is_empty() {
            return Err(DomainError::validation(
                "order must contain at least one product or service line",
            )
            .into());
        }

        let mut uow = self.store.begin().await?;

        if let Some(client_id) = request.client_id {
            ensure_active_client(&mut uow, client_id).await?;
        }

        let specs: Vec<LineSpec> = request
            .product_lines
            .iter()
            .map(|&(id, quantity)| LineSpec {
                line_id: None,
                item: Some(LineItem::Product(id)),
                quantity,
            })
            .chain(request.service_lines.iter().map(|&(id, quantity)| LineSpec {
                line_id: None,
                item: Some(LineItem::Service(id)),
                quantity,
            }))
            .collect();

        let catalog = load_catalog(&mut uow, &[], &specs).await?;
        let plan = plan_lines(&[], &specs, &catalog)?;

        let number = next_sequential('C', uow.max_order_number().await?);
        let order = Order::create(number, request.client_id, actor.user_id, plan.lines)?;
        uow.insert_order(&order).await?;

        uow.enqueue_job(&Job::notification(
            "New order",
            format!("Order {} created", order.number),
            serde_json::json!({ "order_id": order.id }),
        ))
        .await?;

        uow.commit().await?;
        info!(order_id = %order.id, number = %order.number, total = order.total, "order created");
        Ok(order)
    }

    /// Branching update: status transition, line reconciliation, or plain
    /// field update. One transaction either way.
    pub async fn update_order(
        &self,
        actor: &ActorContext,
        order_id: OrderId,
        patch: OrderPatch,
    ) -> StoreResult<Order> {
        let mut uow = self.store.begin().await?;
        let mut order = uow.lock_order(order_id).await?;
        let has_payments = uow.count_payments(order_id).await? > 0;
        let now = Utc::now();

        let mut low_stock = Vec::new();

        if let Some(new_status) = patch.status {
            let effect = check_transition(&actor.roles, order.status, new_status, has_payments)?;

            if effect.commits_stock && order.stock_committed_at.is_none() {
                low_stock = commit_stock(&mut uow, &order, actor).await?;
                order.stock_committed_at = Some(now);
            }
            order.status = new_status;

            if let Some(client_id) = patch.client_id {
                // Core-field edits stay subject to the immutability rule even
                // when they ride along with a permitted transition.
                order.ensure_mutable(has_payments)?;
                ensure_active_client(&mut uow, client_id).await?;
                order.client_id = Some(client_id);
            }
        } else {
            order.ensure_mutable(has_payments)?;

            let specs = patch.line_specs();
            if !specs.is_empty() {
                let catalog = load_catalog(&mut uow, &order.lines, &specs).await?;
                let plan = plan_lines(&order.lines, &specs, &catalog)?;
                uow.replace_lines(order_id, &plan).await?;
                order.lines = plan.lines.clone();
                order.total = plan.total;
            }

            if let Some(client_id) = patch.client_id {
                ensure_active_client(&mut uow, client_id).await?;
                order.client_id = Some(client_id);
            }
        }

        order.updated_at = now;
        uow.update_order_header(&order).await?;
        uow.commit().await?;

        self.emit_low_stock(&low_stock);
        debug!(order_id = %order.id, status = %order.status, total = order.total, "order updated");
        Ok(order)
    }

    /// Record one payment. The order row lock taken here serializes
    /// concurrent payments against the same order.
    pub async fn record_payment(
        &self,
        actor: &ActorContext,
        order_id: OrderId,
        amount: f64,
        mode: PaymentMode,
    ) -> StoreResult<(Payment, PaymentSummary)> {
        let mut uow = self.store.begin().await?;
        let mut order = uow.lock_order(order_id).await?;

        let already_paid = uow.sum_payments(order_id).await?;
        validate_payment_amount(amount, order.total, already_paid)?;

        let payment = Payment::new(order_id, amount, mode);
        let summary = PaymentSummary::compute(order.total, already_paid + amount);

        // Settlement (or an already finalized order) commits stock, exactly
        // once over the order's lifetime.
        let mut low_stock = Vec::new();
        if order.stock_committed_at.is_none()
            && (summary.status == SettlementStatus::Paid || order.status.is_finalized())
        {
            low_stock = commit_stock(&mut uow, &order, actor).await?;
            order.stock_committed_at = Some(Utc::now());
        }

        uow.insert_payment(&payment).await?;

        order.paid_total = summary.paid_total;
        order.settlement = summary.status;
        order.updated_at = Utc::now();
        uow.update_order_header(&order).await?;

        uow.enqueue_job(&Job::receipt(order_id, payment.id)).await?;
        uow.enqueue_job(&Job::notification(
            "Payment recorded",
            format!("Payment of {} recorded for order {}", amount, order.number),
            serde_json::json!({ "order_id": order_id, "amount": amount }),
        ))
        .await?;
        match summary.status {
            SettlementStatus::Paid => {
                uow.enqueue_job(&Job::invoice(order_id)).await?;
            }
            SettlementStatus::Partial => {
                uow.enqueue_job(&Job::notification(
                    "Partial payment",
                    format!(
                        "{} remaining due for order {}",
                        summary.remaining, order.number
                    ),
                    serde_json::json!({ "order_id": order_id, "remaining": summary.remaining }),
                ))
                .await?;
            }
            SettlementStatus::Unpaid => {}
        }

        uow.commit().await?;
        self.emit_low_stock(&low_stock);
        info!(
            order_id = %order_id,
            amount,
            paid_total = summary.paid_total,
            remaining = summary.remaining,
            "payment recorded"
        );
        Ok((payment, summary))
    }

    /// Soft-delete an order; refused once any payment exists.
    pub async fn delete_order(&self, order_id: OrderId) -> StoreResult<Order> {
        let mut uow = self.store.begin().await?;
        let mut order = uow.lock_order(order_id).await?;

        if uow.count_payments(order_id).await? > 0 {
            return Err(DomainError::CannotCancelSettledOrder.into());
        }

        order.deleted_at = Some(Utc::now());
        order.updated_at = Utc::now();
        uow.update_order_header(&order).await?;
        uow.commit().await?;
        info!(order_id = %order_id, "order soft-deleted");
        Ok(order)
    }

    /// Manual stock adjustment (the stock endpoint).
    pub async fn adjust_stock(
        &self,
        actor: &ActorContext,
        product_id: ProductId,
        adjustment: StockAdjustment,
        note: Option<String>,
    ) -> StoreResult<Product> {
        let mut uow = self.store.begin().await?;
        let mut product = uow
            .lock_products(&[product_id])
            .await?
            .into_iter()
            .next()
            .ok_or(DomainError::NotFound)?;

        let new_stock = adjustment.apply(product.stock, &product.name)?;
        let delta = new_stock - product.stock;
        uow.update_product_stock(product_id, new_stock).await?;

        if let Some(movement) =
            Movement::for_delta(product_id, delta, MovementSource::Manual, actor.user_id, note)
        {
            // Audit is secondary: log and keep going if the append fails.
            if let Err(e) = uow.insert_movement(&movement).await {
                warn!(product_id = %product_id, error = %e, "failed to record stock movement");
            }
        }

        uow.commit().await?;

        product.stock = new_stock;
        product.updated_at = Utc::now();
        if is_low_stock(new_stock) {
            self.emit_low_stock(&[(product.name.clone(), new_stock)]);
        }
        Ok(product)
    }

    /// Idempotently ensure the order's invoice exists. Returns the invoice
    /// and whether this call created it.
    pub async fn ensure_invoice(&self, order_id: OrderId) -> StoreResult<(Invoice, bool)> {
        let mut uow = self.store.begin().await?;
        // The order-row lock is what makes concurrent callers observe a
        // single invoice: the existence check below runs under it.
        let order = uow.lock_order(order_id).await?;

        if let Some(existing) = uow.invoice_for_order(order_id).await? {
            uow.commit().await?;
            return Ok((existing, false));
        }

        let number = next_sequential('F', uow.max_invoice_number().await?);
        let code = generate_code("FAC");
        let client = load_party(&mut uow, order.client_id).await?;
        let note = (order.settlement == SettlementStatus::Partial)
            .then(|| "PARTIAL PAYMENT".to_string());

        let data = invoice_data_from_order(&order, number.clone(), code.clone(), client, note);
        let rendered = self
            .renderer
            .render_invoice(&data)
            .await
            .map_err(|e| StoreError::Render(e.to_string()))?;

        let invoice = Invoice {
            id: InvoiceId::new(),
            code,
            number,
            order_id,
            png_path: rendered.png_path,
            pdf_path: rendered.pdf_path,
            issued_at: Utc::now(),
        };
        uow.insert_invoice(&invoice).await?;
        uow.commit().await?;
        info!(order_id = %order_id, number = %invoice.number, "invoice generated");
        Ok((invoice, true))
    }

    /// Render and persist the receipt for one payment event. Always creates
    /// a new receipt.
    pub async fn create_receipt(
        &self,
        order_id: OrderId,
        payment_id: PaymentId,
    ) -> StoreResult<Receipt> {
        let mut uow = self.store.begin().await?;
        let order = uow.lock_order(order_id).await?;
        let payment = uow
            .get_payment(payment_id)
            .await?
            .ok_or(DomainError::NotFound)?;

        let number = next_sequential('R', uow.max_receipt_number().await?);
        let code = generate_code("REC");
        let client = load_party(&mut uow, order.client_id).await?;

        let data = receipt_data(
            &order,
            &payment,
            order.summary(),
            number.clone(),
            code.clone(),
            client,
        );
        let rendered = self
            .renderer
            .render_receipt(&data)
            .await
            .map_err(|e| StoreError::Render(e.to_string()))?;

        let receipt = Receipt {
            id: ReceiptId::new(),
            code,
            number,
            order_id,
            payment_id,
            amount: payment.amount,
            png_path: rendered.png_path,
            pdf_path: rendered.pdf_path,
            created_at: Utc::now(),
        };
        uow.insert_receipt(&receipt).await?;
        uow.commit().await?;
        info!(order_id = %order_id, number = %receipt.number, "receipt generated");
        Ok(receipt)
    }

    fn emit_low_stock(&self, low_stock: &[(String, i64)]) {
        for (name, stock) in low_stock {
            self.notifier.notify(
                "Low stock",
                &format!("Stock for {name} is low ({stock})"),
                serde_json::json!({ "product": name, "stock": stock }),
            );
        }
    }
}

/// Decrement stock for every product line of `order`, all-or-nothing.
///
/// Locks the product rows in ascending id order, verifies availability for
/// the whole order before touching anything, then writes the new levels and
/// the SALE movements. Returns the products left at or below the low-stock
/// threshold.
async fn commit_stock<U: Uow>(
    uow: &mut U,
    order: &Order,
    actor: &ActorContext,
) -> StoreResult<Vec<(String, i64)>> {
    // BTreeMap both aggregates duplicate product lines and fixes the
    // ascending lock order.
    let mut demand: BTreeMap<ProductId, i64> = BTreeMap::new();
    for (product_id, quantity) in order.product_demand() {
        *demand.entry(product_id).or_default() += quantity;
    }
    if demand.is_empty() {
        return Ok(Vec::new());
    }

    let ids: Vec<ProductId> = demand.keys().copied().collect();
    let products = uow.lock_products(&ids).await?;

    for product in &products {
        let requested = demand[&product.id];
        if product.stock < requested {
            return Err(DomainError::insufficient_stock(
                product.name.clone(),
                product.stock,
                requested,
            )
            .into());
        }
    }

    let mut low_stock = Vec::new();
    for product in &products {
        let requested = demand[&product.id];
        let new_stock = product.stock - requested;
        uow.update_product_stock(product.id, new_stock).await?;

        let movement = Movement::new(
            product.id,
            requested,
            comptoir_inventory::MovementDirection::Out,
            MovementSource::Sale,
            actor.user_id,
            Some(format!("Sale of order {}", order.number)),
        );
        if let Err(e) = uow.insert_movement(&movement).await {
            warn!(product_id = %product.id, error = %e, "failed to record sale movement");
        }

        if is_low_stock(new_stock) {
            low_stock.push((product.name.clone(), new_stock));
        }
    }
    Ok(low_stock)
}

async fn ensure_active_client<U: Uow>(uow: &mut U, client_id: ClientId) -> StoreResult<Client> {
    let client = uow
        .get_client(client_id)
        .await?
        .filter(Client::is_active)
        .ok_or_else(|| DomainError::validation("client not found or inactive"))?;
    Ok(client)
}

async fn load_party<U: Uow>(
    uow: &mut U,
    client_id: Option<ClientId>,
) -> StoreResult<Option<PartyInfo>> {
    let Some(client_id) = client_id else {
        return Ok(None);
    };
    Ok(uow.get_client(client_id).await?.map(|c| PartyInfo {
        name: c.name,
        email: c.email,
        phone: c.phone,
    }))
}

/// Read the catalog facts the planner needs, under the current transaction.
async fn load_catalog<U: Uow>(
    uow: &mut U,
    existing: &[comptoir_orders::OrderLine],
    specs: &[LineSpec],
) -> StoreResult<CatalogSnapshot> {
    let mut product_ids: Vec<ProductId> = Vec::new();
    let mut service_ids: Vec<ServiceId> = Vec::new();

    for item in existing
        .iter()
        .map(|l| l.item)
        .chain(specs.iter().filter_map(|s| s.item))
    {
        match item {
            LineItem::Product(id) => product_ids.push(id),
            LineItem::Service(id) => service_ids.push(id),
        }
    }
    product_ids.sort();
    product_ids.dedup();
    service_ids.sort_by_key(|id| *id.as_uuid());
    service_ids.dedup();

    let mut catalog = CatalogSnapshot::default();
    for product in uow.get_products(&product_ids).await? {
        catalog.products.insert(
            product.id,
            CatalogProduct {
                name: product.name.clone(),
                unit_price: product.unit_price,
                stock: product.stock,
                sellable: product.is_sellable(),
            },
        );
    }
    for service in uow.get_services(&service_ids).await? {
        catalog.services.insert(
            service.id,
            CatalogService {
                name: service.name.clone(),
                unit_price: service.unit_price,
                sellable: service.is_sellable(),
            },
        );
    }
    Ok(catalog)
}
