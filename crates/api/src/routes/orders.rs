//! Order lifecycle routes: creation, listing, the branching update, payments,
//! documents.

use axum::extract::{Extension, Path, Query};
use axum::http::{Method, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router, body::Body};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;

use comptoir_core::{OrderId, OrderLineId, ProductId, ServiceId};
use comptoir_orders::{
    LineItem, LineSpec, OrderLine, OrderStatus, PaymentMode, PaymentSummary,
};
use comptoir_store::{CreateOrderRequest, OrderFilter, OrderPatch, Store};

use crate::app::AppState;
use crate::authz;
use crate::context::PrincipalContext;
use crate::dto::{self, LineKind, parse_id};
use crate::errors::ApiError;

pub fn router<S: Store>() -> Router {
    Router::new()
        .route("/orders", post(create_order::<S>).get(list_orders::<S>))
        .route("/orders/deleted", get(list_deleted_orders::<S>))
        .route(
            "/orders/:id",
            get(get_order::<S>)
                .put(update_order::<S>)
                .delete(delete_order::<S>),
        )
        .route("/orders/:id/lines/products", post(add_product_line::<S>))
        .route(
            "/orders/:id/lines/products/:line_id",
            put(update_line::<S>).delete(delete_line::<S>),
        )
        .route("/orders/:id/lines/services", post(add_service_line::<S>))
        .route(
            "/orders/:id/lines/services/:line_id",
            put(update_line::<S>).delete(delete_line::<S>),
        )
        .route(
            "/orders/:id/payments",
            post(record_payment::<S>).get(list_payments::<S>),
        )
        .route("/orders/:id/invoice", post(ensure_invoice::<S>))
        .route("/orders/:id/invoice/download", get(download_invoice::<S>))
        .route("/orders/:id/receipt/download", get(download_receipt::<S>))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListQuery {
    page: Option<u32>,
    limit: Option<u32>,
    search: Option<String>,
    status: Option<String>,
    client_id: Option<String>,
    date_from: Option<DateTime<Utc>>,
    date_to: Option<DateTime<Utc>>,
}

impl ListQuery {
    fn into_filter(self) -> Result<OrderFilter, ApiError> {
        let status = self
            .status
            .as_deref()
            .map(|s| s.parse::<OrderStatus>())
            .transpose()?;
        let client_id = self
            .client_id
            .as_deref()
            .map(|s| parse_id(s, "client id"))
            .transpose()?;
        Ok(OrderFilter {
            search: self.search,
            status,
            client_id,
            date_from: self.date_from,
            date_to: self.date_to,
            page: self.page.unwrap_or(1),
            limit: self.limit.unwrap_or(10),
        })
    }
}

async fn create_order<S: Store>(
    Extension(state): Extension<AppState<S>>,
    Extension(principal): Extension<PrincipalContext>,
    Json(body): Json<dto::CreateOrderDto>,
) -> Result<Response, ApiError> {
    authz::require(&principal, "orders.create")?;

    let client_id = body
        .client_id
        .as_deref()
        .map(|s| parse_id(s, "client id"))
        .transpose()?;

    let mut product_lines = Vec::with_capacity(body.produits.len());
    for line in &body.produits {
        let id = line
            .product_id
            .as_deref()
            .ok_or_else(|| ApiError::validation("product line requires productId"))?;
        product_lines.push((parse_id::<ProductId>(id, "product id")?, line.quantity));
    }

    let mut service_lines = Vec::with_capacity(body.services.len());
    for line in &body.services {
        let id = line
            .service_id
            .as_deref()
            .ok_or_else(|| ApiError::validation("service line requires serviceId"))?;
        service_lines.push((parse_id::<ServiceId>(id, "service id")?, line.quantity));
    }

    let order = state
        .engine
        .create_order(
            &principal.actor(),
            CreateOrderRequest {
                client_id,
                product_lines,
                service_lines,
            },
        )
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "data": { "order": dto::order_json(&order) },
            "message": "order created",
        })),
    )
        .into_response())
}

async fn list_orders<S: Store>(
    Extension(state): Extension<AppState<S>>,
    Extension(principal): Extension<PrincipalContext>,
    Query(query): Query<ListQuery>,
) -> Result<Response, ApiError> {
    authz::require(&principal, "orders.read")?;
    let filter = query.into_filter()?;
    let page = state.engine.store().list_orders(&filter).await?;
    Ok(order_page_response(state, page).await?)
}

async fn list_deleted_orders<S: Store>(
    Extension(state): Extension<AppState<S>>,
    Extension(principal): Extension<PrincipalContext>,
    Query(query): Query<ListQuery>,
) -> Result<Response, ApiError> {
    authz::require(&principal, "orders.read")?;
    let filter = query.into_filter()?;
    let page = state.engine.store().list_deleted_orders(&filter).await?;
    Ok(order_page_response(state, page).await?)
}

/// Enrich a page of orders with the authoritative batch payment sums.
async fn order_page_response<S: Store>(
    state: AppState<S>,
    page: comptoir_store::Page<comptoir_orders::Order>,
) -> Result<Response, ApiError> {
    let ids: Vec<OrderId> = page.items.iter().map(|o| o.id).collect();
    let sums = state.engine.store().payment_sums(&ids).await?;

    let orders: Vec<serde_json::Value> = page
        .items
        .iter()
        .map(|order| {
            let paid = sums.get(&order.id).copied().unwrap_or(0.0);
            dto::order_with_summary_json(order, PaymentSummary::compute(order.total, paid))
        })
        .collect();

    Ok(Json(json!({
        "success": true,
        "data": {
            "orders": orders,
            "pagination": {
                "currentPage": page.page,
                "totalPages": page.total_pages(),
                "totalItems": page.total,
                "itemsPerPage": page.limit,
                "hasNextPage": u64::from(page.page) < page.total_pages(),
                "hasPrevPage": page.page > 1,
            },
        },
    }))
    .into_response())
}

async fn get_order<S: Store>(
    Extension(state): Extension<AppState<S>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    authz::require(&principal, "orders.read")?;
    let order_id: OrderId = parse_id(&id, "order id")?;

    let order = state
        .engine
        .store()
        .get_order(order_id)
        .await?
        .ok_or_else(|| ApiError::not_found("order not found"))?;

    let sums = state.engine.store().payment_sums(&[order_id]).await?;
    let paid = sums.get(&order_id).copied().unwrap_or(0.0);

    Ok(Json(json!({
        "success": true,
        "data": {
            "order": dto::order_with_summary_json(&order, PaymentSummary::compute(order.total, paid)),
        },
    }))
    .into_response())
}

async fn update_order<S: Store>(
    Extension(state): Extension<AppState<S>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::UpdateOrderDto>,
) -> Result<Response, ApiError> {
    authz::require(&principal, "orders.update")?;
    let order_id: OrderId = parse_id(&id, "order id")?;

    let status = body
        .status
        .as_deref()
        .map(|s| s.parse::<OrderStatus>())
        .transpose()?;
    let client_id = body
        .client_id
        .as_deref()
        .map(|s| parse_id(s, "client id"))
        .transpose()?;
    let product_lines = body
        .produits
        .map(|specs| {
            specs
                .into_iter()
                .map(|s| s.into_spec(LineKind::Product))
                .collect::<Result<Vec<_>, _>>()
        })
        .transpose()?;
    let service_lines = body
        .services
        .map(|specs| {
            specs
                .into_iter()
                .map(|s| s.into_spec(LineKind::Service))
                .collect::<Result<Vec<_>, _>>()
        })
        .transpose()?;

    let order = state
        .engine
        .update_order(
            &principal.actor(),
            order_id,
            OrderPatch {
                client_id,
                status,
                product_lines,
                service_lines,
            },
        )
        .await?;

    Ok(Json(json!({
        "success": true,
        "data": { "order": dto::order_json(&order) },
        "message": "order updated",
    }))
    .into_response())
}

async fn delete_order<S: Store>(
    Extension(state): Extension<AppState<S>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    authz::require(&principal, "orders.delete")?;
    let order_id: OrderId = parse_id(&id, "order id")?;

    let order = state.engine.delete_order(order_id).await?;
    Ok(Json(json!({
        "success": true,
        "data": { "order": dto::order_json(&order) },
        "message": "order deleted",
    }))
    .into_response())
}

// ── Single-line convenience endpoints ───────────────────────────────────────
//
// Sugar over the bulk reconciliation protocol: rebuild the full line-spec
// set from the current lines, apply the one change, and let the engine
// revalidate everything under its transaction.

fn specs_from_lines(lines: &[OrderLine]) -> (Vec<LineSpec>, Vec<LineSpec>) {
    let mut products = Vec::new();
    let mut services = Vec::new();
    for line in lines {
        let spec = LineSpec {
            line_id: Some(line.id),
            item: None,
            quantity: line.quantity,
        };
        match line.item {
            LineItem::Product(_) => products.push(spec),
            LineItem::Service(_) => services.push(spec),
        }
    }
    (products, services)
}

async fn load_order_for_line_edit<S: Store>(
    state: &AppState<S>,
    principal: &PrincipalContext,
    id: &str,
) -> Result<(OrderId, comptoir_orders::Order), ApiError> {
    authz::require(principal, "orders.update")?;
    let order_id: OrderId = parse_id(id, "order id")?;
    let order = state
        .engine
        .store()
        .get_order(order_id)
        .await?
        .ok_or_else(|| ApiError::not_found("order not found"))?;
    Ok((order_id, order))
}

async fn apply_line_patch<S: Store>(
    state: &AppState<S>,
    principal: &PrincipalContext,
    order_id: OrderId,
    products: Vec<LineSpec>,
    services: Vec<LineSpec>,
    message: &str,
) -> Result<Response, ApiError> {
    let order = state
        .engine
        .update_order(
            &principal.actor(),
            order_id,
            OrderPatch {
                client_id: None,
                status: None,
                product_lines: Some(products),
                service_lines: Some(services),
            },
        )
        .await?;

    Ok(Json(json!({
        "success": true,
        "data": { "order": dto::order_json(&order) },
        "message": message,
    }))
    .into_response())
}

async fn add_product_line<S: Store>(
    Extension(state): Extension<AppState<S>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::AddProductLineDto>,
) -> Result<Response, ApiError> {
    let (order_id, order) = load_order_for_line_edit(&state, &principal, &id).await?;
    let product_id: ProductId = parse_id(&body.product_id, "product id")?;
    let quantity = body.quantity.unwrap_or(1);

    let (mut products, services) = specs_from_lines(&order.lines);

    // Merge with an existing line for the same product instead of creating a
    // duplicate.
    let mut merged = false;
    for (line, spec) in order
        .lines
        .iter()
        .filter(|l| matches!(l.item, LineItem::Product(_)))
        .zip(products.iter_mut())
    {
        if line.item == LineItem::Product(product_id) {
            spec.quantity += quantity;
            merged = true;
            break;
        }
    }
    if !merged {
        products.push(LineSpec {
            line_id: None,
            item: Some(LineItem::Product(product_id)),
            quantity,
        });
    }

    apply_line_patch(
        &state,
        &principal,
        order_id,
        products,
        services,
        "product line added",
    )
    .await
}

async fn add_service_line<S: Store>(
    Extension(state): Extension<AppState<S>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::AddServiceLineDto>,
) -> Result<Response, ApiError> {
    let (order_id, order) = load_order_for_line_edit(&state, &principal, &id).await?;
    let service_id: ServiceId = parse_id(&body.service_id, "service id")?;
    let quantity = body.quantity.unwrap_or(1);

    let (products, mut services) = specs_from_lines(&order.lines);

    let mut merged = false;
    for (line, spec) in order
        .lines
        .iter()
        .filter(|l| matches!(l.item, LineItem::Service(_)))
        .zip(services.iter_mut())
    {
        if line.item == LineItem::Service(service_id) {
            spec.quantity += quantity;
            merged = true;
            break;
        }
    }
    if !merged {
        services.push(LineSpec {
            line_id: None,
            item: Some(LineItem::Service(service_id)),
            quantity,
        });
    }

    apply_line_patch(
        &state,
        &principal,
        order_id,
        products,
        services,
        "service line added",
    )
    .await
}

async fn update_line<S: Store>(
    Extension(state): Extension<AppState<S>>,
    Extension(principal): Extension<PrincipalContext>,
    Path((id, line_id)): Path<(String, String)>,
    Json(body): Json<dto::UpdateLineDto>,
) -> Result<Response, ApiError> {
    let (order_id, order) = load_order_for_line_edit(&state, &principal, &id).await?;
    let line_id: OrderLineId = parse_id(&line_id, "line id")?;

    let (mut products, mut services) = specs_from_lines(&order.lines);
    let target = products
        .iter_mut()
        .chain(services.iter_mut())
        .find(|s| s.line_id == Some(line_id))
        .ok_or_else(|| ApiError::not_found("order line not found"))?;
    target.quantity = body.quantity;

    apply_line_patch(
        &state,
        &principal,
        order_id,
        products,
        services,
        "order line updated",
    )
    .await
}

async fn delete_line<S: Store>(
    Extension(state): Extension<AppState<S>>,
    Extension(principal): Extension<PrincipalContext>,
    Path((id, line_id)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    let (order_id, order) = load_order_for_line_edit(&state, &principal, &id).await?;
    let line_id: OrderLineId = parse_id(&line_id, "line id")?;

    let (mut products, mut services) = specs_from_lines(&order.lines);
    let before = products.len() + services.len();
    products.retain(|s| s.line_id != Some(line_id));
    services.retain(|s| s.line_id != Some(line_id));
    if products.len() + services.len() == before {
        return Err(ApiError::not_found("order line not found"));
    }

    apply_line_patch(
        &state,
        &principal,
        order_id,
        products,
        services,
        "order line removed",
    )
    .await
}

// ── Payments ────────────────────────────────────────────────────────────────

async fn record_payment<S: Store>(
    Extension(state): Extension<AppState<S>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::PaymentDto>,
) -> Result<Response, ApiError> {
    authz::require(&principal, "orders.pay")?;
    let order_id: OrderId = parse_id(&id, "order id")?;
    let mode: PaymentMode = body.mode.parse()?;

    let (payment, summary) = state
        .engine
        .record_payment(&principal.actor(), order_id, body.amount, mode)
        .await?;

    Ok(Json(json!({
        "success": true,
        "data": {
            "payment": dto::payment_json(&payment),
            "paidTotal": summary.paid_total,
            "remaining": summary.remaining,
            "settlementStatus": summary.status,
        },
        "message": "payment recorded",
    }))
    .into_response())
}

async fn list_payments<S: Store>(
    Extension(state): Extension<AppState<S>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    authz::require(&principal, "orders.read")?;
    let order_id: OrderId = parse_id(&id, "order id")?;

    let order = state
        .engine
        .store()
        .get_order(order_id)
        .await?
        .ok_or_else(|| ApiError::not_found("order not found"))?;

    let payments = state.engine.store().payments_for_order(order_id).await?;
    let paid: f64 = payments.iter().map(|p| p.amount).sum();
    let summary = PaymentSummary::compute(order.total, paid);

    Ok(Json(json!({
        "success": true,
        "data": {
            "payments": payments.iter().map(dto::payment_json).collect::<Vec<_>>(),
            "summary": dto::summary_json(&summary),
        },
    }))
    .into_response())
}

// ── Documents ───────────────────────────────────────────────────────────────

async fn ensure_invoice<S: Store>(
    Extension(state): Extension<AppState<S>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    authz::require(&principal, "orders.invoice")?;
    let order_id: OrderId = parse_id(&id, "order id")?;

    let (invoice, created) = state.engine.ensure_invoice(order_id).await?;
    let message = if created {
        "invoice generated"
    } else {
        "invoice already generated for this order"
    };

    Ok(Json(json!({
        "success": true,
        "data": {
            "invoice": dto::invoice_json(&invoice),
            "downloadUrl": format!("/orders/{order_id}/invoice/download"),
        },
        "message": message,
    }))
    .into_response())
}

#[derive(Debug, Default, Deserialize)]
struct DownloadQuery {
    inline: Option<String>,
}

impl DownloadQuery {
    fn inline(&self) -> bool {
        matches!(
            self.inline.as_deref().map(str::to_lowercase).as_deref(),
            Some("1") | Some("true") | Some("yes")
        )
    }
}

async fn download_invoice<S: Store>(
    Extension(state): Extension<AppState<S>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    Query(query): Query<DownloadQuery>,
    method: Method,
) -> Result<Response, ApiError> {
    authz::require(&principal, "orders.read")?;
    let order_id: OrderId = parse_id(&id, "order id")?;

    let invoice = state
        .engine
        .store()
        .latest_invoice(order_id)
        .await?
        .ok_or_else(|| ApiError::not_found("no invoice for this order"))?;

    let filename = format!("facture-{}", invoice.number);
    stream_document(&state, &invoice.pdf_path, &filename, query.inline(), method).await
}

async fn download_receipt<S: Store>(
    Extension(state): Extension<AppState<S>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    Query(query): Query<DownloadQuery>,
    method: Method,
) -> Result<Response, ApiError> {
    authz::require(&principal, "orders.read")?;
    let order_id: OrderId = parse_id(&id, "order id")?;

    let receipt = state
        .engine
        .store()
        .latest_receipt(order_id)
        .await?
        .ok_or_else(|| ApiError::not_found("no receipt for this order"))?;

    let filename = format!("recu-{}", receipt.number);
    stream_document(&state, &receipt.pdf_path, &filename, query.inline(), method).await
}

/// Serve a rendered document: inline vs attachment disposition, HEAD probing
/// (404 until the post-commit job has materialized the file).
async fn stream_document<S: Store>(
    state: &AppState<S>,
    relative: &str,
    filename: &str,
    inline: bool,
    method: Method,
) -> Result<Response, ApiError> {
    let path = state.renderer.resolve(relative);
    let metadata = tokio::fs::metadata(&path)
        .await
        .map_err(|_| ApiError::not_found("document file not found"))?;

    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default()
        .to_lowercase();
    let mime = match extension.as_str() {
        "pdf" => "application/pdf",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        _ => "application/octet-stream",
    };
    let disposition = if inline { "inline" } else { "attachment" };

    let builder = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, mime)
        .header(header::CONTENT_LENGTH, metadata.len())
        .header(
            header::CONTENT_DISPOSITION,
            format!("{disposition}; filename=\"{filename}.{extension}\""),
        )
        .header(header::CACHE_CONTROL, "private, max-age=0, must-revalidate");

    let body = if method == Method::HEAD {
        Body::empty()
    } else {
        let bytes = tokio::fs::read(&path).await.map_err(|e| {
            tracing::error!(path = %path.display(), error = %e, "failed to read document");
            ApiError::internal()
        })?;
        Body::from(bytes)
    };

    builder.body(body).map_err(|_| ApiError::internal())
}
