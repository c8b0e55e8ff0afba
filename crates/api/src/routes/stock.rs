//! Stock ledger routes: manual adjustments and the movement audit listing.

use axum::extract::{Extension, Path, Query};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;

use comptoir_core::ProductId;
use comptoir_inventory::{MovementDirection, StockAdjustment};
use comptoir_store::{MovementFilter, Store};

use crate::app::AppState;
use crate::authz;
use crate::context::PrincipalContext;
use crate::dto::{self, parse_id};
use crate::errors::ApiError;

pub fn router<S: Store>() -> Router {
    Router::new()
        .route("/products/:id/stock", post(adjust_stock::<S>))
        .route("/inventory/movements", get(list_movements::<S>))
}

async fn adjust_stock<S: Store>(
    Extension(state): Extension<AppState<S>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::StockAdjustDto>,
) -> Result<Response, ApiError> {
    authz::require(&principal, "stock.adjust")?;
    let product_id: ProductId = parse_id(&id, "product id")?;

    let adjustment = match body.mode.to_uppercase().as_str() {
        "ADD" => StockAdjustment::Add(body.quantity),
        "SUBTRACT" => StockAdjustment::Subtract(body.quantity),
        "SET" => StockAdjustment::Set(body.quantity),
        other => {
            return Err(ApiError::validation(format!(
                "invalid adjustment mode '{other}': expected ADD, SUBTRACT or SET"
            )));
        }
    };

    let product = state
        .engine
        .adjust_stock(&principal.actor(), product_id, adjustment, body.note)
        .await?;

    Ok(Json(json!({
        "success": true,
        "data": { "product": dto::product_json(&product) },
        "message": "stock adjusted",
    }))
    .into_response())
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MovementQuery {
    product_id: Option<String>,
    direction: Option<String>,
    page: Option<u32>,
    limit: Option<u32>,
}

async fn list_movements<S: Store>(
    Extension(state): Extension<AppState<S>>,
    Extension(principal): Extension<PrincipalContext>,
    Query(query): Query<MovementQuery>,
) -> Result<Response, ApiError> {
    authz::require(&principal, "stock.read")?;

    let product_id = query
        .product_id
        .as_deref()
        .map(|s| parse_id(s, "product id"))
        .transpose()?;
    let direction = match query.direction.as_deref().map(str::to_uppercase).as_deref() {
        None => None,
        Some("IN") => Some(MovementDirection::In),
        Some("OUT") => Some(MovementDirection::Out),
        Some(other) => {
            return Err(ApiError::validation(format!(
                "invalid direction '{other}': expected IN or OUT"
            )));
        }
    };

    let movements = state
        .engine
        .store()
        .list_movements(&MovementFilter {
            product_id,
            direction,
            page: query.page.unwrap_or(1),
            limit: query.limit.unwrap_or(50),
        })
        .await?;

    Ok(Json(json!({
        "success": true,
        "data": {
            "movements": movements.iter().map(dto::movement_json).collect::<Vec<_>>(),
        },
    }))
    .into_response())
}
