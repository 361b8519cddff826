use axum::extract::{Path, State};
use axum::response::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct PurchaseRequest {
    pub buyer: String,
    pub content_hash: String,
}

pub async fn create_purchase(
    State(state): State<AppState>,
    Json(request): Json<PurchaseRequest>,
) -> Result<Json<Value>, ApiError> {
    let purchase = state
        .purchase
        .purchase(&request.buyer, &request.content_hash)
        .await?;
    Ok(Json(json!({
        "ok": true,
        "purchase_id": purchase.id,
        "status": purchase.status,
        "fee_cents": purchase.fee_cents,
        "seller_net_cents": purchase.seller_net_cents,
        "total_royalties_cents": purchase.total_royalties_cents,
        "license_id": purchase.license_id,
    })))
}

#[derive(Debug, Deserialize)]
pub struct RefundRequest {
    pub actor: String,
    pub reason: String,
}

pub async fn refund_purchase(
    State(state): State<AppState>,
    Path(purchase_id): Path<Uuid>,
    Json(request): Json<RefundRequest>,
) -> Result<Json<Value>, ApiError> {
    let purchase = state
        .purchase
        .refund(purchase_id, &request.actor, &request.reason)
        .await?;
    Ok(Json(json!({ "ok": true, "status": purchase.status })))
}
