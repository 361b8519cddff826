use axum::extract::State;
use axum::response::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct TransferRequest {
    pub from: String,
    pub to: String,
    pub amount_cents: i64,
}

pub async fn create_transfer(
    State(state): State<AppState>,
    Json(request): Json<TransferRequest>,
) -> Result<Json<Value>, ApiError> {
    let receipt = state
        .transfer
        .transfer(&request.from, &request.to, request.amount_cents)
        .await?;
    Ok(Json(json!({
        "ok": true,
        "transfer_id": receipt.transfer_id,
        "amount_cents": receipt.amount_cents,
        "fee_cents": receipt.fee_cents,
        "net_cents": receipt.net_cents,
    })))
}
