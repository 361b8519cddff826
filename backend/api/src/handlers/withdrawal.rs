use axum::extract::State;
use axum::response::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::ApiError;
use crate::gateway_adapter::GatewayPayoutSink;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct WithdrawRequest {
    pub account: String,
    pub amount_cents: i64,
}

pub async fn withdraw(
    State(state): State<AppState>,
    Json(request): Json<WithdrawRequest>,
) -> Result<Json<Value>, ApiError> {
    let sink = GatewayPayoutSink {
        gateway: state.gateway.clone(),
    };
    let withdrawal = state
        .withdrawal
        .withdraw(&request.account, request.amount_cents, &sink)
        .await?;
    Ok(Json(json!({
        "ok": true,
        "withdrawal_id": withdrawal.id,
        "status": withdrawal.status,
    })))
}
