use axum::extract::{Path, State};
use axum::response::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateEmergentRequest {
    pub emergent_id: String,
    pub display_name: String,
    pub seed_amount_cents: i64,
}

pub async fn create_emergent_account(
    State(state): State<AppState>,
    Json(request): Json<CreateEmergentRequest>,
) -> Result<Json<Value>, ApiError> {
    let account = state
        .emergent
        .create(&request.emergent_id, &request.display_name, request.seed_amount_cents)
        .await?;
    Ok(Json(json!({
        "ok": true,
        "emergent_id": account.emergent_id,
        "operating_balance_cents": account.operating_balance_cents,
        "reserve_balance_cents": account.reserve_balance_cents,
    })))
}

#[derive(Debug, Deserialize)]
pub struct MoveToReserveRequest {
    pub amount_cents: i64,
}

pub async fn move_to_reserve(
    State(state): State<AppState>,
    Path(emergent_id): Path<String>,
    Json(request): Json<MoveToReserveRequest>,
) -> Result<Json<Value>, ApiError> {
    let account = state
        .emergent
        .move_to_reserve(&emergent_id, request.amount_cents)
        .await?;
    Ok(Json(json!({
        "ok": true,
        "operating_balance_cents": account.operating_balance_cents,
        "reserve_balance_cents": account.reserve_balance_cents,
    })))
}

pub async fn consistency_check(
    State(state): State<AppState>,
    Path(emergent_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let report = state.emergent.check_consistency(&emergent_id).await?;
    Ok(Json(json!({
        "ok": true,
        "consistent": report.is_consistent(),
        "operating_drift_cents": report.operating_drift_cents,
        "reserve_drift_cents": report.reserve_drift_cents,
    })))
}
