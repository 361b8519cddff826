use axum::extract::State;
use axum::response::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::ApiError;
use crate::state::AppState;

pub async fn get_state(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let treasury = state.treasury.state().await?;
    Ok(Json(json!({
        "ok": true,
        "total_usd_cents": treasury.total_usd_cents,
        "total_coins_cents": treasury.total_coins_cents,
        "drift_cents": treasury.drift_cents,
        "drift_alert": treasury.drift_alert,
        "last_reconciled": treasury.last_reconciled,
    })))
}

#[derive(Debug, Deserialize)]
pub struct ClearDriftRequest {
    pub actor: String,
}

pub async fn clear_drift_alert(
    State(state): State<AppState>,
    Json(request): Json<ClearDriftRequest>,
) -> Result<Json<Value>, ApiError> {
    state.treasury.clear_drift_alert(&request.actor).await?;
    Ok(Json(json!({ "ok": true })))
}
