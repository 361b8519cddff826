use axum::extract::{Path, State};
use axum::response::Json;
use serde_json::{json, Value};

use crate::error::ApiError;
use crate::state::AppState;

pub async fn get_balance(
    State(state): State<AppState>,
    Path(account): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let balance = state.balance.balance(&account).await?;
    Ok(Json(json!({
        "ok": true,
        "account": account,
        "credits_cents": balance.credits_cents,
        "debits_cents": balance.debits_cents,
        "net_cents": balance.net_cents(),
    })))
}

pub async fn system_summary(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let summary = state.balance.system_summary().await?;
    Ok(Json(json!({
        "ok": true,
        "user_cents": summary.user_cents,
        "emergent_cents": summary.emergent_cents,
        "platform_cents": summary.platform_cents,
    })))
}
