use axum::extract::State;
use axum::response::Json;
use serde_json::{json, Value};

use crate::error::ApiError;
use crate::state::AppState;

pub async fn run(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let run = state.reconciler.run(None).await?;
    Ok(Json(json!({
        "ok": true,
        "id": run.id,
        "ledger_expected_cents": run.ledger_expected_cents,
        "drift_cents": run.drift_cents,
        "alert_flag": run.alert_flag,
    })))
}

pub async fn stale_pending(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let cutoff = chrono::Utc::now() - chrono::Duration::hours(1);
    let entries = state.reconciler.stale_pending_entries(cutoff).await?;
    Ok(Json(json!({
        "ok": true,
        "entries": entries.iter().map(|e| json!({
            "id": e.id,
            "kind": e.kind,
            "amount_cents": e.amount_cents,
            "created_at": e.created_at,
        })).collect::<Vec<_>>(),
    })))
}
