use axum::extract::State;
use axum::response::Json;
use concord_core::checkout::WebhookOutcome;
use concord_core::CoreError;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CheckoutWebhookRequest {
    pub event_id: String,
    pub source: String,
    pub user: String,
    pub amount_cents: i64,
    pub signature: String,
}

pub async fn checkout_webhook(
    State(state): State<AppState>,
    Json(request): Json<CheckoutWebhookRequest>,
) -> Result<Json<Value>, ApiError> {
    state
        .gateway
        .verify_webhook_signature(request.event_id.as_bytes(), &request.signature)
        .map_err(|e| ApiError::from(CoreError::Validation(e.to_string())))?;

    let outcome = state
        .checkout
        .credit_on_webhook(&request.event_id, &request.source, &request.user, request.amount_cents)
        .await?;

    Ok(match outcome {
        WebhookOutcome::Credited { ledger_entry_id } => Json(json!({
            "ok": true,
            "status": "credited",
            "ledger_entry_id": ledger_entry_id,
        })),
        WebhookOutcome::Replayed => Json(json!({
            "ok": true,
            "status": "replayed",
        })),
    })
}
