use axum::extract::{Path, Query, State};
use axum::response::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use concord_core::ledger::EntryFilters;

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct EntriesQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

pub async fn get_entries(
    State(state): State<AppState>,
    Path(account): Path<String>,
    Query(query): Query<EntriesQuery>,
) -> Result<Json<Value>, ApiError> {
    let filters = EntryFilters::paged(query.limit.unwrap_or(50), query.offset.unwrap_or(0));
    let page = state.ledger.get_entries(&account, filters).await?;
    Ok(Json(json!({
        "ok": true,
        "total": page.total,
        "items": page.items.iter().map(|e| json!({
            "id": e.id,
            "kind": e.kind,
            "from_account": e.from_account,
            "to_account": e.to_account,
            "amount_cents": e.amount_cents,
            "fee_cents": e.fee_cents,
            "net_cents": e.net_cents,
            "status": e.status,
            "created_at": e.created_at,
        })).collect::<Vec<_>>(),
    })))
}

pub async fn check_ref(
    State(state): State<AppState>,
    Path(ref_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let found = state.ledger.check_ref(&ref_id).await?;
    Ok(Json(json!({ "ok": true, "found": found.is_some() })))
}
