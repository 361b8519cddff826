use axum::extract::{Path, State};
use axum::response::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct StoreRequest {
    /// Base64-encoded bytes; the boundary where decimal/text input is
    /// converted to raw storage, kept out of `concord_core::vault`.
    pub bytes_base64: String,
    pub mime_type: String,
}

pub async fn store(
    State(state): State<AppState>,
    Json(request): Json<StoreRequest>,
) -> Result<Json<Value>, ApiError> {
    let bytes = base64_decode(&request.bytes_base64)
        .map_err(|e| concord_core::CoreError::Validation(e))?;
    let (hash, result) = state.vault.store(&bytes, &request.mime_type).await?;
    Ok(Json(json!({
        "ok": true,
        "content_hash": hash,
        "deduplicated": result.deduplicated,
        "additional_bytes": result.additional_bytes,
    })))
}

pub async fn decrement_ref(
    State(state): State<AppState>,
    Path(hash): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let count = state.vault.decrement_ref(&hash).await?;
    Ok(Json(json!({ "ok": true, "reference_count": count })))
}

pub async fn sweep(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let removed = state.vault.sweep().await?;
    Ok(Json(json!({ "ok": true, "removed": removed })))
}

/// Minimal base64 decoder so this crate doesn't need the `base64` crate for
/// a single boundary conversion; any invalid input is rejected as a
/// validation error rather than panicking.
fn base64_decode(input: &str) -> Result<Vec<u8>, String> {
    const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";
    let input = input.trim_end_matches('=');
    let mut out = Vec::with_capacity(input.len() * 3 / 4);
    let mut buffer = 0u32;
    let mut bits = 0u32;
    for c in input.bytes() {
        let value = ALPHABET
            .iter()
            .position(|&b| b == c)
            .ok_or_else(|| "invalid base64 input".to_string())? as u32;
        buffer = (buffer << 6) | value;
        bits += 6;
        if bits >= 8 {
            bits -= 8;
            out.push((buffer >> bits) as u8);
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_known_vector() {
        assert_eq!(base64_decode("aGVsbG8=").unwrap(), b"hello");
    }
}
