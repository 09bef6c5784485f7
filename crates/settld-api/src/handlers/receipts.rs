use axum::extract::{Query, State};
use axum::http::header;
use axum::response::IntoResponse;
use settld_auth::AuthContext;
use settld_types::SettldError;

use crate::dto::settlement::ExportReceiptsQuery;
use crate::error::ApiResult;
use crate::state::AppState;

/// `GET /x402/receipts/export` (§6, §B.2): newline-delimited JSON of the
/// tenant's most recent receipts, with a Merkle root over `receiptHash`
/// committing to the batch (so an exporter can prove a receipt was included
/// without shipping the whole file).
pub async fn export_receipts(State(state): State<AppState>, auth: AuthContext, Query(query): Query<ExportReceiptsQuery>) -> ApiResult<impl IntoResponse> {
    let receipts = state.store.list_receipts(&auth.tenant_id, query.limit).await.map_err(SettldError::from)?;

    let leaves: Vec<[u8; 32]> = receipts.iter().map(|r| settld_crypto::sha256(r.receipt_hash.as_bytes())).collect();
    let merkle_root = settld_crypto::merkle_root_hex(&leaves).unwrap_or_default();

    let mut body = String::new();
    for receipt in &receipts {
        let line = serde_json::to_string(receipt).map_err(|e| SettldError::internal(e.to_string()))?;
        body.push_str(&line);
        body.push('\n');
    }

    Ok((
        [(header::CONTENT_TYPE, "application/x-ndjson".to_string()), (header::HeaderName::from_static("x-merkle-root"), merkle_root)],
        body,
    ))
}
