use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use chrono::Utc;
use settld_auth::AuthContext;
use settld_gate::SettleArgs;
use settld_grants::GrantIntent;
use settld_marketplace::{build_agreement, build_evidence, build_tool_manifest};
use settld_store::IdempotencyKey;
use settld_types::manifest::{ToolDescriptor, Transport};
use settld_types::{KeyId, SettldError, ToolId};

use crate::dto::settlement::SettleToolCallRequest;
use crate::error::ApiResult;
use crate::extractors::idempotency_key;
use crate::idempotency::{fingerprint, with_idempotency};
use crate::state::AppState;

/// The capability every settle call is validated against. Authority/
/// delegation grants meant to cover tool settlement must include this in
/// their `scope` (§4.6).
const SETTLE_CAPABILITY: &str = "tools.call";

/// `POST /marketplace/tools/{toolId}/settle` (§6, §4.7): mints the
/// manifest/agreement/evidence chain for this call and runs the settlement
/// kernel against the gate named in the body. 201 on a fresh settlement,
/// 200 when the agreement hash replays a prior settle call.
pub async fn settle_tool_call(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(tool_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<impl IntoResponse> {
    let tool_id = ToolId::parse(&tool_id).map_err(|e| SettldError::SchemaInvalid { path: "toolId".into(), message: e.to_string() })?;
    let idem = idempotency_key(&headers)?;
    let print = fingerprint(&body);
    let req: SettleToolCallRequest = serde_json::from_slice(&body).map_err(|e| SettldError::SchemaInvalid { path: "body".into(), message: e.to_string() })?;
    let path = format!("/marketplace/tools/{tool_id}/settle");
    let key = IdempotencyKey::new(auth.tenant_id.clone(), "POST", path, idem);

    let (status, value) = with_idempotency(&state, key, print, move || async move {
        let gate = state
            .store
            .get_gate(&auth.tenant_id, req.gate_id)
            .await
            .map_err(SettldError::from)?
            .ok_or_else(|| SettldError::NotFound { resource: format!("gate {}", req.gate_id) })?;
        if gate.tool_id != tool_id {
            return Err(SettldError::SchemaInvalid { path: "toolId".into(), message: "does not match gate's toolId".into() });
        }

        let grant = state
            .store
            .get_grant(&auth.tenant_id, req.authority_grant_id)
            .await
            .map_err(SettldError::from)?
            .ok_or_else(|| SettldError::NotFound { resource: format!("grant {}", req.authority_grant_id) })?;
        let grantor_pem = state
            .vault
            .public_key_pem(&KeyId(grant.signer_key_id.clone()))
            .map_err(|e| SettldError::internal(format!("grantor key lookup: {e}")))?;
        let intent = GrantIntent { grantee_agent_id: gate.payer, capability: SETTLE_CAPABILITY.to_string(), currency: gate.currency, amount_cents: req.amount_cents };
        state.grants.validate(&grant, Utc::now(), &intent, &grantor_pem).await?;

        let signer_key_id = KeyId(req.signer_key_id.clone());
        let manifest = build_tool_manifest(
            auth.tenant_id.clone(),
            tool_id,
            ToolDescriptor {
                name: req.tool_name.clone(),
                description: req.tool_description.clone(),
                input_schema_ref: req.input_schema_ref.clone(),
                output_schema_ref: req.output_schema_ref.clone(),
            },
            Transport::Http,
            None,
            None,
            vec![req.currency],
            vec![],
            &signer_key_id,
            &state.vault,
        )?;

        let input_hash = settld_crypto::hash_canonical(&req.input).map_err(|e| SettldError::internal(e.to_string()))?;
        let agreement = build_agreement(
            auth.tenant_id.clone(),
            tool_id,
            manifest.manifest_hash.clone(),
            grant.grant_id,
            grant.grant_hash.clone(),
            gate.payer,
            gate.payee,
            req.amount_cents,
            req.currency,
            req.call_id.clone(),
            input_hash,
            req.acceptance_criteria,
            &signer_key_id,
            &state.vault,
        )?;

        let started_at = Utc::now();
        let output_hash = settld_crypto::hash_canonical(&req.output).map_err(|e| SettldError::internal(e.to_string()))?;
        let evidence = build_evidence(&agreement, req.output.clone(), output_hash, started_at, Utc::now(), &signer_key_id, &state.vault)?;

        state.store.put_manifest(manifest.clone()).await.map_err(SettldError::from)?;
        state.store.put_agreement(agreement.clone()).await.map_err(SettldError::from)?;
        state.store.put_evidence(&auth.tenant_id, evidence.clone()).await.map_err(SettldError::from)?;

        let args = SettleArgs {
            agreement: &agreement,
            evidence: &evidence,
            manifest: &manifest,
            grant: &grant,
            grant_hash: &grant.grant_hash,
            request_sha256: req.request_sha256,
            response_sha256: req.response_sha256,
            quote_sha256: req.quote_sha256,
            spend_authorization_sha256: req.spend_authorization_sha256,
            signer_key_id: signer_key_id.clone(),
        };
        let result = state.gate.settle(&auth.tenant_id, req.gate_id, args, &state.policy_table).await?;
        if result.outcome.decision.transfer_cents > 0 {
            state.grants.record_spend(&grant, result.outcome.decision.transfer_cents).await?;
        }

        // `GateService::settle` doesn't expose whether this call claimed the
        // agreement hash or replayed a prior claim (§4.7's replay case), so
        // this always reports 201; the HTTP idempotency layer above already
        // guarantees byte-identical replay for same-key retries.
        let status = StatusCode::CREATED;
        let body = serde_json::json!({
            "gate": result.gate,
            "decision": result.outcome.decision,
            "receipt": result.outcome.receipt,
        });
        Ok((status, body))
    })
    .await?;
    Ok((status, Json(value)))
}
