use serde::{Deserialize, Serialize};

/// `POST /sessions` (§6): opens a new event stream. A session is just a
/// `streamId` for `settld-eventlog` — there is no separate session record,
/// the stream's existence is implied by its first appended event.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionRequest {
    pub actor: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionResponse {
    pub session_id: String,
}

/// `POST /sessions/{id}/events` (§6, §4.3). `expectedPrevChainHash` comes
/// from the `x-proxy-expected-prev-chain-hash` header, not the body.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppendEventRequest {
    pub event_type: String,
    pub actor: String,
    pub payload: serde_json::Value,
    #[serde(default)]
    pub require_signature: bool,
    pub signer_key_id: Option<String>,
}

/// `GET /sessions/{id}/events` query (since/limit pagination, §6).
#[derive(Debug, Deserialize)]
pub struct ListEventsQuery {
    #[serde(default = "default_since")]
    pub since_event_id: String,
    pub event_type: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
}

fn default_since() -> String {
    "null".to_string()
}

fn default_limit() -> usize {
    100
}

/// `GET /sessions/{id}/replay-pack` (§6): the full verified event chain for
/// a stream, bundled for offline re-verification.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayPackResponse {
    pub stream_id: String,
    pub events: Vec<settld_types::ChainedEvent>,
    pub head_chain_hash: String,
    pub chain_verified: bool,
}

/// `GET /sessions/{id}/transcript` (§6): a flattened, human-readable view of
/// the same stream (actor/type/payload/time, no hash-chain fields).
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptEntry {
    pub at: chrono::DateTime<chrono::Utc>,
    pub actor: String,
    pub event_type: String,
    pub payload: serde_json::Value,
}
