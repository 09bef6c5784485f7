//! The route table (§6). Every route is mounted under one `Router<AppState>`
//! wrapped in `TenantAuthLayer` by [`crate::create_router`].

use axum::routing::{get, post};
use axum::Router;

use crate::handlers::{agents, gate, grants, receipts, sessions, settlement, wallet};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/agents/register", post(agents::register_agent))
        .route("/agents/:id/wallet/credit", post(agents::credit_wallet))
        .route("/authority-grants", post(grants::issue_authority_grant))
        .route("/delegation-grants", post(grants::issue_delegation_grant))
        .route("/x402/gate/create", post(gate::create_gate))
        .route("/x402/gate/authorize-payment", post(gate::authorize_payment))
        .route("/x402/gate/verify", post(gate::verify_gate))
        .route("/x402/gate/escalations/:id/resolve", post(gate::resolve_escalation))
        .route("/x402/wallets/:wallet_ref/authorize", post(wallet::authorize_wallet))
        .route("/marketplace/tools/:tool_id/settle", post(settlement::settle_tool_call))
        .route("/x402/receipts/export", get(receipts::export_receipts))
        .route("/sessions", post(sessions::create_session))
        .route("/sessions/:id/events", post(sessions::append_event).get(sessions::list_events))
        .route("/sessions/:id/replay-pack", get(sessions::replay_pack))
        .route("/sessions/:id/transcript", get(sessions::transcript))
}
