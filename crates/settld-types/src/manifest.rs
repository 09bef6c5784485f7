//! Tool manifest (§3 Tool Manifest).
//!
//! The `[EXPANSION]` descriptive metadata (category/pricing/tags) mirrors the
//! teacher's marketplace listing shape (see DESIGN.md §B.2) but never
//! participates in `manifestHash` beyond what's declared here — descriptive
//! fields are still inside the hashed envelope, so changing a tag rotates the
//! hash just like changing the transport would.

use crate::amount::Currency;
use crate::identity::{ManifestId, ToolId};
use serde::{Deserialize, Serialize};

/// Wire transport the tool is invoked over. Kept intentionally small: settld
/// mediates payment and evidence binding, not transport plumbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transport {
    Http,
    Grpc,
    Mcp,
}

/// A simple listed price, not a price-discovery mechanism (Non-goal: "no price
/// discovery beyond simple capability listings").
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PricingModel {
    pub base_cents: i64,
    pub currency: Currency,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub input_schema_ref: String,
    pub output_schema_ref: String,
}

/// An immutable, signed tool manifest. `manifestHash` is pinned by every
/// downstream artifact (agreement, evidence) that names this tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolManifest {
    pub schema_version: u32,
    pub manifest_id: ManifestId,
    pub tool_id: ToolId,
    pub tenant_id: String,
    pub descriptor: ToolDescriptor,
    pub transport: Transport,
    pub category: Option<String>,
    pub pricing_model: Option<PricingModel>,
    pub supported_currencies: Vec<Currency>,
    pub tags: Vec<String>,
    pub manifest_hash: String,
    pub signature_base64: String,
    pub signer_key_id: String,
}
