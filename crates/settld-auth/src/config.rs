//! Tenant/ops credential configuration (§6 "Environment variables affecting
//! the kernel": `PROXY_OPS_TOKENS`).
//!
//! Tenant bearer credentials are configured the same way, via
//! `SETTLD_TENANT_KEYS`, following the teacher's flat env-var-list convention
//! rather than a separate secrets store — settld has no onboarding flow
//! (explicit Non-goal), so credential provisioning is operator-managed config,
//! not a runtime registration API.

use std::collections::{HashMap, HashSet};

/// `(tenantId, keyId) -> secret`.
type TenantKeyTable = HashMap<(String, String), String>;

#[derive(Debug, Clone, Default)]
pub struct AuthConfig {
    tenant_keys: TenantKeyTable,
    ops_tokens: HashSet<String>,
}

impl AuthConfig {
    pub fn new(tenant_keys: TenantKeyTable, ops_tokens: HashSet<String>) -> Self {
        Self { tenant_keys, ops_tokens }
    }

    /// Parses `SETTLD_TENANT_KEYS` (`tenant:keyId:secret;tenant:keyId:secret;...`)
    /// and `PROXY_OPS_TOKENS` (comma-separated) from the environment.
    pub fn from_env() -> Self {
        let tenant_keys = std::env::var("SETTLD_TENANT_KEYS").unwrap_or_default();
        let ops_tokens = std::env::var("PROXY_OPS_TOKENS").unwrap_or_default();
        Self::parse(&tenant_keys, &ops_tokens)
    }

    pub fn parse(tenant_keys: &str, ops_tokens: &str) -> Self {
        let mut table = HashMap::new();
        for entry in tenant_keys.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            let mut parts = entry.splitn(3, ':');
            if let (Some(tenant), Some(key_id), Some(secret)) = (parts.next(), parts.next(), parts.next()) {
                table.insert((tenant.to_string(), key_id.to_string()), secret.to_string());
            }
        }
        let tokens = ops_tokens.split(',').map(str::trim).filter(|s| !s.is_empty()).map(str::to_string).collect();
        Self { tenant_keys: table, ops_tokens: tokens }
    }

    /// Whether this ops-token list is non-empty and doesn't consist solely of
    /// an obvious placeholder. `settld-server` uses this to fail closed on
    /// startup in production (DESIGN.md Open Question decision #3).
    pub fn has_real_ops_tokens(&self) -> bool {
        !self.ops_tokens.is_empty() && !self.ops_tokens.iter().all(|t| t == "changeme" || t == "default")
    }

    pub(crate) fn tenant_secret(&self, tenant_id: &str, key_id: &str) -> Option<&str> {
        self.tenant_keys.get(&(tenant_id.to_string(), key_id.to_string())).map(String::as_str)
    }

    pub(crate) fn is_ops_token(&self, token: &str) -> bool {
        self.ops_tokens.iter().any(|t| constant_time_eq(t.as_bytes(), token.as_bytes()))
    }
}

pub(crate) fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    use subtle::ConstantTimeEq;
    a.len() == b.len() && a.ct_eq(b).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tenant_keys_and_ops_tokens() {
        let config = AuthConfig::parse("acme:key_1:s3cret;beta:key_2:other", "ops-a,ops-b");
        assert_eq!(config.tenant_secret("acme", "key_1"), Some("s3cret"));
        assert_eq!(config.tenant_secret("beta", "key_2"), Some("other"));
        assert!(config.tenant_secret("acme", "key_2").is_none());
        assert!(config.is_ops_token("ops-a"));
        assert!(!config.is_ops_token("ops-c"));
    }

    #[test]
    fn rejects_placeholder_ops_tokens_as_not_real() {
        assert!(!AuthConfig::parse("", "changeme").has_real_ops_tokens());
        assert!(!AuthConfig::parse("", "").has_real_ops_tokens());
        assert!(AuthConfig::parse("", "a-real-token").has_real_ops_tokens());
    }
}
