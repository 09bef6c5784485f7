//! Authenticated request context (§6 "Tenant/auth headers").

/// The scope a validated request was authenticated under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    /// `authorization: Bearer <keyId.secret>` — scoped to the caller's tenant.
    Tenant { key_id: String },
    /// `x-proxy-ops-token: <token>` — unscoped, cross-tenant operator access.
    Ops,
}

/// Inserted into request extensions by [`crate::middleware::TenantAuthLayer`]
/// once a request's headers have been validated. Handlers pull this out via
/// the [`crate::extractor::AuthContext`] extractor rather than re-parsing
/// headers, mirroring the teacher's `AuthenticatedUser` extensions pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthContext {
    pub tenant_id: String,
    pub scope: Scope,
}

impl AuthContext {
    pub fn is_ops(&self) -> bool {
        matches!(self.scope, Scope::Ops)
    }
}
