//! Axum extractor pulling the [`AuthContext`] stashed in request extensions
//! by [`crate::middleware::TenantAuthLayer`] (grounded on the teacher's
//! `openibank-api/src/extractors.rs` `AuthenticatedUser` extractor).

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::{request::Parts, StatusCode};

use crate::types::AuthContext;

#[async_trait]
impl<S> FromRequestParts<S> for AuthContext
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthContext>()
            .cloned()
            .ok_or((StatusCode::INTERNAL_SERVER_ERROR, "AuthContext missing: TenantAuthLayer not installed"))
    }
}
