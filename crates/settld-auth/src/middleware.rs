//! `TenantAuthLayer` — the tower middleware that validates the tenant/auth
//! header set (§6) on every request and stashes the resolved
//! [`AuthContext`] in request extensions for [`crate::extractor`] to pull
//! out (grounded on the teacher's `openibank-auth/src/middleware.rs`
//! `AuthLayer`/`AuthMiddleware` `Layer`/`Service` pair, generalized from
//! JWT/API-key/session auth methods down to the header-based
//! tenant-bearer-or-ops-token scheme `settld-auth::request` implements).

use axum::extract::Request;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::{Layer, Service};

use crate::config::AuthConfig;
use crate::error::AuthError;
use crate::request::{check_protocol_version, validate_headers};

#[derive(Clone)]
pub struct TenantAuthLayer {
    config: Arc<AuthConfig>,
}

impl TenantAuthLayer {
    pub fn new(config: Arc<AuthConfig>) -> Self {
        Self { config }
    }
}

impl<S> Layer<S> for TenantAuthLayer {
    type Service = TenantAuthMiddleware<S>;

    fn layer(&self, inner: S) -> Self::Service {
        TenantAuthMiddleware { inner, config: self.config.clone() }
    }
}

#[derive(Clone)]
pub struct TenantAuthMiddleware<S> {
    inner: S,
    config: Arc<AuthConfig>,
}

impl<S> Service<Request> for TenantAuthMiddleware<S>
where
    S: Service<Request, Response = Response> + Send + Clone + 'static,
    S::Future: Send + 'static,
    S::Error: Send,
{
    type Response = Response;
    type Error = S::Error;
    type Future = std::pin::Pin<Box<dyn std::future::Future<Output = Result<Response, S::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request) -> Self::Future {
        let config = self.config.clone();
        let mut inner = self.inner.clone();
        std::mem::swap(&mut self.inner, &mut inner);

        Box::pin(async move {
            if let Err(err) = check_protocol_version(req.headers()) {
                return Ok(auth_error_response(err));
            }
            match validate_headers(req.headers(), &config) {
                Ok(ctx) => {
                    req.extensions_mut().insert(ctx);
                    inner.call(req).await
                }
                Err(err) => Ok(auth_error_response(err)),
            }
        })
    }
}

fn auth_error_response(err: AuthError) -> Response {
    let status = match &err {
        AuthError::MissingIdempotencyKey => StatusCode::BAD_REQUEST,
        AuthError::UnsupportedProtocolVersion { .. } => StatusCode::BAD_REQUEST,
        _ => StatusCode::UNAUTHORIZED,
    };
    let body = serde_json::json!({
        "code": err.error_code(),
        "message": err.to_string(),
        "details": {},
    });
    (status, axum::Json(body)).into_response()
}
