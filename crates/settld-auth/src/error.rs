//! Authentication/authorization error types (§7 error kind 2 "Auth / tenant").

use thiserror::Error;

pub type AuthResult<T> = Result<T, AuthError>;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("x-proxy-tenant-id header is required")]
    MissingTenantHeader,

    #[error("authorization or x-proxy-ops-token header is required")]
    MissingCredential,

    #[error("bearer token must be of the form keyId.secret")]
    MalformedBearerToken,

    #[error("tenant credential rejected")]
    InvalidTenantCredential,

    #[error("ops token rejected")]
    InvalidOpsToken,

    #[error("x-settld-protocol header must be {expected}, got {actual:?}")]
    UnsupportedProtocolVersion { expected: &'static str, actual: Option<String> },

    #[error("x-idempotency-key header is required on this route")]
    MissingIdempotencyKey,
}

impl AuthError {
    /// Stable code consumed by the HTTP error envelope (§6 "Error envelope").
    /// Never reveals which half of tenant/credential was wrong, per §7's
    /// "never reveal cross-tenant existence".
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::MissingTenantHeader | Self::MissingCredential | Self::MalformedBearerToken => "AUTH_REQUIRED",
            Self::InvalidTenantCredential | Self::InvalidOpsToken => "AUTH_REQUIRED",
            Self::UnsupportedProtocolVersion { .. } => "PROTOCOL_VERSION_UNSUPPORTED",
            Self::MissingIdempotencyKey => "IDEMPOTENCY_KEY_REQUIRED",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credential_errors_collapse_to_one_code() {
        assert_eq!(AuthError::MissingCredential.error_code(), "AUTH_REQUIRED");
        assert_eq!(AuthError::InvalidTenantCredential.error_code(), "AUTH_REQUIRED");
        assert_eq!(AuthError::InvalidOpsToken.error_code(), "AUTH_REQUIRED");
    }
}
