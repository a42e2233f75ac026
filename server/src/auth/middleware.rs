use axum::{
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::auth::jwt;
use crate::channels::gate::MembershipGate;
use crate::error::{blocking, GateError};

/// JWT claims extracted from Authorization: Bearer header.
/// Implements axum's FromRequestParts for use as an extractor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// User ID
    pub sub: i64,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Expiration (Unix timestamp)
    pub exp: i64,
}

impl<S> FromRequestParts<S> for Claims
where
    S: Send + Sync,
{
    type Rejection = StatusCode;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let auth_header = parts
            .headers
            .get("Authorization")
            .and_then(|v| v.to_str().ok())
            .ok_or(StatusCode::UNAUTHORIZED)?;

        let token = auth_header
            .strip_prefix("Bearer ")
            .ok_or(StatusCode::UNAUTHORIZED)?;

        // Get JWT secret from request extensions (set by middleware layer)
        let jwt_secret = parts
            .extensions
            .get::<JwtSecret>()
            .ok_or(StatusCode::INTERNAL_SERVER_ERROR)?;

        let claims =
            jwt::validate_access_token(&jwt_secret.0, token).map_err(|_| StatusCode::UNAUTHORIZED)?;

        // Same record check as the WebSocket handshake: unknown or revoked
        // tokens are refused even with a valid signature.
        let gate = parts
            .extensions
            .get::<TokenGate>()
            .ok_or(StatusCode::INTERNAL_SERVER_ERROR)?
            .0
            .clone();
        let token = token.to_string();
        match blocking(move || gate.verify_token(&token)).await {
            Ok(user_id) if user_id == claims.sub => Ok(claims),
            Ok(_) | Err(GateError::Auth(_)) | Err(GateError::NotMember { .. }) => {
                Err(StatusCode::UNAUTHORIZED)
            }
            Err(GateError::Store(e)) => {
                tracing::warn!(error = %e, "Token lookup failed");
                Err(StatusCode::INTERNAL_SERVER_ERROR)
            }
        }
    }
}

/// JWT secret stored in request extensions for the Claims extractor
#[derive(Clone)]
pub struct JwtSecret(pub Vec<u8>);

/// Token verifier stored in request extensions for the Claims extractor
#[derive(Clone)]
pub struct TokenGate(pub Arc<dyn MembershipGate>);
