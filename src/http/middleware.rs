//! Authentication and rate limiting middleware

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use axum_extra::headers::{authorization::Bearer, Authorization, HeaderMapExt};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tracing::warn;
use uuid::Uuid;

use crate::app::AppState;

type HmacSha256 = Hmac<Sha256>;

/// JWT claims from Supabase auth token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtClaims {
    /// Subject (user ID)
    pub sub: Uuid,
    /// Audience
    #[serde(default)]
    pub aud: Option<String>,
    /// Expiration time (Unix timestamp)
    pub exp: u64,
    /// Issued at (Unix timestamp)
    #[serde(default)]
    pub iat: u64,
    /// Email (if available)
    #[serde(default)]
    pub email: Option<String>,
    /// Role
    #[serde(default)]
    pub role: Option<String>,
}

/// Verify an HS256 JWT and extract claims
pub fn verify_jwt(token: &str, secret: &str, now: u64) -> Result<JwtClaims, AuthError> {
    let mut parts = token.split('.');
    let (Some(header_b64), Some(payload_b64), Some(signature_b64), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(AuthError::InvalidToken);
    };

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| AuthError::InvalidToken)?;
    mac.update(header_b64.as_bytes());
    mac.update(b".");
    mac.update(payload_b64.as_bytes());

    let provided_signature = URL_SAFE_NO_PAD
        .decode(signature_b64)
        .map_err(|_| AuthError::InvalidToken)?;

    // Constant-time comparison
    mac.verify_slice(&provided_signature)
        .map_err(|_| AuthError::InvalidToken)?;

    let payload_json = URL_SAFE_NO_PAD
        .decode(payload_b64)
        .map_err(|_| AuthError::InvalidToken)?;

    let claims: JwtClaims = serde_json::from_slice(&payload_json)
        .map_err(|_| AuthError::InvalidToken)?;

    if claims.exp < now {
        return Err(AuthError::TokenExpired);
    }

    if claims.aud.as_deref().map_or(false, |aud| aud != "authenticated") {
        return Err(AuthError::InvalidAudience);
    }

    Ok(claims)
}

fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Authentication error types
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Missing authorization header")]
    MissingHeader,

    #[error("Invalid token")]
    InvalidToken,

    #[error("Token expired")]
    TokenExpired,

    #[error("Invalid audience")]
    InvalidAudience,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        (StatusCode::UNAUTHORIZED, self.to_string()).into_response()
    }
}

/// Authenticated user extractor result
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub user_id: Uuid,
    pub access_token: String,
    pub claims: JwtClaims,
}

/// Middleware to require authentication
pub async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let bearer = request
        .headers()
        .typed_get::<Authorization<Bearer>>()
        .ok_or(AuthError::MissingHeader)?;
    let token = bearer.token().to_string();

    let claims = verify_jwt(&token, &state.config.supabase_jwt_secret, unix_now())?;

    let auth_user = AuthenticatedUser {
        user_id: claims.sub,
        access_token: token,
        claims,
    };

    // Insert into request extensions for handlers to access
    request.extensions_mut().insert(auth_user);

    Ok(next.run(request).await)
}

/// Middleware rejecting requests over the global rate limit
pub async fn rate_limit(State(state): State<AppState>, request: Request, next: Next) -> Response {
    if state.limiter.check().is_err() {
        warn!(path = %request.uri().path(), "Rate limit exceeded");
        return (StatusCode::TOO_MANY_REQUESTS, "Too many requests").into_response();
    }
    next.run(request).await
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Sign claims the way Supabase does (HS256)
    fn sign(claims: &serde_json::Value, secret: &str) -> String {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
        let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(format!("{}.{}", header, payload).as_bytes());
        let sig = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());
        format!("{}.{}.{}", header, payload, sig)
    }

    #[test]
    fn valid_token_yields_claims() {
        let user = Uuid::new_v4();
        let token = sign(
            &serde_json::json!({"sub": user, "exp": 2000, "aud": "authenticated"}),
            "secret",
        );
        let claims = verify_jwt(&token, "secret", 1000).unwrap();
        assert_eq!(claims.sub, user);
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let token = sign(&serde_json::json!({"sub": Uuid::new_v4(), "exp": 2000}), "secret");
        assert!(matches!(
            verify_jwt(&token, "other", 1000),
            Err(AuthError::InvalidToken)
        ));
    }

    #[test]
    fn expired_token_is_rejected() {
        let token = sign(&serde_json::json!({"sub": Uuid::new_v4(), "exp": 10}), "secret");
        assert!(matches!(
            verify_jwt(&token, "secret", 1000),
            Err(AuthError::TokenExpired)
        ));
    }

    #[test]
    fn foreign_audience_is_rejected() {
        let token = sign(
            &serde_json::json!({"sub": Uuid::new_v4(), "exp": 2000, "aud": "service"}),
            "secret",
        );
        assert!(matches!(
            verify_jwt(&token, "secret", 1000),
            Err(AuthError::InvalidAudience)
        ));
    }

    #[test]
    fn malformed_token_is_rejected() {
        assert!(verify_jwt("a.b", "secret", 0).is_err());
        assert!(verify_jwt("a.b.c.d", "secret", 0).is_err());
    }
}
