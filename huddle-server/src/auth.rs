//! JWT bearer authentication for huddle-server.
//!
//! Tokens are HS256 with a `sub` (user id) and an `admin` flag. The verified
//! claims become the [`Actor`] every handler runs as.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{anyhow, Result};
use axum::{
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use huddle_core::Actor;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

/// Query parameter carrying the token for clients that cannot set headers
/// (browser WebSockets).
pub const TOKEN_QUERY_PARAM: &str = "access_token";

/// JWT claims structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user id)
    pub sub: String,
    /// Grants the admin-only operations
    #[serde(default)]
    pub admin: bool,
    /// Expiry (Unix timestamp)
    pub exp: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aud: Option<String>,
}

impl Claims {
    pub fn actor(&self) -> Actor {
        Actor {
            id: self.sub.as_str().into(),
            admin: self.admin,
        }
    }
}

/// Errors during authentication.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("missing authorization token")]
    MissingToken,
    #[error("invalid token: {0}")]
    InvalidToken(String),
    #[error("token expired")]
    Expired,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let body = Json(serde_json::json!({
            "error": "unauthorized",
            "message": self.to_string(),
        }));
        (StatusCode::UNAUTHORIZED, body).into_response()
    }
}

/// Configuration for authentication.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// HS256 signing secret (env: HUDDLE_JWT_SECRET)
    pub secret: String,
    /// Expected audience (optional)
    pub expected_aud: Option<String>,
    /// Clock skew tolerance in seconds
    pub leeway_secs: u64,
}

impl AuthConfig {
    pub fn verifier(&self) -> TokenVerifier {
        TokenVerifier {
            key: DecodingKey::from_secret(self.secret.as_bytes()),
            expected_aud: self.expected_aud.clone(),
            leeway_secs: self.leeway_secs,
        }
    }
}

#[derive(Clone)]
pub struct TokenVerifier {
    key: DecodingKey,
    expected_aud: Option<String>,
    leeway_secs: u64,
}

impl TokenVerifier {
    /// Decode and validate a JWT token.
    pub fn verify(&self, token: &str) -> Result<Claims, AuthError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.leeway = self.leeway_secs;
        match self.expected_aud {
            Some(ref aud) => validation.set_audience(&[aud]),
            None => validation.validate_aud = false,
        }

        decode::<Claims>(token, &self.key, &validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::Expired,
                jsonwebtoken::errors::ErrorKind::InvalidAudience => {
                    AuthError::InvalidToken("audience mismatch".into())
                }
                _ => AuthError::InvalidToken(e.to_string()),
            })
    }
}

/// Request extension holding the verifier.
#[derive(Clone)]
pub struct AuthState {
    pub verifier: Arc<TokenVerifier>,
}

/// The authenticated caller.
#[derive(Debug, Clone)]
pub struct AuthUser(pub Actor);

fn extract_token(parts: &Parts) -> Option<&str> {
    let header = parts
        .headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    header.or_else(|| {
        parts.uri.query().and_then(|query| {
            query.split('&').find_map(|pair| {
                pair.strip_prefix(TOKEN_QUERY_PARAM)
                    .and_then(|rest| rest.strip_prefix('='))
            })
        })
    })
}

impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        // Fail closed when the router was built without auth
        let auth_state = parts
            .extensions
            .get::<AuthState>()
            .cloned()
            .ok_or(AuthError::MissingToken)?;

        let token = extract_token(parts).ok_or(AuthError::MissingToken)?;
        match auth_state.verifier.verify(token) {
            Ok(claims) => Ok(AuthUser(claims.actor())),
            Err(e) => {
                warn!("auth failed: {}", e);
                Err(e)
            }
        }
    }
}

/// Mint a token for `sub`, valid for `expires_in_secs`.
pub fn create_token(
    secret: &[u8],
    sub: &str,
    admin: bool,
    audience: Option<String>,
    expires_in_secs: u64,
) -> Result<String> {
    let exp = SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs() + expires_in_secs;
    let claims = Claims {
        sub: sub.to_string(),
        admin,
        exp,
        aud: audience,
    };

    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret),
    )
    .map_err(|e| anyhow!("failed to encode token: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(aud: Option<&str>) -> AuthConfig {
        AuthConfig {
            secret: "test-secret".into(),
            expected_aud: aud.map(String::from),
            leeway_secs: 0,
        }
    }

    #[test]
    fn token_roundtrip_keeps_admin_flag() {
        let token = create_token(b"test-secret", "root", true, None, 3600).unwrap();
        let claims = config(None).verifier().verify(&token).unwrap();
        assert_eq!(claims.sub, "root");
        assert_eq!(claims.actor(), Actor::admin("root"));
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let token = create_token(b"other-secret", "alice", false, None, 3600).unwrap();
        let err = config(None).verifier().verify(&token).unwrap_err();
        assert!(matches!(err, AuthError::InvalidToken(_)));
    }

    #[test]
    fn audience_is_enforced_when_configured() {
        let token = create_token(b"test-secret", "alice", false, Some("web".into()), 3600).unwrap();
        assert!(config(Some("web")).verifier().verify(&token).is_ok());
        assert!(config(Some("mobile")).verifier().verify(&token).is_err());
    }

    #[test]
    fn expired_token_is_rejected() {
        let exp = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs() - 120;
        let claims = Claims {
            sub: "alice".into(),
            admin: false,
            exp,
            aud: None,
        };
        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(b"test-secret"),
        )
        .unwrap();
        let err = config(None).verifier().verify(&token).unwrap_err();
        assert!(matches!(err, AuthError::Expired));
    }
}
