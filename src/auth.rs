// Request identity
//
// Users authenticate with the Supabase access token (HS256, audience
// `authenticated`) as a bearer token; the `sub` claim is their profile id.
// Operators authenticate with the `X-Admin-Key` header.

use axum::extract::{FromRef, FromRequestParts};
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{async_trait, Json};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

pub const ADMIN_KEY_HEADER: &str = "x-admin-key";
const SUPABASE_AUDIENCE: &str = "authenticated";

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Not authenticated")]
    MissingCredentials,
    #[error("Invalid access token: {0}")]
    InvalidToken(String),
    #[error("Invalid admin key")]
    InvalidAdminKey,
    #[error("Admin API is disabled")]
    AdminDisabled,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = match self {
            AuthError::AdminDisabled => StatusCode::FORBIDDEN,
            _ => StatusCode::UNAUTHORIZED,
        };
        let body = serde_json::json!({
            "success": false,
            "error": self.to_string(),
        });
        (status, Json(body)).into_response()
    }
}

/// Claims of a Supabase access token that we rely on
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub aud: String,
    pub exp: usize,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
}

/// Secrets needed by the extractors, pulled out of the router state
#[derive(Clone)]
pub struct AuthKeys {
    jwt_secret: String,
    admin_api_key: Option<String>,
}

impl AuthKeys {
    pub fn new(jwt_secret: impl Into<String>, admin_api_key: Option<String>) -> Self {
        Self {
            jwt_secret: jwt_secret.into(),
            admin_api_key,
        }
    }

    pub fn verify_access_token(&self, token: &str) -> Result<Uuid, AuthError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_audience(&[SUPABASE_AUDIENCE]);

        let data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.jwt_secret.as_bytes()),
            &validation,
        )
        .map_err(|e| AuthError::InvalidToken(e.to_string()))?;

        Uuid::parse_str(&data.claims.sub)
            .map_err(|_| AuthError::InvalidToken("subject is not a user id".to_string()))
    }

    pub fn verify_admin_key(&self, presented: &str) -> Result<(), AuthError> {
        let expected = self
            .admin_api_key
            .as_deref()
            .ok_or(AuthError::AdminDisabled)?;
        if constant_time_eq(expected.as_bytes(), presented.as_bytes()) {
            Ok(())
        } else {
            Err(AuthError::InvalidAdminKey)
        }
    }
}

/// Compares digests so neither the contents nor the length of the key leak
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    Sha256::digest(a)
        .as_slice()
        .ct_eq(Sha256::digest(b).as_slice())
        .into()
}

fn bearer_token(parts: &Parts) -> Option<&str> {
    let value = parts.headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    scheme
        .eq_ignore_ascii_case("bearer")
        .then(|| token.trim())
        .filter(|t| !t.is_empty())
}

/// An authenticated user
#[derive(Debug, Clone, Copy)]
pub struct AuthUser {
    pub user_id: Uuid,
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    AuthKeys: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts).ok_or(AuthError::MissingCredentials)?;
        let keys = AuthKeys::from_ref(state);
        let user_id = keys.verify_access_token(token).map_err(|e| {
            debug!("Rejected access token: {}", e);
            e
        })?;
        Ok(AuthUser { user_id })
    }
}

/// An operator holding the admin key
#[derive(Debug, Clone, Copy)]
pub struct AdminAccess;

#[async_trait]
impl<S> FromRequestParts<S> for AdminAccess
where
    AuthKeys: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let keys = AuthKeys::from_ref(state);
        let presented = parts
            .headers
            .get(ADMIN_KEY_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or(AuthError::MissingCredentials)?;
        keys.verify_admin_key(presented)?;
        Ok(AdminAccess)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    fn token(secret: &str, sub: &str, aud: &str, exp_offset: i64) -> String {
        let claims = Claims {
            sub: sub.to_string(),
            aud: aud.to_string(),
            exp: (chrono::Utc::now().timestamp() + exp_offset) as usize,
            email: None,
            role: Some("authenticated".to_string()),
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    #[test]
    fn test_valid_access_token() {
        let keys = AuthKeys::new("secret", None);
        let user = Uuid::new_v4();
        let jwt = token("secret", &user.to_string(), "authenticated", 3600);
        assert_eq!(keys.verify_access_token(&jwt).unwrap(), user);
    }

    #[test]
    fn test_rejected_access_tokens() {
        let keys = AuthKeys::new("secret", None);
        let user = Uuid::new_v4().to_string();

        let wrong_secret = token("other", &user, "authenticated", 3600);
        assert!(keys.verify_access_token(&wrong_secret).is_err());

        let wrong_aud = token("secret", &user, "anon", 3600);
        assert!(keys.verify_access_token(&wrong_aud).is_err());

        let expired = token("secret", &user, "authenticated", -3600);
        assert!(keys.verify_access_token(&expired).is_err());

        let not_uuid = token("secret", "service", "authenticated", 3600);
        assert!(keys.verify_access_token(&not_uuid).is_err());
    }

    #[test]
    fn test_admin_key() {
        let disabled = AuthKeys::new("secret", None);
        assert!(matches!(
            disabled.verify_admin_key("anything"),
            Err(AuthError::AdminDisabled)
        ));

        let keys = AuthKeys::new("secret", Some("op-key".to_string()));
        assert!(keys.verify_admin_key("op-key").is_ok());
        assert!(matches!(
            keys.verify_admin_key("op-kez"),
            Err(AuthError::InvalidAdminKey)
        ));
        assert!(keys.verify_admin_key("op").is_err());
        assert!(keys.verify_admin_key("").is_err());
        assert!(keys.verify_admin_key("op-key-and-more").is_err());
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(b"same", b"same"));
        assert!(!constant_time_eq(b"same", b"sane"));
        assert!(!constant_time_eq(b"same", b"same!"));
        assert!(constant_time_eq(b"", b""));
    }
}
