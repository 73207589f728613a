//! Session token validation.
//!
//! Tokens are HS256 JWTs signed with the shared `SC_AUTH_TOKEN_SECRET`.
//! `sub` is the user id and the optional `name` claim the display name.
//!
//! # Security
//!
//! - Size and shape are checked BEFORE decoding
//! - `exp` is required; `iat` more than the clock skew in the future is rejected
//! - Every failure maps to the same generic `INVALID_TOKEN` response
//! - Tokens are never logged

use crate::errors::SessionError;

use async_trait::async_trait;
use axum::http::{header, HeaderMap};
use common::jwt::{check_token_shape, validate_iat, UserClaims, DEFAULT_CLOCK_SKEW};
use common::secret::{ExposeSecret, SecretString};
use common::types::UserId;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use std::fmt;
use std::time::Duration;
use tracing::debug;

/// Cookie consulted when no `Authorization` header is present.
pub const SESSION_COOKIE: &str = "session_token";

/// Authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: UserId,
    pub name: Option<String>,
}

impl Identity {
    /// Name shown to other participants when the client supplies none.
    #[must_use]
    pub fn display_name(&self) -> String {
        self.name
            .clone()
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| self.user_id.to_string())
    }
}

/// Maps a bearer token to the user it was issued for.
#[async_trait]
pub trait TokenValidator: Send + Sync {
    /// # Errors
    ///
    /// Returns `SessionError::InvalidToken` for any unusable token.
    async fn identity_from_token(&self, token: &str) -> Result<Identity, SessionError>;
}

pub struct JwtTokenValidator {
    key: DecodingKey,
    validation: Validation,
    clock_skew: Duration,
}

impl fmt::Debug for JwtTokenValidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JwtTokenValidator")
            .field("key", &"[REDACTED]")
            .field("clock_skew", &self.clock_skew)
            .finish()
    }
}

impl JwtTokenValidator {
    #[must_use]
    pub fn new(secret: &SecretString) -> Self {
        Self::with_clock_skew(secret, DEFAULT_CLOCK_SKEW)
    }

    #[must_use]
    pub fn with_clock_skew(secret: &SecretString, clock_skew: Duration) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_required_spec_claims(&["exp", "sub"]);
        Self {
            key: DecodingKey::from_secret(secret.expose_secret().as_bytes()),
            validation,
            clock_skew,
        }
    }

    fn validate(&self, token: &str) -> Result<UserClaims, SessionError> {
        check_token_shape(token).map_err(|e| SessionError::InvalidToken(e.to_string()))?;

        let data = decode::<UserClaims>(token, &self.key, &self.validation).map_err(|e| {
            debug!(target: "sc.auth", error = %e, "Token validation failed");
            SessionError::InvalidToken("token rejected".to_string())
        })?;

        validate_iat(data.claims.iat, self.clock_skew)
            .map_err(|e| SessionError::InvalidToken(e.to_string()))?;

        Ok(data.claims)
    }
}

#[async_trait]
impl TokenValidator for JwtTokenValidator {
    async fn identity_from_token(&self, token: &str) -> Result<Identity, SessionError> {
        let claims = self.validate(token)?;
        let user_id = UserId::parse(claims.sub).map_err(|_| {
            debug!(target: "sc.auth", "Token subject is not a valid user id");
            SessionError::InvalidToken("invalid subject".to_string())
        })?;
        Ok(Identity {
            user_id,
            name: claims.name,
        })
    }
}

/// Find the caller's token: `Authorization: Bearer`, then the
/// `session_token` cookie, then the `token` query parameter.
///
/// WebSocket upgrades from browsers cannot set headers, hence the fallbacks.
#[must_use]
pub fn extract_token(headers: &HeaderMap, query_token: Option<&str>) -> Option<String> {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty());
    if let Some(token) = bearer {
        return Some(token.to_string());
    }

    let cookie = headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|h| h.to_str().ok())
        .flat_map(|h| h.split(';'))
        .filter_map(|pair| pair.trim().strip_prefix(SESSION_COOKIE)?.strip_prefix('='))
        .find(|t| !t.is_empty());
    if let Some(token) = cookie {
        return Some(token.to_string());
    }

    query_token
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(ToString::to_string)
}

/// Extract and validate in one step.
///
/// # Errors
///
/// Returns `SessionError::InvalidToken` if no token is present or it fails
/// validation.
pub async fn authenticate(
    validator: &dyn TokenValidator,
    headers: &HeaderMap,
    query_token: Option<&str>,
) -> Result<Identity, SessionError> {
    let token = extract_token(headers, query_token)
        .ok_or_else(|| SessionError::InvalidToken("missing token".to_string()))?;
    validator.identity_from_token(&token).await
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde_json::json;

    const SECRET: &str = "0123456789abcdef0123456789abcdef";

    fn validator() -> JwtTokenValidator {
        JwtTokenValidator::new(&SecretString::from(SECRET))
    }

    fn sign(claims: &impl serde::Serialize, secret: &str) -> String {
        encode(
            &Header::new(Algorithm::HS256),
            claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    fn valid_token(sub: &str, name: Option<&str>) -> String {
        let claims = UserClaims::issued_now(sub, name.map(String::from), Duration::from_secs(3600));
        sign(&claims, SECRET)
    }

    #[tokio::test]
    async fn test_valid_token_yields_identity() {
        let identity = validator()
            .identity_from_token(&valid_token("user-1", Some("Alice")))
            .await
            .unwrap();
        assert_eq!(identity.user_id.as_str(), "user-1");
        assert_eq!(identity.display_name(), "Alice");
    }

    #[tokio::test]
    async fn test_display_name_falls_back_to_user_id() {
        let identity = validator()
            .identity_from_token(&valid_token("user-2", None))
            .await
            .unwrap();
        assert_eq!(identity.display_name(), "user-2");
    }

    #[tokio::test]
    async fn test_wrong_secret_rejected() {
        let claims = UserClaims::issued_now("user-1", None, Duration::from_secs(3600));
        let token = sign(&claims, "another-secret-another-secret-xx");
        let err = validator().identity_from_token(&token).await.unwrap_err();
        assert_eq!(err.error_code(), "INVALID_TOKEN");
    }

    #[tokio::test]
    async fn test_expired_token_rejected() {
        let now = chrono::Utc::now().timestamp();
        let claims = json!({"sub": "user-1", "iat": now - 7200, "exp": now - 3600});
        let err = validator()
            .identity_from_token(&sign(&claims, SECRET))
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "INVALID_TOKEN");
    }

    #[tokio::test]
    async fn test_missing_exp_rejected() {
        let now = chrono::Utc::now().timestamp();
        let claims = json!({"sub": "user-1", "iat": now});
        assert!(validator()
            .identity_from_token(&sign(&claims, SECRET))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_future_iat_rejected() {
        let now = chrono::Utc::now().timestamp();
        let claims = json!({"sub": "user-1", "iat": now + 3600, "exp": now + 7200});
        assert!(validator()
            .identity_from_token(&sign(&claims, SECRET))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_oversized_and_garbage_tokens_rejected() {
        let v = validator();
        let huge = format!("{}.b.c", "a".repeat(9000));
        assert!(v.identity_from_token(&huge).await.is_err());
        assert!(v.identity_from_token("not-a-jwt").await.is_err());
    }

    #[test]
    fn test_extract_prefers_bearer_header() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer from-header"));
        headers.insert(header::COOKIE, HeaderValue::from_static("session_token=from-cookie"));
        assert_eq!(
            extract_token(&headers, Some("from-query")).as_deref(),
            Some("from-header")
        );
    }

    #[test]
    fn test_extract_falls_back_to_cookie_then_query() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("theme=dark; session_token=from-cookie"),
        );
        assert_eq!(
            extract_token(&headers, Some("from-query")).as_deref(),
            Some("from-cookie")
        );

        let empty = HeaderMap::new();
        assert_eq!(
            extract_token(&empty, Some("from-query")).as_deref(),
            Some("from-query")
        );
        assert_eq!(extract_token(&empty, Some("  ")), None);
        assert_eq!(extract_token(&empty, None), None);
    }

    #[test]
    fn test_extract_ignores_non_bearer_scheme() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert_eq!(extract_token(&headers, None), None);
    }

    #[test]
    fn test_debug_redacts_key() {
        let debug = format!("{:?}", validator());
        assert!(debug.contains("[REDACTED]"));
        assert!(!debug.contains(SECRET));
    }

    #[tokio::test]
    async fn test_authenticate_without_token() {
        let err = authenticate(&validator(), &HeaderMap::new(), None)
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), axum::http::StatusCode::UNAUTHORIZED);
    }
}
