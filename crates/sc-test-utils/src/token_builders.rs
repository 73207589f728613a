//! Builder patterns for signed session tokens.
//!
//! Tokens are HS256-signed with [`TEST_TOKEN_SECRET`] unless a different
//! secret is given, matching what [`crate::TestScServer`] configures.

use chrono::{Duration, Utc};
use common::jwt::UserClaims;
use jsonwebtoken::{encode, EncodingKey, Header};

/// Signing secret shared by the harness and the token builder.
pub const TEST_TOKEN_SECRET: &str = "test-session-secret-0123456789abcdef";

/// Builder for test session tokens.
///
/// # Example
/// ```rust,ignore
/// let token = TestTokenBuilder::new()
///     .for_user("alice")
///     .with_name("Alice")
///     .expires_in(3600)
///     .sign();
/// ```
pub struct TestTokenBuilder {
    sub: String,
    name: Option<String>,
    exp: i64,
    iat: i64,
    secret: String,
}

impl TestTokenBuilder {
    /// Create a new token builder with defaults
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            sub: "test-user".to_string(),
            name: None,
            exp: (now + Duration::seconds(3600)).timestamp(),
            iat: now.timestamp(),
            secret: TEST_TOKEN_SECRET.to_string(),
        }
    }

    /// Set the subject (user id)
    pub fn for_user(mut self, user_id: &str) -> Self {
        self.sub = user_id.to_string();
        self
    }

    /// Set the display name claim
    pub fn with_name(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    /// Set expiration in seconds from now (negative for an expired token)
    pub fn expires_in(mut self, seconds: i64) -> Self {
        self.exp = (Utc::now() + Duration::seconds(seconds)).timestamp();
        self
    }

    /// Set issued-at timestamp
    pub fn issued_at(mut self, timestamp: i64) -> Self {
        self.iat = timestamp;
        self
    }

    /// Sign with a different secret
    pub fn signed_with(mut self, secret: &str) -> Self {
        self.secret = secret.to_string();
        self
    }

    /// Build the claims without signing
    pub fn claims(&self) -> UserClaims {
        UserClaims {
            sub: self.sub.clone(),
            name: self.name.clone(),
            exp: self.exp,
            iat: self.iat,
        }
    }

    /// Sign and encode the token
    pub fn sign(self) -> String {
        encode(
            &Header::default(),
            &self.claims(),
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )
        .expect("HS256 encoding of test claims should not fail")
    }
}

impl Default for TestTokenBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_claims() {
        let claims = TestTokenBuilder::new().claims();
        assert_eq!(claims.sub, "test-user");
        assert!(claims.name.is_none());
        assert!(claims.exp > claims.iat);
    }

    #[test]
    fn test_expired_token_claims() {
        let claims = TestTokenBuilder::new().expires_in(-60).claims();
        assert!(claims.exp < Utc::now().timestamp());
    }

    #[test]
    fn test_sign_produces_three_segments() {
        let token = TestTokenBuilder::new()
            .for_user("alice")
            .with_name("Alice")
            .sign();
        assert_eq!(token.split('.').count(), 3);
    }
}
