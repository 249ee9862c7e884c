//! Test identities, tokens and configuration.

use chrono::{Duration, Utc};
use common::jwt::UserClaims;
use common::types::UserIdentity;
use jsonwebtoken::{encode, EncodingKey, Header};
use std::collections::HashMap;

/// HS256 secret shared by test tokens and test configs.
pub const TEST_JWT_SECRET: &str = "chat-test-secret-0123456789abcdef";

pub fn alice() -> UserIdentity {
    UserIdentity::new(1, "alice", "alice@example.com")
}

pub fn bob() -> UserIdentity {
    UserIdentity::new(2, "bob", "bob@example.com")
}

/// Environment for `Config::from_vars` with only the required values set.
pub fn test_config_vars() -> HashMap<String, String> {
    HashMap::from([
        ("REDIS_URL".to_string(), "redis://localhost:6379".to_string()),
        ("CHAT_JWT_SECRET".to_string(), TEST_JWT_SECRET.to_string()),
    ])
}

/// Builder for signed user tokens.
///
/// # Example
/// ```rust,ignore
/// let token = TestTokenBuilder::for_identity(&alice())
///     .expires_in(60)
///     .sign(TEST_JWT_SECRET);
/// ```
pub struct TestTokenBuilder {
    identity: UserIdentity,
    exp: i64,
    iat: i64,
}

impl TestTokenBuilder {
    /// Token for `identity`, valid for an hour.
    pub fn for_identity(identity: &UserIdentity) -> Self {
        let now = Utc::now();
        Self {
            identity: identity.clone(),
            exp: (now + Duration::seconds(3600)).timestamp(),
            iat: now.timestamp(),
        }
    }

    /// Set expiration in seconds from now (negative for an expired token).
    pub fn expires_in(mut self, seconds: i64) -> Self {
        self.exp = (Utc::now() + Duration::seconds(seconds)).timestamp();
        self
    }

    /// Set issued-at timestamp
    pub fn issued_at(mut self, timestamp: i64) -> Self {
        self.iat = timestamp;
        self
    }

    /// Sign with HS256.
    pub fn sign(self, secret: &str) -> String {
        let claims = UserClaims {
            user_id: self.identity.user_id,
            username: self.identity.username,
            email: self.identity.email,
            exp: self.exp,
            iat: self.iat,
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .expect("HS256 signing cannot fail with a byte secret")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::jwt::{verify_user_token, DEFAULT_CLOCK_SKEW};

    #[test]
    fn test_signed_token_verifies() {
        let token = TestTokenBuilder::for_identity(&alice()).sign(TEST_JWT_SECRET);
        let claims =
            verify_user_token(&token, TEST_JWT_SECRET.as_bytes(), DEFAULT_CLOCK_SKEW).unwrap();
        assert_eq!(claims.identity(), alice());
    }

    #[test]
    fn test_expired_token_is_rejected() {
        let token = TestTokenBuilder::for_identity(&bob())
            .expires_in(-3600)
            .sign(TEST_JWT_SECRET);
        assert!(verify_user_token(&token, TEST_JWT_SECRET.as_bytes(), DEFAULT_CLOCK_SKEW).is_err());
    }

    #[test]
    fn test_config_vars_carry_required_keys() {
        let vars = test_config_vars();
        assert!(vars.contains_key("REDIS_URL"));
        assert_eq!(vars["CHAT_JWT_SECRET"], TEST_JWT_SECRET);
    }
}
