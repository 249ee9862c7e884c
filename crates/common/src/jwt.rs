//! JWT utilities shared across the chat relay crates.
//!
//! This module provides the token checks the realtime service performs before
//! admitting a connection:
//! - Size limits for DoS prevention
//! - Clock skew constants for iat validation
//! - The user claims structure issued by the account service
//! - HS256 verification of user tokens
//!
//! # Security
//!
//! - Tokens are size-checked BEFORE parsing (DoS prevention)
//! - Only HS256 is accepted; the `alg` header cannot downgrade verification
//! - Generic error messages prevent information leakage
//! - The `email` field in claims is redacted in Debug output

use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

use crate::types::UserIdentity;

// =============================================================================
// Constants
// =============================================================================

/// Maximum allowed JWT size in bytes (8KB).
///
/// Typical user tokens are 200-400 bytes. Anything larger is rejected before
/// base64 decoding or signature verification.
pub const MAX_JWT_SIZE_BYTES: usize = 8192; // 8KB

/// Default JWT clock skew tolerance (5 minutes).
///
/// Tokens with `iat` timestamps more than this amount in the future are rejected.
pub const DEFAULT_CLOCK_SKEW: Duration = Duration::from_secs(300);

/// Maximum allowed JWT clock skew tolerance (10 minutes).
pub const MAX_CLOCK_SKEW: Duration = Duration::from_secs(600);

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur during JWT validation.
///
/// Every variant renders the same message so callers cannot distinguish an
/// expired token from a forged one. Details are logged at debug level.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JwtValidationError {
    /// Token size exceeds maximum allowed.
    #[error("The access token is invalid or expired")]
    TokenTooLarge,

    /// Token format is invalid (not a valid JWT structure).
    #[error("The access token is invalid or expired")]
    MalformedToken,

    /// Signature, algorithm or expiry check failed.
    #[error("The access token is invalid or expired")]
    VerificationFailed,

    /// Token `iat` claim is too far in the future.
    #[error("The access token is invalid or expired")]
    IatTooFarInFuture,
}

// =============================================================================
// Claims Types
// =============================================================================

/// User token claims issued at login.
#[derive(Clone, Serialize, Deserialize)]
pub struct UserClaims {
    /// Numeric user ID.
    pub user_id: u64,

    /// Display name.
    pub username: String,

    /// Account email - redacted in Debug output.
    pub email: String,

    /// Expiration timestamp (Unix epoch seconds).
    pub exp: i64,

    /// Issued-at timestamp (Unix epoch seconds).
    pub iat: i64,
}

impl fmt::Debug for UserClaims {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserClaims")
            .field("user_id", &self.user_id)
            .field("username", &self.username)
            .field("email", &"[REDACTED]")
            .field("exp", &self.exp)
            .field("iat", &self.iat)
            .finish()
    }
}

impl UserClaims {
    /// Identity carried by these claims.
    #[must_use]
    pub fn identity(&self) -> UserIdentity {
        UserIdentity::new(self.user_id, self.username.clone(), self.email.clone())
    }
}

// =============================================================================
// Functions
// =============================================================================

/// Verify an HS256 user token and return its claims.
///
/// # Checks
///
/// 1. Size check - reject tokens > 8KB before parsing
/// 2. Verify HS256 signature against `secret`
/// 3. Validate `exp` (jsonwebtoken default leeway)
/// 4. Validate `iat` with `clock_skew` tolerance
///
/// # Errors
///
/// Returns a `JwtValidationError` variant for every failure; all of them
/// display the same generic message.
pub fn verify_user_token(
    token: &str,
    secret: &[u8],
    clock_skew: Duration,
) -> Result<UserClaims, JwtValidationError> {
    if token.len() > MAX_JWT_SIZE_BYTES {
        tracing::debug!(
            target: "common.jwt",
            token_size = token.len(),
            max_size = MAX_JWT_SIZE_BYTES,
            "Token rejected: size exceeds maximum allowed"
        );
        return Err(JwtValidationError::TokenTooLarge);
    }

    if token.split('.').count() != 3 {
        tracing::debug!(target: "common.jwt", "Token rejected: invalid JWT format");
        return Err(JwtValidationError::MalformedToken);
    }

    let validation = Validation::new(Algorithm::HS256);
    let token_data = decode::<UserClaims>(token, &DecodingKey::from_secret(secret), &validation)
        .map_err(|e| {
            tracing::debug!(target: "common.jwt", error = %e, "Token verification failed");
            JwtValidationError::VerificationFailed
        })?;

    validate_iat(token_data.claims.iat, clock_skew.min(MAX_CLOCK_SKEW))?;

    Ok(token_data.claims)
}

/// Validate the `iat` (issued-at) claim with clock skew tolerance.
///
/// # Errors
///
/// Returns `JwtValidationError::IatTooFarInFuture` if the iat timestamp is more than
/// `clock_skew` in the future.
pub fn validate_iat(iat: i64, clock_skew: Duration) -> Result<(), JwtValidationError> {
    let now = chrono::Utc::now().timestamp();
    validate_iat_at(iat, clock_skew, now)
}

/// Deterministic `iat` validation against an explicit `now` timestamp.
pub(crate) fn validate_iat_at(
    iat: i64,
    clock_skew: Duration,
    now: i64,
) -> Result<(), JwtValidationError> {
    // Safe cast: clock_skew is bounded to MAX_CLOCK_SKEW (600 seconds), well within i64 range
    #[allow(clippy::cast_possible_wrap)]
    let clock_skew_secs = clock_skew.as_secs() as i64;
    let max_iat = now + clock_skew_secs;

    if iat > max_iat {
        tracing::debug!(
            target: "common.jwt",
            iat = iat,
            now = now,
            max_allowed = max_iat,
            "Token rejected: iat too far in the future"
        );
        return Err(JwtValidationError::IatTooFarInFuture);
    }

    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    const SECRET: &[u8] = b"test-secret-for-hs256-signing-0123";

    fn claims_at(now: i64) -> UserClaims {
        UserClaims {
            user_id: 1,
            username: "alice".to_string(),
            email: "alice@example.com".to_string(),
            exp: now + 3600,
            iat: now,
        }
    }

    fn sign(claims: &UserClaims, secret: &[u8]) -> String {
        encode(
            &Header::new(Algorithm::HS256),
            claims,
            &EncodingKey::from_secret(secret),
        )
        .unwrap()
    }

    #[test]
    fn test_verify_valid_token() {
        let now = chrono::Utc::now().timestamp();
        let token = sign(&claims_at(now), SECRET);

        let claims = verify_user_token(&token, SECRET, DEFAULT_CLOCK_SKEW).unwrap();
        assert_eq!(claims.user_id, 1);
        assert_eq!(claims.username, "alice");
        assert_eq!(claims.identity().email, "alice@example.com");
    }

    #[test]
    fn test_verify_rejects_wrong_secret() {
        let now = chrono::Utc::now().timestamp();
        let token = sign(&claims_at(now), b"some-other-secret-entirely-000000");

        assert_eq!(
            verify_user_token(&token, SECRET, DEFAULT_CLOCK_SKEW).unwrap_err(),
            JwtValidationError::VerificationFailed
        );
    }

    #[test]
    fn test_verify_rejects_expired_token() {
        let now = chrono::Utc::now().timestamp();
        let mut claims = claims_at(now - 7200);
        claims.exp = now - 3600;
        let token = sign(&claims, SECRET);

        assert_eq!(
            verify_user_token(&token, SECRET, DEFAULT_CLOCK_SKEW).unwrap_err(),
            JwtValidationError::VerificationFailed
        );
    }

    #[test]
    fn test_verify_rejects_future_iat() {
        let now = chrono::Utc::now().timestamp();
        let mut claims = claims_at(now);
        claims.iat = now + 3600;
        claims.exp = now + 7200;
        let token = sign(&claims, SECRET);

        assert_eq!(
            verify_user_token(&token, SECRET, DEFAULT_CLOCK_SKEW).unwrap_err(),
            JwtValidationError::IatTooFarInFuture
        );
    }

    #[test]
    fn test_verify_rejects_oversized_token() {
        let token = "a".repeat(MAX_JWT_SIZE_BYTES + 1);
        assert_eq!(
            verify_user_token(&token, SECRET, DEFAULT_CLOCK_SKEW).unwrap_err(),
            JwtValidationError::TokenTooLarge
        );
    }

    #[test]
    fn test_verify_rejects_malformed_token() {
        for token in ["", "single", "only.two", "a.b.c.d"] {
            assert_eq!(
                verify_user_token(token, SECRET, DEFAULT_CLOCK_SKEW).unwrap_err(),
                JwtValidationError::MalformedToken,
                "token {token:?} should be malformed"
            );
        }
    }

    #[test]
    fn test_validate_iat_boundaries() {
        let now = 1_700_000_000;
        let skew = Duration::from_secs(300);

        assert!(validate_iat_at(now, skew, now).is_ok());
        assert!(validate_iat_at(now + 300, skew, now).is_ok());
        assert_eq!(
            validate_iat_at(now + 301, skew, now),
            Err(JwtValidationError::IatTooFarInFuture)
        );
        assert!(validate_iat_at(now - 86_400, skew, now).is_ok());
    }

    #[test]
    fn test_claims_debug_redacts_email() {
        let debug = format!("{:?}", claims_at(0));
        assert!(debug.contains("alice"));
        assert!(!debug.contains("example.com"));
    }

    #[test]
    fn test_error_messages_are_generic() {
        let messages: Vec<String> = [
            JwtValidationError::TokenTooLarge,
            JwtValidationError::MalformedToken,
            JwtValidationError::VerificationFailed,
            JwtValidationError::IatTooFarInFuture,
        ]
        .iter()
        .map(ToString::to_string)
        .collect();

        assert!(messages.iter().all(|m| m == "The access token is invalid or expired"));
    }
}
