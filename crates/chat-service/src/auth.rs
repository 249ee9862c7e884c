//! Auth collaborator boundary.
//!
//! A connection is admitted into a [`Session`](crate::actors::Session) only
//! after a [`TokenValidator`] accepts its token. This service never issues
//! or refreshes tokens.

use async_trait::async_trait;
use axum::http::HeaderMap;
use common::jwt::verify_user_token;
use common::secret::{ExposeSecret, SecretString};
use common::types::UserIdentity;
use std::time::Duration;

use crate::errors::ChatError;

/// Identity established by the auth collaborator.
pub type AuthenticatedUser = UserIdentity;

/// Validates an access token and returns who it belongs to.
#[async_trait]
pub trait TokenValidator: Send + Sync {
    /// # Errors
    ///
    /// `ChatError::InvalidToken` when the token is rejected.
    async fn validate(&self, token: &str) -> Result<AuthenticatedUser, ChatError>;
}

/// HS256 validator for tokens issued by the account service.
pub struct JwtTokenValidator {
    secret: SecretString,
    clock_skew: Duration,
}

impl JwtTokenValidator {
    #[must_use]
    pub fn new(secret: SecretString, clock_skew: Duration) -> Self {
        Self { secret, clock_skew }
    }
}

#[async_trait]
impl TokenValidator for JwtTokenValidator {
    async fn validate(&self, token: &str) -> Result<AuthenticatedUser, ChatError> {
        let claims = verify_user_token(
            token,
            self.secret.expose_secret().as_bytes(),
            self.clock_skew,
        )
        .map_err(|e| ChatError::InvalidToken(e.to_string()))?;

        Ok(claims.identity())
    }
}

/// Pull the access token from `Authorization: Bearer <t>`, falling back to
/// the `token` query parameter (browsers cannot set headers on upgrades).
#[must_use]
pub fn extract_token<'a>(headers: &'a HeaderMap, query_token: Option<&'a str>) -> Option<&'a str> {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .or(query_token)
        .filter(|t| !t.is_empty())
}
