//! Signed session tokens.
//!
//! Tokens are HS256 JWTs carrying the session id in `sub` and the session's
//! creation time in `created_ms`.
//!
//! # Pre-conditions
//! - The token must be a valid, properly formatted JWT.
//!
//! # Post-conditions
//! - On success, returns the claims naming the session.
//! - On failure, returns a descriptive error indicating what went wrong.
//!
//! # Invariants
//! - Expiry is checked against the server's `TimeSource`, not the wall clock,
//!   so simulated time drives token expiry the same way it drives sessions.

use std::sync::Arc;

use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};

use super::TokenConfig;
use crate::session::SessionId;
use crate::time::TimeSource;

/// Claims carried by a session token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionClaims {
    /// Session id as a decimal string.
    pub sub: String,
    /// Creation time of the session, in milliseconds since Unix epoch.
    pub created_ms: u64,
    /// Issued at, in seconds since Unix epoch.
    pub iat: u64,
    /// Expiry, in seconds since Unix epoch.
    pub exp: u64,
}

impl SessionClaims {
    /// The session id named by the `sub` claim.
    ///
    /// # Errors
    /// Returns `TokenError::InvalidSubject` if `sub` is not a session id.
    pub fn session_id(&self) -> Result<SessionId, TokenError> {
        self.sub.parse().map_err(|_| TokenError::InvalidSubject)
    }
}

/// Error returned when token issuing or verification fails.
#[derive(Debug)]
pub enum TokenError {
    /// The signature does not match.
    InvalidSignature,
    /// The token has expired.
    TokenExpired,
    /// The token is malformed or cannot be parsed.
    MalformedToken,
    /// The `sub` claim is missing or not a session id.
    InvalidSubject,
    /// Encoding a new token failed.
    Encoding(String),
}

impl std::fmt::Display for TokenError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidSignature => write!(f, "invalid token signature"),
            Self::TokenExpired => write!(f, "token has expired"),
            Self::MalformedToken => write!(f, "malformed token"),
            Self::InvalidSubject => write!(f, "token does not name a session"),
            Self::Encoding(reason) => write!(f, "failed to encode token: {reason}"),
        }
    }
}

impl std::error::Error for TokenError {}

/// Issues and verifies session tokens.
pub struct SessionTokens {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    lifetime_secs: u64,
    time: Arc<dyn TimeSource>,
}

impl SessionTokens {
    #[must_use]
    pub fn new(config: &TokenConfig, time: Arc<dyn TimeSource>) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        // Expiry is checked against `time` in `verify`.
        validation.validate_exp = false;
        validation.set_required_spec_claims(&["exp", "sub"]);

        Self {
            encoding_key: EncodingKey::from_secret(config.secret()),
            decoding_key: DecodingKey::from_secret(config.secret()),
            validation,
            lifetime_secs: config.lifetime_secs,
            time,
        }
    }

    /// Issue a token for the session `id` created at `created_ms`.
    ///
    /// # Errors
    /// Returns `TokenError::Encoding` if signing fails.
    pub fn issue(&self, id: SessionId, created_ms: u64) -> Result<String, TokenError> {
        let iat = self.time.now_secs();
        let claims = SessionClaims {
            sub: id.to_string(),
            created_ms,
            iat,
            exp: iat.saturating_add(self.lifetime_secs),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| TokenError::Encoding(e.to_string()))
    }

    /// Verify a token and return its claims.
    ///
    /// # Errors
    /// Returns `TokenError` if the token is forged, malformed, expired, or
    /// does not name a session.
    pub fn verify(&self, token: &str) -> Result<SessionClaims, TokenError> {
        let claims = decode::<SessionClaims>(token, &self.decoding_key, &self.validation)
            .map_err(map_jwt_error)?
            .claims;

        if self.time.now_secs() > claims.exp {
            return Err(TokenError::TokenExpired);
        }
        claims.session_id()?;

        Ok(claims)
    }
}

/// Maps jsonwebtoken errors to our `TokenError` type.
fn map_jwt_error(error: jsonwebtoken::errors::Error) -> TokenError {
    use jsonwebtoken::errors::ErrorKind;

    match error.kind() {
        ErrorKind::InvalidSignature => TokenError::InvalidSignature,
        ErrorKind::ExpiredSignature => TokenError::TokenExpired,
        ErrorKind::MissingRequiredClaim(_) => TokenError::InvalidSubject,
        _ => TokenError::MalformedToken,
    }
}
